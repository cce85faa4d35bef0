//! In-memory storage implementation

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::domain::storage::{Storage, StorageEntity, StorageKey};
use crate::domain::DomainError;

/// Thread-safe in-memory storage
///
/// Entities are kept ordered by key so listings are stable. Data is lost when
/// the process terminates.
#[derive(Debug)]
pub struct InMemoryStorage<E>
where
    E: StorageEntity,
{
    entities: RwLock<BTreeMap<String, E>>,
}

impl<E> Default for InMemoryStorage<E>
where
    E: StorageEntity,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> InMemoryStorage<E>
where
    E: StorageEntity,
{
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(BTreeMap::new()),
        }
    }

    /// Creates storage pre-populated with entities
    pub fn with_entities(entities: Vec<E>) -> Self {
        Self {
            entities: RwLock::new(
                entities
                    .into_iter()
                    .map(|entity| (entity.key().as_str().to_string(), entity))
                    .collect(),
            ),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, E>>, DomainError> {
        self.entities
            .read()
            .map_err(|e| DomainError::storage(format!("Failed to acquire read lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, E>>, DomainError> {
        self.entities
            .write()
            .map_err(|e| DomainError::storage(format!("Failed to acquire write lock: {}", e)))
    }
}

#[async_trait]
impl<E> Storage<E> for InMemoryStorage<E>
where
    E: StorageEntity + 'static,
{
    async fn get(&self, key: &E::Key) -> Result<Option<E>, DomainError> {
        Ok(self.read()?.get(key.as_str()).cloned())
    }

    async fn list(&self) -> Result<Vec<E>, DomainError> {
        Ok(self.read()?.values().cloned().collect())
    }

    async fn create(&self, entity: E) -> Result<E, DomainError> {
        let key = entity.key().as_str().to_string();
        let mut entities = self.write()?;

        if entities.contains_key(&key) {
            return Err(DomainError::conflict(format!(
                "Entity with key '{}' already exists",
                key
            )));
        }

        entities.insert(key, entity.clone());
        Ok(entity)
    }

    async fn update(&self, entity: E) -> Result<E, DomainError> {
        let key = entity.key().as_str().to_string();
        let mut entities = self.write()?;

        match entities.get_mut(&key) {
            Some(slot) => {
                *slot = entity.clone();
                Ok(entity)
            }
            None => Err(DomainError::not_found(format!(
                "Entity with key '{}' not found",
                key
            ))),
        }
    }

    async fn save(&self, entity: E) -> Result<E, DomainError> {
        self.write()?
            .insert(entity.key().as_str().to_string(), entity.clone());
        Ok(entity)
    }

    async fn delete(&self, key: &E::Key) -> Result<bool, DomainError> {
        Ok(self.write()?.remove(key.as_str()).is_some())
    }

    async fn exists(&self, key: &E::Key) -> Result<bool, DomainError> {
        Ok(self.read()?.contains_key(key.as_str()))
    }

    async fn count(&self) -> Result<usize, DomainError> {
        Ok(self.read()?.len())
    }

    async fn clear(&self) -> Result<(), DomainError> {
        self.write()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workflow::{
        RunId, RunStatus, StepKind, TransformStep, WorkflowId, WorkflowRun, WorkflowStep,
        WorkflowTemplate,
    };

    fn workflow(id: &str, name: &str) -> WorkflowTemplate {
        WorkflowTemplate::new(WorkflowId::new(id).unwrap(), name).with_step(WorkflowStep::new(
            "reshape",
            "Reshape",
            StepKind::Transform(TransformStep::new().with_mapping("text", "$.initial_step")),
        ))
    }

    fn id(value: &str) -> WorkflowId {
        WorkflowId::new(value).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let storage = InMemoryStorage::new();
        let wf = workflow("digest", "Digest");

        storage.create(wf.clone()).await.unwrap();

        assert_eq!(storage.get(&id("digest")).await.unwrap(), Some(wf));
        assert_eq!(storage.get(&id("missing")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_create_conflict() {
        let storage = InMemoryStorage::new();
        storage.create(workflow("digest", "Digest")).await.unwrap();

        let result = storage.create(workflow("digest", "Again")).await;
        assert!(matches!(result, Err(DomainError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_update_requires_existing() {
        let storage = InMemoryStorage::new();

        let result = storage.update(workflow("digest", "Digest")).await;
        assert!(matches!(result, Err(DomainError::NotFound { .. })));

        storage.create(workflow("digest", "Digest")).await.unwrap();
        storage.update(workflow("digest", "Renamed")).await.unwrap();

        let stored = storage.get(&id("digest")).await.unwrap().unwrap();
        assert_eq!(stored.name(), "Renamed");
    }

    #[tokio::test]
    async fn test_save_upserts() {
        let storage = InMemoryStorage::new();

        storage.save(workflow("digest", "First")).await.unwrap();
        storage.save(workflow("digest", "Second")).await.unwrap();

        assert_eq!(storage.count().await.unwrap(), 1);
        let stored = storage.get(&id("digest")).await.unwrap().unwrap();
        assert_eq!(stored.name(), "Second");
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let storage = InMemoryStorage::new();
        storage.create(workflow("digest", "Digest")).await.unwrap();

        assert!(storage.delete(&id("digest")).await.unwrap());
        assert!(!storage.delete(&id("digest")).await.unwrap());
        assert!(!storage.exists(&id("digest")).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_key() {
        let storage = InMemoryStorage::with_entities(vec![
            workflow("zeta", "Z"),
            workflow("alpha", "A"),
            workflow("mid", "M"),
        ]);

        let names: Vec<String> = storage
            .list()
            .await
            .unwrap()
            .iter()
            .map(|wf| wf.name().to_string())
            .collect();
        assert_eq!(names, vec!["A", "M", "Z"]);

        storage.clear().await.unwrap();
        assert_eq!(storage.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stores_run_records() {
        let storage = InMemoryStorage::new();
        let run_id = RunId::generate();
        let mut run = WorkflowRun::new(run_id.clone(), id("digest"));
        run.status = RunStatus::Success;

        storage.save(run).await.unwrap();

        let stored = storage.get(&run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Success);
    }
}
