//! SQLite storage implementation
//!
//! Entities are stored as JSON text in a `(key, data, created_at, updated_at)`
//! table, one table per entity type.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::warn;

use crate::domain::storage::{Storage, StorageEntity, StorageKey};
use crate::domain::DomainError;

/// SQLite storage configuration
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database URL, e.g. `sqlite://data/litechat.db`
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://litechat.db".to_string(),
            max_connections: 4,
            busy_timeout_secs: 5,
        }
    }
}

impl SqliteConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

/// Opens a WAL-mode pool, creating the database file when missing
pub async fn connect_pool(config: &SqliteConfig) -> Result<SqlitePool, DomainError> {
    let options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| DomainError::configuration(format!("Invalid SQLite URL: {}", e)))?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs))
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .connect_with(options)
        .await
        .map_err(|e| DomainError::storage(format!("Failed to open SQLite database: {}", e)))
}

/// JSON document storage over a SQLite table
pub struct SqliteStorage<E>
where
    E: StorageEntity,
{
    pool: SqlitePool,
    table_name: String,
    _phantom: PhantomData<E>,
}

impl<E> Debug for SqliteStorage<E>
where
    E: StorageEntity,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("table_name", &self.table_name)
            .finish()
    }
}

impl<E> SqliteStorage<E>
where
    E: StorageEntity,
{
    pub fn new(pool: SqlitePool, table_name: impl Into<String>) -> Self {
        Self {
            pool,
            table_name: table_name.into(),
            _phantom: PhantomData,
        }
    }

    pub async fn connect(
        config: &SqliteConfig,
        table_name: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let pool = connect_pool(config).await?;
        Ok(Self::new(pool, table_name))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn ensure_table(&self) -> Result<(), DomainError> {
        let query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                key TEXT PRIMARY KEY NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )
            "#,
            self.table_name
        );

        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to create table: {}", e)))?;

        Ok(())
    }

    fn encode(entity: &E) -> Result<String, DomainError> {
        serde_json::to_string(entity)
            .map_err(|e| DomainError::storage(format!("Failed to serialize entity: {}", e)))
    }

    /// Rows are checked against the entity's document rules before
    /// deserialization, so hand-edited or stale rows surface as errors.
    fn decode(row: &SqliteRow) -> Result<E, DomainError> {
        let key: String = row
            .try_get("key")
            .map_err(|e| DomainError::storage(format!("Failed to read key column: {}", e)))?;
        let data: String = row
            .try_get("data")
            .map_err(|e| DomainError::storage(format!("Failed to read data column: {}", e)))?;

        let document: serde_json::Value = serde_json::from_str(&data).map_err(|e| {
            DomainError::storage(format!("Stored entity '{}' is not valid JSON: {}", key, e))
        })?;

        E::check_document(&document).map_err(|message| {
            DomainError::storage(format!("Stored entity '{}' is invalid: {}", key, message))
        })?;

        serde_json::from_value(document).map_err(|e| {
            DomainError::storage(format!("Failed to deserialize entity '{}': {}", key, e))
        })
    }
}

#[async_trait]
impl<E> Storage<E> for SqliteStorage<E>
where
    E: StorageEntity + 'static,
{
    async fn get(&self, key: &E::Key) -> Result<Option<E>, DomainError> {
        let query = format!("SELECT key, data FROM {} WHERE key = ?1", self.table_name);

        let row = sqlx::query(&query)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to get entity: {}", e)))?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn list(&self) -> Result<Vec<E>, DomainError> {
        let query = format!("SELECT key, data FROM {} ORDER BY key", self.table_name);

        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to list entities: {}", e)))?;

        // Undecodable rows are logged and skipped
        Ok(rows
            .iter()
            .filter_map(|row| match Self::decode(row) {
                Ok(entity) => Some(entity),
                Err(e) => {
                    warn!(table = %self.table_name, error = %e, "Skipping undecodable row");
                    None
                }
            })
            .collect())
    }

    async fn create(&self, entity: E) -> Result<E, DomainError> {
        let key = entity.key().as_str().to_string();
        let data = Self::encode(&entity)?;
        let query = format!("INSERT INTO {} (key, data) VALUES (?1, ?2)", self.table_name);

        sqlx::query(&query)
            .bind(&key)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(|e| match e.as_database_error() {
                Some(db) if db.is_unique_violation() => {
                    DomainError::conflict(format!("Entity with key '{}' already exists", key))
                }
                _ => DomainError::storage(format!("Failed to create entity: {}", e)),
            })?;

        Ok(entity)
    }

    async fn update(&self, entity: E) -> Result<E, DomainError> {
        let key = entity.key().as_str().to_string();
        let data = Self::encode(&entity)?;
        let query = format!(
            r#"
            UPDATE {}
            SET data = ?2, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE key = ?1
            "#,
            self.table_name
        );

        let result = sqlx::query(&query)
            .bind(&key)
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to update entity: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::not_found(format!(
                "Entity with key '{}' not found",
                key
            )));
        }

        Ok(entity)
    }

    async fn save(&self, entity: E) -> Result<E, DomainError> {
        let data = Self::encode(&entity)?;
        let query = format!(
            r#"
            INSERT INTO {} (key, data) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE
            SET data = excluded.data, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            "#,
            self.table_name
        );

        sqlx::query(&query)
            .bind(entity.key().as_str())
            .bind(&data)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to save entity: {}", e)))?;

        Ok(entity)
    }

    async fn delete(&self, key: &E::Key) -> Result<bool, DomainError> {
        let query = format!("DELETE FROM {} WHERE key = ?1", self.table_name);

        let result = sqlx::query(&query)
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to delete entity: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, key: &E::Key) -> Result<bool, DomainError> {
        let query = format!("SELECT COUNT(*) AS count FROM {} WHERE key = ?1", self.table_name);

        let row = sqlx::query(&query)
            .bind(key.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to check existence: {}", e)))?;

        let count: i64 = row
            .try_get("count")
            .map_err(|e| DomainError::storage(format!("Failed to read count: {}", e)))?;
        Ok(count > 0)
    }

    async fn count(&self) -> Result<usize, DomainError> {
        let query = format!("SELECT COUNT(*) AS count FROM {}", self.table_name);

        let row = sqlx::query(&query)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to count entities: {}", e)))?;

        let count: i64 = row
            .try_get("count")
            .map_err(|e| DomainError::storage(format!("Failed to read count: {}", e)))?;
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<(), DomainError> {
        let query = format!("DELETE FROM {}", self.table_name);

        sqlx::query(&query)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage(format!("Failed to clear storage: {}", e)))?;

        Ok(())
    }
}
