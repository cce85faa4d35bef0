//! Storage infrastructure - Storage implementations

mod factory;
mod in_memory;
mod sqlite;

pub use factory::{StorageConfig, StorageFactory, StorageType};
pub use in_memory::InMemoryStorage;
pub use sqlite::{connect_pool, SqliteConfig, SqliteStorage};
