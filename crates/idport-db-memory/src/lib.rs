//! In-memory storage backend for the idport identity broker.
//!
//! This crate provides an in-memory implementation of the
//! [`KeyValueStorage`] trait from `idport-storage`, using the papaya
//! lock-free HashMap for concurrent access.
//!
//! # Example
//!
//! ```ignore
//! use idport_db_memory::InMemoryStorage;
//! use idport_storage::KeyValueStorage;
//!
//! let storage = InMemoryStorage::new();
//! let record = storage.create("greeting", &serde_json::json!({"hello": "world"})).await?;
//! ```

pub mod storage;

pub use idport_storage::{KeyValueStorage, StorageError, StoredRecord};
pub use storage::InMemoryStorage;

/// Creates a new in-memory storage instance behind a shareable pointer.
#[must_use]
pub fn create_storage() -> idport_storage::DynStorage {
    std::sync::Arc::new(InMemoryStorage::new())
}
