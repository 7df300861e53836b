//! In-memory key-value storage backend using papaya lock-free HashMap.

use std::sync::Arc;

use async_trait::async_trait;
use papaya::{Compute, HashMap as PapayaHashMap, Operation};
use serde_json::Value;

use idport_storage::{KeyValueStorage, StorageError, StoredRecord};

/// In-memory storage backend.
///
/// This backend provides:
/// - Lock-free concurrent access via `papaya::HashMap`
/// - Atomic conditional create (insert-if-absent)
/// - Atomic compare-and-swap update and delete
///
/// It is intended for tests and single-process embedding; records do not
/// survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    data: Arc<PapayaHashMap<String, StoredRecord>>,
}

impl InMemoryStorage {
    /// Creates a new, empty in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(PapayaHashMap::new()),
        }
    }

    /// Returns the number of records currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.pin().len()
    }

    /// Returns `true` if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStorage for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<StoredRecord>, StorageError> {
        let guard = self.data.pin();
        Ok(guard.get(key).cloned())
    }

    async fn create(&self, key: &str, value: &Value) -> Result<StoredRecord, StorageError> {
        let record = StoredRecord::new(key, value.clone());
        let guard = self.data.pin();
        match guard.try_insert(key.to_string(), record.clone()) {
            Ok(_) => Ok(record),
            Err(_) => Err(StorageError::already_exists(key)),
        }
    }

    async fn update(
        &self,
        key: &str,
        value: &Value,
        expected_version: u64,
    ) -> Result<StoredRecord, StorageError> {
        let guard = self.data.pin();
        let compute = guard.compute(key.to_string(), |entry| match entry {
            None => Operation::Abort(StorageError::not_found(key)),
            Some((_, current)) if current.version != expected_version => Operation::Abort(
                StorageError::version_conflict(key, expected_version, current.version),
            ),
            Some((_, current)) => Operation::Insert(current.with_update(value.clone())),
        });
        match compute {
            Compute::Updated { new: (_, record), .. } => Ok(record.clone()),
            Compute::Aborted(err) => Err(err),
            // compute never inserts or removes here
            _ => Err(StorageError::internal("unexpected compute outcome")),
        }
    }

    async fn delete(&self, key: &str, expected_version: u64) -> Result<(), StorageError> {
        let guard = self.data.pin();
        let compute = guard.compute(key.to_string(), |entry| match entry {
            None => Operation::Abort(StorageError::not_found(key)),
            Some((_, current)) if current.version != expected_version => Operation::Abort(
                StorageError::version_conflict(key, expected_version, current.version),
            ),
            Some(_) => Operation::Remove,
        });
        match compute {
            Compute::Removed(..) => Ok(()),
            Compute::Aborted(err) => Err(err),
            _ => Err(StorageError::internal("unexpected compute outcome")),
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_and_get() {
        let storage = InMemoryStorage::new();

        let created = storage.create("k1", &json!({"a": 1})).await.unwrap();
        assert_eq!(created.version, 1);

        let loaded = storage.get("k1").await.unwrap().unwrap();
        assert_eq!(loaded.value["a"], 1);
        assert_eq!(loaded.version, 1);

        assert!(storage.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conditional_create_rejects_existing_key() {
        let storage = InMemoryStorage::new();

        storage.create("k1", &json!({"a": 1})).await.unwrap();
        let err = storage.create("k1", &json!({"a": 2})).await.unwrap_err();
        assert!(err.is_already_exists());

        // The first write wins and is untouched.
        let loaded = storage.get("k1").await.unwrap().unwrap();
        assert_eq!(loaded.value["a"], 1);
    }

    #[tokio::test]
    async fn test_concurrent_creates_exactly_one_winner() {
        let storage = Arc::new(InMemoryStorage::new());

        let mut handles = Vec::new();
        for i in 0..16 {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                storage.create("contested", &json!({ "writer": i })).await
            }));
        }

        let mut winners = 0;
        let mut losers = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(err) => {
                    assert!(err.is_already_exists());
                    losers += 1;
                }
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(losers, 15);
    }

    #[tokio::test]
    async fn test_cas_update() {
        let storage = InMemoryStorage::new();
        storage.create("k1", &json!({"a": 1})).await.unwrap();

        let updated = storage.update("k1", &json!({"a": 2}), 1).await.unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.value["a"], 2);

        // Stale version is rejected.
        let err = storage.update("k1", &json!({"a": 3}), 1).await.unwrap_err();
        assert!(err.is_version_conflict());

        // Missing key is rejected.
        let err = storage.update("nope", &json!({}), 1).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cas_delete() {
        let storage = InMemoryStorage::new();
        storage.create("k1", &json!({"a": 1})).await.unwrap();

        let err = storage.delete("k1", 7).await.unwrap_err();
        assert!(err.is_version_conflict());

        storage.delete("k1", 1).await.unwrap();
        assert!(storage.get("k1").await.unwrap().is_none());

        let err = storage.delete("k1", 1).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_preserves_created_at() {
        let storage = InMemoryStorage::new();
        let created = storage.create("k1", &json!({"a": 1})).await.unwrap();
        let updated = storage.update("k1", &json!({"a": 2}), 1).await.unwrap();
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[test]
    fn test_backend_name() {
        assert_eq!(InMemoryStorage::new().backend_name(), "memory");
    }
}
