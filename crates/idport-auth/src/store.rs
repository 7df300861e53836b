//! Typed record access over the key-value storage contract.
//!
//! Domain records are serde structs; this module moves them through the
//! storage layer's JSON envelope and translates storage failures into
//! broker errors carrying the record kind for context.

use serde::Serialize;
use serde::de::DeserializeOwned;

use idport_storage::{KeyValueStorage, StorageError};

use crate::error::BrokerError;

/// A domain record together with the storage version it was read at.
///
/// The version must be passed back on save so the write is a
/// compare-and-swap against exactly the state that was read.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    /// The deserialized record.
    pub record: T,
    /// The storage version observed at read time.
    pub version: u64,
}

fn encode<T: Serialize>(record: &T) -> Result<serde_json::Value, BrokerError> {
    serde_json::to_value(record).map_err(|e| BrokerError::storage(format!("encode: {e}")))
}

fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, BrokerError> {
    serde_json::from_value(value).map_err(|e| BrokerError::storage(format!("decode: {e}")))
}

/// Reads the record at `key`, returning `None` if absent.
pub(crate) async fn load<T: DeserializeOwned>(
    storage: &dyn KeyValueStorage,
    key: &str,
) -> Result<Option<Versioned<T>>, BrokerError> {
    match storage.get(key).await? {
        Some(stored) => Ok(Some(Versioned {
            record: decode(stored.value)?,
            version: stored.version,
        })),
        None => Ok(None),
    }
}

/// Conditionally creates `record` at `key`.
///
/// # Errors
///
/// Returns `BrokerError::Conflict` naming `resource` if the key is
/// already occupied.
pub(crate) async fn create<T: Serialize>(
    storage: &dyn KeyValueStorage,
    resource: &'static str,
    key: &str,
    record: &T,
) -> Result<u64, BrokerError> {
    let value = encode(record)?;
    match storage.create(key, &value).await {
        Ok(stored) => Ok(stored.version),
        Err(StorageError::AlreadyExists { key }) => Err(BrokerError::conflict(resource, key)),
        Err(other) => Err(other.into()),
    }
}

/// Saves `record` at `key` with compare-and-swap against
/// `expected_version`. Returns the new version.
///
/// # Errors
///
/// Returns `BrokerError::Conflict` naming `resource` on a version
/// conflict, `BrokerError::NotFound` if the record vanished.
pub(crate) async fn save<T: Serialize>(
    storage: &dyn KeyValueStorage,
    resource: &'static str,
    key: &str,
    record: &T,
    expected_version: u64,
) -> Result<u64, BrokerError> {
    let value = encode(record)?;
    match storage.update(key, &value, expected_version).await {
        Ok(stored) => Ok(stored.version),
        Err(StorageError::VersionConflict { key, .. }) => Err(BrokerError::conflict(resource, key)),
        Err(StorageError::NotFound { key }) => Err(BrokerError::not_found(resource, key)),
        Err(other) => Err(other.into()),
    }
}

/// Deletes the record at `key` with compare-and-swap against
/// `expected_version`.
pub(crate) async fn remove(
    storage: &dyn KeyValueStorage,
    resource: &'static str,
    key: &str,
    expected_version: u64,
) -> Result<(), BrokerError> {
    match storage.delete(key, expected_version).await {
        Ok(()) => Ok(()),
        Err(StorageError::VersionConflict { key, .. }) => Err(BrokerError::conflict(resource, key)),
        Err(StorageError::NotFound { key }) => Err(BrokerError::not_found(resource, key)),
        Err(other) => Err(other.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idport_db_memory::InMemoryStorage;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
    }

    #[tokio::test]
    async fn test_create_load_save_roundtrip() {
        let storage = InMemoryStorage::new();
        let sample = Sample {
            name: "a".to_string(),
        };

        let version = create(&storage, "sample", "sample:1", &sample).await.unwrap();
        assert_eq!(version, 1);

        let loaded: Versioned<Sample> = load(&storage, "sample:1").await.unwrap().unwrap();
        assert_eq!(loaded.record, sample);
        assert_eq!(loaded.version, 1);

        let updated = Sample {
            name: "b".to_string(),
        };
        let version = save(&storage, "sample", "sample:1", &updated, loaded.version)
            .await
            .unwrap();
        assert_eq!(version, 2);

        let loaded: Versioned<Sample> = load(&storage, "sample:1").await.unwrap().unwrap();
        assert_eq!(loaded.record.name, "b");
    }

    #[tokio::test]
    async fn test_create_conflict_names_resource() {
        let storage = InMemoryStorage::new();
        let sample = Sample {
            name: "a".to_string(),
        };
        create(&storage, "sample", "sample:1", &sample).await.unwrap();

        let err = create(&storage, "sample", "sample:1", &sample)
            .await
            .unwrap_err();
        match err {
            BrokerError::Conflict { resource, key } => {
                assert_eq!(resource, "sample");
                assert_eq!(key, "sample:1");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_save_stale_version_conflicts() {
        let storage = InMemoryStorage::new();
        let sample = Sample {
            name: "a".to_string(),
        };
        create(&storage, "sample", "sample:1", &sample).await.unwrap();
        save(&storage, "sample", "sample:1", &sample, 1).await.unwrap();

        let err = save(&storage, "sample", "sample:1", &sample, 1)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_load_missing() {
        let storage = InMemoryStorage::new();
        let loaded: Option<Versioned<Sample>> = load(&storage, "missing").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let storage = InMemoryStorage::new();
        let sample = Sample {
            name: "a".to_string(),
        };
        create(&storage, "sample", "sample:1", &sample).await.unwrap();
        remove(&storage, "sample", "sample:1", 1).await.unwrap();

        let loaded: Option<Versioned<Sample>> = load(&storage, "sample:1").await.unwrap();
        assert!(loaded.is_none());
    }
}
