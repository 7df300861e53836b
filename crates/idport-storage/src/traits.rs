//! Storage traits for the key-value storage abstraction layer.
//!
//! This module defines the contract that all storage backends must implement.
//!
//! The broker's uniqueness invariants (one external identity per account
//! mapping, one mapping per authorization) are enforced entirely through
//! the conditional-create semantics of [`KeyValueStorage::create`]: the
//! operation either installs the record or fails with
//! `StorageError::AlreadyExists`. No backend may weaken this to a blind
//! upsert, and no caller may treat `AlreadyExists` as success.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;
use crate::types::StoredRecord;

/// The storage trait all backends must implement.
///
/// Implementations must be thread-safe (`Send + Sync`). Reads see the
/// latest committed write for a key; there is no cross-key transaction
/// support and none is needed by the broker core.
///
/// # Example
///
/// ```ignore
/// use idport_storage::{KeyValueStorage, StorageError};
///
/// async fn load(storage: &dyn KeyValueStorage, key: &str) -> Result<StoredRecord, StorageError> {
///     storage
///         .get(key)
///         .await?
///         .ok_or_else(|| StorageError::not_found(key))
/// }
/// ```
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    /// Reads the record stored at `key`.
    ///
    /// Returns `None` if no record exists.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, not for missing
    /// records.
    async fn get(&self, key: &str) -> Result<Option<StoredRecord>, StorageError>;

    /// Conditionally creates a record at `key`.
    ///
    /// The create succeeds only if no record exists at the key. This must
    /// be atomic with respect to concurrent creates of the same key:
    /// exactly one caller observes success, every other caller observes
    /// `AlreadyExists`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if a record exists at the key.
    async fn create(&self, key: &str, value: &Value) -> Result<StoredRecord, StorageError>;

    /// Updates the record at `key` using compare-and-swap.
    ///
    /// The update succeeds only if the stored version equals
    /// `expected_version`; on success the version is bumped by one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no record exists at the key.
    /// Returns `StorageError::VersionConflict` if the stored version
    /// differs from `expected_version`.
    async fn update(
        &self,
        key: &str,
        value: &Value,
        expected_version: u64,
    ) -> Result<StoredRecord, StorageError>;

    /// Deletes the record at `key` using compare-and-swap.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no record exists at the key.
    /// Returns `StorageError::VersionConflict` if the stored version
    /// differs from `expected_version`.
    async fn delete(&self, key: &str, expected_version: u64) -> Result<(), StorageError>;

    /// Returns the name of this storage backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

// Ensure the trait is object-safe by using it as a trait object
#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test that KeyValueStorage is object-safe
    fn _assert_storage_object_safe(_: &dyn KeyValueStorage) {}
}
