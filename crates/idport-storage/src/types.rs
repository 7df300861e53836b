//! Record types for the key-value storage abstraction layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// A record as stored by a backend.
///
/// Every record is addressed by a single unique key and carries a
/// monotonically increasing version used for compare-and-swap updates.
/// The payload is an opaque JSON value; domain crates (de)serialize their
/// own record structs at the edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    /// The unique key this record is stored under.
    pub key: String,

    /// Version of this record, bumped on every successful update.
    pub version: u64,

    /// The record payload.
    pub value: Value,

    /// When the record was first created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// When the record was last updated.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl StoredRecord {
    /// Creates a new record at version 1 with both timestamps set to now.
    #[must_use]
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            key: key.into(),
            version: 1,
            value,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns a copy with the payload replaced, the version bumped and
    /// `updated_at` refreshed.
    #[must_use]
    pub fn with_update(&self, value: Value) -> Self {
        Self {
            key: self.key.clone(),
            version: self.version + 1,
            value,
            created_at: self.created_at,
            updated_at: OffsetDateTime::now_utc(),
        }
    }
}
