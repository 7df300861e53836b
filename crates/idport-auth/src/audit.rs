//! Redirection audit records.
//!
//! Every inbound callback writes one [`Redirection`] record before any
//! other side effect, so a request that later fails is still traceable to
//! its raw inbound values. Records are write-once; there is no update or
//! delete path.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use idport_storage::DynStorage;

use crate::error::BrokerError;
use crate::store::{self, Versioned};

/// One inbound callback, as received.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redirection {
    /// Request id, doubling as the storage key.
    pub id: Uuid,
    /// The method the callback addressed.
    pub method_id: Uuid,
    /// The raw inbound parameter map.
    pub values: HashMap<String, String>,
    /// The referrer the user arrived from, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirected_from: Option<Url>,
    /// When the callback was received.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Redirection {
    /// Captures an inbound callback.
    #[must_use]
    pub fn new(
        id: Uuid,
        method_id: Uuid,
        values: HashMap<String, String>,
        redirected_from: Option<Url>,
    ) -> Self {
        Self {
            id,
            method_id,
            values,
            redirected_from,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

const RESOURCE: &str = "redirection";

fn record_key(id: Uuid) -> String {
    format!("redirection:{id}")
}

/// Write-once store for redirection audit records.
#[derive(Clone)]
pub struct RedirectionLog {
    storage: DynStorage,
}

impl RedirectionLog {
    /// Creates a log over the given storage backend.
    #[must_use]
    pub fn new(storage: DynStorage) -> Self {
        Self { storage }
    }

    /// Persists the audit record.
    ///
    /// # Errors
    ///
    /// A request id collision means a broken generator or a duplicated
    /// request id; it is surfaced as `BrokerError::Internal` and never
    /// retried with the same id.
    pub async fn record(&self, redirection: &Redirection) -> Result<(), BrokerError> {
        let key = record_key(redirection.id);
        match store::create(self.storage.as_ref(), RESOURCE, &key, redirection).await {
            Ok(_) => Ok(()),
            Err(BrokerError::Conflict { key, .. }) => Err(BrokerError::internal(format!(
                "redirection id collision at {key}"
            ))),
            Err(other) => Err(other),
        }
    }

    /// Loads an audit record by request id.
    pub async fn load(&self, id: Uuid) -> Result<Option<Versioned<Redirection>>, BrokerError> {
        store::load(self.storage.as_ref(), &record_key(id)).await
    }
}

impl std::fmt::Debug for RedirectionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectionLog").finish_non_exhaustive()
    }
}
