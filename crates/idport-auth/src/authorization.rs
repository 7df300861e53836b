//! Authorization records.
//!
//! An [`Authorization`] is the correlation record for one authentication
//! handshake. Its id travels through redirect URLs and therefore acts as a
//! bearer correlation token, the same role OAuth gives its `state`
//! parameter, so it is always generated with a cryptographically
//! unpredictable generator.
//!
//! Authorization records are never deleted. A completed handshake stays on
//! record as an audit trail; further activity mutates fields but the
//! `authorized` flag never goes back to `false`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use idport_storage::DynStorage;

use crate::error::BrokerError;
use crate::store::{self, Versioned};

/// One authentication handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    /// Unguessable correlation id.
    pub id: String,

    /// The method this handshake belongs to.
    pub method_id: Uuid,

    /// Provider logout URL, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_logout: Option<Url>,

    /// Where to send the user after provider logout completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_logout_return: Option<Url>,

    /// The provider login URL this handshake was redirected to. Cleared
    /// once redemption succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_authentication: Option<Url>,

    /// Where to send the user after authentication completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_authentication_return: Option<Url>,

    /// Provider-specific parameters accumulated across the handshake.
    #[serde(default)]
    pub parameters: HashMap<String, String>,

    /// `true` only after a provider successfully redeemed credentials
    /// against this record. Mere existence does not imply success.
    pub authorized: bool,

    /// The bound account, set at most once per successful mapping
    /// resolution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<Uuid>,

    /// When the record was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Authorization {
    /// Creates a new unauthorized record for `method_id` with a fresh
    /// secure id.
    #[must_use]
    pub fn new(method_id: Uuid) -> Self {
        Self {
            id: Self::generate_id(),
            method_id,
            location_logout: None,
            location_logout_return: None,
            location_authentication: None,
            location_authentication_return: None,
            parameters: HashMap::new(),
            authorized: false,
            account_id: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Generates a cryptographically random authorization id.
    ///
    /// Returns a 256-bit random value encoded as base64url (43 characters).
    #[must_use]
    pub fn generate_id() -> String {
        use base64::Engine;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let mut bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Marks the handshake redeemed and folds in the provider parameters.
    ///
    /// The pending login URL is cleared; the handshake is over.
    pub fn mark_authorized(&mut self, parameters: HashMap<String, String>) {
        self.parameters.extend(parameters);
        self.authorized = true;
        self.location_authentication = None;
    }
}

/// Typed access to authorization records in the key-value store.
#[derive(Clone)]
pub struct AuthorizationStore {
    storage: DynStorage,
}

const RESOURCE: &str = "authorization";

fn record_key(id: &str) -> String {
    format!("authorization:{id}")
}

impl AuthorizationStore {
    /// Creates a store over the given storage backend.
    #[must_use]
    pub fn new(storage: DynStorage) -> Self {
        Self { storage }
    }

    /// Persists a new authorization record.
    ///
    /// # Errors
    ///
    /// The id space is large enough that an occupied key means a broken
    /// generator; that case is surfaced as `BrokerError::Internal` rather
    /// than a recoverable conflict.
    pub async fn create(&self, authorization: &Authorization) -> Result<u64, BrokerError> {
        let key = record_key(&authorization.id);
        match store::create(self.storage.as_ref(), RESOURCE, &key, authorization).await {
            Ok(version) => {
                tracing::debug!(
                    authorization_id = %authorization.id,
                    method_id = %authorization.method_id,
                    "Created authorization"
                );
                Ok(version)
            }
            Err(BrokerError::Conflict { key, .. }) => Err(BrokerError::internal(format!(
                "authorization id collision at {key}: generator must be broken"
            ))),
            Err(other) => Err(other),
        }
    }

    /// Loads an authorization by id, returning `None` if absent.
    pub async fn load(&self, id: &str) -> Result<Option<Versioned<Authorization>>, BrokerError> {
        store::load(self.storage.as_ref(), &record_key(id)).await
    }

    /// Saves a mutated authorization with compare-and-swap against the
    /// version it was loaded at. Returns the new version.
    pub async fn save(
        &self,
        authorization: &Authorization,
        expected_version: u64,
    ) -> Result<u64, BrokerError> {
        store::save(
            self.storage.as_ref(),
            RESOURCE,
            &record_key(&authorization.id),
            authorization,
            expected_version,
        )
        .await
    }
}

impl std::fmt::Debug for AuthorizationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationStore").finish_non_exhaustive()
    }
}
