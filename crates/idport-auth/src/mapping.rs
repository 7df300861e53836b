//! Account mappings: the durable binding from an external identity to an
//! internal account.
//!
//! A mapping is one primary record plus two secondary index records, all
//! written with conditional creates so each uniqueness invariant is
//! enforced by the store rather than a lock:
//!
//! - the primary record, keyed by `(method, account)` - one mapping per
//!   account per method
//! - a key lookup, keyed by `(method, sha256(external key))` - one mapping
//!   per external identity per method
//! - an authorization lookup, keyed by the creating authorization's id -
//!   at most one mapping per authorization
//!
//! The external key is hashed into the index key so raw identities (often
//! email addresses) never appear in storage keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

use idport_storage::DynStorage;

use crate::error::BrokerError;
use crate::store::{self, Versioned};

/// The primary mapping record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMapping {
    /// The method the external identity belongs to.
    pub method_id: Uuid,
    /// The bound internal account.
    pub account_id: Uuid,
    /// The authorization that created this mapping.
    pub authorization_id: String,
    /// When the mapping was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Reverse lookup from an external key to the primary mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMappingLookup {
    /// The external identity key, stored verbatim for audit.
    pub external_key: String,
    /// The method the key belongs to.
    pub method_id: Uuid,
    /// Storage key of the primary mapping record.
    pub account_mapping_key: String,
}

/// Reverse lookup from the creating authorization to the primary mapping.
///
/// Used as a fallback when the key lookup is stale or missing, e.g. the
/// external key changed but the same authorization is reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationLookup {
    /// Storage key of the primary mapping record.
    pub account_mapping_key: String,
}

const RESOURCE: &str = "account mapping";

fn mapping_key(method_id: Uuid, account_id: Uuid) -> String {
    format!("mapping:{method_id}:{account_id}")
}

fn key_lookup_key(method_id: Uuid, external_key: &str) -> String {
    let digest = hex::encode(Sha256::digest(external_key.as_bytes()));
    format!("mapping-key:{method_id}:{digest}")
}

fn authorization_lookup_key(authorization_id: &str) -> String {
    format!("mapping-authz:{authorization_id}")
}

/// Typed access to account mappings and their secondary indexes.
#[derive(Clone)]
pub struct AccountMappingStore {
    storage: DynStorage,
}

impl AccountMappingStore {
    /// Creates a store over the given storage backend.
    #[must_use]
    pub fn new(storage: DynStorage) -> Self {
        Self { storage }
    }

    /// Resolves an external identity to an account id.
    ///
    /// Two-tier lookup: the key index is consulted first; if absent and an
    /// authorization id is supplied, the authorization index is consulted.
    /// A hit on the fallback tier does not rewrite the key index, so a
    /// changed external key keeps resolving only through its authorization
    /// until a new mapping is made.
    pub async fn find_account(
        &self,
        method_id: Uuid,
        external_key: &str,
        authorization_id: Option<&str>,
    ) -> Result<Option<Uuid>, BrokerError> {
        let lookup: Option<Versioned<AccountMappingLookup>> = store::load(
            self.storage.as_ref(),
            &key_lookup_key(method_id, external_key),
        )
        .await?;
        if let Some(lookup) = lookup {
            return self.resolve(&lookup.record.account_mapping_key).await;
        }

        if let Some(authorization_id) = authorization_id {
            let lookup: Option<Versioned<AuthorizationLookup>> = store::load(
                self.storage.as_ref(),
                &authorization_lookup_key(authorization_id),
            )
            .await?;
            if let Some(lookup) = lookup {
                return self.resolve(&lookup.record.account_mapping_key).await;
            }
        }

        Ok(None)
    }

    async fn resolve(&self, mapping_key: &str) -> Result<Option<Uuid>, BrokerError> {
        let mapping: Option<Versioned<AccountMapping>> =
            store::load(self.storage.as_ref(), mapping_key).await?;
        match mapping {
            Some(mapping) => Ok(Some(mapping.record.account_id)),
            // An index pointing at a missing primary record means the
            // multi-record write was torn; surface it, do not repair
            None => Err(BrokerError::storage(format!(
                "dangling mapping index: {mapping_key}"
            ))),
        }
    }

    /// Creates the mapping and both secondary indexes.
    ///
    /// The three conditional creates are sequenced: primary record, key
    /// lookup, authorization lookup. If any key is already occupied the
    /// whole operation fails with `Conflict` and no cleanup is attempted;
    /// partial state is surfaced, never silently reconciled.
    pub async fn create(
        &self,
        method_id: Uuid,
        external_key: &str,
        account_id: Uuid,
        authorization_id: &str,
    ) -> Result<(), BrokerError> {
        let primary_key = mapping_key(method_id, account_id);
        let mapping = AccountMapping {
            method_id,
            account_id,
            authorization_id: authorization_id.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        store::create(self.storage.as_ref(), RESOURCE, &primary_key, &mapping).await?;

        let lookup = AccountMappingLookup {
            external_key: external_key.to_string(),
            method_id,
            account_mapping_key: primary_key.clone(),
        };
        store::create(
            self.storage.as_ref(),
            RESOURCE,
            &key_lookup_key(method_id, external_key),
            &lookup,
        )
        .await?;

        let lookup = AuthorizationLookup {
            account_mapping_key: primary_key,
        };
        store::create(
            self.storage.as_ref(),
            RESOURCE,
            &authorization_lookup_key(authorization_id),
            &lookup,
        )
        .await?;

        tracing::info!(
            method_id = %method_id,
            account_id = %account_id,
            "Created account mapping"
        );
        Ok(())
    }

    /// Resolves the account bound to an authorization, if the
    /// authorization ever produced a mapping.
    pub async fn find_by_authorization(
        &self,
        authorization_id: &str,
    ) -> Result<Option<Uuid>, BrokerError> {
        let lookup: Option<Versioned<AuthorizationLookup>> = store::load(
            self.storage.as_ref(),
            &authorization_lookup_key(authorization_id),
        )
        .await?;
        match lookup {
            Some(lookup) => self.resolve(&lookup.record.account_mapping_key).await,
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for AccountMappingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountMappingStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use idport_db_memory::InMemoryStorage;

    fn store() -> AccountMappingStore {
        AccountMappingStore::new(Arc::new(InMemoryStorage::new()))
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = store();
        let method_id = Uuid::new_v4();
        let account_id = Uuid::new_v4();

        store
            .create(method_id, "user@example.com", account_id, "authz-1")
            .await
            .unwrap();

        let found = store
            .find_account(method_id, "user@example.com", None)
            .await
            .unwrap();
        assert_eq!(found, Some(account_id));
    }

    #[tokio::test]
    async fn test_unknown_key_not_found() {
        let store = store();
        let found = store
            .find_account(Uuid::new_v4(), "nobody@example.com", None)
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_same_key_second_create_conflicts() {
        let store = store();
        let method_id = Uuid::new_v4();

        store
            .create(method_id, "user@example.com", Uuid::new_v4(), "authz-1")
            .await
            .unwrap();
        let err = store
            .create(method_id, "user@example.com", Uuid::new_v4(), "authz-2")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_same_account_second_create_conflicts() {
        let store = store();
        let method_id = Uuid::new_v4();
        let account_id = Uuid::new_v4();

        store
            .create(method_id, "old@example.com", account_id, "authz-1")
            .await
            .unwrap();
        let err = store
            .create(method_id, "new@example.com", account_id, "authz-2")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_same_authorization_second_create_conflicts() {
        let store = store();
        let method_id = Uuid::new_v4();

        store
            .create(method_id, "a@example.com", Uuid::new_v4(), "authz-1")
            .await
            .unwrap();
        let err = store
            .create(method_id, "b@example.com", Uuid::new_v4(), "authz-1")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_concurrent_creates_exactly_one_winner() {
        let store = Arc::new(store());
        let method_id = Uuid::new_v4();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .create(
                        method_id,
                        "contested@example.com",
                        Uuid::new_v4(),
                        &format!("authz-{i}"),
                    )
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_fallback_by_authorization() {
        let store = store();
        let method_id = Uuid::new_v4();
        let account_id = Uuid::new_v4();

        store
            .create(method_id, "old@example.com", account_id, "authz-1")
            .await
            .unwrap();

        // The key changed upstream; only the authorization still resolves
        let found = store
            .find_account(method_id, "renamed@example.com", Some("authz-1"))
            .await
            .unwrap();
        assert_eq!(found, Some(account_id));

        // The fallback hit must not have rewritten the key index
        let found = store
            .find_account(method_id, "renamed@example.com", None)
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_find_by_authorization() {
        let store = store();
        let method_id = Uuid::new_v4();
        let account_id = Uuid::new_v4();

        store
            .create(method_id, "user@example.com", account_id, "authz-1")
            .await
            .unwrap();

        assert_eq!(
            store.find_by_authorization("authz-1").await.unwrap(),
            Some(account_id)
        );
        assert_eq!(store.find_by_authorization("authz-2").await.unwrap(), None);
    }

    #[test]
    fn test_key_lookup_hashes_external_key() {
        let method_id = Uuid::new_v4();
        let key = key_lookup_key(method_id, "user@example.com");
        assert!(!key.contains("user@example.com"));
        assert_eq!(key, key_lookup_key(method_id, "user@example.com"));
    }
}
