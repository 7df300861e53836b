//! Integration linkage: "this account authorized provider X for ongoing
//! access," distinct from "this external identity logs in as this
//! account."
//!
//! An account may hold many integrations; an authorization may back at
//! most one integration per kind. The uniqueness rule rides on the same
//! conditional-create index pattern account mappings use.
//!
//! Administrative operations are gated by an externally supplied
//! [`CredentialAdminPolicy`]; this module never decides who may manage
//! whose credentials.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use idport_storage::DynStorage;

use crate::error::BrokerError;
use crate::method::RegisteredMethod;
use crate::store::{self, Versioned};

/// The kind of integration linkage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntegrationKind {
    /// An ordinary provider integration.
    Standard,
    /// An externally managed integration, indexed separately.
    External,
}

impl IntegrationKind {
    fn index_namespace(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::External => "external",
        }
    }
}

/// One integration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    /// Integration id.
    pub id: Uuid,
    /// The method the integration runs through.
    pub method_id: Uuid,
    /// The account holding the integration.
    pub account_id: Uuid,
    /// The backing authorization, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_id: Option<String>,
    /// Linkage kind.
    pub kind: IntegrationKind,
    /// When the integration was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Identity of the caller performing an administrative operation.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    /// The account the caller is authenticated as, if any.
    pub account_id: Option<Uuid>,
    /// The caller's session, if any.
    pub session_id: Option<Uuid>,
}

/// Decides whether a caller may administer an account's credentials.
///
/// Supplied by the hosting application.
#[async_trait]
pub trait CredentialAdminPolicy: Send + Sync {
    /// Returns `true` if `caller` may manage credentials of `account_id`.
    async fn can_administer(&self, account_id: Uuid, caller: &Caller) -> bool;
}

/// Pointer record enforcing "at most one integration per authorization".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntegrationAuthorizationLookup {
    integration_key: String,
}

const RESOURCE: &str = "integration";

fn record_key(id: Uuid) -> String {
    format!("integration:{id}")
}

fn authorization_index_key(kind: IntegrationKind, authorization_id: &str) -> String {
    format!(
        "integration-authz:{}:{authorization_id}",
        kind.index_namespace()
    )
}

/// Creates, rebinds and removes integrations.
pub struct IntegrationService {
    storage: DynStorage,
    policy: std::sync::Arc<dyn CredentialAdminPolicy>,
}

impl IntegrationService {
    /// Creates the service over a storage backend and an admin policy.
    #[must_use]
    pub fn new(storage: DynStorage, policy: std::sync::Arc<dyn CredentialAdminPolicy>) -> Self {
        Self { storage, policy }
    }

    async fn authorize(&self, account_id: Uuid, caller: &Caller) -> Result<(), BrokerError> {
        if self.policy.can_administer(account_id, caller).await {
            Ok(())
        } else {
            Err(BrokerError::forbidden(format!(
                "caller may not administer credentials of account {account_id}"
            )))
        }
    }

    /// Creates an integration for `account_id` through `method`.
    ///
    /// # Errors
    ///
    /// - `Forbidden` if the admin policy refuses the caller, or the
    ///   provider does not support integrations for the account
    /// - `Conflict` if the authorization already backs an integration of
    ///   this kind
    pub async fn create(
        &self,
        method: &RegisteredMethod,
        account_id: Uuid,
        authorization_id: Option<&str>,
        kind: IntegrationKind,
        caller: &Caller,
    ) -> Result<Integration, BrokerError> {
        self.authorize(account_id, caller).await?;

        let capable = method
            .provider()
            .integration()
            .is_some_and(|capability| capability.supports_integration(account_id));
        if !capable {
            return Err(BrokerError::forbidden(format!(
                "method {} does not support integrations for account {account_id}",
                method.method().name
            )));
        }

        let integration = Integration {
            id: Uuid::new_v4(),
            method_id: method.method().id,
            account_id,
            authorization_id: authorization_id.map(str::to_string),
            kind,
            created_at: OffsetDateTime::now_utc(),
        };
        let primary_key = record_key(integration.id);

        if let Some(authorization_id) = authorization_id {
            let lookup = IntegrationAuthorizationLookup {
                integration_key: primary_key.clone(),
            };
            store::create(
                self.storage.as_ref(),
                RESOURCE,
                &authorization_index_key(kind, authorization_id),
                &lookup,
            )
            .await?;
        }
        store::create(self.storage.as_ref(), RESOURCE, &primary_key, &integration).await?;

        tracing::info!(
            integration_id = %integration.id,
            account_id = %account_id,
            method_id = %integration.method_id,
            "Created integration"
        );
        Ok(integration)
    }

    /// Loads an integration by id, returning `None` if absent.
    pub async fn load(&self, id: Uuid) -> Result<Option<Versioned<Integration>>, BrokerError> {
        store::load(self.storage.as_ref(), &record_key(id)).await
    }

    /// Finds the integration of `kind` backed by an authorization, if any.
    pub async fn find_by_authorization(
        &self,
        kind: IntegrationKind,
        authorization_id: &str,
    ) -> Result<Option<Integration>, BrokerError> {
        let lookup: Option<Versioned<IntegrationAuthorizationLookup>> = store::load(
            self.storage.as_ref(),
            &authorization_index_key(kind, authorization_id),
        )
        .await?;
        let Some(lookup) = lookup else {
            return Ok(None);
        };
        let integration: Option<Versioned<Integration>> =
            store::load(self.storage.as_ref(), &lookup.record.integration_key).await?;
        match integration {
            Some(integration) => Ok(Some(integration.record)),
            None => Err(BrokerError::storage(format!(
                "dangling integration index: {}",
                lookup.record.integration_key
            ))),
        }
    }

    /// Rebinds an integration to a different authorization.
    ///
    /// The new authorization's index slot is claimed before the record is
    /// saved, so two rebinds racing for the same authorization resolve to
    /// exactly one winner. The old slot is released afterwards.
    pub async fn update(
        &self,
        id: Uuid,
        new_authorization_id: Option<&str>,
        caller: &Caller,
    ) -> Result<Integration, BrokerError> {
        let mut loaded = self
            .load(id)
            .await?
            .ok_or_else(|| BrokerError::not_found(RESOURCE, id.to_string()))?;
        self.authorize(loaded.record.account_id, caller).await?;

        let old_authorization_id = loaded.record.authorization_id.clone();
        if old_authorization_id.as_deref() == new_authorization_id {
            return Ok(loaded.record);
        }

        let primary_key = record_key(id);
        if let Some(new_authorization_id) = new_authorization_id {
            let lookup = IntegrationAuthorizationLookup {
                integration_key: primary_key.clone(),
            };
            store::create(
                self.storage.as_ref(),
                RESOURCE,
                &authorization_index_key(loaded.record.kind, new_authorization_id),
                &lookup,
            )
            .await?;
        }

        loaded.record.authorization_id = new_authorization_id.map(str::to_string);
        store::save(
            self.storage.as_ref(),
            RESOURCE,
            &primary_key,
            &loaded.record,
            loaded.version,
        )
        .await?;

        if let Some(old_authorization_id) = old_authorization_id {
            self.release_index(loaded.record.kind, &old_authorization_id)
                .await?;
        }
        Ok(loaded.record)
    }

    /// Deletes an integration and releases its authorization index slot.
    pub async fn delete(&self, id: Uuid, caller: &Caller) -> Result<(), BrokerError> {
        let loaded = self
            .load(id)
            .await?
            .ok_or_else(|| BrokerError::not_found(RESOURCE, id.to_string()))?;
        self.authorize(loaded.record.account_id, caller).await?;

        store::remove(
            self.storage.as_ref(),
            RESOURCE,
            &record_key(id),
            loaded.version,
        )
        .await?;
        if let Some(authorization_id) = &loaded.record.authorization_id {
            self.release_index(loaded.record.kind, authorization_id)
                .await?;
        }
        tracing::info!(integration_id = %id, "Deleted integration");
        Ok(())
    }

    async fn release_index(
        &self,
        kind: IntegrationKind,
        authorization_id: &str,
    ) -> Result<(), BrokerError> {
        let key = authorization_index_key(kind, authorization_id);
        let lookup: Option<Versioned<IntegrationAuthorizationLookup>> =
            store::load(self.storage.as_ref(), &key).await?;
        if let Some(lookup) = lookup {
            store::remove(self.storage.as_ref(), RESOURCE, &key, lookup.version).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for IntegrationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use idport_db_memory::InMemoryStorage;
    use url::Url;

    use crate::authorization::Authorization;
    use crate::method::provider::{
        CredentialProvider, IntegrationCapable, ParsedCredentials, RedeemOutcome, RouteResolver,
    };
    use crate::method::registry::MethodRegistry;

    struct AllowAll;

    #[async_trait]
    impl CredentialAdminPolicy for AllowAll {
        async fn can_administer(&self, _account_id: Uuid, _caller: &Caller) -> bool {
            true
        }
    }

    struct DenyAll;

    #[async_trait]
    impl CredentialAdminPolicy for DenyAll {
        async fn can_administer(&self, _account_id: Uuid, _caller: &Caller) -> bool {
            false
        }
    }

    struct IntegratingProvider;

    impl IntegrationCapable for IntegratingProvider {
        fn supports_integration(&self, _account_id: Uuid) -> bool {
            true
        }

        fn display_name(&self) -> &str {
            "Test Provider"
        }
    }

    #[async_trait]
    impl CredentialProvider for IntegratingProvider {
        async fn redeem_token(&self, _parameters: &HashMap<String, String>) -> RedeemOutcome {
            RedeemOutcome::Failure {
                reason: "not a login provider".to_string(),
            }
        }

        fn parse_credential_parameters(
            &self,
            _parameters: &HashMap<String, String>,
        ) -> Result<ParsedCredentials, BrokerError> {
            Err(BrokerError::invalid_credentials("not a login provider"))
        }

        fn login_url(
            &self,
            _authorization_id: &str,
            _return_location: &Url,
            _routes: &dyn RouteResolver,
        ) -> Result<Url, BrokerError> {
            Err(BrokerError::internal("not a login provider"))
        }

        fn logout_url(
            &self,
            _authorization: &Authorization,
            _routes: &dyn RouteResolver,
        ) -> Result<Url, BrokerError> {
            Err(BrokerError::internal("not a login provider"))
        }

        fn integration(&self) -> Option<&dyn IntegrationCapable> {
            Some(self)
        }
    }

    struct LoginOnlyProvider;

    #[async_trait]
    impl CredentialProvider for LoginOnlyProvider {
        async fn redeem_token(&self, _parameters: &HashMap<String, String>) -> RedeemOutcome {
            RedeemOutcome::Failure {
                reason: "unused".to_string(),
            }
        }

        fn parse_credential_parameters(
            &self,
            _parameters: &HashMap<String, String>,
        ) -> Result<ParsedCredentials, BrokerError> {
            Err(BrokerError::invalid_credentials("unused"))
        }

        fn login_url(
            &self,
            _authorization_id: &str,
            _return_location: &Url,
            _routes: &dyn RouteResolver,
        ) -> Result<Url, BrokerError> {
            Err(BrokerError::internal("unused"))
        }

        fn logout_url(
            &self,
            _authorization: &Authorization,
            _routes: &dyn RouteResolver,
        ) -> Result<Url, BrokerError> {
            Err(BrokerError::internal("unused"))
        }
    }

    fn fixture(policy: Arc<dyn CredentialAdminPolicy>) -> (IntegrationService, MethodRegistry) {
        let storage: DynStorage = Arc::new(InMemoryStorage::new());
        let registry = MethodRegistry::builder()
            .register("integrating", Arc::new(IntegratingProvider))
            .register("login-only", Arc::new(LoginOnlyProvider))
            .build()
            .unwrap();
        (IntegrationService::new(storage, policy), registry)
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let (service, registry) = fixture(Arc::new(AllowAll));
        let method = registry.by_name("integrating").unwrap();
        let account_id = Uuid::new_v4();

        let integration = service
            .create(
                method,
                account_id,
                Some("authz-1"),
                IntegrationKind::Standard,
                &Caller::default(),
            )
            .await
            .unwrap();
        assert_eq!(integration.account_id, account_id);

        let found = service
            .find_by_authorization(IntegrationKind::Standard, "authz-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, integration.id);
    }

    #[tokio::test]
    async fn test_policy_refusal_is_forbidden() {
        let (service, registry) = fixture(Arc::new(DenyAll));
        let method = registry.by_name("integrating").unwrap();

        let err = service
            .create(
                method,
                Uuid::new_v4(),
                None,
                IntegrationKind::Standard,
                &Caller::default(),
            )
            .await
            .unwrap_err();
        assert!(err.is_authorization_error());
    }

    #[tokio::test]
    async fn test_incapable_provider_rejected() {
        let (service, registry) = fixture(Arc::new(AllowAll));
        let method = registry.by_name("login-only").unwrap();

        let err = service
            .create(
                method,
                Uuid::new_v4(),
                None,
                IntegrationKind::Standard,
                &Caller::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_one_integration_per_authorization() {
        let (service, registry) = fixture(Arc::new(AllowAll));
        let method = registry.by_name("integrating").unwrap();

        service
            .create(
                method,
                Uuid::new_v4(),
                Some("authz-1"),
                IntegrationKind::Standard,
                &Caller::default(),
            )
            .await
            .unwrap();
        let err = service
            .create(
                method,
                Uuid::new_v4(),
                Some("authz-1"),
                IntegrationKind::Standard,
                &Caller::default(),
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_kinds_index_separately() {
        let (service, registry) = fixture(Arc::new(AllowAll));
        let method = registry.by_name("integrating").unwrap();

        service
            .create(
                method,
                Uuid::new_v4(),
                Some("authz-1"),
                IntegrationKind::Standard,
                &Caller::default(),
            )
            .await
            .unwrap();
        // The external kind has its own index namespace
        service
            .create(
                method,
                Uuid::new_v4(),
                Some("authz-1"),
                IntegrationKind::External,
                &Caller::default(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_rebinds_and_releases_old_slot() {
        let (service, registry) = fixture(Arc::new(AllowAll));
        let method = registry.by_name("integrating").unwrap();

        let integration = service
            .create(
                method,
                Uuid::new_v4(),
                Some("authz-1"),
                IntegrationKind::Standard,
                &Caller::default(),
            )
            .await
            .unwrap();
        service
            .update(integration.id, Some("authz-2"), &Caller::default())
            .await
            .unwrap();

        assert!(
            service
                .find_by_authorization(IntegrationKind::Standard, "authz-1")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            service
                .find_by_authorization(IntegrationKind::Standard, "authz-2")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_delete_releases_slot() {
        let (service, registry) = fixture(Arc::new(AllowAll));
        let method = registry.by_name("integrating").unwrap();

        let integration = service
            .create(
                method,
                Uuid::new_v4(),
                Some("authz-1"),
                IntegrationKind::Standard,
                &Caller::default(),
            )
            .await
            .unwrap();
        service
            .delete(integration.id, &Caller::default())
            .await
            .unwrap();

        assert!(service.load(integration.id).await.unwrap().is_none());
        assert!(
            service
                .find_by_authorization(IntegrationKind::Standard, "authz-1")
                .await
                .unwrap()
                .is_none()
        );
    }
}
