//! The redirection orchestrator.
//!
//! [`RedirectionService::process_request`] is the broker's entry point:
//! one inbound provider callback in, one typed outcome out. The pipeline
//! is strictly sequential:
//!
//! 1. write the redirection audit record
//! 2. redeem the callback with the method's provider
//! 3. route logout notifications to the logout path
//! 4. create or load the authorization the callback correlates to
//! 5. resolve the external key to an account, consulting the
//!    provisioning policy for unmapped identities
//! 6. issue a session and build the outbound redirect
//!
//! The broker never decides how new accounts come to exist. That decision
//! belongs to the hosting application's [`ProvisioningPolicy`]; the
//! orchestrator only guarantees that whichever of the four decisions is
//! taken, the authorization record ends in a consistent, auditable state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;
use uuid::Uuid;

use crate::audit::{Redirection, RedirectionLog};
use crate::authorization::{Authorization, AuthorizationStore};
use crate::error::BrokerError;
use crate::mapping::AccountMappingStore;
use crate::method::registry::{Method, MethodRegistry, RegisteredMethod};
use crate::method::{RedeemOutcome, RouteResolver};
use crate::session::SessionService;

/// Per-request context supplied by the transport layer.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request id, reused as the audit record id.
    pub request_id: Uuid,
    /// The referrer the user arrived from, if known.
    pub referrer: Option<Url>,
}

impl RequestContext {
    /// Creates a context with a fresh request id and no referrer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            referrer: None,
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of processing one inbound callback.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// Send the user to this URL.
    Redirect(Url),
    /// The provider rejected the credentials.
    BadCredentials(String),
    /// The provider was unreachable.
    CouldNotConnect(String),
    /// Any other failure; the audit record from step 1 still stands.
    Failure(String),
}

/// The four possible decisions for an external identity with no account
/// binding.
#[derive(Debug, Clone)]
pub enum ProvisioningDecision {
    /// Bind the identity to this account and create the mapping.
    CreateMapping(Uuid),
    /// Complete login with no account binding; the application treats the
    /// session as anonymous/unmapped.
    AllowSelfServe,
    /// Send the user here instead of completing login, e.g. an onboarding
    /// flow that decides the mapping later.
    Intercept(Url),
    /// Refuse the login.
    Reject,
}

/// An unmapped external identity, as presented to the provisioning
/// policy.
#[derive(Debug)]
pub struct UnmappedUser<'a> {
    /// The method the identity arrived through.
    pub method: &'a Method,
    /// The external identity key.
    pub external_key: &'a str,
    /// Provider parameters from redemption.
    pub parameters: &'a HashMap<String, String>,
    /// The authorization correlating the handshake.
    pub authorization: &'a Authorization,
    /// The hosting application's public base URI.
    pub base_uri: &'a str,
}

/// Decides what happens to external identities with no account binding.
///
/// Supplied by the hosting application.
#[async_trait]
pub trait ProvisioningPolicy: Send + Sync {
    /// Resolves an unmapped identity to exactly one decision.
    async fn on_unmapped_user(&self, unmapped: &UnmappedUser<'_>) -> ProvisioningDecision;
}

/// The action an outbound redirect completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedirectAction {
    /// A completed login.
    Login,
    /// A completed logout.
    Logout,
}

/// Everything the redirect policy needs to build an outbound URL.
#[derive(Debug)]
pub struct RedirectRequest<'a> {
    /// The method the request ran through.
    pub method: &'a Method,
    /// The action being completed.
    pub action: RedirectAction,
    /// The resolved account, if any.
    pub account_id: Option<Uuid>,
    /// The freshly minted bearer token, for login redirects.
    pub token: Option<&'a str>,
    /// The session's refresh token, for login redirects.
    pub refresh_token: Option<&'a str>,
    /// Provider parameters from redemption.
    pub parameters: &'a HashMap<String, String>,
    /// The hosting application's public base URI.
    pub base_uri: &'a str,
}

/// Why the redirect policy refused to build a URL.
#[derive(Debug, Clone)]
pub enum RedirectRejection {
    /// A specific parameter was unacceptable.
    Parameter {
        /// The offending parameter.
        name: String,
        /// Why it was refused.
        reason: String,
    },
    /// Any other refusal.
    Other(String),
}

impl std::fmt::Display for RedirectRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parameter { name, reason } => {
                write!(f, "redirect parameter {name} rejected: {reason}")
            }
            Self::Other(reason) => write!(f, "redirect rejected: {reason}"),
        }
    }
}

/// Builds outbound redirect URLs.
///
/// Supplied by the hosting application; the broker never hard-codes
/// destinations.
pub trait RedirectPolicy: Send + Sync {
    /// Builds the URL the user is sent to after `request.action`
    /// completes.
    ///
    /// # Errors
    ///
    /// Returns a [`RedirectRejection`] if no acceptable URL can be built.
    fn redirect_uri(&self, request: &RedirectRequest<'_>) -> Result<Url, RedirectRejection>;
}

/// The orchestrator and its collaborators.
pub struct RedirectionService {
    registry: Arc<MethodRegistry>,
    authorizations: AuthorizationStore,
    mappings: AccountMappingStore,
    sessions: SessionService,
    audit: RedirectionLog,
    provisioning: Arc<dyn ProvisioningPolicy>,
    redirects: Arc<dyn RedirectPolicy>,
    routes: Arc<dyn RouteResolver>,
    base_uri: String,
}

impl RedirectionService {
    /// Wires the orchestrator to its collaborators.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        registry: Arc<MethodRegistry>,
        authorizations: AuthorizationStore,
        mappings: AccountMappingStore,
        sessions: SessionService,
        audit: RedirectionLog,
        provisioning: Arc<dyn ProvisioningPolicy>,
        redirects: Arc<dyn RedirectPolicy>,
        routes: Arc<dyn RouteResolver>,
        base_uri: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            authorizations,
            mappings,
            sessions,
            audit,
            provisioning,
            redirects,
            routes,
            base_uri: base_uri.into(),
        }
    }

    /// Processes one inbound provider callback.
    pub async fn process_request(
        &self,
        method_name: &str,
        values: HashMap<String, String>,
        context: &RequestContext,
    ) -> ProcessOutcome {
        let method = match self.registry.by_name(method_name) {
            Ok(method) => method,
            Err(err) => return outcome_from_error(err),
        };

        // The audit record goes in before any other side effect
        let redirection = Redirection::new(
            context.request_id,
            method.method().id,
            values.clone(),
            context.referrer.clone(),
        );
        if let Err(err) = self.audit.record(&redirection).await {
            return outcome_from_error(err);
        }

        match method.provider().redeem_token(&values).await {
            RedeemOutcome::Success {
                external_key,
                authorization_id,
                parameters,
            } => {
                match self
                    .complete_login(method, &external_key, authorization_id.as_deref(), parameters)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(err) => outcome_from_error(err),
                }
            }
            RedeemOutcome::Logout {
                authorization_id,
                parameters,
            } => {
                match self
                    .complete_logout(method, authorization_id.as_deref(), &parameters)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(err) => outcome_from_error(err),
                }
            }
            RedeemOutcome::InvalidCredentials { reason } => {
                tracing::warn!(method = method_name, %reason, "Credentials rejected");
                ProcessOutcome::BadCredentials(reason)
            }
            RedeemOutcome::CouldNotConnect { reason } => {
                tracing::warn!(method = method_name, %reason, "Provider unreachable");
                ProcessOutcome::CouldNotConnect(reason)
            }
            RedeemOutcome::Failure { reason } => ProcessOutcome::Failure(reason),
        }
    }

    /// Creates an authorization and its provider login URL, the explicit
    /// redirect-first flow.
    ///
    /// The returned record's `location_authentication` is where the user
    /// should be sent; the provider will call back with the
    /// authorization's id folded into its parameters.
    pub async fn begin_authentication(
        &self,
        method_name: &str,
        return_location: &Url,
    ) -> Result<Authorization, BrokerError> {
        let method = self.registry.by_name(method_name)?;
        let mut authorization = Authorization::new(method.method().id);
        let login_url = method.provider().login_url(
            &authorization.id,
            return_location,
            self.routes.as_ref(),
        )?;
        authorization.location_authentication = Some(login_url);
        authorization.location_authentication_return = Some(return_location.clone());
        self.authorizations.create(&authorization).await?;
        Ok(authorization)
    }

    /// Steps 4 and 5: correlate, resolve, provision, respond.
    async fn complete_login(
        &self,
        method: &RegisteredMethod,
        external_key: &str,
        authorization_id: Option<&str>,
        parameters: HashMap<String, String>,
    ) -> Result<ProcessOutcome, BrokerError> {
        let (mut authorization, version) = match authorization_id {
            // Provider-initiated direct link with no prior handshake
            None => {
                let mut authorization = Authorization::new(method.method().id);
                authorization.mark_authorized(parameters.clone());
                let version = self.authorizations.create(&authorization).await?;
                (authorization, version)
            }
            Some(id) => {
                // The reference itself may be stale; a retry cannot help
                let Some(loaded) = self.authorizations.load(id).await? else {
                    return Ok(ProcessOutcome::Failure(
                        "authorization not found".to_string(),
                    ));
                };
                let mut authorization = loaded.record;
                authorization.mark_authorized(parameters.clone());
                (authorization, loaded.version)
            }
        };

        let account_id = self
            .mappings
            .find_account(method.method().id, external_key, Some(&authorization.id))
            .await?;

        match account_id {
            Some(account_id) => {
                authorization.account_id = Some(account_id);
                self.authorizations.save(&authorization, version).await?;
                tracing::info!(
                    method = %method.method().name,
                    account_id = %account_id,
                    "Login resolved to existing mapping"
                );
                self.login_redirect(method, &authorization, &parameters).await
            }
            None => {
                let decision = self
                    .provisioning
                    .on_unmapped_user(&UnmappedUser {
                        method: method.method(),
                        external_key,
                        parameters: &parameters,
                        authorization: &authorization,
                        base_uri: &self.base_uri,
                    })
                    .await;

                match decision {
                    ProvisioningDecision::CreateMapping(account_id) => {
                        authorization.account_id = Some(account_id);
                        self.authorizations.save(&authorization, version).await?;
                        if let Err(err) = self
                            .mappings
                            .create(
                                method.method().id,
                                external_key,
                                account_id,
                                &authorization.id,
                            )
                            .await
                        {
                            return Ok(ProcessOutcome::Failure(err.to_string()));
                        }
                        self.login_redirect(method, &authorization, &parameters).await
                    }
                    ProvisioningDecision::AllowSelfServe => {
                        self.authorizations.save(&authorization, version).await?;
                        self.login_redirect(method, &authorization, &parameters).await
                    }
                    ProvisioningDecision::Intercept(uri) => {
                        self.authorizations.save(&authorization, version).await?;
                        Ok(ProcessOutcome::Redirect(uri))
                    }
                    ProvisioningDecision::Reject => Ok(ProcessOutcome::Failure(
                        "token is not connected to a user in this system".to_string(),
                    )),
                }
            }
        }
    }

    /// Step 6 for successful logins: session, token, outbound URL.
    async fn login_redirect(
        &self,
        method: &RegisteredMethod,
        authorization: &Authorization,
        parameters: &HashMap<String, String>,
    ) -> Result<ProcessOutcome, BrokerError> {
        let session = self.sessions.create_session(Some(&authorization.id)).await?;
        let request = RedirectRequest {
            method: method.method(),
            action: RedirectAction::Login,
            account_id: session.account_id,
            token: Some(&session.token),
            refresh_token: Some(&session.refresh_token),
            parameters,
            base_uri: &self.base_uri,
        };
        match self.redirects.redirect_uri(&request) {
            Ok(url) => Ok(ProcessOutcome::Redirect(url)),
            Err(rejection) => Ok(ProcessOutcome::Failure(rejection.to_string())),
        }
    }

    /// The logout path. Never creates a session.
    ///
    /// A stored logout-return location wins over the provider's default
    /// logout URL; with no authorization at all the redirect policy
    /// decides the destination.
    async fn complete_logout(
        &self,
        method: &RegisteredMethod,
        authorization_id: Option<&str>,
        parameters: &HashMap<String, String>,
    ) -> Result<ProcessOutcome, BrokerError> {
        if let Some(id) = authorization_id {
            if let Some(loaded) = self.authorizations.load(id).await? {
                if let Some(location) = &loaded.record.location_logout_return {
                    return Ok(ProcessOutcome::Redirect(location.clone()));
                }
                let url = method
                    .provider()
                    .logout_url(&loaded.record, self.routes.as_ref())?;
                return Ok(ProcessOutcome::Redirect(url));
            }
        }

        let request = RedirectRequest {
            method: method.method(),
            action: RedirectAction::Logout,
            account_id: None,
            token: None,
            refresh_token: None,
            parameters,
            base_uri: &self.base_uri,
        };
        match self.redirects.redirect_uri(&request) {
            Ok(url) => Ok(ProcessOutcome::Redirect(url)),
            Err(rejection) => Ok(ProcessOutcome::Failure(rejection.to_string())),
        }
    }
}

impl std::fmt::Debug for RedirectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectionService")
            .field("base_uri", &self.base_uri)
            .finish_non_exhaustive()
    }
}

fn outcome_from_error(err: BrokerError) -> ProcessOutcome {
    match err {
        BrokerError::InvalidCredentials { message } => ProcessOutcome::BadCredentials(message),
        BrokerError::CouldNotConnect { message } => ProcessOutcome::CouldNotConnect(message),
        other => ProcessOutcome::Failure(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_error() {
        assert!(matches!(
            outcome_from_error(BrokerError::invalid_credentials("bad token")),
            ProcessOutcome::BadCredentials(_)
        ));
        assert!(matches!(
            outcome_from_error(BrokerError::could_not_connect("timeout")),
            ProcessOutcome::CouldNotConnect(_)
        ));
        assert!(matches!(
            outcome_from_error(BrokerError::not_found("method", "x")),
            ProcessOutcome::Failure(_)
        ));
    }

    #[test]
    fn test_rejection_display() {
        let rejection = RedirectRejection::Parameter {
            name: "token".to_string(),
            reason: "too long".to_string(),
        };
        assert_eq!(
            rejection.to_string(),
            "redirect parameter token rejected: too long"
        );
        assert_eq!(
            RedirectRejection::Other("nope".to_string()).to_string(),
            "redirect rejected: nope"
        );
    }
}
