//! The credential provider contract.
//!
//! A provider is one registered login mechanism: password, OAuth/OIDC,
//! SAML, a vendor token scheme. The broker never sees a provider's native
//! wire format; by the time a callback reaches the broker the transport
//! layer has flattened it into a `HashMap<String, String>`, and the
//! provider's job is to redeem that map into a stable external key.
//!
//! # Capability set
//!
//! Every provider satisfies [`CredentialProvider`]. Two optional
//! capabilities are queried at runtime through accessor methods rather
//! than inheritance:
//!
//! - [`IntegrationCapable`] - the provider can back ongoing account
//!   integrations in addition to login
//! - [`SessionCapable`] - the provider can vet an existing session
//!
//! A provider that lacks a capability simply leaves the accessor at its
//! default `None`.

use std::collections::HashMap;

use async_trait::async_trait;
use url::Url;
use uuid::Uuid;

use crate::authorization::Authorization;
use crate::error::BrokerError;
use crate::session::SessionRecord;

/// Outcome of redeeming inbound callback parameters with a provider.
#[derive(Debug, Clone)]
pub enum RedeemOutcome {
    /// The provider validated the credentials.
    Success {
        /// The stable external identity key (e.g. the subject or email).
        external_key: String,
        /// Reference to a previously created authorization, if the
        /// callback carries one. `None` means a provider-initiated direct
        /// link with no prior handshake.
        authorization_id: Option<String>,
        /// Provider-specific parameters to fold into the authorization.
        parameters: HashMap<String, String>,
    },

    /// The callback is a logout notification, never treated as a login.
    Logout {
        /// The authorization being logged out, if referenced.
        authorization_id: Option<String>,
        /// Provider-specific parameters.
        parameters: HashMap<String, String>,
    },

    /// The provider rejected the credentials.
    InvalidCredentials {
        /// Why the credentials were rejected.
        reason: String,
    },

    /// The provider was unreachable.
    CouldNotConnect {
        /// Description of the connectivity failure.
        reason: String,
    },

    /// Any other provider-side failure.
    Failure {
        /// Description of the failure.
        reason: String,
    },
}

/// Credential fields parsed out of callback parameters without redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCredentials {
    /// The external identity key.
    pub external_key: String,
    /// The referenced authorization id, if present.
    pub authorization_id: Option<String>,
    /// The granted scope, if the provider conveys one.
    pub scope: Option<String>,
}

/// Resolves broker-owned route locations for a method.
///
/// Supplied by the hosting application so providers can embed callback
/// and logout return locations without the broker hard-coding routes.
pub trait RouteResolver: Send + Sync {
    /// Returns the URL the provider should send the user back to.
    ///
    /// # Errors
    ///
    /// Returns an error if no route exists for the method/action pair.
    fn resolve(&self, method_name: &str, action: RouteAction) -> Result<Url, BrokerError>;
}

/// The broker-owned route being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteAction {
    /// The authentication callback route.
    Callback,
    /// The logout return route.
    Logout,
}

/// The contract every login provider must satisfy.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Redeems inbound callback parameters into an external identity key.
    ///
    /// This is the only operation allowed to talk to the provider's
    /// backend. A stalled or failed network call must surface as
    /// [`RedeemOutcome::CouldNotConnect`] rather than hang; providers own
    /// their timeouts and the broker performs no retry.
    async fn redeem_token(&self, parameters: &HashMap<String, String>) -> RedeemOutcome;

    /// Parses credential fields out of callback parameters without
    /// contacting the provider backend.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::InvalidCredentials` if required fields are
    /// absent or malformed.
    fn parse_credential_parameters(
        &self,
        parameters: &HashMap<String, String>,
    ) -> Result<ParsedCredentials, BrokerError>;

    /// Builds the provider's login URL for a pending authorization.
    ///
    /// The authorization id acts as the correlation state carried through
    /// the redirect round trip; [`parse_credential_parameters`] must
    /// recover it from the parameters the provider sends back.
    ///
    /// [`parse_credential_parameters`]: CredentialProvider::parse_credential_parameters
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be constructed.
    fn login_url(
        &self,
        authorization_id: &str,
        return_location: &Url,
        routes: &dyn RouteResolver,
    ) -> Result<Url, BrokerError>;

    /// Builds the provider's logout URL for an authorization.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be constructed.
    fn logout_url(
        &self,
        authorization: &Authorization,
        routes: &dyn RouteResolver,
    ) -> Result<Url, BrokerError>;

    /// Returns the integration capability of this provider, if any.
    fn integration(&self) -> Option<&dyn IntegrationCapable> {
        None
    }

    /// Returns the session capability of this provider, if any.
    fn session_support(&self) -> Option<&dyn SessionCapable> {
        None
    }
}

/// Optional capability: the provider can back ongoing account
/// integrations, not just login.
pub trait IntegrationCapable: Send + Sync {
    /// Returns `true` if the provider can hold an integration for the
    /// given account.
    fn supports_integration(&self, account_id: Uuid) -> bool;

    /// Human-readable provider name for display.
    fn display_name(&self) -> &str;
}

/// Optional capability: the provider can vet an existing session.
pub trait SessionCapable: Send + Sync {
    /// Returns `true` if the provider considers the session acceptable.
    fn supports_session(&self, session: &SessionRecord) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test that the provider traits are object-safe
    fn _assert_provider_object_safe(_: &dyn CredentialProvider) {}
    fn _assert_integration_object_safe(_: &dyn IntegrationCapable) {}
    fn _assert_session_object_safe(_: &dyn SessionCapable) {}
    fn _assert_routes_object_safe(_: &dyn RouteResolver) {}
}
