//! # idport-auth
//!
//! Federated-identity broker core for idport.
//!
//! This crate provides:
//! - A provider contract abstracting password, OAuth/OIDC, SAML and
//!   vendor token schemes behind one redeem/parse/login-url surface
//! - Authorization records correlating redirect handshakes
//! - Uniqueness-enforced account mappings from external identities to
//!   internal accounts
//! - Session issuance with derived bearer tokens and opaque refresh
//!   tokens
//! - Integration linkage for ongoing provider access
//! - The redirection orchestrator tying it all together
//!
//! ## Overview
//!
//! The broker accepts callback data from one of several interchangeable
//! login providers, redeems it into a stable external account key, binds
//! that key to an internal account, and issues a short-lived bearer token
//! plus a refresh token. Every uniqueness invariant rides on the storage
//! layer's conditional create; no component acquires a lock.
//!
//! ## Modules
//!
//! - [`config`] - Broker and token signing configuration
//! - [`error`] - The broker error taxonomy
//! - [`method`] - The provider contract and the method registry
//! - [`authorization`] - Authentication handshake records
//! - [`mapping`] - External identity to account bindings
//! - [`session`] - Sessions and bearer token issuance
//! - [`integration`] - Account to provider integration linkage
//! - [`audit`] - Write-once callback audit records
//! - [`redirect`] - The redirection orchestrator

pub mod audit;
pub mod authorization;
pub mod config;
pub mod error;
pub mod integration;
pub mod mapping;
pub mod method;
pub mod redirect;
pub mod session;

mod store;

pub use audit::{Redirection, RedirectionLog};
pub use authorization::{Authorization, AuthorizationStore};
pub use config::{BrokerConfig, SigningConfig};
pub use error::{BrokerError, ErrorCategory};
pub use integration::{
    Caller, CredentialAdminPolicy, Integration, IntegrationKind, IntegrationService,
};
pub use mapping::{AccountMapping, AccountMappingLookup, AccountMappingStore, AuthorizationLookup};
pub use method::{
    CredentialProvider, IntegrationCapable, Method, MethodRegistry, MethodRegistryBuilder,
    ParsedCredentials, RedeemOutcome, RegisteredMethod, RouteAction, RouteResolver, SessionCapable,
};
pub use redirect::{
    ProcessOutcome, ProvisioningDecision, ProvisioningPolicy, RedirectAction, RedirectPolicy,
    RedirectRejection, RedirectRequest, RedirectionService, RequestContext, UnmappedUser,
};
pub use session::{IssuedSession, SessionClaims, SessionRecord, SessionService};
pub use store::Versioned;

/// Type alias for broker results.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use idport_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::audit::RedirectionLog;
    pub use crate::authorization::{Authorization, AuthorizationStore};
    pub use crate::config::BrokerConfig;
    pub use crate::error::BrokerError;
    pub use crate::mapping::AccountMappingStore;
    pub use crate::method::{CredentialProvider, MethodRegistry, RedeemOutcome, RouteResolver};
    pub use crate::redirect::{
        ProcessOutcome, ProvisioningDecision, ProvisioningPolicy, RedirectPolicy,
        RedirectionService, RequestContext,
    };
    pub use crate::session::SessionService;
    pub use crate::{BrokerResult, ErrorCategory};
}
