//! Login methods: the provider contract and the method registry.

pub mod provider;
pub mod registry;

pub use provider::{
    CredentialProvider, IntegrationCapable, ParsedCredentials, RedeemOutcome, RouteAction,
    RouteResolver, SessionCapable,
};
pub use registry::{Method, MethodRegistry, MethodRegistryBuilder, RegisteredMethod};
