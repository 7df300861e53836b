//! Registered login methods and their lookup.
//!
//! The registry is built once at startup and immutable thereafter, so it
//! is safe for unsynchronized concurrent reads from every callback handler.
//!
//! # Example
//!
//! ```ignore
//! let registry = MethodRegistry::builder()
//!     .register("password", Arc::new(PasswordProvider::new()))
//!     .register("corp-saml", Arc::new(SamlProvider::new(config)))
//!     .build();
//!
//! let method = registry.by_name("password")?;
//! ```

use std::sync::Arc;

use uuid::Uuid;

use crate::error::BrokerError;
use crate::method::provider::CredentialProvider;

/// One enabled login method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    /// Stable method identifier.
    pub id: Uuid,
    /// Unique method name, used in routes and lookups.
    pub name: String,
}

/// A method together with its credential provider.
#[derive(Clone)]
pub struct RegisteredMethod {
    method: Method,
    provider: Arc<dyn CredentialProvider>,
}

impl RegisteredMethod {
    /// Returns the method descriptor.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the credential provider.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn CredentialProvider> {
        &self.provider
    }
}

impl std::fmt::Debug for RegisteredMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredMethod")
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// Immutable lookup of enabled methods by id and by name.
pub struct MethodRegistry {
    methods: Vec<RegisteredMethod>,
}

impl MethodRegistry {
    /// Creates a new registry builder.
    #[must_use]
    pub fn builder() -> MethodRegistryBuilder {
        MethodRegistryBuilder {
            methods: Vec::new(),
        }
    }

    /// Looks up a method by id.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::NotFound` if no method has the id.
    pub fn by_id(&self, id: Uuid) -> Result<&RegisteredMethod, BrokerError> {
        self.methods
            .iter()
            .find(|m| m.method.id == id)
            .ok_or_else(|| BrokerError::not_found("method", id.to_string()))
    }

    /// Looks up a method by name.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::NotFound` if no method has the name.
    pub fn by_name(&self, name: &str) -> Result<&RegisteredMethod, BrokerError> {
        self.methods
            .iter()
            .find(|m| m.method.name == name)
            .ok_or_else(|| BrokerError::not_found("method", name))
    }

    /// Iterates over all registered methods.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredMethod> {
        self.methods.iter()
    }

    /// Returns the number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Returns `true` if no methods are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// Builder for [`MethodRegistry`].
///
/// Names must be unique; registering a duplicate name replaces nothing and
/// surfaces at `build` time as a panic-free error.
#[must_use]
pub struct MethodRegistryBuilder {
    methods: Vec<RegisteredMethod>,
}

impl MethodRegistryBuilder {
    /// Registers a method with a freshly generated id.
    pub fn register(self, name: impl Into<String>, provider: Arc<dyn CredentialProvider>) -> Self {
        self.register_with_id(Uuid::new_v4(), name, provider)
    }

    /// Registers a method with a caller-supplied stable id.
    pub fn register_with_id(
        mut self,
        id: Uuid,
        name: impl Into<String>,
        provider: Arc<dyn CredentialProvider>,
    ) -> Self {
        let name = name.into();
        tracing::info!(method_id = %id, method_name = %name, "Registered login method");
        self.methods.push(RegisteredMethod {
            method: Method { id, name },
            provider,
        });
        self
    }

    /// Finalizes the registry.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Conflict` if two methods share an id or name.
    pub fn build(self) -> Result<MethodRegistry, BrokerError> {
        for (i, a) in self.methods.iter().enumerate() {
            for b in &self.methods[i + 1..] {
                if a.method.id == b.method.id {
                    return Err(BrokerError::conflict("method", a.method.id.to_string()));
                }
                if a.method.name == b.method.name {
                    return Err(BrokerError::conflict("method", a.method.name.clone()));
                }
            }
        }
        Ok(MethodRegistry {
            methods: self.methods,
        })
    }
}
