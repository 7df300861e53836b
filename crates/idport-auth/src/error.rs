//! Broker error types.
//!
//! This module defines all error types that can occur while brokering an
//! authentication callback into an account binding and a session.
//!
//! Every expected branch is surfaced through an explicit typed outcome; no
//! error here is retried automatically inside the broker. Retry, if any,
//! belongs to the caller or transport layer.

use std::fmt;

use idport_storage::StorageError;

/// Errors that can occur during broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The provider rejected the presented credentials or token.
    #[error("Invalid credentials: {message}")]
    InvalidCredentials {
        /// Description of why the credentials were rejected.
        message: String,
    },

    /// The provider was unreachable or timed out.
    #[error("Could not connect: {message}")]
    CouldNotConnect {
        /// Description of the connectivity failure.
        message: String,
    },

    /// A uniqueness invariant was violated on a mapping, authorization or
    /// integration record.
    #[error("Conflict on {resource}: {key}")]
    Conflict {
        /// The kind of record in conflict.
        resource: &'static str,
        /// The storage key that was contested.
        key: String,
    },

    /// A referenced authorization, mapping, method or session is absent.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// The kind of record that was not found.
        resource: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Required configuration is absent or unusable.
    #[error("Configuration missing: {setting}")]
    ConfigurationMissing {
        /// The setting that is absent.
        setting: &'static str,
    },

    /// The request lacks valid authentication credentials.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Description of why the request is unauthorized.
        message: String,
    },

    /// The caller is not permitted to administer the target account's
    /// credentials.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Description of why access is forbidden.
        message: String,
    },

    /// An error occurred while storing or retrieving broker records.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// An unexpected internal error occurred, including identifier
    /// collisions in a space assumed collision-free.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl BrokerError {
    /// Creates a new `InvalidCredentials` error.
    #[must_use]
    pub fn invalid_credentials(message: impl Into<String>) -> Self {
        Self::InvalidCredentials {
            message: message.into(),
        }
    }

    /// Creates a new `CouldNotConnect` error.
    #[must_use]
    pub fn could_not_connect(message: impl Into<String>) -> Self {
        Self::CouldNotConnect {
            message: message.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(resource: &'static str, key: impl Into<String>) -> Self {
        Self::Conflict {
            resource,
            key: key.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// Creates a new `ConfigurationMissing` error.
    #[must_use]
    pub fn configuration_missing(setting: &'static str) -> Self {
        Self::ConfigurationMissing { setting }
    }

    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a new `Forbidden` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a conflict error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this error was caused by the credential provider
    /// (rejection or connectivity) rather than by the broker.
    #[must_use]
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials { .. } | Self::CouldNotConnect { .. }
        )
    }

    /// Returns `true` if this is an authorization (permission) error.
    #[must_use]
    pub fn is_authorization_error(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::Forbidden { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidCredentials { .. } => ErrorCategory::Credentials,
            Self::CouldNotConnect { .. } => ErrorCategory::Connectivity,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::ConfigurationMissing { .. } => ErrorCategory::Configuration,
            Self::Unauthorized { .. } | Self::Forbidden { .. } => ErrorCategory::Authorization,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<StorageError> for BrokerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::AlreadyExists { key } => Self::Conflict {
                resource: "record",
                key,
            },
            StorageError::VersionConflict { key, .. } => Self::Conflict {
                resource: "record",
                key,
            },
            StorageError::NotFound { key } => Self::NotFound {
                resource: "record",
                id: key,
            },
            other => Self::Storage {
                message: other.to_string(),
            },
        }
    }
}

/// Categories of broker errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Provider rejected the credentials.
    Credentials,
    /// Provider unreachable or timed out.
    Connectivity,
    /// Uniqueness or version conflict.
    Conflict,
    /// Referenced record absent.
    NotFound,
    /// Configuration errors.
    Configuration,
    /// Permission checks.
    Authorization,
    /// Infrastructure/storage errors.
    Infrastructure,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credentials => write!(f, "credentials"),
            Self::Connectivity => write!(f, "connectivity"),
            Self::Conflict => write!(f, "conflict"),
            Self::NotFound => write!(f, "not_found"),
            Self::Configuration => write!(f, "configuration"),
            Self::Authorization => write!(f, "authorization"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrokerError::invalid_credentials("token rejected");
        assert_eq!(err.to_string(), "Invalid credentials: token rejected");

        let err = BrokerError::conflict("account mapping", "mapping:1:2");
        assert_eq!(err.to_string(), "Conflict on account mapping: mapping:1:2");

        let err = BrokerError::not_found("authorization", "abc");
        assert_eq!(err.to_string(), "authorization not found: abc");

        let err = BrokerError::configuration_missing("signing.secret");
        assert_eq!(err.to_string(), "Configuration missing: signing.secret");
    }

    #[test]
    fn test_error_predicates() {
        assert!(BrokerError::conflict("r", "k").is_conflict());
        assert!(BrokerError::not_found("r", "id").is_not_found());
        assert!(BrokerError::invalid_credentials("x").is_provider_error());
        assert!(BrokerError::could_not_connect("x").is_provider_error());
        assert!(BrokerError::forbidden("x").is_authorization_error());
        assert!(!BrokerError::storage("x").is_provider_error());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            BrokerError::invalid_credentials("x").category(),
            ErrorCategory::Credentials
        );
        assert_eq!(
            BrokerError::could_not_connect("x").category(),
            ErrorCategory::Connectivity
        );
        assert_eq!(
            BrokerError::conflict("r", "k").category(),
            ErrorCategory::Conflict
        );
        assert_eq!(
            BrokerError::unauthorized("x").category(),
            ErrorCategory::Authorization
        );
    }

    #[test]
    fn test_from_storage_error() {
        let err: BrokerError = StorageError::already_exists("mapping:1").into();
        assert!(err.is_conflict());

        let err: BrokerError = StorageError::version_conflict("session:1", 1, 2).into();
        assert!(err.is_conflict());

        let err: BrokerError = StorageError::not_found("authorization:1").into();
        assert!(err.is_not_found());

        let err: BrokerError = StorageError::connection_error("down").into();
        assert!(matches!(err, BrokerError::Storage { .. }));
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Credentials.to_string(), "credentials");
        assert_eq!(ErrorCategory::Connectivity.to_string(), "connectivity");
        assert_eq!(ErrorCategory::Conflict.to_string(), "conflict");
    }
}
