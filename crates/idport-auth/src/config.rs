//! Broker configuration.
//!
//! This module provides the configuration types for the broker core:
//! token signing, session lifetimes and the public base URI redirects are
//! built against.
//!
//! # Example (TOML)
//!
//! ```toml
//! [broker]
//! issuer = "https://id.example.com"
//! base_uri = "https://app.example.com"
//!
//! [broker.signing]
//! secret = "change-me"
//! access_token_lifetime = "15m"
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::BrokerError;

/// Root broker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Issuer URL (used in the token `iss` claim).
    pub issuer: String,

    /// Public base URI of the hosting application. Handed to the redirect
    /// policy and the unmapped-user policy when building outbound URLs.
    pub base_uri: String,

    /// Token signing configuration.
    pub signing: SigningConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            base_uri: String::new(),
            signing: SigningConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::ConfigurationMissing` naming the first absent
    /// or unusable setting.
    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.issuer.is_empty() {
            return Err(BrokerError::configuration_missing("issuer"));
        }
        if self.base_uri.is_empty() {
            return Err(BrokerError::configuration_missing("base_uri"));
        }
        self.signing.validate()
    }
}

/// Token signing configuration.
///
/// The bearer token is derived at read time from the session and current
/// claims; the signing scope here is the only secret involved.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Symmetric signing secret (HS256). Must be non-empty.
    pub secret: String,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            access_token_lifetime: Duration::from_secs(15 * 60),
        }
    }
}

impl SigningConfig {
    /// Validates the signing configuration.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::ConfigurationMissing` if the secret is empty
    /// or the lifetime is zero.
    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.secret.is_empty() {
            return Err(BrokerError::configuration_missing("signing.secret"));
        }
        if self.access_token_lifetime.is_zero() {
            return Err(BrokerError::configuration_missing(
                "signing.access_token_lifetime",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> BrokerConfig {
        BrokerConfig {
            issuer: "https://id.example.com".to_string(),
            base_uri: "https://app.example.com".to_string(),
            signing: SigningConfig {
                secret: "test-secret".to_string(),
                access_token_lifetime: Duration::from_secs(900),
            },
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_issuer() {
        let mut config = valid_config();
        config.issuer.clear();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            BrokerError::ConfigurationMissing { setting: "issuer" }
        ));
    }

    #[test]
    fn test_missing_signing_secret() {
        let mut config = valid_config();
        config.signing.secret.clear();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            BrokerError::ConfigurationMissing {
                setting: "signing.secret"
            }
        ));
    }

    #[test]
    fn test_zero_lifetime() {
        let mut config = valid_config();
        config.signing.access_token_lifetime = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_deserialize() {
        let config: BrokerConfig = serde_json::from_str("{}").unwrap();
        assert!(config.issuer.is_empty());
        assert_eq!(
            config.signing.access_token_lifetime,
            Duration::from_secs(900)
        );
    }

    #[test]
    fn test_lifetime_humantime() {
        let json = r#"{
            "issuer": "https://id.example.com",
            "base_uri": "https://app.example.com",
            "signing": { "secret": "s", "access_token_lifetime": "1h" }
        }"#;
        let config: BrokerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.signing.access_token_lifetime,
            Duration::from_secs(3600)
        );
    }
}
