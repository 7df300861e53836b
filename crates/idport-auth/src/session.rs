//! Sessions and bearer token issuance.
//!
//! A session persists only its id, its optional authorization binding and
//! an opaque refresh token. The signed bearer token is derived at read
//! time from the session id, the signing config and the claims currently
//! reachable through the bound authorization. Rebinding the session
//! immediately changes every subsequently minted token, so revocation
//! needs no token blacklist.
//!
//! The refresh token is the only long-lived secret stored verbatim.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use idport_storage::DynStorage;

use crate::authorization::AuthorizationStore;
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::mapping::AccountMappingStore;
use crate::store::{self, Versioned};

/// The persisted session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Session id, carried in the bearer token's `sid` claim.
    pub id: Uuid,

    /// The bound authorization, if any. `None` is an anonymous session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_id: Option<String>,

    /// Opaque refresh token, generated once at creation.
    pub refresh_token: String,

    /// When the session was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl SessionRecord {
    /// Creates a new session record with a fresh refresh token.
    #[must_use]
    pub fn new(authorization_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            authorization_id,
            refresh_token: Self::generate_refresh_token(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Generates an opaque refresh token.
    ///
    /// Returns a 256-bit random value encoded as base64url (43 characters).
    #[must_use]
    pub fn generate_refresh_token() -> String {
        use base64::Engine;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let mut bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

/// Claims carried by the bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Token issuer.
    pub iss: String,
    /// Session id.
    pub sid: Uuid,
    /// Bound account id, absent for anonymous sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<Uuid>,
    /// Whether the bound authorization completed redemption.
    pub authorized: bool,
    /// Issued-at, Unix seconds.
    pub iat: i64,
    /// Expiry, Unix seconds.
    pub exp: i64,
}

/// A session together with its freshly minted bearer token.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    /// Session id.
    pub id: Uuid,
    /// Signed short-lived bearer token.
    pub token: String,
    /// Opaque refresh token.
    pub refresh_token: String,
    /// Account the session resolves to, if any.
    pub account_id: Option<Uuid>,
    /// Whether the session's authorization completed redemption.
    pub authorized: bool,
}

/// Creates, reads, rebinds and refreshes sessions.
#[derive(Clone)]
pub struct SessionService {
    storage: DynStorage,
    authorizations: AuthorizationStore,
    mappings: AccountMappingStore,
    issuer: String,
    token_lifetime: time::Duration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

const RESOURCE: &str = "session";

fn record_key(id: Uuid) -> String {
    format!("session:{id}")
}

impl SessionService {
    /// Creates the service from a validated broker configuration.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::ConfigurationMissing` if the signing secret or
    /// token lifetime is absent.
    pub fn new(
        storage: DynStorage,
        authorizations: AuthorizationStore,
        mappings: AccountMappingStore,
        config: &BrokerConfig,
    ) -> Result<Self, BrokerError> {
        config.signing.validate()?;
        let secret = config.signing.secret.as_bytes();
        let lifetime = time::Duration::try_from(config.signing.access_token_lifetime)
            .map_err(|e| BrokerError::internal(format!("token lifetime out of range: {e}")))?;
        Ok(Self {
            storage,
            authorizations,
            mappings,
            issuer: config.issuer.clone(),
            token_lifetime: lifetime,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        })
    }

    /// Creates a session, optionally bound to an authorization.
    pub async fn create_session(
        &self,
        authorization_id: Option<&str>,
    ) -> Result<IssuedSession, BrokerError> {
        let record = SessionRecord::new(authorization_id.map(str::to_string));
        store::create(
            self.storage.as_ref(),
            RESOURCE,
            &record_key(record.id),
            &record,
        )
        .await?;
        tracing::debug!(session_id = %record.id, "Created session");
        self.issue(&record).await
    }

    /// Reads a session, re-deriving claims and re-minting the bearer token.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::NotFound` if the session does not exist.
    pub async fn read_session(&self, id: Uuid) -> Result<IssuedSession, BrokerError> {
        let loaded = self.load(id).await?;
        self.issue(&loaded.record).await
    }

    /// Rebinds a session to a different authorization (or to none) with
    /// compare-and-swap, then re-mints the bearer token.
    ///
    /// This is how a session transitions from anonymous to account-bound
    /// after provisioning completes.
    pub async fn update_session(
        &self,
        id: Uuid,
        new_authorization_id: Option<&str>,
    ) -> Result<IssuedSession, BrokerError> {
        let mut loaded = self.load(id).await?;
        loaded.record.authorization_id = new_authorization_id.map(str::to_string);
        store::save(
            self.storage.as_ref(),
            RESOURCE,
            &record_key(id),
            &loaded.record,
            loaded.version,
        )
        .await?;
        self.issue(&loaded.record).await
    }

    /// Verifies a presented refresh token and re-mints the bearer token.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Unauthorized` if the token does not match.
    pub async fn refresh(
        &self,
        id: Uuid,
        refresh_token: &str,
    ) -> Result<IssuedSession, BrokerError> {
        let loaded = self.load(id).await?;
        if !constant_time_eq(&loaded.record.refresh_token, refresh_token) {
            return Err(BrokerError::unauthorized("refresh token mismatch"));
        }
        self.issue(&loaded.record).await
    }

    /// Decodes and validates a bearer token minted by this service.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Unauthorized` if the signature, issuer or
    /// expiry check fails.
    pub fn decode_token(&self, token: &str) -> Result<SessionClaims, BrokerError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = true;
        decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| BrokerError::unauthorized(format!("invalid token: {e}")))
    }

    async fn load(&self, id: Uuid) -> Result<Versioned<SessionRecord>, BrokerError> {
        store::load(self.storage.as_ref(), &record_key(id))
            .await?
            .ok_or_else(|| BrokerError::not_found(RESOURCE, id.to_string()))
    }

    /// Derives claims from the bound authorization and mints the token.
    async fn issue(&self, record: &SessionRecord) -> Result<IssuedSession, BrokerError> {
        let (account_id, authorized) = match &record.authorization_id {
            Some(authorization_id) => {
                let authorization = self
                    .authorizations
                    .load(authorization_id)
                    .await?
                    .ok_or_else(|| BrokerError::not_found("authorization", authorization_id))?
                    .record;
                let account_id = match authorization.account_id {
                    Some(account_id) => Some(account_id),
                    None => self.mappings.find_by_authorization(authorization_id).await?,
                };
                (account_id, authorization.authorized)
            }
            None => (None, false),
        };

        let now = OffsetDateTime::now_utc();
        let claims = SessionClaims {
            iss: self.issuer.clone(),
            sid: record.id,
            sub: account_id,
            authorized,
            iat: now.unix_timestamp(),
            exp: (now + self.token_lifetime).unix_timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| BrokerError::internal(format!("token encoding failed: {e}")))?;

        Ok(IssuedSession {
            id: record.id,
            token,
            refresh_token: record.refresh_token.clone(),
            account_id,
            authorized,
        })
    }
}

impl std::fmt::Debug for SessionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
