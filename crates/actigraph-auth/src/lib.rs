//! Signed, time-bounded identity tokens.
//!
//! The codec is stateless: validity is determined purely by signature
//! and expiry, never by a server-side revocation list. Tokens are
//! compact three-part HS256 JWTs; signing and verification are
//! delegated to `jsonwebtoken`, never hand-rolled byte comparison.
//!
//! The same codec is shared by the streaming handshake and whatever
//! login endpoint sits at the REST boundary: that collaborator checks
//! credentials and calls [`TokenCodec::issue`]; credential checking
//! itself is not this crate's concern.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use actigraph_types::UserId;

/// Default token lifetime, fixed at issuance.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 7); // 7 days

/// Result type for token operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors that can occur when issuing or verifying tokens.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token's signature verified but its expiry has passed.
    #[error("token expired")]
    Expired,

    /// Malformed structure, bad signature, or any other validation failure.
    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Claims embedded in an identity token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user identity.
    pub sub: String,
    /// Issued-at timestamp (seconds since epoch).
    pub iat: u64,
    /// Expiration timestamp (seconds since epoch).
    pub exp: u64,
}

impl Claims {
    /// Returns the subject as a [`UserId`].
    pub fn user_id(&self) -> UserId {
        UserId::new(&self.sub)
    }
}

/// Issues and verifies identity tokens under a symmetric key.
pub struct TokenCodec {
    secret: String,
    ttl: Duration,
    validation: Validation,
}

impl TokenCodec {
    /// Creates a codec with the default lifetime.
    pub fn new(secret: impl Into<String>) -> Self {
        let mut validation = Validation::default();
        // A token verified at or past its expiry is rejected; no grace.
        validation.leeway = 0;

        Self {
            secret: secret.into(),
            ttl: DEFAULT_TOKEN_TTL,
            validation,
        }
    }

    /// Sets the token lifetime.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns the configured token lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues a signed token for the given user.
    ///
    /// Claims carry the current time as issued-at and issued-at plus
    /// the configured TTL as expiry.
    pub fn issue(&self, user: &UserId) -> AuthResult<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AuthError::Invalid(format!("time error: {e}")))?
            .as_secs();

        let claims = Claims {
            sub: user.as_str().to_string(),
            iat: now,
            exp: now + self.ttl.as_secs(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AuthError::Invalid(format!("failed to sign token: {e}")))
    }

    /// Verifies a token and returns its claims.
    ///
    /// Fails if the structure is malformed, the signature does not
    /// verify under this codec's key, or the current time is at or
    /// past the embedded expiry.
    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &self.validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Invalid(e.to_string()),
        })?;

        Ok(data.claims)
    }
}
