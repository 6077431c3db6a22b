//! JWT token generation and validation
//!
//! Implements stateless bearer tokens signed with HMAC-SHA256. Every token
//! carries a `token_type` discriminator so that tokens minted for one purpose
//! are refused where another is expected. Tokens declaring any other signing
//! algorithm are refused outright.
//!
//! Author: hephaex@gmail.com

use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Discriminator for tokens that authorize API requests
pub const ACCESS_TOKEN_TYPE: &str = "access";

const ALGORITHM: Algorithm = Algorithm::HS256;

/// JWT Claims structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// What the token may be used for ("access")
    pub token_type: String,
    /// Subject
    pub user_id: i64,
    /// JWT ID - unique per issuance
    pub jti: String,
    /// Issued at timestamp (Unix epoch seconds)
    pub iat: i64,
    /// Expiration timestamp (Unix epoch seconds)
    pub exp: i64,
}

/// JWT token generation and validation errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Token validity must be at least one second")]
    InvalidValidity,

    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token has expired")]
    Expired,

    #[error("Wrong token type: expected {expected}, found {found}")]
    WrongType { expected: String, found: String },
}

/// Signs and verifies access tokens with a shared secret
#[derive(Clone)]
pub struct AccessTokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for AccessTokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessTokenCodec")
            .field("algorithm", &ALGORITHM)
            .finish_non_exhaustive()
    }
}

impl AccessTokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(ALGORITHM);
        // Expiry is checked against an explicit clock in `verify_at`.
        validation.validate_exp = false;

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Generate an access token for `user_id`
    ///
    /// # Example
    ///
    /// ```no_run
    /// use authgate_api::auth::jwt::{AccessTokenCodec, ACCESS_TOKEN_TYPE};
    /// use std::time::Duration;
    ///
    /// let codec = AccessTokenCodec::new(b"0123456789abcdef0123456789abcdef");
    /// let token = codec.issue(42, Duration::from_secs(900)).expect("Failed to generate token");
    /// let claims = codec.verify(&token, ACCESS_TOKEN_TYPE).expect("Invalid token");
    /// assert_eq!(claims.user_id, 42);
    /// ```
    pub fn issue(&self, user_id: i64, validity: Duration) -> Result<String, JwtError> {
        self.issue_at(user_id, ACCESS_TOKEN_TYPE, validity, Utc::now().timestamp())
    }

    /// Generate a token with an arbitrary `token_type`
    pub fn issue_with_type(
        &self,
        user_id: i64,
        token_type: &str,
        validity: Duration,
    ) -> Result<String, JwtError> {
        self.issue_at(user_id, token_type, validity, Utc::now().timestamp())
    }

    /// Generate a token as if the current time were `now`
    pub fn issue_at(
        &self,
        user_id: i64,
        token_type: &str,
        validity: Duration,
        now: i64,
    ) -> Result<String, JwtError> {
        let validity = i64::try_from(validity.as_secs()).map_err(|_| JwtError::InvalidValidity)?;
        if validity < 1 {
            return Err(JwtError::InvalidValidity);
        }

        let claims = Claims {
            token_type: token_type.to_string(),
            user_id,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now.saturating_add(validity),
        };

        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding)?;
        Ok(token)
    }

    /// Validate a token and extract its claims
    ///
    /// # Returns
    ///
    /// * `Ok(Claims)` - Signature, expiry and type all check out
    /// * `Err(JwtError::Malformed)` - Not a decodable token
    /// * `Err(JwtError::InvalidSignature)` - Bad MAC, or a header naming another algorithm
    /// * `Err(JwtError::Expired)` - `exp` is at or before the current time
    /// * `Err(JwtError::WrongType)` - Valid, but minted for a different purpose
    pub fn verify(&self, token: &str, expected_type: &str) -> Result<Claims, JwtError> {
        self.verify_at(token, expected_type, Utc::now().timestamp())
    }

    /// [`verify`](Self::verify) against an explicit clock
    pub fn verify_at(
        &self,
        token: &str,
        expected_type: &str,
        now: i64,
    ) -> Result<Claims, JwtError> {
        let claims = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName => JwtError::InvalidSignature,
                ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::Malformed,
            })?
            .claims;

        // Exactly at `exp` the token is already expired.
        if now >= claims.exp {
            return Err(JwtError::Expired);
        }

        if claims.token_type != expected_type {
            return Err(JwtError::WrongType {
                expected: expected_type.to_string(),
                found: claims.token_type,
            });
        }

        Ok(claims)
    }
}
