use crate::auth::{AuthError, User};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClaims {
    pub username: String,
    pub role: String,
    /// Expiry as seconds since the unix epoch.
    pub exp: u64,
}

/// Issues and verifies HS256 access tokens.
///
/// Tokens are self-contained: nothing is recorded server side, so a token stays
/// valid until it expires or the secret is rotated.
#[derive(Clone)]
pub struct JwtManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    token_duration: Duration,
}

impl JwtManager {
    pub fn new(secret_key: &str, token_duration: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding: EncodingKey::from_secret(secret_key.as_bytes()),
            decoding: DecodingKey::from_secret(secret_key.as_bytes()),
            validation,
            token_duration,
        }
    }

    pub fn token_duration(&self) -> Duration {
        self.token_duration
    }

    pub fn generate(&self, user: &User) -> Result<String, AuthError> {
        let exp = Utc::now().timestamp().max(0) as u64 + self.token_duration.as_secs();
        self.sign(&UserClaims {
            username: user.username.clone(),
            role: user.role.clone(),
            exp,
        })
    }

    fn sign(&self, claims: &UserClaims) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("signing token: {e}")))
    }

    /// Checks signature, algorithm and expiry, and returns the embedded claims.
    pub fn verify(&self, access_token: &str) -> Result<UserClaims, AuthError> {
        decode::<UserClaims>(access_token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

impl std::fmt::Debug for JwtManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtManager")
            .field("token_duration", &self.token_duration)
            .finish_non_exhaustive()
    }
}
