use async_trait::async_trait;
use thiserror::Error;
use tonic::metadata::MetadataMap;

pub mod interceptor;
pub mod jwt;
pub mod user_store;

pub use interceptor::{accessible_roles, AuthInterceptor, AuthLayer};
pub use jwt::{JwtManager, UserClaims};
pub use user_store::InMemoryUserStore;

/// Metadata key carrying the raw access token.
pub const AUTHORIZATION: &str = "authorization";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization token")]
    MissingToken,
    #[error("invalid access token: {0}")]
    InvalidToken(String),
    #[error("not authorized to access {0:?}")]
    PermissionDenied(String),
    #[error("user already exists: {0}")]
    UserExists(String),
    #[error("internal auth error: {0}")]
    Internal(String),
}

/// A user and the role granted to it. The password is only kept as a bcrypt hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub hashed_password: String,
    pub role: String,
}

impl User {
    pub fn new(username: &str, password: &str, role: &str) -> Result<Self, AuthError> {
        Self::with_cost(username, password, role, bcrypt::DEFAULT_COST)
    }

    /// Like `new` with an explicit bcrypt cost.
    pub fn with_cost(
        username: &str,
        password: &str,
        role: &str,
        cost: u32,
    ) -> Result<Self, AuthError> {
        let hashed_password = bcrypt::hash(password, cost)
            .map_err(|e| AuthError::Internal(format!("hashing password: {e}")))?;
        Ok(Self {
            username: username.to_string(),
            hashed_password,
            role: role.to_string(),
        })
    }

    pub fn is_correct_password(&self, password: &str) -> bool {
        bcrypt::verify(password, &self.hashed_password).unwrap_or(false)
    }
}

#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Stores a copy of the user. Fails if the username is taken.
    async fn save(&self, user: &User) -> Result<(), AuthError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError>;
}

/// Helper: read the access token from gRPC metadata.
pub fn metadata_token(metadata: &MetadataMap) -> Option<String> {
    let token = metadata.get(AUTHORIZATION)?.to_str().ok()?;
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}
