use crate::auth::{AuthError, User, UserStore};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

/// In-memory user store.
///
/// Users are usually seeded at startup from the `[auth]` section of the
/// config file. Stored users are cloned on the way in and on the way out.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserStore {
    users: Arc<RwLock<HashMap<String, User>>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hashes `password` and stores the resulting user.
    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
        role: &str,
        cost: u32,
    ) -> Result<(), AuthError> {
        let user = User::with_cost(username, password, role, cost)?;
        self.save(&user).await
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn save(&self, user: &User) -> Result<(), AuthError> {
        let mut guard = self.users.write().await;
        if guard.contains_key(&user.username) {
            return Err(AuthError::UserExists(user.username.clone()));
        }
        guard.insert(user.username.clone(), user.clone());
        Ok(())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        let guard = self.users.read().await;
        Ok(guard.get(username).cloned())
    }
}
