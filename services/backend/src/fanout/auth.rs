use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use shared::SESSION_KEY_PREFIX;
use uuid::Uuid;

use crate::errors::Result;

/// Resolves the credential sent in the real-time channel's auth message
#[async_trait]
pub trait SessionAuthenticator: Send + Sync {
    /// `Ok(None)` for an unknown or malformed token
    async fn authenticate(&self, token: &str) -> Result<Option<Uuid>>;
}

/// Reads `session:{token}` written by the external auth service
pub struct RedisSessionAuthenticator {
    conn: ConnectionManager,
}

impl RedisSessionAuthenticator {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SessionAuthenticator for RedisSessionAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Option<Uuid>> {
        if token.is_empty() {
            return Ok(None);
        }
        let mut conn = self.conn.clone();
        let key = format!("{}{}", SESSION_KEY_PREFIX, token);
        let user_id: Option<String> = conn.get(&key).await?;
        Ok(user_id.and_then(|id| Uuid::parse_str(&id).ok()))
    }
}

/// Fixed token table, for local runs and tests
#[derive(Default)]
pub struct StaticSessionAuthenticator {
    tokens: DashMap<String, Uuid>,
}

impl StaticSessionAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, user_id: Uuid) {
        self.tokens.insert(token.into(), user_id);
    }
}

#[async_trait]
impl SessionAuthenticator for StaticSessionAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Option<Uuid>> {
        Ok(self.tokens.get(token).map(|entry| *entry.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_tokens() {
        let auth = StaticSessionAuthenticator::new();
        let user = Uuid::new_v4();
        auth.insert("good", user);

        assert_eq!(auth.authenticate("good").await.unwrap(), Some(user));
        assert_eq!(auth.authenticate("bad").await.unwrap(), None);
    }
}
