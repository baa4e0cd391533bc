// Authentication module for the OnlyCat gateway client

use crate::error::OnlyCatResult;
use async_trait::async_trait;

/// Supplies the bearer token the gateway expects on each connection attempt.
///
/// The provider is invoked once per attempt, so implementations may refresh
/// expired tokens between reconnects.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> OnlyCatResult<String>;
}

/// Token provider backed by a fixed token string
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> OnlyCatResult<String> {
        Ok(self.token.clone())
    }
}
