//! Anti-forgery token collaborator.

use async_trait::async_trait;
use thiserror::Error;

/// The token provider could not produce a token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("token unavailable: {0}")]
pub struct TokenError(pub String);

/// Supplies the anti-forgery token presented when a link opens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Fetch a token, possibly from cache. `None` means no token is needed.
    async fn get_token(&self) -> Result<Option<String>, TokenError>;

    /// Drop any cached token so the next fetch goes to the source.
    fn invalidate_token(&self);
}

/// Provider for deployments without anti-forgery protection.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoToken;

#[async_trait]
impl TokenProvider for NoToken {
    async fn get_token(&self) -> Result<Option<String>, TokenError> {
        Ok(None)
    }

    fn invalidate_token(&self) {}
}
