//! Authorization collaborator interface
//!
//! Token issuance, refresh and sign-in flows live outside this engine. The
//! engine consumes bearer tokens through [`TokenSource`], reads the current
//! [`AuthorizationStatus`] to gate connection attempts, and reports
//! authorization-classified failures back through
//! [`TokenSource::record_authorization_error`] — the one status transition
//! this engine owns.

use crate::health::AuthorizationStatus;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

/// Source of bearer tokens and authorization state, keyed by server
/// identity.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A current access token for the server. May itself perform network
    /// I/O (silent refresh) before returning.
    async fn current_bearer_token(&self, server_identity: &str) -> Result<String>;

    /// Current authorization state for the server.
    fn authorization_status(&self, server_identity: &str) -> AuthorizationStatus;

    /// Record that the server rejected our credentials.
    fn record_authorization_error(&self, server_identity: &str);
}

/// A fixed-token source for servers authorized out of band, and for tests.
pub struct StaticTokenSource {
    token: Option<String>,
    status: Mutex<AuthorizationStatus>,
}

impl StaticTokenSource {
    /// A source that always hands out `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            status: Mutex::new(AuthorizationStatus::Authorized),
        }
    }

    /// A source with no credentials at all.
    pub fn unauthorized() -> Self {
        Self {
            token: None,
            status: Mutex::new(AuthorizationStatus::Unauthorized),
        }
    }

    /// Current status (for assertions).
    pub fn status(&self) -> AuthorizationStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn current_bearer_token(&self, server_identity: &str) -> Result<String> {
        self.token.clone().ok_or_else(|| {
            anyhow::anyhow!("no credentials available for server '{}'", server_identity)
        })
    }

    fn authorization_status(&self, _server_identity: &str) -> AuthorizationStatus {
        self.status()
    }

    fn record_authorization_error(&self, server_identity: &str) {
        tracing::debug!("Recording authorization error for '{}'", server_identity);
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = AuthorizationStatus::Error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_hands_out_token() {
        let source = StaticTokenSource::new("tok-123");
        let token = source.current_bearer_token("api").await.unwrap();
        assert_eq!(token, "tok-123");
        assert_eq!(
            source.authorization_status("api"),
            AuthorizationStatus::Authorized
        );
    }

    #[tokio::test]
    async fn test_unauthorized_source_fails() {
        let source = StaticTokenSource::unauthorized();
        assert!(source.current_bearer_token("api").await.is_err());
        assert_eq!(
            source.authorization_status("api"),
            AuthorizationStatus::Unauthorized
        );
    }

    #[test]
    fn test_record_authorization_error_transitions_to_error() {
        let source = StaticTokenSource::new("tok");
        source.record_authorization_error("api");
        assert_eq!(source.status(), AuthorizationStatus::Error);
    }
}
