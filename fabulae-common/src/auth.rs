//! Authentication using Application Default Credentials.
//!
//! Credentials are discovered by `gcp_auth` in the usual ADC order:
//! `GOOGLE_APPLICATION_CREDENTIALS`, the gcloud user credentials file, the
//! GCE metadata server, then the gcloud CLI.

use std::sync::Arc;

use gcp_auth::TokenProvider;
use tracing::{debug, instrument};

use crate::error::AuthError;

#[derive(Clone)]
enum TokenSource {
    Provider(Arc<dyn TokenProvider>),
    #[cfg(any(test, feature = "test-utils"))]
    Mock(String),
}

/// Access-token source shared by every Google Cloud client in a run.
///
/// Cloning is cheap; clones share the underlying token cache, so concurrent
/// synthesis tasks do not each refresh their own token.
#[derive(Clone)]
pub struct AuthProvider {
    source: TokenSource,
}

impl AuthProvider {
    /// Create a new auth provider using Application Default Credentials.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotConfigured` if no valid credentials can be found.
    #[instrument(level = "debug", name = "auth_provider_new")]
    pub async fn new() -> Result<Self, AuthError> {
        let provider = gcp_auth::provider().await.map_err(|e| {
            debug!(error = %e, "Failed to initialize ADC");
            AuthError::NotConfigured
        })?;

        debug!("AuthProvider initialized");
        Ok(Self {
            source: TokenSource::Provider(provider),
        })
    }

    /// A provider that always returns `token` and never touches the network.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn mock(token: &str) -> Self {
        Self {
            source: TokenSource::Mock(token.to_string()),
        }
    }

    /// Get a valid access token for the given scopes.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::RefreshFailed` if the token cannot be obtained.
    #[instrument(level = "debug", name = "get_token", skip(self))]
    pub async fn get_token(&self, scopes: &[&str]) -> Result<String, AuthError> {
        match &self.source {
            TokenSource::Provider(provider) => {
                let token = provider
                    .token(scopes)
                    .await
                    .map_err(|e| AuthError::refresh_failed(e.to_string()))?;
                Ok(token.as_str().to_string())
            }
            #[cfg(any(test, feature = "test-utils"))]
            TokenSource::Mock(token) => Ok(token.clone()),
        }
    }

    /// Authorization header value for the given scopes.
    pub async fn bearer(&self, scopes: &[&str]) -> Result<String, AuthError> {
        Ok(format!("Bearer {}", self.get_token(scopes).await?))
    }
}

/// OAuth2 scopes used by fabulae.
pub mod scopes {
    /// Full access to Google Cloud Platform APIs (TTS, Vertex AI).
    pub const CLOUD_PLATFORM: &str = "https://www.googleapis.com/auth/cloud-platform";

    /// Read/write access to Google Cloud Storage.
    pub const DEVSTORAGE_READ_WRITE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_auth_provider() {
        let mock = AuthProvider::mock("test-token-123");
        let token = mock.get_token(&[scopes::CLOUD_PLATFORM]).await.unwrap();
        assert_eq!(token, "test-token-123");
    }

    #[tokio::test]
    async fn test_bearer_header() {
        let mock = AuthProvider::mock("abc");
        assert_eq!(mock.bearer(&[]).await.unwrap(), "Bearer abc");
    }

    #[tokio::test]
    async fn test_clones_share_source() {
        let mock = AuthProvider::mock("shared");
        let clone = mock.clone();
        assert_eq!(
            mock.get_token(&["a"]).await.unwrap(),
            clone.get_token(&["b"]).await.unwrap()
        );
    }
}
