//! Credential boundary for the monitoring backend.
//!
//! Credential acquisition and caching live elsewhere in the proxy; this
//! crate only consumes an opaque token source during recorder
//! initialization and never inspects or persists credentials.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::MonitoringError;

/// Capability that yields a bearer token for outbound monitoring calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, MonitoringError>;
}

/// Opaque credentials handed to the exporter. May carry no token source at
/// all, in which case the backend is contacted unauthenticated.
#[derive(Clone, Default)]
pub struct Credentials {
    source: Option<Arc<dyn TokenSource>>,
}

impl Credentials {
    /// Credentials without a token source.
    pub fn none() -> Self {
        Self { source: None }
    }

    pub fn with_source(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source: Some(source),
        }
    }

    /// The token source, if any.
    pub fn token_source(&self) -> Option<Arc<dyn TokenSource>> {
        self.source.clone()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("has_token_source", &self.source.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedToken(&'static str);

    #[async_trait]
    impl TokenSource for FixedToken {
        async fn token(&self) -> Result<String, MonitoringError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn credentials_expose_their_source() {
        let creds = Credentials::with_source(Arc::new(FixedToken("tok")));
        let source = creds.token_source().unwrap();
        assert_eq!(source.token().await.unwrap(), "tok");
    }

    #[test]
    fn empty_credentials_have_no_source() {
        assert!(Credentials::none().token_source().is_none());
    }
}
