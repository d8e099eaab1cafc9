//! HTTP transport abstraction for provider APIs.
//!
//! Adapters never own an HTTP client; they speak to a [`ProviderGateway`]
//! injected at construction. The real implementation lives behind the
//! `http-gateway` feature; tests use the scripted gateway from
//! [`crate::test_utils`].

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::ProviderError;

/// Minimal JSON-over-HTTP surface the adapters need.
///
/// Each adapter builds provider-specific paths and bodies; the gateway only
/// moves bytes. Implementations must be safe to share across concurrent
/// callers.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// POST a JSON body, returning the parsed JSON response.
    async fn post(&self, url: &str, body: Value) -> Result<Value, ProviderError>;

    /// GET a resource, returning the parsed JSON response.
    async fn get(&self, url: &str) -> Result<Value, ProviderError>;
}

/// Gateway backed by `reqwest`.
///
/// Only compiled with the `http-gateway` feature so the rest of the crate
/// (and its tests) build without a TLS stack.
#[cfg(feature = "http-gateway")]
pub struct HttpGateway {
    client: reqwest::Client,
    bearer_token: Option<String>,
}

#[cfg(feature = "http-gateway")]
impl HttpGateway {
    pub fn new() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(ProviderError::transport)?;
        Ok(Self {
            client,
            bearer_token: None,
        })
    }

    /// Attach a bearer token sent with every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[cfg(feature = "http-gateway")]
#[async_trait]
impl ProviderGateway for HttpGateway {
    async fn post(&self, url: &str, body: Value) -> Result<Value, ProviderError> {
        let req = self.apply_auth(self.client.post(url)).json(&body);
        let resp = req.send().await.map_err(ProviderError::transport)?;
        resp.json().await.map_err(ProviderError::transport)
    }

    async fn get(&self, url: &str) -> Result<Value, ProviderError> {
        let req = self.apply_auth(self.client.get(url));
        let resp = req.send().await.map_err(ProviderError::transport)?;
        resp.json().await.map_err(ProviderError::transport)
    }
}
