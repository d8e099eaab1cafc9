//! Test utilities for provider testing.
//!
//! Provides a scripted [`MockGateway`] so adapter and workflow tests run
//! without any network access.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chargekit_providers::test_utils::MockGateway;
//! use serde_json::json;
//!
//! let gateway = MockGateway::new();
//! gateway.stub("/v1/payment_intents", json!({"id": "pi_1", "status": "requires_confirmation"}));
//!
//! let adapter = CardAdapter::new(config, gateway.clone());
//! let result = adapter.charge(&spec).await?;
//! assert_eq!(gateway.requests().len(), 1);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::ProviderError;
use crate::gateway::ProviderGateway;

/// A request the mock gateway saw.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub body: Value,
}

#[derive(Default)]
struct MockState {
    /// Path substring -> queued responses (drained front to back; the last
    /// one sticks for repeated calls).
    stubs: HashMap<String, Vec<Value>>,
    requests: Vec<RecordedRequest>,
    fail_all: Option<String>,
}

/// Scripted gateway with configurable behavior.
///
/// Routes on the longest matching path substring. Unstubbed paths return a
/// transport error, which mirrors an unreachable provider.
#[derive(Clone, Default)]
pub struct MockGateway {
    state: Arc<Mutex<MockState>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stub every request whose URL contains `path` with a fixed response.
    pub fn stub(&self, path: impl Into<String>, response: Value) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.stubs.entry(path.into()).or_default().push(response);
    }

    /// Make every request fail with a transport error.
    pub fn fail_with(&self, message: impl Into<String>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.fail_all = Some(message.into());
    }

    /// All requests seen so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.requests.clone()
    }

    fn respond(&self, method: &'static str, url: &str, body: Value) -> Result<Value, ProviderError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.requests.push(RecordedRequest {
            method,
            url: url.to_string(),
            body,
        });

        if let Some(msg) = &state.fail_all {
            return Err(ProviderError::Transport(msg.clone()));
        }

        // Longest matching substring wins so "/v1/refunds" beats "/v1".
        let key = state
            .stubs
            .keys()
            .filter(|k| url.contains(k.as_str()))
            .max_by_key(|k| k.len())
            .cloned();

        match key {
            Some(k) => {
                let queue = state.stubs.get_mut(&k).expect("stub key exists");
                let response = if queue.len() > 1 {
                    queue.remove(0)
                } else {
                    queue[0].clone()
                };
                Ok(response)
            }
            None => Err(ProviderError::Transport(format!("no stub for {url}"))),
        }
    }
}

#[async_trait]
impl ProviderGateway for MockGateway {
    async fn post(&self, url: &str, body: Value) -> Result<Value, ProviderError> {
        self.respond("POST", url, body)
    }

    async fn get(&self, url: &str) -> Result<Value, ProviderError> {
        self.respond("GET", url, Value::Null)
    }
}

/// A gateway that hangs forever. Exercises the manager's timeout ceiling.
#[derive(Clone, Default)]
pub struct HangingGateway;

#[async_trait]
impl ProviderGateway for HangingGateway {
    async fn post(&self, _url: &str, _body: Value) -> Result<Value, ProviderError> {
        std::future::pending().await
    }

    async fn get(&self, _url: &str) -> Result<Value, ProviderError> {
        std::future::pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn stubbed_path_returns_response() {
        let gateway = MockGateway::new();
        gateway.stub("/v1/charges", json!({"id": "ch_1"}));

        let resp = gateway
            .post("https://api.example.test/v1/charges", json!({}))
            .await
            .unwrap();
        assert_eq!(resp["id"], "ch_1");
        assert_eq!(gateway.requests().len(), 1);
    }

    #[tokio::test]
    async fn queued_responses_drain_in_order() {
        let gateway = MockGateway::new();
        gateway.stub("/v1/charges", json!({"attempt": 1}));
        gateway.stub("/v1/charges", json!({"attempt": 2}));

        let first = gateway.post("x/v1/charges", json!({})).await.unwrap();
        let second = gateway.post("x/v1/charges", json!({})).await.unwrap();
        let third = gateway.post("x/v1/charges", json!({})).await.unwrap();
        assert_eq!(first["attempt"], 1);
        assert_eq!(second["attempt"], 2);
        // Last response sticks
        assert_eq!(third["attempt"], 2);
    }

    #[tokio::test]
    async fn unstubbed_path_is_a_transport_error() {
        let gateway = MockGateway::new();
        let err = gateway.post("x/v1/unknown", json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
    }

    #[tokio::test]
    async fn fail_all_simulates_outage() {
        let gateway = MockGateway::new();
        gateway.stub("/v1/charges", json!({"id": "ch_1"}));
        gateway.fail_with("connection reset");

        let err = gateway.post("x/v1/charges", json!({})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
    }
}
