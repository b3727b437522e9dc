//! Patent backend API client
//!
//! One POST per exchange: `{"user_query": ...}` in, `{"response": ...}` out.
//! Timeouts and cancellation are the orchestrator's job, not this module's.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::BackendError;

const USER_AGENT: &str = concat!("patentqa/", env!("CARGO_PKG_VERSION"));

/// Anything that can answer a query with raw (unsanitized) text
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    async fn query(&self, user_query: &str) -> Result<String, BackendError>;
}

/// HTTP transport to the patent RAG server
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpBackend {
    pub fn new(endpoint: &str) -> Result<Self, BackendError> {
        let endpoint = parse_endpoint(endpoint)?;
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    async fn query(&self, user_query: &str) -> Result<String, BackendError> {
        tracing::debug!(endpoint = %self.endpoint, "posting query");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&QueryRequest { user_query })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status { status, body });
        }

        let bytes = response.bytes().await?;
        extract_response(&bytes)
    }
}

/// Validate an endpoint string as an absolute http(s) URL
pub fn parse_endpoint(endpoint: &str) -> Result<Url, BackendError> {
    let invalid = |reason: String| BackendError::InvalidEndpoint {
        url: endpoint.to_string(),
        reason,
    };
    let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme `{}`", other))),
    }
}

/// Pull the `response` string out of a success body
pub fn extract_response(body: &[u8]) -> Result<String, BackendError> {
    let parsed: QueryResponse = serde_json::from_slice(body)
        .map_err(|e| BackendError::Malformed(format!("invalid JSON: {}", e)))?;
    match parsed.response {
        Some(serde_json::Value::String(text)) => Ok(text),
        Some(other) => Err(BackendError::Malformed(format!(
            "`response` is not a string: {}",
            other
        ))),
        None => Err(BackendError::Malformed("missing `response` field".into())),
    }
}

/// Check that something is listening at the endpoint.
///
/// Any HTTP answer counts, even an error status: the backend only serves POST.
pub async fn check_connectivity(endpoint: &str, timeout: Duration) -> Result<(), BackendError> {
    let url = parse_endpoint(endpoint)?;
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()?;
    client.get(url).timeout(timeout).send().await?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
// API Types
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    user_query: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    response: Option<serde_json::Value>,
}
