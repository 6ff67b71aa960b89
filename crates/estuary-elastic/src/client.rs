//! HTTP client for the bulk endpoint.

use crate::bulk::{encode_bulk_body, BulkRequest, BulkResponse};
use crate::error::{ElasticError, Result};
use async_trait::async_trait;
use tracing::debug;

/// Bulk submission seam between the sync loop and the search store.
///
/// The production implementation is [`ElasticClient`]; tests substitute an
/// in-memory recording sink.
#[async_trait]
pub trait BulkSink: Send + Sync {
    /// Submit a batch of document operations.
    async fn bulk(&self, requests: &[BulkRequest]) -> Result<BulkResponse>;
}

/// Elasticsearch client speaking the `_bulk` protocol over HTTP.
#[derive(Clone)]
pub struct ElasticClient {
    http: reqwest::Client,
    endpoint: String,
    username: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for ElasticClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticClient")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ElasticClient {
    /// Create a client for the given endpoint, e.g. `http://localhost:9200`.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(ElasticError::endpoint("empty endpoint"));
        }
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ElasticError::endpoint(format!(
                "endpoint must be an http(s) URL: {endpoint}"
            )));
        }

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            username: None,
            password: None,
        })
    }

    /// Use HTTP basic authentication.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Endpoint this client talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl BulkSink for ElasticClient {
    async fn bulk(&self, requests: &[BulkRequest]) -> Result<BulkResponse> {
        if requests.is_empty() {
            return Ok(BulkResponse::default());
        }

        let body = encode_bulk_body(requests)?;
        debug!(
            requests = requests.len(),
            bytes = body.len(),
            "submitting bulk batch"
        );

        let mut call = self
            .http
            .post(format!("{}/_bulk", self.endpoint))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        if let Some(username) = &self.username {
            call = call.basic_auth(username, self.password.as_deref());
        }

        let response = call.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ElasticError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response.json::<BulkResponse>().await?;
        Ok(parsed)
    }
}
