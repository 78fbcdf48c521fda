use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::ApiError;
use crate::models::{JobStatus, JobSubmitted, QueryRequest, QueryResponse};

/// Base URL of the CAG backend when nothing else is configured.
pub const DEFAULT_API_BASE: &str = "http://localhost:8000";

/// The four exchanges the chat client has with the CAG backend.
///
/// Every call is a single request/response; implementations never retry.
#[async_trait]
pub trait CagApi: Send + Sync {
    /// `POST /query`: processes the query inline and returns the answer.
    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, ApiError>;

    /// `POST /query/async`: enqueues the query and returns the job id.
    async fn query_async(&self, request: &QueryRequest) -> Result<String, ApiError>;

    /// `GET /jobs/{job_id}`
    async fn get_job_status(&self, job_id: &str) -> Result<JobStatus, ApiError>;

    /// `GET /health`: liveness check, payload is passed through untouched.
    async fn health(&self) -> Result<serde_json::Value, ApiError>;
}

/// reqwest-backed [`CagApi`]. Stateless apart from the connection pool, so clones are cheap.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(ApiError::ClientSetup)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Sends the request. Anything that stops the exchange from completing counts as
    /// unreachable; any non-2xx answer is an application error.
    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let resp = request
            .send()
            .await
            .map_err(|e| ApiError::connection(&self.base_url, e))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            message: error_detail(&body)
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_else(|| "Unknown error".to_string()),
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let resp = self.send(request).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ApiError::connection(&self.base_url, e))?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::InvalidResponse {
            message: format!("Parse error: {e}"),
        })
    }
}

#[async_trait]
impl CagApi for ApiClient {
    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, ApiError> {
        debug!("POST /query ({} chars)", request.query.len());
        self.send_json(self.client.post(self.url("/query")).json(request))
            .await
    }

    async fn query_async(&self, request: &QueryRequest) -> Result<String, ApiError> {
        debug!("POST /query/async ({} chars)", request.query.len());
        let submitted: JobSubmitted = self
            .send_json(self.client.post(self.url("/query/async")).json(request))
            .await?;
        Ok(submitted.job_id)
    }

    async fn get_job_status(&self, job_id: &str) -> Result<JobStatus, ApiError> {
        debug!("GET /jobs/{job_id}");
        let path = format!("/jobs/{}", urlencoding::encode(job_id));
        self.send_json(self.client.get(self.url(&path))).await
    }

    async fn health(&self) -> Result<serde_json::Value, ApiError> {
        debug!("GET /health");
        self.send_json(self.client.get(self.url("/health"))).await
    }
}

/// Pulls a human-readable message out of an error body: FastAPI's `detail`,
/// a generic `error`/`message` field, or the raw text.
fn error_detail(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => ["detail", "error", "message"]
            .iter()
            .find_map(|key| match value.get(key) {
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(serde_json::Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            })
            .or_else(|| Some(body.to_string())),
        Err(_) => Some(body.to_string()),
    }
}
