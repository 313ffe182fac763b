use crate::error::SyncError;
use anyhow::Context;
use reqwest::Url;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub const STATUS_PATH: &str = "/api/status";
pub const TOKEN_EVENTS_PATH: &str = "/api/token_events";
pub const HISTORICAL_DATA_PATH: &str = "/api/historical_data";
pub const WALLET_ALERTS_PATH: &str = "/api/wallet_alerts";
pub const LOGIN_PATH: &str = "/api/login";
pub const REGISTER_PATH: &str = "/api/register";
pub const PROFILE_PATH: &str = "/api/me";
pub const WATCHLIST_PATH: &str = "/api/watchlist";
pub const WATCHLIST_ADD_PATH: &str = "/api/watchlist/add";
pub const WATCHLIST_REMOVE_PATH: &str = "/api/watchlist/remove";

pub fn token_detail_path(address: &str) -> String {
    format!("/api/token/{}", urlencoding::encode(address))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Metrics label; stays low-cardinality even when `path` embeds an address.
    pub endpoint: &'static str,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub bearer: Option<String>,
    pub json: Option<Value>,
}

impl ApiRequest {
    pub fn get(endpoint: &'static str, path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            endpoint,
            path: path.into(),
            query: Vec::new(),
            bearer: None,
            json: None,
        }
    }

    pub fn post(endpoint: &'static str, path: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            ..Self::get(endpoint, path)
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn with_bearer(mut self, token: Option<String>) -> Self {
        self.bearer = token;
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Non-2xx becomes [`SyncError::Status`] carrying the body text; a body
    /// that is not JSON becomes [`SyncError::Shape`].
    pub fn into_json(self) -> Result<Value, SyncError> {
        if !self.is_success() {
            return Err(SyncError::Status {
                status: self.status,
                message: self.body.trim().to_string(),
            });
        }
        serde_json::from_str(&self.body)
            .map_err(|e| SyncError::Shape(format!("expected JSON body: {e}")))
    }
}

/// The network seam. Components only ever talk to the backend through this.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, SyncError>> + Send;
}

/// [`Transport`] over `reqwest`.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url).with_context(|| format!("invalid API base URL: {base_url}"))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url, SyncError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, request.path))
            .map_err(|e| SyncError::Network(format!("invalid request URL: {e}")))?;
        if !request.query.is_empty() {
            let mut qp = url.query_pairs_mut();
            for (k, v) in &request.query {
                qp.append_pair(k, v);
            }
        }
        Ok(url)
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SyncError> {
        let url = self.url_for(&request)?;
        debug!(url = %url, method = ?request.method, "sending request");

        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(ApiResponse { status, body })
    }
}

/// Shared handle to a [`Transport`] with request metrics and JSON helpers.
pub struct ApiClient<T> {
    transport: Arc<T>,
}

impl<T> Clone for ApiClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: Transport> ApiClient<T> {
    pub fn new(transport: T) -> Self {
        Self::from_arc(Arc::new(transport))
    }

    pub fn from_arc(transport: Arc<T>) -> Self {
        Self { transport }
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, SyncError> {
        let endpoint = request.endpoint;
        let start = Instant::now();
        let res = self.transport.send(request).await;
        let ms = start.elapsed().as_secs_f64() * 1000.0;
        metrics::histogram!("dashboard_api_latency_ms", "endpoint" => endpoint).record(ms);

        let status = match &res {
            Ok(r) if r.is_success() => "ok",
            Ok(_) => "http_error",
            Err(_) => "error",
        };
        metrics::counter!("dashboard_api_requests_total", "endpoint" => endpoint, "status" => status)
            .increment(1);
        res
    }

    /// Sends `request` and decodes a JSON body from a 2xx response.
    pub async fn json(&self, request: ApiRequest) -> Result<Value, SyncError> {
        self.send(request).await?.into_json()
    }
}
