//! Koekalenteri API Client for testing

use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// API client for the Koekalenteri REST API
pub struct KoekalenteriClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Result type for API responses
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// HTTP error with status code and body
    Http { status: StatusCode, body: String },
    /// Network or serialization error
    Request(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(status.as_u16()),
            ApiError::Request(_) => None,
        }
    }

    /// The error envelope of an HTTP error
    pub fn response(&self) -> Option<ErrorResponse> {
        match self {
            ApiError::Http { body, .. } => serde_json::from_str(body).ok(),
            ApiError::Request(_) => None,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Http { status, body } => write!(f, "HTTP {}: {}", status, body),
            ApiError::Request(msg) => write!(f, "Request error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl KoekalenteriClient {
    /// Create a new client with the given base URL
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a client from environment variable
    pub fn from_env() -> Self {
        let base_url = std::env::var("KOEKALENTERI_API_URL")
            .expect("KOEKALENTERI_API_URL environment variable not set");
        Self::new(&base_url)
    }

    // =========================================================================
    // Events
    // =========================================================================

    pub async fn get_events(&self) -> ApiResult<Vec<Value>> {
        self.get("/event").await
    }

    pub async fn get_event(&self, event_type: &str, id: &str) -> ApiResult<Value> {
        self.get(&format!("/event/{}/{}", event_type, id)).await
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// `kind` is one of `eventType`, `judge`, `official`, `organizer`
    pub async fn get_lookup(&self, kind: &str) -> ApiResult<Vec<Value>> {
        self.get(&format!("/{}", kind)).await
    }

    // =========================================================================
    // Registrations
    // =========================================================================

    pub async fn put_registration(&self, registration: &Value) -> ApiResult<Value> {
        self.send("PUT", "/registration", Some(registration)).await
    }

    pub async fn get_registration(&self, event_id: &str, id: &str) -> ApiResult<Value> {
        self.get(&format!("/registration/{}/{}", event_id, id)).await
    }

    // =========================================================================
    // HTTP Helpers
    // =========================================================================

    /// Raw request, for paths the typed helpers do not cover
    pub async fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        body: Option<&B>,
    ) -> ApiResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let method = reqwest::Method::from_bytes(method.as_bytes()).map_err(|e| ApiError::Request(e.to_string()))?;
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|e| ApiError::Request(e.to_string()))?;

        self.handle_response(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.send::<Value, T>("GET", path, None).await
    }

    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> ApiResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Request(e.to_string()))?;

        if status.is_success() {
            serde_json::from_str(&body).map_err(|e| ApiError::Request(e.to_string()))
        } else {
            Err(ApiError::Http { status, body })
        }
    }
}
