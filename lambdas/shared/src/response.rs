//! Uniform JSON response envelope

use std::collections::BTreeMap;

use lambda_http::{Body, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::errors::Error;
use crate::models::ErrorResponse;

fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Content-Type".to_string(), "application/json".to_string()),
        ("Access-Control-Allow-Origin".to_string(), "*".to_string()),
    ])
}

/// `{statusCode, body, headers}` as returned to API Gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl ApiResponse {
    /// JSON response with the CORS headers every endpoint returns
    pub fn new<T: Serialize + ?Sized>(status_code: u16, body: &T) -> Self {
        Self::with_headers(status_code, body, &[])
    }

    pub fn with_headers<T: Serialize + ?Sized>(status_code: u16, body: &T, extra: &[(&str, &str)]) -> Self {
        let mut headers = default_headers();
        for (name, value) in extra {
            headers.insert(name.to_string(), value.to_string());
        }

        let body = match serde_json::to_string(body) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Failed to serialize response body");
                return Self::error(&Error::Serialization(e));
            }
        };

        Self {
            status_code,
            headers,
            body,
        }
    }

    pub fn ok<T: Serialize + ?Sized>(body: &T) -> Self {
        Self::new(200, body)
    }

    /// Error response using the error's own status code
    pub fn error(err: &Error) -> Self {
        let body = ErrorResponse::new(err.code(), err.to_string());
        let status_code = err.status_code();
        // ErrorResponse always serializes
        let body = serde_json::to_string(&body).unwrap_or_default();
        Self {
            status_code,
            headers: default_headers(),
            body,
        }
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    pub fn into_lambda(self) -> Result<Response<Body>, lambda_http::http::Error> {
        let mut builder = Response::builder().status(self.status_code);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder.body(Body::from(self.body))
    }
}

/// Log the failure and convert it into an error envelope
pub fn error_response(err: &Error) -> ApiResponse {
    error!(error = %err, code = err.code(), "Request failed");
    ApiResponse::error(err)
}
