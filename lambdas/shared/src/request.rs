//! Invocation-independent view of an API Gateway request

use std::collections::HashMap;

use lambda_http::request::RequestContext;
use lambda_http::{Request, RequestExt};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct ApiRequest {
    pub method: String,
    pub path: String,
    pub path_parameters: HashMap<String, String>,
    pub query: HashMap<String, String>,
    /// Header names are kept as received
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    /// Authorizer claims, `None` when absent or null
    pub claims: Option<Value>,
    pub request_id: Option<String>,
}

impl ApiRequest {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    pub fn from_lambda(request: &Request) -> Self {
        let path_parameters = request
            .path_parameters_ref()
            .map(|params| {
                params
                    .iter()
                    .filter_map(|(k, _)| params.first(k).map(|v| (k.to_string(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let query = request
            .query_string_parameters_ref()
            .map(|params| {
                params
                    .iter()
                    .filter_map(|(k, _)| params.first(k).map(|v| (k.to_string(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let headers = request
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = match std::str::from_utf8(request.body()) {
            Ok("") | Err(_) => None,
            Ok(s) => Some(s.to_string()),
        };

        let (claims, request_id) = match request.request_context_ref() {
            Some(RequestContext::ApiGatewayV1(ctx)) => (
                ctx.authorizer.fields.get("claims").cloned(),
                ctx.request_id.clone(),
            ),
            Some(RequestContext::ApiGatewayV2(ctx)) => (None, ctx.request_id.clone()),
            _ => (None, None),
        };

        Self {
            method: request.method().as_str().to_string(),
            path: request.uri().path().to_string(),
            path_parameters,
            query,
            headers,
            body,
            claims: claims.filter(|c| !c.is_null()),
            request_id,
        }
    }

    pub fn with_path_parameter(mut self, name: &str, value: &str) -> Self {
        self.path_parameters.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_claims(mut self, claims: Value) -> Self {
        self.claims = Some(claims).filter(|c| !c.is_null());
        self
    }

    pub fn path_parameter(&self, name: &str) -> Option<&str> {
        self.path_parameters.get(name).map(String::as_str)
    }

    /// Header lookup, trying the exact name first and then ignoring case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    /// The body as JSON, `{}` when there is none
    pub fn json(&self) -> Result<Value> {
        match self.body.as_deref() {
            None => Ok(Value::Object(Default::default())),
            Some(body) => Ok(serde_json::from_str(body)?),
        }
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self
            .body
            .as_deref()
            .ok_or_else(|| Error::Validation("Request body is required".to_string()))?;
        Ok(serde_json::from_str(body)?)
    }

    /// The non-empty path segments
    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_lookup_ignores_case() {
        let req = ApiRequest::new("get", "/event").with_header("origin", "http://localhost:3000");
        assert_eq!(req.method, "GET");
        assert_eq!(req.header("Origin"), Some("http://localhost:3000"));
        assert_eq!(req.header("referer"), None);
    }

    #[test]
    fn test_null_claims_are_dropped() {
        let req = ApiRequest::new("GET", "/").with_claims(Value::Null);
        assert!(req.claims.is_none());
    }

    #[test]
    fn test_json_body() {
        let req = ApiRequest::new("POST", "/registration");
        assert_eq!(req.json().unwrap(), json!({}));

        let req = req.with_body("{not json");
        assert_eq!(req.json().unwrap_err().status_code(), 400);
    }

    #[test]
    fn test_segments() {
        let req = ApiRequest::new("GET", "/admin/registration/e1/");
        assert_eq!(req.segments(), vec!["admin", "registration", "e1"]);
    }

    #[test]
    fn test_from_lambda() {
        let request = lambda_http::http::Request::builder()
            .method("PUT")
            .uri("https://api.example.com/registration")
            .header("Origin", "http://localhost:3000")
            .body(lambda_http::Body::from(r#"{"eventId":"e1"}"#))
            .unwrap();

        let req = ApiRequest::from_lambda(&request);
        assert_eq!(req.method, "PUT");
        assert_eq!(req.path, "/registration");
        assert_eq!(req.header("origin"), Some("http://localhost:3000"));
        assert_eq!(req.json().unwrap(), json!({"eventId": "e1"}));
        assert!(req.claims.is_none());
    }
}
