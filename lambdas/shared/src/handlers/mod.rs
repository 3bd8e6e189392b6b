//! Request handlers shared by the public and admin functions
//!
//! Every handler takes the [`Services`](crate::Services) it needs and the
//! request, and always produces a response. Failures are logged, counted
//! and mapped to their status code.

pub mod crud;
pub mod email_template;
pub mod event;
pub mod event_type;
pub mod registration;
pub mod registration_groups;
pub mod registration_messages;
pub mod transaction;
pub mod user;

use std::future::Future;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::debug;

use crate::auth::{authorize, current_user};
use crate::errors::{Error, Result};
use crate::metrics::{metrics_error, metrics_success};
use crate::models::User;
use crate::request::ApiRequest;
use crate::response::{error_response, ApiResponse};
use crate::services::Services;
use crate::store::Item;

pub use crud::{read_all_handler, read_handler, write_handler, CrudHandler};

/// Run a handler body, recording a `Success` or `Error` metric for `function`
pub async fn instrumented<F>(function: &str, request: &ApiRequest, body: F) -> ApiResponse
where
    F: Future<Output = Result<ApiResponse>>,
{
    match body.await {
        Ok(response) => {
            metrics_success(function);
            response
        }
        Err(err) => {
            metrics_error(function);
            debug!(function, request_id = ?request.request_id, "Handler failed");
            error_response(&err)
        }
    }
}

/// Current time as stored in audit fields
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The body as a JSON object
pub(crate) fn body_object(request: &ApiRequest) -> Result<Item> {
    match request.json()? {
        Value::Object(item) => Ok(item),
        _ => Err(Error::Validation("Request body must be a JSON object".to_string())),
    }
}

pub(crate) fn required_parameter<'a>(request: &'a ApiRequest, name: &str) -> Result<&'a str> {
    request
        .path_parameter(name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Validation(format!("Missing path parameter {}", name)))
}

/// Authorize and resolve the calling user
pub async fn authorized_user(services: &Services, request: &ApiRequest) -> Result<User> {
    let principal = authorize(request)?;
    current_user(services.users.as_ref(), &principal).await
}

/// Authorize and require the admin flag
pub async fn admin_user(services: &Services, request: &ApiRequest) -> Result<User> {
    let user = authorized_user(services, request).await?;
    if !user.admin {
        return Err(Error::Forbidden(format!("user {} is not an admin", user.id)));
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestServices;
    use serde_json::json;
    use tokio_test::assert_err;

    #[tokio::test]
    async fn test_instrumented_maps_outcome() {
        let request = ApiRequest::new("GET", "/event");

        let ok = instrumented("getEvents", &request, async { Ok(ApiResponse::ok(&json!([]))) }).await;
        assert_eq!(ok.status_code, 200);

        let err = instrumented("getEvents", &request, async {
            Err(Error::Database {
                status: Some(500),
                message: "Test error".into(),
            })
        })
        .await;
        assert_eq!(err.status_code, 500);
        assert_eq!(err.json().unwrap()["error"], "database_error");
    }

    #[tokio::test]
    async fn test_unauthorized_before_data_access() {
        let t = TestServices::new();
        let request = ApiRequest::new("GET", "/admin/user");
        let err = assert_err!(admin_user(&t.services, &request).await);
        assert_eq!(err.status_code(), 401);
        assert!(t.users.calls().is_empty());
    }

    #[tokio::test]
    async fn test_admin_flag_is_required() {
        let t = TestServices::new();
        t.users.insert(json!({"id": "u1", "email": "user@example.com", "admin": false}));
        let request = ApiRequest::new("GET", "/admin/user").with_claims(json!({"email": "user@example.com"}));
        let err = admin_user(&t.services, &request).await.unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2024-01-01T00:00:00.000Z".len());
    }
}
