//! Request authorization
//!
//! A request is authorized when API Gateway attached a non-null claims
//! object, or when it comes from one of the local development origins.
//! The origin allow-list is a development convenience, not a security
//! boundary.

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use crate::errors::{Error, Result};
use crate::models::{new_id, User};
use crate::request::ApiRequest;
use crate::store::{from_item, to_item, Store};

/// Origins accepted without claims
pub const DEV_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://127.0.0.1:3000"];

pub const ANONYMOUS: &str = "anonymous";

/// The authenticated caller
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub username: String,
    pub email: Option<String>,
    pub claims: Option<Value>,
}

pub fn get_origin(request: &ApiRequest) -> Option<&str> {
    request.header("origin")
}

fn claim<'a>(claims: &'a Value, name: &str) -> Option<&'a str> {
    claims.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Name of the caller for audit fields
pub fn get_username(request: &ApiRequest) -> String {
    request
        .claims
        .as_ref()
        .and_then(|c| claim(c, "name").or_else(|| claim(c, "cognito:username")))
        .unwrap_or(ANONYMOUS)
        .to_string()
}

/// Authorize the request, before any data access
pub fn authorize(request: &ApiRequest) -> Result<Principal> {
    if let Some(claims) = &request.claims {
        return Ok(Principal {
            username: get_username(request),
            email: claim(claims, "email").map(str::to_lowercase),
            claims: Some(claims.clone()),
        });
    }

    match get_origin(request) {
        Some(origin) if DEV_ORIGINS.contains(&origin) => {
            warn!(origin = %origin, "Authorized by development origin");
            Ok(Principal {
                username: ANONYMOUS.to_string(),
                email: None,
                claims: None,
            })
        }
        _ => Err(Error::Unauthorized),
    }
}

/// Resolve the user record of the principal, creating it on first sight
pub async fn current_user(users: &dyn Store, principal: &Principal) -> Result<User> {
    let email = principal
        .email
        .as_deref()
        .ok_or_else(|| Error::Forbidden("no email in claims".to_string()))?;

    let existing = users
        .read_all()
        .await?
        .into_iter()
        .map(from_item::<User>)
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .find(|u| u.email.eq_ignore_ascii_case(email));

    if let Some(user) = existing {
        return Ok(user);
    }

    let user = User {
        id: new_id(),
        name: principal.username.clone(),
        email: email.to_string(),
        created_at: Some(Utc::now()),
        created_by: Some("system".to_string()),
        ..Default::default()
    };
    users.write(&to_item(&user)?).await?;
    info!(user_id = %user.id, "Created user on first sign-in");

    Ok(user)
}
