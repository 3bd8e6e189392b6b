//! User administration
//!
//! Admins manage everyone. Organizer admins see the admins and the users
//! of their own organizers, and may grant roles within those organizers.
//! Nobody changes their own rights.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::{authorized_user, instrumented, timestamp};
use crate::auth::get_origin;
use crate::email::send_templated_mail;
use crate::errors::{Error, Result};
use crate::models::{Organizer, User, UserRole};
use crate::request::ApiRequest;
use crate::response::ApiResponse;
use crate::services::Services;
use crate::store::{from_item, key, Item};

/// Template sent when a role is granted
pub const ACCESS_TEMPLATE: &str = "access";

fn user_key(id: &str) -> Item {
    key([("id", id)])
}

/// Users visible to `user`, who administers `admin_for`
pub fn filter_relevant_users(users: Vec<User>, user: &User, admin_for: &[&str]) -> Vec<User> {
    if user.admin {
        return users;
    }
    users
        .into_iter()
        .filter(|u| u.admin || u.roles.keys().any(|org| admin_for.contains(&org.as_str())))
        .collect()
}

async fn read_user(services: &Services, id: &str) -> Result<User> {
    let item = services
        .users
        .read(&user_key(id))
        .await?
        .ok_or_else(|| Error::NotFound(format!("User not found with id \"{}\"", id)))?;
    from_item(item)
}

/// `GET /admin/user`
pub async fn get_users(services: &Services, request: &ApiRequest) -> ApiResponse {
    instrumented("getUsers", request, async {
        let user = authorized_user(services, request).await?;
        let admin_for = user.admin_for();
        if admin_for.is_empty() && !user.admin {
            return Err(Error::Forbidden(format!("user {} administers no organizer", user.id)));
        }

        let users = services
            .users
            .read_all()
            .await?
            .into_iter()
            .map(from_item::<User>)
            .collect::<Result<Vec<_>>>()?;
        Ok(ApiResponse::ok(&filter_relevant_users(users, &user, &admin_for)))
    })
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetAdmin {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    admin: bool,
}

/// `POST /admin/user/admin`
pub async fn set_admin(services: &Services, request: &ApiRequest) -> ApiResponse {
    instrumented("setAdmin", request, async {
        let user = authorized_user(services, request).await?;
        let body: SetAdmin = request.parse()?;
        if body.user_id.is_empty() {
            return Err(Error::Validation("userId is required".to_string()));
        }
        if user.id == body.user_id || !user.admin {
            return Err(Error::Forbidden(format!("user {} may not change admin rights of {}", user.id, body.user_id)));
        }

        let mut existing = read_user(services, &body.user_id).await?;
        let now = timestamp();
        let mut values = Item::new();
        values.insert(":admin".to_string(), Value::Bool(body.admin));
        values.insert(":modifiedAt".to_string(), Value::String(now));
        values.insert(":modifiedBy".to_string(), Value::String(user.name.clone()));
        services
            .users
            .update(
                &user_key(&existing.id),
                "set #admin = :admin, #modifiedAt = :modifiedAt, #modifiedBy = :modifiedBy",
                &[("#admin", "admin"), ("#modifiedAt", "modifiedAt"), ("#modifiedBy", "modifiedBy")],
                &values,
            )
            .await?;
        info!(user_id = %existing.id, admin = body.admin, by = %user.id, "Admin flag changed");

        existing.admin = body.admin;
        Ok(ApiResponse::ok(&existing))
    })
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetRole {
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    org_id: String,
    /// `admin`, `secretary` or `none`
    role: String,
}

impl SetRole {
    fn role(&self) -> Result<Option<UserRole>> {
        if self.role == "none" {
            return Ok(None);
        }
        serde_json::from_value(Value::String(self.role.clone()))
            .map(Some)
            .map_err(|_| Error::Validation(format!("unknown role {}", self.role)))
    }
}

/// `POST /admin/user/role`
pub async fn set_role(services: &Services, request: &ApiRequest) -> ApiResponse {
    instrumented("setRole", request, async {
        let user = authorized_user(services, request).await?;
        let body: SetRole = request.parse()?;
        if body.org_id.is_empty() || body.user_id.is_empty() {
            return Err(Error::Validation("userId and orgId are required".to_string()));
        }
        let role = body.role()?;

        if user.id == body.user_id {
            warn!(user_id = %user.id, "Trying to set own roles");
            return Err(Error::Forbidden("own roles can not be changed".to_string()));
        }
        if !user.admin && user.roles.get(&body.org_id) != Some(&UserRole::Admin) {
            warn!(user_id = %user.id, org_id = %body.org_id, "No right to set role");
            return Err(Error::Forbidden(format!("user {} is not an admin of {}", user.id, body.org_id)));
        }

        let existing = read_user(services, &body.user_id).await?;
        let origin = get_origin(request).unwrap_or_default();
        let saved = set_user_role(services, existing, &body.org_id, role, &user.name, origin).await?;
        Ok(ApiResponse::ok(&saved))
    })
    .await
}

fn role_name(role: UserRole) -> &'static str {
    match role {
        UserRole::Admin => "Pääkäyttäjä",
        UserRole::Secretary => "Sihteeri",
    }
}

/// Grant (`Some`) or revoke (`None`) a role and tell the user about a grant
pub async fn set_user_role(
    services: &Services,
    mut user: User,
    org_id: &str,
    role: Option<UserRole>,
    modified_by: &str,
    origin: &str,
) -> Result<User> {
    match role {
        Some(role) => user.roles.insert(org_id.to_string(), role),
        None => user.roles.remove(org_id),
    };

    let mut values = Item::new();
    values.insert(":roles".to_string(), serde_json::to_value(&user.roles)?);
    values.insert(":modifiedAt".to_string(), Value::String(timestamp()));
    values.insert(":modifiedBy".to_string(), Value::String(modified_by.to_string()));
    services
        .users
        .update(
            &user_key(&user.id),
            "set #roles = :roles, #modifiedAt = :modifiedAt, #modifiedBy = :modifiedBy",
            &[("#roles", "roles"), ("#modifiedAt", "modifiedAt"), ("#modifiedBy", "modifiedBy")],
            &values,
        )
        .await?;
    info!(user_id = %user.id, org_id = %org_id, role = ?role, "Role changed");

    if let Some(role) = role {
        let org_name = match services.organizers.read(&key([("id", org_id)])).await? {
            Some(item) => from_item::<Organizer>(item)?.name,
            None => "Tuntematon".to_string(),
        };
        let first_name = user.name.split(' ').next().filter(|n| !n.is_empty()).unwrap_or("Nimetön");
        let data = json!({
            "user": {"firstName": first_name, "email": user.email},
            "link": format!("{}/login", origin),
            "orgName": org_name,
            "roleName": role_name(role),
            "admin": role == UserRole::Admin,
            "secretary": role == UserRole::Secretary,
        });
        if let Err(err) = send_templated_mail(
            services.mailer.as_ref(),
            ACCESS_TEMPLATE,
            "fi",
            &services.config.email_from,
            vec![user.email.clone()],
            data,
        )
        .await
        {
            error!(error = %err, user_id = %user.id, "Failed to send access email");
        }
    }

    Ok(user)
}
