//! Event type administration
//!
//! Deactivating an event type retires the judges and officials that no
//! longer serve any active event type.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use super::{admin_user, body_object, instrumented, timestamp};
use crate::errors::{Error, Result};
use crate::models::{EventType, Official};
use crate::request::ApiRequest;
use crate::response::ApiResponse;
use crate::services::Services;
use crate::store::{from_item, key, Store};

/// `POST /admin/eventType`
pub async fn put_event_type(services: &Services, request: &ApiRequest) -> ApiResponse {
    instrumented("putEventType", request, async {
        let user = admin_user(services, request).await?;
        let now = timestamp();

        let mut item = body_object(request)?;
        let event_type: EventType = from_item(item.clone()).map_err(|e| Error::Validation(e.to_string()))?;
        if event_type.event_type.is_empty() {
            return Err(Error::Validation("eventType is required".to_string()));
        }

        let existing = services
            .event_types
            .read(&key([("eventType", event_type.event_type.as_str())]))
            .await?;
        if existing.is_none() {
            item.insert("createdAt".to_string(), Value::String(now.clone()));
            item.insert("createdBy".to_string(), Value::String(user.name.clone()));
        }
        item.insert("modifiedAt".to_string(), Value::String(now.clone()));
        item.insert("modifiedBy".to_string(), Value::String(user.name.clone()));
        let mut data = existing.unwrap_or_default();
        data.extend(item);
        services.event_types.write(&data).await?;

        if !event_type.active {
            let active: Vec<String> = services
                .event_types
                .read_all()
                .await?
                .into_iter()
                .map(from_item::<EventType>)
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .filter(|et| et.active)
                .map(|et| et.event_type)
                .collect();

            for store in [&services.judges, &services.officials] {
                retire_inactive(store, &active, &now, &user.name).await?;
            }
        }

        Ok(ApiResponse::ok(&data))
    })
    .await
}

/// Soft delete everyone listed only for inactive event types
async fn retire_inactive(store: &Arc<dyn Store>, active: &[String], now: &str, by: &str) -> Result<()> {
    let mut retired = 0;
    for mut item in store.read_all().await? {
        let official: Official = from_item(item.clone())?;
        if official.event_types.iter().any(|et| active.contains(et)) {
            continue;
        }
        item.insert("deletedAt".to_string(), Value::String(now.to_string()));
        item.insert("deletedBy".to_string(), Value::String(by.to_string()));
        store.write(&item).await?;
        retired += 1;
    }
    if retired > 0 {
        info!(table = %store.table(), retired, "Retired records of inactive event types");
    }
    Ok(())
}
