//! Messages the secretary sends to selected registrations of an event

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::event::mark_participants;
use super::registration::{event_key, flag, query_registrations, registration_key, EmailContext};
use super::registration_groups::notify;
use super::{authorized_user, instrumented};
use crate::audit::{audit, registration_audit_key};
use crate::auth::get_origin;
use crate::errors::{Error, Result};
use crate::models::{Event, EventState};
use crate::request::ApiRequest;
use crate::response::ApiResponse;
use crate::services::Services;
use crate::store::{from_item, Item};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationMessage {
    template: String,
    event_id: String,
    registration_ids: Vec<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Class state a template moves the receiving class into
fn marked_state(template: &str) -> Option<EventState> {
    match template {
        "picked" => Some(EventState::Picked),
        "invitation" => Some(EventState::Invited),
        _ => None,
    }
}

async fn set_reserve_notified(services: &Services, items: &[&Item]) -> Result<()> {
    let values: Item = [(":notified".to_string(), Value::Bool(true))].into_iter().collect();
    for item in items {
        let event_id = item.get("eventId").and_then(Value::as_str).unwrap_or_default();
        let id = item.get("id").and_then(Value::as_str).unwrap_or_default();
        services
            .registrations
            .update(
                &registration_key(event_id, id),
                "set #reserveNotified = :notified",
                &[("#reserveNotified", "reserveNotified")],
                &values,
            )
            .await?;
    }
    Ok(())
}

/// `POST /admin/email-send`, body `{template, eventId, registrationIds, text}`
///
/// Every requested registration must exist and be active, otherwise nothing
/// is sent. `picked` and `invitation` sent to more than one registration
/// also advance the class state; `reserve` marks the registrations notified.
pub async fn send_messages(services: &Services, request: &ApiRequest) -> ApiResponse {
    instrumented("sendMessages", request, async {
        let user = authorized_user(services, request).await?;
        let origin = get_origin(request).unwrap_or_default().to_string();
        let message: RegistrationMessage =
            serde_json::from_value(request.json()?).map_err(|e| Error::Validation(e.to_string()))?;

        let registrations = query_registrations(services, &message.event_id).await?;
        let selected: Vec<&Item> = registrations
            .iter()
            .filter(|item| !flag(item, "cancelled"))
            .filter(|item| {
                let id = item.get("id").and_then(Value::as_str).unwrap_or_default();
                message.registration_ids.iter().any(|r| r == id)
            })
            .collect();
        if selected.is_empty() || selected.len() != message.registration_ids.len() {
            return Err(Error::Validation("Not all registrations were found, aborting!".to_string()));
        }

        let event_type = selected[0].get("eventType").and_then(Value::as_str).unwrap_or_default();
        let event: Event = services
            .events
            .read(&event_key(event_type, &message.event_id))
            .await?
            .map(from_item)
            .transpose()?
            .ok_or_else(|| Error::NotFound("Event not found".to_string()))?;
        if !user.can_manage(event.organizer_id()) {
            return Err(Error::Forbidden("not an organizer of the event".to_string()));
        }

        let delivery = notify(
            services,
            &message.template,
            EmailContext::New,
            &event,
            &selected,
            &origin,
            message.text.as_deref(),
        )
        .await;
        let note = format!("Email: {}", message.template);
        for item in &selected {
            let id = item.get("id").and_then(Value::as_str).unwrap_or_default();
            audit(services.audit.as_ref(), &registration_audit_key(&message.event_id, id), &user.name, &note).await;
        }
        info!(
            event_id = %message.event_id,
            template = %message.template,
            ok = delivery.ok.len(),
            failed = delivery.failed.len(),
            "Messages sent"
        );

        if message.template == "reserve" {
            set_reserve_notified(services, &selected).await?;
        }

        let event = match marked_state(&message.template) {
            Some(state) if message.registration_ids.len() > 1 => {
                let class = selected[0].get("class").and_then(Value::as_str).map(str::to_string);
                mark_participants(services, event, state, class.as_deref()).await?
            }
            _ => event,
        };

        let registrations = query_registrations(services, &message.event_id).await?;
        Ok(ApiResponse::ok(&json!({
            "ok": delivery.ok,
            "failed": delivery.failed,
            "classes": event.classes,
            "state": event.state,
            "registrations": registrations,
        })))
    })
    .await
}
