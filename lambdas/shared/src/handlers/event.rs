//! Event handlers

use serde_json::Value;
use tracing::info;

use super::{authorized_user, body_object, instrumented, required_parameter, timestamp};
use crate::errors::{Error, Result};
use crate::models::{new_id, Event, EventState};
use crate::request::ApiRequest;
use crate::response::ApiResponse;
use crate::services::Services;
use crate::store::{from_item, key, Item};

fn event_key(event_type: &str, id: &str) -> Item {
    key([("eventType", event_type), ("id", id)])
}

fn organizer_id(item: &Item) -> Option<&str> {
    item.get("organizer").and_then(|o| o.get("id")).and_then(Value::as_str)
}

/// Events without a state are drafts
fn is_published(item: &Item) -> bool {
    !matches!(item.get("state").and_then(Value::as_str), None | Some("draft"))
}

/// `GET /event`, everything but drafts
pub async fn get_events(services: &Services, request: &ApiRequest) -> ApiResponse {
    instrumented("getEvents", request, async {
        let events: Vec<Item> = services
            .events
            .read_all()
            .await?
            .into_iter()
            .filter(|item| is_published(item))
            .collect();
        Ok(ApiResponse::ok(&events))
    })
    .await
}

/// `GET /event/{eventType}/{id}`
pub async fn get_event(services: &Services, request: &ApiRequest) -> ApiResponse {
    instrumented("getEvent", request, async {
        let event_type = required_parameter(request, "eventType")?;
        let id = required_parameter(request, "id")?;
        let item = services
            .events
            .read(&event_key(event_type, id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("Event of type \"{}\" not found with id \"{}\"", event_type, id)))?;
        Ok(ApiResponse::ok(&item))
    })
    .await
}

/// `GET /admin/event`, all non-deleted events the caller may see
pub async fn get_admin_events(services: &Services, request: &ApiRequest) -> ApiResponse {
    instrumented("getAdminEvents", request, async {
        let user = authorized_user(services, request).await?;
        let events: Vec<Item> = services
            .events
            .read_all()
            .await?
            .into_iter()
            .filter(|item| user.can_manage(organizer_id(item)))
            .collect();
        Ok(ApiResponse::ok(&events))
    })
    .await
}

/// `POST /admin/event`
pub async fn put_event(services: &Services, request: &ApiRequest) -> ApiResponse {
    instrumented("putEvent", request, write_event(services, request)).await
}

async fn write_event(services: &Services, request: &ApiRequest) -> Result<ApiResponse> {
    let user = authorized_user(services, request).await?;
    let now = timestamp();

    let mut item = body_object(request)?;
    let incoming: Event = from_item(item.clone()).map_err(|e| Error::Validation(e.to_string()))?;
    if incoming.event_type.is_empty() {
        return Err(Error::Validation("eventType is required".to_string()));
    }

    let mut data = Item::new();
    if incoming.id.is_empty() {
        item.insert("id".to_string(), Value::String(new_id()));
        item.insert("createdAt".to_string(), Value::String(now.clone()));
        item.insert("createdBy".to_string(), Value::String(user.name.clone()));
    } else if let Some(existing_item) = services.events.read(&event_key(&incoming.event_type, &incoming.id)).await? {
        let existing: Event = from_item(existing_item.clone())?;
        if !user.can_manage(existing.organizer_id()) {
            return Err(Error::Forbidden(format!("user {} may not edit event {}", user.id, existing.id)));
        }
        if let Some(orig) = extended_entry_end(&existing, &incoming) {
            // entry period was extended, keep the original end date
            info!(event_id = %existing.id, "Entry period extended");
            item.insert("entryOrigEndDate".to_string(), Value::String(orig));
        }
        data = existing_item;
    }

    // modification info is always updated
    item.insert("modifiedAt".to_string(), Value::String(now));
    item.insert("modifiedBy".to_string(), Value::String(user.name.clone()));
    data.extend(item);

    let event: Event = from_item(data.clone()).map_err(|e| Error::Validation(e.to_string()))?;
    if !user.can_manage(event.organizer_id()) {
        return Err(Error::Forbidden(format!("user {} may not edit event {}", user.id, event.id)));
    }

    services.events.write(&data).await?;
    info!(event_id = %event.id, event_type = %event.event_type, "Event saved");
    Ok(ApiResponse::ok(&data))
}

/// The stored end date when a confirmed event's entry period is extended for the first time
fn extended_entry_end(existing: &Event, incoming: &Event) -> Option<String> {
    if existing.state != EventState::Confirmed || existing.entry_orig_end_date.is_some() {
        return None;
    }
    match (existing.entry_end_date, incoming.entry_end_date) {
        (Some(current), Some(new)) if new > current => {
            Some(current.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        }
        _ => None,
    }
}

/// Class states in the order an event progresses through them
const CLASS_STATES: [EventState; 4] = [EventState::Picked, EventState::Invited, EventState::Started, EventState::Ended];
const EVENT_STATES: [EventState; 5] = [
    EventState::Confirmed,
    EventState::Picked,
    EventState::Invited,
    EventState::Started,
    EventState::Ended,
];

/// The later of two states, states outside `order` never win
fn upgrade_state(order: &[EventState], old: Option<EventState>, new: EventState) -> EventState {
    let position = |state: EventState| order.iter().position(|s| *s == state);
    match old {
        Some(old) if position(old).map_or(-1, |p| p as i64) >= position(new).map_or(-1, |p| p as i64) => old,
        _ => new,
    }
}

pub fn upgrade_class_state(old: Option<EventState>, new: EventState) -> EventState {
    upgrade_state(&CLASS_STATES, old, new)
}

pub fn upgrade_event_state(old: EventState, new: EventState) -> EventState {
    upgrade_state(&EVENT_STATES, Some(old), new)
}

/// Advance the class (and the event, once every class has caught up) to `state`
pub(crate) async fn mark_participants(
    services: &Services,
    mut event: Event,
    state: EventState,
    class: Option<&str>,
) -> Result<Event> {
    let mut all_marked = true;
    if let Some(class) = class {
        let name = serde_json::to_value(state)?;
        for c in event.classes.iter_mut().filter(|c| c.class == class) {
            let old = c.extra.get("state").cloned().and_then(|s| serde_json::from_value(s).ok());
            c.extra.insert("state".to_string(), serde_json::to_value(upgrade_class_state(old, state))?);
        }
        all_marked = event.classes.iter().all(|c| c.extra.get("state") == Some(&name));
    }
    if all_marked {
        event.state = upgrade_event_state(event.state, state);
    }

    let values: Item = [
        (":classes".to_string(), serde_json::to_value(&event.classes)?),
        (":state".to_string(), serde_json::to_value(event.state)?),
    ]
    .into_iter()
    .collect();
    services
        .events
        .update(
            &event_key(&event.event_type, &event.id),
            "set #classes = :classes, #state = :state",
            &[("#classes", "classes"), ("#state", "state")],
            &values,
        )
        .await?;
    info!(event_id = %event.id, state = ?event.state, class = ?class, "Participants marked");
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestServices;
    use serde_json::json;

    fn admin_request(method: &str, path: &str) -> ApiRequest {
        ApiRequest::new(method, path).with_claims(json!({"name": "Admin", "email": "admin@example.com"}))
    }

    fn services() -> TestServices {
        let t = TestServices::new();
        t.users.insert(json!({"id": "u1", "name": "Admin", "email": "admin@example.com", "admin": true}));
        t.users.insert(json!({
            "id": "u2", "name": "Secretary", "email": "secretary@example.com",
            "roles": {"o1": "secretary"}
        }));
        t.events.insert(json!({"eventType": "NOME-B", "id": "draft", "state": "draft", "organizer": {"id": "o1"}}));
        t.events.insert(json!({"eventType": "NOME-B", "id": "open", "state": "confirmed", "organizer": {"id": "o2"}}));
        t.events.insert(json!({
            "eventType": "NOME-B", "id": "gone", "state": "confirmed",
            "deletedAt": "2024-01-01T00:00:00.000Z"
        }));
        t
    }

    fn ids(res: &ApiResponse) -> Vec<String> {
        res.json()
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["id"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_public_events_hide_drafts() {
        let t = services();
        let res = get_events(&t.services, &ApiRequest::new("GET", "/event")).await;
        assert_eq!(ids(&res), vec!["open"]);
    }

    #[tokio::test]
    async fn test_get_event() {
        let t = services();
        let request = ApiRequest::new("GET", "/event/NOME-B/open")
            .with_path_parameter("eventType", "NOME-B")
            .with_path_parameter("id", "open");
        assert_eq!(get_event(&t.services, &request).await.status_code, 200);

        let request = request.with_path_parameter("id", "nope");
        assert_eq!(get_event(&t.services, &request).await.status_code, 404);
    }

    #[tokio::test]
    async fn test_admin_events_by_role() {
        let t = services();

        let res = get_admin_events(&t.services, &admin_request("GET", "/admin/event")).await;
        assert_eq!(ids(&res).len(), 2);

        let request = ApiRequest::new("GET", "/admin/event").with_claims(json!({"email": "secretary@example.com"}));
        let res = get_admin_events(&t.services, &request).await;
        assert_eq!(ids(&res), vec!["draft"]);
    }

    #[tokio::test]
    async fn test_listings_tolerate_malformed_events() {
        let t = services();
        t.events.insert(json!({
            "eventType": "NOME-B", "id": "odd", "state": "confirmed",
            "startDate": "2024-06-01", "organizer": {"id": "o1"}
        }));

        let res = get_events(&t.services, &ApiRequest::new("GET", "/event")).await;
        assert_eq!(res.status_code, 200);
        assert_eq!(ids(&res), vec!["open", "odd"]);

        let request = ApiRequest::new("GET", "/admin/event").with_claims(json!({"email": "secretary@example.com"}));
        let res = get_admin_events(&t.services, &request).await;
        assert_eq!(res.status_code, 200);
        assert_eq!(ids(&res), vec!["draft", "odd"]);
    }

    #[tokio::test]
    async fn test_malformed_stored_event_is_a_server_error() {
        let t = services();
        t.events.insert(json!({"eventType": "NOME-B", "id": "odd", "startDate": "2024-06-01"}));

        let res = put_event(&t.services, &admin_request("POST", "/admin/event").with_body(
            r#"{"eventType": "NOME-B", "id": "odd", "name": "x"}"#,
        ))
        .await;
        assert_eq!(res.status_code, 501);
        assert_eq!(t.events.call_count("write"), 0);
    }

    #[tokio::test]
    async fn test_create_event() {
        let t = services();
        let request = admin_request("POST", "/admin/event")
            .with_body(r#"{"eventType": "NOME-A", "name": "Uusi", "organizer": {"id": "o1"}}"#);

        let res = put_event(&t.services, &request).await;
        assert_eq!(res.status_code, 200);
        let body = res.json().unwrap();
        assert_eq!(body["createdBy"], "Admin");
        assert_eq!(body["modifiedBy"], "Admin");
        assert!(t.events.get(&event_key("NOME-A", body["id"].as_str().unwrap())).is_some());
    }

    #[tokio::test]
    async fn test_secretary_limited_to_own_organizer() {
        let t = services();
        let secretary = |body: &str| {
            ApiRequest::new("POST", "/admin/event")
                .with_claims(json!({"email": "secretary@example.com"}))
                .with_body(body.to_string())
        };

        let res = put_event(&t.services, &secretary(r#"{"eventType": "NOME-B", "id": "open", "name": "x"}"#)).await;
        assert_eq!(res.status_code, 403);

        let res = put_event(&t.services, &secretary(r#"{"eventType": "NOME-B", "organizer": {"id": "o2"}}"#)).await;
        assert_eq!(res.status_code, 403);

        let res = put_event(&t.services, &secretary(r#"{"eventType": "NOME-B", "id": "draft", "name": "ok"}"#)).await;
        assert_eq!(res.status_code, 200);
        let saved = t.events.get(&event_key("NOME-B", "draft")).unwrap();
        assert_eq!(saved["name"], "ok");
        assert_eq!(saved["organizer"]["id"], "o1");
    }

    #[tokio::test]
    async fn test_entry_extension_keeps_original_end_once() {
        let t = services();
        t.events.insert(json!({
            "eventType": "NOME-B", "id": "e1", "state": "confirmed",
            "entryEndDate": "2024-05-01T00:00:00.000Z"
        }));
        let extend = |date: &str| {
            admin_request("POST", "/admin/event").with_body(
                json!({"eventType": "NOME-B", "id": "e1", "entryEndDate": date}).to_string(),
            )
        };

        put_event(&t.services, &extend("2024-05-08T00:00:00.000Z")).await;
        put_event(&t.services, &extend("2024-05-15T00:00:00.000Z")).await;

        let saved = t.events.get(&event_key("NOME-B", "e1")).unwrap();
        assert_eq!(saved["entryOrigEndDate"], "2024-05-01T00:00:00.000Z");
        assert_eq!(saved["entryEndDate"], "2024-05-15T00:00:00.000Z");
    }

    #[tokio::test]
    async fn test_put_event_requires_authorization() {
        let t = services();
        let request = ApiRequest::new("POST", "/admin/event").with_body(r#"{"eventType": "NOME-B"}"#);
        assert_eq!(put_event(&t.services, &request).await.status_code, 401);
        assert!(t.events.calls().is_empty());
    }

    #[test]
    fn test_states_only_move_forward() {
        assert_eq!(upgrade_class_state(None, EventState::Picked), EventState::Picked);
        assert_eq!(upgrade_class_state(Some(EventState::Draft), EventState::Picked), EventState::Picked);
        assert_eq!(upgrade_class_state(Some(EventState::Picked), EventState::Invited), EventState::Invited);
        assert_eq!(upgrade_class_state(Some(EventState::Started), EventState::Invited), EventState::Started);
        assert_eq!(upgrade_event_state(EventState::Confirmed, EventState::Picked), EventState::Picked);
        assert_eq!(upgrade_event_state(EventState::Invited, EventState::Picked), EventState::Invited);
    }

    #[tokio::test]
    async fn test_mark_participants() {
        let t = services();
        let event: Event = serde_json::from_value(json!({
            "eventType": "NOME-B", "id": "e1", "state": "confirmed",
            "classes": [{"class": "ALO"}, {"class": "AVO", "state": "picked"}]
        }))
        .unwrap();

        let event = mark_participants(&t.services, event, EventState::Picked, Some("ALO")).await.unwrap();
        assert_eq!(event.state, EventState::Picked);

        let event = mark_participants(&t.services, event, EventState::Invited, Some("ALO")).await.unwrap();
        // AVO is still only picked
        assert_eq!(event.state, EventState::Picked);

        let saved = t.events.get(&event_key("NOME-B", "e1")).unwrap();
        assert_eq!(saved["state"], "picked");
        assert_eq!(saved["classes"][0]["state"], "invited");
        assert_eq!(saved["classes"][1]["state"], "picked");
    }
}
