//! Registration handlers
//!
//! Writing a registration is a chain where every step depends on the
//! previous one succeeding:
//!
//! 1. validate the body, stamp audit fields (new id for new registrations)
//! 2. read the referenced event, a missing event fails the request
//! 3. reject a second active registration of the same dog
//! 4. persist the registration merged over the existing record
//! 5. recompute the event's entry counts from all its registrations
//! 6. leave an audit record
//! 7. email the handler and owner
//!
//! Audit and email failures never fail the request; they are logged and
//! dropped.
//! The entry recompute is a read-modify-write without locking, two
//! concurrent registrations may leave a stale count until the next write.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use super::{authorized_user, body_object, instrumented, required_parameter, timestamp};
use crate::audit::{audit, audit_trail, registration_audit_key};
use crate::auth::{authorize, get_origin, get_username};
use crate::email::{email_to, send_templated_mail};
use crate::errors::{Error, Result};
use crate::models::{new_id, Event, Registration};
use crate::request::ApiRequest;
use crate::response::ApiResponse;
use crate::services::Services;
use crate::store::{from_item, is_deleted, key, Item};

/// Template sent on registration changes
pub const REGISTRATION_TEMPLATE: &str = "registration";

/// Why the registration email is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailContext {
    New,
    Update,
    Cancel,
    Confirm,
}

impl EmailContext {
    fn new(update: bool, cancel: bool, confirm: bool) -> Self {
        if cancel {
            EmailContext::Cancel
        } else if confirm {
            EmailContext::Confirm
        } else if update {
            EmailContext::Update
        } else {
            EmailContext::New
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmailContext::New => "",
            EmailContext::Update => "update",
            EmailContext::Cancel => "cancel",
            EmailContext::Confirm => "confirm",
        }
    }
}

fn registration_schema() -> Value {
    let person = json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "email": {"type": "string"},
            "phone": {"type": "string"},
            "location": {"type": "string"},
            "membership": {"type": "boolean"}
        }
    });

    json!({
        "type": "object",
        "required": ["eventId", "eventType", "dog"],
        "properties": {
            "id": {"type": "string"},
            "eventId": {"type": "string", "minLength": 1},
            "eventType": {"type": "string", "minLength": 1},
            "language": {"enum": ["fi", "en", "sv"]},
            "class": {"type": ["string", "null"]},
            "dates": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["date"],
                    "properties": {
                        "date": {"type": "string"},
                        "time": {"type": "string"}
                    }
                }
            },
            "dog": {
                "type": "object",
                "required": ["regNo"],
                "properties": {"regNo": {"type": "string", "minLength": 1}}
            },
            "owner": person.clone(),
            "handler": person.clone(),
            "breeder": person,
            "qualifyingResults": {"type": "array"},
            "notes": {"type": "string"},
            "cancelled": {"type": "boolean"},
            "confirmed": {"type": "boolean"}
        }
    })
}

pub fn validate_registration(body: &Value) -> Result<()> {
    let schema = registration_schema();
    let validator = jsonschema::validator_for(&schema).map_err(|e| Error::Internal(e.to_string()))?;
    let errors: Vec<String> = validator.iter_errors(body).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(errors.join("; ")))
    }
}

pub(crate) fn event_key(event_type: &str, event_id: &str) -> Item {
    key([("eventType", event_type), ("id", event_id)])
}

pub(crate) fn registration_key(event_id: &str, id: &str) -> Item {
    key([("eventId", event_id), ("id", id)])
}

pub(crate) fn flag(item: &Item, name: &str) -> bool {
    item.get(name).and_then(Value::as_bool).unwrap_or(false)
}

/// `PUT|POST /registration`
pub async fn put_registration(services: &Services, request: &ApiRequest) -> ApiResponse {
    instrumented("putRegistration", request, write_registration(services, request)).await
}

async fn write_registration(services: &Services, request: &ApiRequest) -> Result<ApiResponse> {
    let username = get_username(request);
    let origin = get_origin(request).unwrap_or_default().to_string();
    let now = timestamp();

    let mut body = body_object(request)?;
    validate_registration(&Value::Object(body.clone()))?;

    let event_id = body.get("eventId").and_then(Value::as_str).unwrap_or_default().to_string();
    let event_type = body.get("eventType").and_then(Value::as_str).unwrap_or_default().to_string();
    let id = body
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    let update = id.is_some();
    let mut cancel = false;
    let mut confirm = false;
    let mut data: Item = Map::new();
    let mut previous: Option<Item> = None;

    match &id {
        Some(id) => {
            let existing = services
                .registrations
                .read(&registration_key(&event_id, id))
                .await?
                .ok_or_else(|| Error::NotFound(format!("Registration not found with id \"{}\"", id)))?;
            cancel = !flag(&existing, "cancelled") && flag(&body, "cancelled");
            confirm = !flag(&existing, "confirmed") && flag(&body, "confirmed") && !flag(&existing, "cancelled");
            previous = Some(existing.clone());
            data = existing;
        }
        None => {
            body.insert("id".to_string(), Value::String(new_id()));
            body.insert("createdAt".to_string(), Value::String(now.clone()));
            body.insert("createdBy".to_string(), Value::String(username.clone()));
        }
    }
    // modification info is always updated
    body.insert("modifiedAt".to_string(), Value::String(now));
    body.insert("modifiedBy".to_string(), Value::String(username.clone()));
    data.extend(body);

    let event_item = services
        .events
        .read(&event_key(&event_type, &event_id))
        .await?
        .ok_or_else(|| {
            Error::NotFound(format!(
                "Event of type \"{}\" not found with id \"{}\"",
                event_type, event_id
            ))
        })?;
    let event: Event = from_item(event_item)?;
    let registration: Registration = from_item(data.clone()).map_err(|e| Error::Validation(e.to_string()))?;

    if !update {
        reject_duplicate(services, &registration).await?;
    }

    services.registrations.write(&data).await?;
    info!(
        event_id = %registration.event_id,
        registration_id = %registration.id,
        update,
        "Registration saved"
    );

    let event = update_entries(services, event).await?;

    let context = EmailContext::new(update, cancel, confirm);
    if let Some(message) = audit_message(context, previous.as_ref(), &data) {
        let audit_key = registration_audit_key(&registration.event_id, &registration.id);
        audit(services.audit.as_ref(), &audit_key, &username, &message).await;
    }

    let handler_email = registration.handler.as_ref().and_then(|p| p.email());
    let owner_email = registration.owner.as_ref().and_then(|p| p.email());
    if handler_email.is_some() && owner_email.is_some() {
        let to = email_to([handler_email, owner_email]);
        let template_data = registration_template_data(&registration, &event, &origin, context);
        if let Err(err) = send_templated_mail(
            services.mailer.as_ref(),
            REGISTRATION_TEMPLATE,
            &registration.language,
            &services.config.email_from,
            to,
            template_data,
        )
        .await
        {
            // TODO: queue failed sends for retry instead of dropping them
            error!(error = %err, registration_id = %registration.id, "Failed to send registration email");
        }
    }

    Ok(ApiResponse::ok(&data))
}

/// Attributes whose changes are named in the audit trail, with their labels
const AUDITED_ATTRIBUTES: [(&str, &str); 7] = [
    ("class", "Luokka"),
    ("dog", "Koira"),
    ("breeder", "Kasvattaja"),
    ("owner", "Omistaja"),
    ("handler", "Ohjaaja"),
    ("qualifyingResults", "Koetulokset"),
    ("notes", "Lisätiedot"),
];

/// Audit message of a registration write, `None` when nothing audited changed
fn audit_message(context: EmailContext, previous: Option<&Item>, data: &Item) -> Option<String> {
    match context {
        EmailContext::Cancel => Some("Ilmoittautuminen peruttiin".to_string()),
        EmailContext::Confirm => Some("Ilmoittautumisen vahvistus".to_string()),
        EmailContext::New => Some("Ilmoittautui".to_string()),
        EmailContext::Update => {
            let previous = previous?;
            let changed: Vec<&str> = AUDITED_ATTRIBUTES
                .iter()
                .filter(|(attribute, _)| previous.get(*attribute) != data.get(*attribute))
                .map(|(_, label)| *label)
                .collect();
            (!changed.is_empty()).then(|| format!("Muutti: {}", changed.join(", ")))
        }
    }
}

/// A dog may have only one active registration per event
async fn reject_duplicate(services: &Services, registration: &Registration) -> Result<()> {
    let others = query_registrations(services, &registration.event_id).await?;
    let duplicate = others.iter().any(|other| {
        !flag(other, "cancelled")
            && other
                .get("dog")
                .and_then(|dog| dog.get("regNo"))
                .and_then(Value::as_str)
                .is_some_and(|reg_no| reg_no.eq_ignore_ascii_case(&registration.dog.reg_no))
    });
    if duplicate {
        warn!(event_id = %registration.event_id, reg_no = %registration.dog.reg_no, "Duplicate registration");
        return Err(Error::Conflict(format!(
            "Dog {} is already registered to this event",
            registration.dog.reg_no
        )));
    }
    Ok(())
}

/// Non-deleted registrations of an event
pub(crate) async fn query_registrations(services: &Services, event_id: &str) -> Result<Vec<Item>> {
    let values: Item = [(":eventId".to_string(), Value::String(event_id.to_string()))]
        .into_iter()
        .collect();
    let items = services.registrations.query("eventId = :eventId", &values).await?;
    Ok(items.into_iter().filter(|item| !is_deleted(item)).collect())
}

/// Owner or handler of a stored registration is a member
fn has_member(item: &Item) -> bool {
    ["owner", "handler"].into_iter().any(|role| {
        item.get(role)
            .and_then(|person| person.get("membership"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    })
}

/// Recompute and persist `entries`, `members` and per-class counts of the event
///
/// Counts come from the stored items as they are, a registration written by
/// an older client without the current shape still counts.
pub async fn update_entries(services: &Services, mut event: Event) -> Result<Event> {
    let registrations = query_registrations(services, &event.id).await?;

    let member_priority = event.member_priority();
    let mut members = 0;
    let mut per_class: HashMap<&str, (u32, u32)> = HashMap::new();
    for registration in &registrations {
        let member = member_priority && has_member(registration);
        if member {
            members += 1;
        }
        if let Some(class) = registration.get("class").and_then(Value::as_str) {
            let counts = per_class.entry(class).or_default();
            counts.0 += 1;
            if member {
                counts.1 += 1;
            }
        }
    }
    for class in &mut event.classes {
        let (entries, members) = per_class.get(class.class.as_str()).copied().unwrap_or_default();
        class.entries = Some(entries);
        class.members = Some(members);
    }
    event.entries = registrations.len() as u32;
    event.members = members;

    let mut values = Item::new();
    values.insert(":entries".to_string(), Value::from(event.entries));
    values.insert(":members".to_string(), Value::from(event.members));
    values.insert(":classes".to_string(), serde_json::to_value(&event.classes)?);
    services
        .events
        .update(
            &event_key(&event.event_type, &event.id),
            "set #entries = :entries, #members = :members, #classes = :classes",
            &[("#entries", "entries"), ("#members", "members"), ("#classes", "classes")],
            &values,
        )
        .await?;

    info!(event_id = %event.id, entries = event.entries, members = event.members, "Entries updated");
    Ok(event)
}

fn localized(language: &str, fi: &'static str, en: &'static str, sv: &'static str) -> &'static str {
    match language {
        "en" => en,
        "sv" => sv,
        _ => fi,
    }
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%-d.%-m.%Y").to_string()
}

fn event_date(event: &Event) -> String {
    match (event.start_date, event.end_date) {
        (Some(start), Some(end)) if start.date_naive() != end.date_naive() => {
            format!("{}-{}", start.format("%-d.%-m."), format_date(&end))
        }
        (Some(start), _) => format_date(&start),
        _ => String::new(),
    }
}

/// Merge data of the registration template
pub fn registration_template_data(
    registration: &Registration,
    event: &Event,
    origin: &str,
    context: EmailContext,
) -> Value {
    let lang = registration.language.as_str();
    let (subject, title) = match context {
        EmailContext::New => (
            localized(lang, "Ilmoittautumisen vahvistus", "Registration confirmation", "Anmälningsbekräftelse"),
            localized(lang, "Ilmoittautumisesi on vastaanotettu", "Your registration has been received", "Din anmälan har tagits emot"),
        ),
        EmailContext::Update => (
            localized(lang, "Ilmoittautumisen muutos", "Registration update", "Ändring av anmälan"),
            localized(lang, "Ilmoittautumistasi on muutettu", "Your registration has been updated", "Din anmälan har ändrats"),
        ),
        EmailContext::Cancel => (
            localized(lang, "Ilmoittautumisen peruutus", "Registration cancelled", "Anmälan avbokad"),
            localized(lang, "Ilmoittautumisesi on peruttu", "Your registration has been cancelled", "Din anmälan har avbokats"),
        ),
        EmailContext::Confirm => (
            localized(lang, "Osallistumisen vahvistus", "Participation confirmed", "Deltagande bekräftat"),
            localized(lang, "Olet vahvistanut osallistumisesi", "You have confirmed your participation", "Du har bekräftat ditt deltagande"),
        ),
    };

    let reg_dates = registration
        .dates
        .iter()
        .map(|d| {
            let date = d.date.format("%-d.%-m.").to_string();
            match &d.time {
                Some(time) => format!("{} {}", date, time),
                None => date,
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    json!({
        "subject": subject,
        "title": title,
        "context": context.as_str(),
        "link": format!(
            "{}/registration/{}/{}/{}",
            origin, registration.event_type, registration.event_id, registration.id
        ),
        "event": event,
        "eventDate": event_date(event),
        "reg": registration,
        "regDates": reg_dates,
        "reserveText": registration.reserve.clone().unwrap_or_default(),
        "dogBreed": registration.dog.breed_code.clone().unwrap_or_default(),
        "qualifyingResults": registration.qualifying_results,
    })
}

/// `GET /registration/{eventId}/{id}`, without the internal start list group
pub async fn get_registration(services: &Services, request: &ApiRequest) -> ApiResponse {
    instrumented("getRegistration", request, async {
        let event_id = required_parameter(request, "eventId")?;
        let id = required_parameter(request, "id")?;
        let mut item = services
            .registrations
            .read(&registration_key(event_id, id))
            .await?
            .filter(|item| !is_deleted(item))
            .ok_or_else(|| Error::NotFound(format!("Registration not found with id \"{}\"", id)))?;
        item.remove("group");
        Ok(ApiResponse::ok(&item))
    })
    .await
}

/// `GET /admin/registration/{eventId}`
pub async fn get_registrations(services: &Services, request: &ApiRequest) -> ApiResponse {
    instrumented("getRegistrations", request, async {
        authorize(request)?;
        let event_id = required_parameter(request, "eventId")?;
        let items = query_registrations(services, event_id).await?;
        Ok(ApiResponse::ok(&items))
    })
    .await
}

/// `DELETE /admin/registration/{eventId}/{id}`, soft delete and recount
pub async fn delete_registration(services: &Services, request: &ApiRequest) -> ApiResponse {
    instrumented("deleteRegistration", request, async {
        let user = authorized_user(services, request).await?;
        let event_id = required_parameter(request, "eventId")?;
        let id = required_parameter(request, "id")?;

        let mut item = services
            .registrations
            .read(&registration_key(event_id, id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("Registration not found with id \"{}\"", id)))?;
        let event_type = item.get("eventType").and_then(Value::as_str).unwrap_or_default();

        let event: Event = services
            .events
            .read(&event_key(event_type, event_id))
            .await?
            .map(from_item)
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("Event with id \"{}\" not found", event_id)))?;
        if !user.can_manage(event.organizer_id()) {
            return Err(Error::Forbidden("not an organizer of the event".to_string()));
        }

        item.insert("deletedAt".to_string(), Value::String(timestamp()));
        item.insert("deletedBy".to_string(), Value::String(user.name.clone()));
        services.registrations.write(&item).await?;
        update_entries(services, event).await?;
        audit(
            services.audit.as_ref(),
            &registration_audit_key(event_id, id),
            &user.name,
            "Poisti ilmoittautumisen",
        )
        .await;

        Ok(ApiResponse::ok(&item))
    })
    .await
}

/// `GET /admin/registration/audit/{eventId}/{id}`
pub async fn get_audit_trail(services: &Services, request: &ApiRequest) -> ApiResponse {
    instrumented("getRegistrationAuditTrail", request, async {
        authorized_user(services, request).await?;
        let event_id = required_parameter(request, "eventId")?;
        let id = required_parameter(request, "id")?;
        let trail = audit_trail(services.audit.as_ref(), &registration_audit_key(event_id, id)).await?;
        Ok(ApiResponse::ok(&trail))
    })
    .await
}
