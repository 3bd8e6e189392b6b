//! Start list groups of an event's registrations
//!
//! The secretary moves registrations between the dated participant groups,
//! the reserve and the cancelled. After the moves every numbering group is
//! renumbered from 1, so numbers sent by an outdated client are corrected.
//! Every registration whose group changed is saved and audited, and the
//! owners of registrations that moved in or out of the participants are
//! emailed.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc, Weekday};
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use super::registration::{
    event_key, flag, query_registrations, registration_key, registration_template_data, update_entries, EmailContext,
    REGISTRATION_TEMPLATE,
};
use super::{authorized_user, instrumented, required_parameter};
use crate::audit::{audit, registration_audit_key};
use crate::auth::get_origin;
use crate::email::{email_to, send_templated_mail};
use crate::errors::{Error, Result};
use crate::models::{Event, EventState, Registration, User};
use crate::request::ApiRequest;
use crate::response::ApiResponse;
use crate::services::Services;
use crate::store::{from_item, Item};

pub const GROUP_KEY_CANCELLED: &str = "cancelled";
pub const GROUP_KEY_RESERVE: &str = "reserve";

const PICKED_TEMPLATE: &str = "picked";
const INVITATION_TEMPLATE: &str = "invitation";
const RESERVE_TEMPLATE: &str = "reserve";

fn id(item: &Item) -> &str {
    item.get("id").and_then(Value::as_str).unwrap_or_default()
}

fn text<'a>(item: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    item.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn group(item: &Item) -> Option<&Map<String, Value>> {
    item.get("group").and_then(Value::as_object)
}

fn group_number(item: &Item) -> Option<f64> {
    group(item).and_then(|g| g.get("number")).and_then(Value::as_f64)
}

/// Group of a registration, cancelled registrations are always in the cancelled group
pub fn group_key(item: &Item) -> &str {
    if flag(item, "cancelled") {
        return GROUP_KEY_CANCELLED;
    }
    group(item).and_then(|g| text(g, "key")).unwrap_or(GROUP_KEY_RESERVE)
}

pub fn is_participant_group(key: &str) -> bool {
    key != GROUP_KEY_CANCELLED && key != GROUP_KEY_RESERVE
}

/// Registrations numbered as one sequence share a numbering key
///
/// All dated participant groups form one sequence; reserve and cancelled
/// are numbered per class (or event type when there are no classes).
pub fn numbering_key(item: &Item) -> String {
    let class = text(item, "class").or_else(|| text(item, "eventType")).unwrap_or_default();
    if group_key(item) == GROUP_KEY_CANCELLED {
        format!("{}-{}", GROUP_KEY_CANCELLED, class)
    } else if group(item).and_then(|g| text(g, "date")).is_some() {
        "participants".to_string()
    } else {
        format!("{}-{}", GROUP_KEY_RESERVE, class)
    }
}

fn time_order(time: Option<&str>) -> u8 {
    match time {
        Some("ap") => 0,
        Some("ip") => 1,
        Some("kp") => 2,
        _ => 3,
    }
}

/// Start list order: date, class, time of day, number
fn compare_for_numbering(a: &Item, b: &Item) -> Ordering {
    let date = |item: &Item| group(item).and_then(|g| text(g, "date")).map(str::to_string);
    let time = |item: &Item| time_order(group(item).and_then(|g| text(g, "time")));
    let number = |item: &Item| group_number(item).unwrap_or(f64::MAX);

    date(a)
        .cmp(&date(b))
        .then_with(|| text(a, "class").cmp(&text(b, "class")))
        .then_with(|| time(a).cmp(&time(b)))
        .then_with(|| number(a).partial_cmp(&number(b)).unwrap_or(Ordering::Equal))
}

/// Sort into start list order and renumber every numbering group from 1
pub fn fix_groups(items: &mut [Item]) {
    items.sort_by(compare_for_numbering);

    let mut counters: HashMap<String, u32> = HashMap::new();
    for item in items.iter_mut() {
        let counter = counters.entry(numbering_key(item)).or_default();
        *counter += 1;
        let number = *counter;
        let key = group_key(item).to_string();

        let mut group = group(item).cloned().unwrap_or_default();
        group.insert("key".to_string(), Value::String(key));
        group.insert("number".to_string(), Value::from(number));
        item.insert("group".to_string(), Value::Object(group));
    }
}

fn group_changed(previous: Option<&Map<String, Value>>, current: Option<&Map<String, Value>>) -> bool {
    let key = |g: Option<&Map<String, Value>>| g.and_then(|g| text(g, "key")).map(str::to_string);
    let number = |g: Option<&Map<String, Value>>| g.and_then(|g| g.get("number")).and_then(Value::as_f64);
    key(previous) != key(current) || number(previous) != number(current)
}

fn weekday(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "ma",
        Weekday::Tue => "ti",
        Weekday::Wed => "ke",
        Weekday::Thu => "to",
        Weekday::Fri => "pe",
        Weekday::Sat => "la",
        Weekday::Sun => "su",
    }
}

/// Group as shown in the audit trail, e.g. `la 1.6. ap #3` or `Peruneet #1`
pub fn format_group(group: &Map<String, Value>) -> String {
    let number = group.get("number").map(Value::to_string).unwrap_or_default();
    match text(group, "key") {
        Some(GROUP_KEY_CANCELLED) => format!("Peruneet #{}", number),
        Some(GROUP_KEY_RESERVE) | None => format!("Ilmoittautuneet #{}", number),
        Some(_) => {
            let date = text(group, "date")
                .and_then(|d| d.parse::<DateTime<Utc>>().ok())
                .map(|d| format!("{} {}", weekday(d.weekday()), d.format("%-d.%-m.")));
            let label = [date.as_deref(), text(group, "time")]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            format!("{} #{}", label, number)
        }
    }
}

/// Persist the group (and the cancellation it implies) and audit the move
async fn save_group(
    services: &Services,
    item: &Item,
    previous: Option<&Map<String, Value>>,
    user: &User,
    reason: &str,
) -> Result<()> {
    let event_id = item.get("eventId").and_then(Value::as_str).unwrap_or_default();
    let group = group(item).cloned().unwrap_or_default();
    let cancelled = flag(item, "cancelled");

    let mut values = Item::new();
    values.insert(":group".to_string(), Value::Object(group.clone()));
    values.insert(":cancelled".to_string(), Value::Bool(cancelled));
    let mut names = vec![("#group", "group"), ("#cancelled", "cancelled")];
    let mut expression = "set #group = :group, #cancelled = :cancelled".to_string();
    if let Some(reason) = cancelled.then(|| item.get("cancelReason")).flatten() {
        values.insert(":cancelReason".to_string(), reason.clone());
        names.push(("#cancelReason", "cancelReason"));
        expression.push_str(", #cancelReason = :cancelReason");
    }
    services
        .registrations
        .update(&registration_key(event_id, id(item)), &expression, &names, &values)
        .await?;

    let change = match previous {
        Some(previous) => format!("{} -> {}", format_group(previous), format_group(&group)),
        None => format_group(&group),
    };
    let message = format!("Ryhmä: {} {}", change, reason);
    audit(services.audit.as_ref(), &registration_audit_key(event_id, id(item)), &user.name, message.trim()).await;
    Ok(())
}

/// Group moves of the body that concern this event
fn parse_moves(request: &ApiRequest, event_id: &str) -> Vec<Item> {
    let moves: Vec<Item> = match request.json() {
        Ok(Value::Array(moves)) => moves
            .into_iter()
            .filter_map(|m| match m {
                Value::Object(m) => Some(m),
                _ => None,
            })
            .filter(|m| m.get("eventId").and_then(Value::as_str) == Some(event_id))
            .collect(),
        _ => Vec::new(),
    };
    if moves.is_empty() {
        warn!(event_id = %event_id, "No group moves for the event in the body");
    }
    moves
}

fn same_class(a: Option<&str>, b: Option<&str>) -> bool {
    a.filter(|c| !c.is_empty()) == b.filter(|c| !c.is_empty())
}

fn in_state(event: &Event, class: Option<&str>, state: EventState) -> bool {
    let name = serde_json::to_value(state).ok();
    event.state == state
        || class.is_some_and(|class| {
            event
                .classes
                .iter()
                .any(|c| c.class == class && c.extra.get("state") == name.as_ref())
        })
}

/// Recipients reached and missed by one template
#[derive(Debug, Default)]
pub(crate) struct Delivery {
    pub ok: Vec<String>,
    pub failed: Vec<String>,
}

/// Send `template` to the owner and handler of every registration, `text` is
/// the secretary's free form message
pub(crate) async fn notify(
    services: &Services,
    template: &str,
    context: EmailContext,
    event: &Event,
    items: &[&Item],
    origin: &str,
    text: Option<&str>,
) -> Delivery {
    let mut delivery = Delivery::default();
    for item in items {
        let registration: Registration = match from_item((*item).clone()) {
            Ok(registration) => registration,
            Err(err) => {
                warn!(registration_id = %id(item), error = %err, "Registration cannot be emailed");
                delivery.failed.push(id(item).to_string());
                continue;
            }
        };
        let to = email_to([
            registration.handler.as_ref().and_then(|p| p.email()),
            registration.owner.as_ref().and_then(|p| p.email()),
        ]);
        let recipients = to.join(", ");
        let mut data = registration_template_data(&registration, event, origin, context);
        if let (Some(text), Some(data)) = (text, data.as_object_mut()) {
            data.insert("text".to_string(), Value::String(text.to_string()));
        }
        match send_templated_mail(
            services.mailer.as_ref(),
            template,
            &registration.language,
            &services.config.email_from,
            to,
            data,
        )
        .await
        {
            Ok(()) => delivery.ok.push(recipients),
            Err(err) => {
                error!(template, registration_id = %registration.id, error = %err, "Failed to send group email");
                delivery.failed.push(recipients);
            }
        }
    }
    delivery
}

/// `POST /admin/reg-groups/{eventId}`, body is a list of `{eventId, id, group}`
pub async fn put_registration_groups(services: &Services, request: &ApiRequest) -> ApiResponse {
    instrumented("putRegistrationGroups", request, async {
        let user = authorized_user(services, request).await?;
        let event_id = required_parameter(request, "eventId")?;
        let origin = get_origin(request).unwrap_or_default().to_string();

        let moves = parse_moves(request, event_id);
        if moves.is_empty() {
            return Err(Error::Unprocessable("no groups".to_string()));
        }

        let previous = query_registrations(services, event_id).await?;
        let event_type = previous
            .iter()
            .find_map(|item| item.get("eventType").and_then(Value::as_str))
            .ok_or_else(|| Error::NotFound(format!("No registrations for event \"{}\"", event_id)))?;
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

        let mut items = previous.clone();
        for item in items.iter_mut() {
            if let Some(moved) = moves.iter().find(|m| id(m) == id(item)) {
                item.extend(moved.clone());
                let cancelled = group(item).and_then(|g| text(g, "key")) == Some(GROUP_KEY_CANCELLED);
                item.insert("cancelled".to_string(), Value::Bool(cancelled));
            }
        }
        fix_groups(&mut items);

        for item in &items {
            let before = previous.iter().find(|p| id(p) == id(item)).and_then(group);
            if !group_changed(before, group(item)) {
                continue;
            }
            let reason = if moves.iter().any(|m| id(m) == id(item)) { "siirto" } else { "seuraus" };
            save_group(services, item, before, &user, reason).await?;
        }

        let event = update_entries(services, event).await?;
        info!(event_id = %event_id, moves = moves.len(), entries = event.entries, "Registration groups updated");

        let class = items
            .iter()
            .find(|item| id(item) == id(&moves[0]))
            .and_then(|item| text(item, "class"));
        let was = |item: &Item, keys: &[&str]| {
            previous
                .iter()
                .any(|p| id(p) == id(item) && keys.contains(&group_key(p)))
        };
        let in_class = |item: &&Item| same_class(text(item, "class"), class);

        let mut picked = Delivery::default();
        let mut invited = Delivery::default();
        let mut reserve = Delivery::default();
        let is_picked = in_state(&event, class, EventState::Picked);
        let is_invited = in_state(&event, class, EventState::Invited);
        if is_picked || is_invited {
            // registrations that moved up from the reserve or back from the cancelled
            let participants: Vec<&Item> = items
                .iter()
                .filter(in_class)
                .filter(|item| is_participant_group(group_key(item)))
                .filter(|item| was(item, &[GROUP_KEY_CANCELLED, GROUP_KEY_RESERVE]))
                .collect();
            let send = |template: &'static str| {
                notify(services, template, EmailContext::New, &event, &participants, &origin, None)
            };
            picked = send(PICKED_TEMPLATE).await;
            if is_invited {
                invited = send(INVITATION_TEMPLATE).await;
            }

            // notified reserves that moved closer to a place
            let moved_reserve: Vec<&Item> = items
                .iter()
                .filter(in_class)
                .filter(|item| group_key(item) == GROUP_KEY_RESERVE && flag(item, "reserveNotified"))
                .filter(|item| {
                    previous.iter().any(|p| {
                        id(p) == id(item)
                            && group_key(p) == GROUP_KEY_RESERVE
                            && group_number(p).unwrap_or(999.0) > group_number(item).unwrap_or(999.0)
                    })
                })
                .collect();
            reserve = notify(services, RESERVE_TEMPLATE, EmailContext::New, &event, &moved_reserve, &origin, None)
                .await;
        }

        let cancelled: Vec<&Item> = items
            .iter()
            .filter(in_class)
            .filter(|item| group_key(item) == GROUP_KEY_CANCELLED && !was(item, &[GROUP_KEY_CANCELLED]))
            .collect();
        let cancelled_delivery = notify(
            services,
            REGISTRATION_TEMPLATE,
            EmailContext::Cancel,
            &event,
            &cancelled,
            &origin,
            None,
        )
        .await;
        for item in &cancelled {
            let event_id = item.get("eventId").and_then(Value::as_str).unwrap_or_default();
            let message = match item.get("cancelReason").and_then(Value::as_str).filter(|r| !r.is_empty()) {
                Some(reason) => format!("Ilmoittautuminen peruttiin: {}", reason),
                None => "Ilmoittautuminen peruttiin".to_string(),
            };
            audit(services.audit.as_ref(), &registration_audit_key(event_id, id(item)), &user.name, &message).await;
        }

        Ok(ApiResponse::ok(&json!({
            "items": items,
            "classes": event.classes,
            "entries": event.entries,
            "pickedOk": picked.ok,
            "pickedFailed": picked.failed,
            "invitedOk": invited.ok,
            "invitedFailed": invited.failed,
            "reserveOk": reserve.ok,
            "reserveFailed": reserve.failed,
            "cancelledOk": cancelled_delivery.ok,
            "cancelledFailed": cancelled_delivery.failed,
        })))
    })
    .await
}
