//! Domain models for Koekalenteri
//!
//! These types represent the core entities in the system:
//! - Events: trial instances with classes, dates and capacity
//! - Registrations: a dog's entry into one event
//! - Lookups: organizers, judges, officials and event types
//! - Users: authentication linked profiles with organizer roles
//! - Transactions: payment provider records linked to a registration
//!
//! Records are stored as JSON documents. Attributes the models do not know
//! about are kept in `extra` so a read-modify-write never drops them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Generate a new record identifier
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Lifecycle state of an event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    #[default]
    Draft,
    Tentative,
    Cancelled,
    Confirmed,
    Picked,
    Invited,
    Started,
    Ended,
    Completed,
}

/// Reference to the organizer hosting an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizerRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A class (skill level) within an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventClass {
    pub class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub places: Option<u32>,
    /// Registrations to this class, recomputed on every registration write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<u32>,
    /// Of `entries`, those with membership priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Trial event, keyed by `{eventType, id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub id: String,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<OrganizerRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_end_date: Option<DateTime<Utc>>,
    /// Entry end date before the entry period of a confirmed event was extended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_orig_end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub classes: Vec<EventClass>,
    #[serde(default)]
    pub places: u32,
    /// Non-deleted registrations to this event
    #[serde(default)]
    pub entries: u32,
    /// Of `entries`, those with membership priority
    #[serde(default)]
    pub members: u32,
    #[serde(default)]
    pub state: EventState,
    /// Priority groups, `member` gives members precedence
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub priority: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    pub fn organizer_id(&self) -> Option<&str> {
        self.organizer.as_ref().map(|o| o.id.as_str())
    }

    pub fn member_priority(&self) -> bool {
        self.priority.iter().any(|p| p == "member")
    }
}

/// Contact record of an owner, handler or breeder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub membership: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Person {
    /// Email address, if one is given and not blank
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dog {
    pub reg_no: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breed_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rfid: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A requested date (and optional time of day) within the event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationDate {
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

fn default_language() -> String {
    "fi".to_string()
}

/// A participant's entry into one event, keyed by `{eventId, id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub event_id: String,
    pub event_type: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default)]
    pub dates: Vec<RegistrationDate>,
    /// Whether (and on what notice) the participant accepts a reserve place
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserve: Option<String>,
    pub dog: Dog,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Person>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<Person>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breeder: Option<Person>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub qualifying_results: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub confirmed: bool,
    /// Start list group, internal to the secretary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organizer {
    #[serde(default)]
    pub id: String,
    /// Kennel club member number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kc_id: Option<u64>,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A judge or an official, both are listed for event types they may serve
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Official {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub event_types: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub type Judge = Official;

/// Event type, keyed by its abbreviation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventType {
    pub event_type: String,
    #[serde(default)]
    pub description: BTreeMap<String, String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub official: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Secretary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub admin: bool,
    /// Role per organizer id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub roles: BTreeMap<String, UserRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_by: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    /// Organizers this user administers
    pub fn admin_for(&self) -> Vec<&str> {
        self.roles
            .iter()
            .filter(|(_, role)| **role == UserRole::Admin)
            .map(|(org, _)| org.as_str())
            .collect()
    }

    /// Whether the user may manage events of the given organizer
    pub fn can_manage(&self, organizer_id: Option<&str>) -> bool {
        self.admin || organizer_id.is_some_and(|id| self.roles.contains_key(id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    New,
    Ok,
    Fail,
    Pending,
    Delayed,
    Refunded,
}

/// Payment provider record; status transitions come from provider callbacks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: String,
    /// `{eventId}:{registrationId}`
    pub reference: String,
    pub status: TransactionStatus,
    /// Cents, negative for refunds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Transaction {
    pub fn reference_for(event_id: &str, registration_id: &str) -> String {
        format!("{}:{}", event_id, registration_id)
    }
}

/// Markdown sources of an email template, one per language
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailTemplateSource {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub en: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_by: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EmailTemplateSource {
    /// Provided sources as `(language, markdown)` pairs
    pub fn sources(&self) -> Vec<(&'static str, &str)> {
        [("fi", &self.fi), ("en", &self.en), ("sv", &self.sv)]
            .into_iter()
            .filter_map(|(lang, source)| source.as_deref().map(|s| (lang, s)))
            .collect()
    }
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}
