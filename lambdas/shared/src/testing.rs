//! In-memory doubles for handler tests
//!
//! Available in unit tests and, for the function crates, through the
//! `test-utils` feature.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::broadcast::{Gateway, GatewayError};
use crate::config::Config;
use crate::email::{EmailTemplate, Mailer, TemplatedEmail};
use crate::errors::{Error, Result};
use crate::services::Services;
use crate::store::{is_deleted, Item, Key, Store, TransactWrite};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn object(value: Value) -> Item {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// A table kept in memory
///
/// Understands key conditions of the form `a = :a AND b = :b` and update
/// expressions of the form `set #a = :a, #b = :b`.
pub struct MemoryStore {
    table: String,
    key_attributes: Vec<String>,
    items: Mutex<Vec<Item>>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, u16>>,
}

impl MemoryStore {
    pub fn new(table: &str, key_attributes: &[&str]) -> Self {
        Self {
            table: table.to_string(),
            key_attributes: key_attributes.iter().map(|k| k.to_string()).collect(),
            items: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Seed an item without recording a call
    pub fn insert(&self, value: Value) {
        let item = object(value);
        let mut items = lock(&self.items);
        items.retain(|existing| !self.same_key(existing, &item));
        items.push(item);
    }

    /// Make every later call of `operation` fail with the given HTTP status
    pub fn fail_on(&self, operation: &str, status: u16) {
        lock(&self.failures).insert(operation.to_string(), status);
    }

    pub fn get(&self, key: &Key) -> Option<Item> {
        lock(&self.items).iter().find(|item| self.matches_key(item, key)).cloned()
    }

    pub fn items(&self) -> Vec<Item> {
        lock(&self.items).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Operations called so far, in order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        lock(&self.calls).iter().filter(|c| *c == operation).count()
    }

    fn record(&self, operation: &str) -> Result<()> {
        lock(&self.calls).push(operation.to_string());
        match lock(&self.failures).get(operation) {
            Some(status) => Err(Error::Database {
                status: Some(*status),
                message: format!("simulated {} failure on {}", operation, self.table),
            }),
            None => Ok(()),
        }
    }

    fn matches_key(&self, item: &Item, key: &Key) -> bool {
        self.key_attributes.iter().all(|attr| item.get(attr) == key.get(attr))
    }

    fn same_key(&self, a: &Item, b: &Item) -> bool {
        self.key_attributes.iter().all(|attr| a.get(attr) == b.get(attr))
    }

    fn key_of(&self, key: &Key) -> Item {
        self.key_attributes
            .iter()
            .filter_map(|attr| key.get(attr).map(|v| (attr.clone(), v.clone())))
            .collect()
    }
}

fn placeholder<'a>(values: &'a Item, name: &str) -> Result<&'a Value> {
    values
        .get(name)
        .ok_or_else(|| Error::Internal(format!("missing expression value {}", name)))
}

fn matches_condition(item: &Item, expression: &str, values: &Item) -> Result<bool> {
    for clause in expression.split(" AND ").flat_map(|c| c.split(" and ")) {
        let (name, value) = clause
            .split_once('=')
            .ok_or_else(|| Error::Internal(format!("unsupported condition {}", clause)))?;
        if item.get(name.trim()) != Some(placeholder(values, value.trim())?) {
            return Ok(false);
        }
    }
    Ok(true)
}

#[async_trait]
impl Store for MemoryStore {
    fn table(&self) -> &str {
        &self.table
    }

    async fn read(&self, key: &Key) -> Result<Option<Item>> {
        self.record("read")?;
        Ok(self.get(key))
    }

    async fn read_all(&self) -> Result<Vec<Item>> {
        self.record("read_all")?;
        Ok(self.items().into_iter().filter(|item| !is_deleted(item)).collect())
    }

    async fn query(&self, key_expression: &str, values: &Item) -> Result<Vec<Item>> {
        self.record("query")?;
        let mut found = Vec::new();
        for item in self.items() {
            if matches_condition(&item, key_expression, values)? {
                found.push(item);
            }
        }
        Ok(found)
    }

    async fn write(&self, item: &Item) -> Result<()> {
        self.record("write")?;
        self.insert(Value::Object(item.clone()));
        Ok(())
    }

    async fn update(&self, key: &Key, expression: &str, names: &[(&str, &str)], values: &Item) -> Result<()> {
        self.record("update")?;
        let trimmed = expression.trim();
        let assignments = trimmed
            .strip_prefix("set ")
            .or_else(|| trimmed.strip_prefix("SET "))
            .ok_or_else(|| Error::Internal(format!("unsupported update {}", expression)))?;

        let mut item = self.get(key).unwrap_or_else(|| self.key_of(key));
        for assignment in assignments.split(',') {
            let (target, value) = assignment
                .split_once('=')
                .ok_or_else(|| Error::Internal(format!("unsupported assignment {}", assignment)))?;
            let target = target.trim();
            let attr = names
                .iter()
                .find(|(placeholder, _)| *placeholder == target)
                .map(|(_, attr)| *attr)
                .unwrap_or(target);
            item.insert(attr.to_string(), placeholder(values, value.trim())?.clone());
        }
        self.insert(Value::Object(item));
        Ok(())
    }

    async fn transact(&self, writes: &[TransactWrite]) -> Result<bool> {
        self.record("transact")?;
        let missing = writes.iter().any(|write| match write {
            TransactWrite::DeleteExisting(key) => self.get(key).is_none(),
            _ => false,
        });
        if missing {
            return Ok(false);
        }

        for write in writes {
            match write {
                TransactWrite::Put(item) => self.insert(Value::Object(item.clone())),
                TransactWrite::DeleteExisting(key) => lock(&self.items).retain(|item| !self.matches_key(item, key)),
                TransactWrite::Add { key, field, delta } => {
                    let mut item = self.get(key).unwrap_or_else(|| self.key_of(key));
                    let value = item.get(field).and_then(Value::as_i64).unwrap_or(0) + delta;
                    item.insert(field.clone(), Value::from(value));
                    self.insert(Value::Object(item));
                }
            }
        }
        Ok(true)
    }
}

/// Records sent emails and stored templates
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<TemplatedEmail>>,
    templates: Mutex<Vec<EmailTemplate>>,
    failing: bool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer whose every call fails
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<TemplatedEmail> {
        lock(&self.sent).clone()
    }

    pub fn templates(&self) -> Vec<EmailTemplate> {
        lock(&self.templates).clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_templated(&self, email: &TemplatedEmail) -> Result<()> {
        if self.failing {
            return Err(Error::Email("simulated send failure".to_string()));
        }
        lock(&self.sent).push(email.clone());
        Ok(())
    }

    async fn put_template(&self, template: &EmailTemplate) -> Result<()> {
        if self.failing {
            return Err(Error::Email("simulated template failure".to_string()));
        }
        let mut templates = lock(&self.templates);
        templates.retain(|t| t.name != template.name);
        templates.push(template.clone());
        Ok(())
    }
}

/// Records posted messages; selected connections are gone or failing
#[derive(Default)]
pub struct RecordingGateway {
    posts: Mutex<Vec<(String, Value)>>,
    gone: HashSet<String>,
    failing: HashSet<String>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gone(mut self, ids: &[&str]) -> Self {
        self.gone.extend(ids.iter().map(|id| id.to_string()));
        self
    }

    pub fn with_failing(mut self, ids: &[&str]) -> Self {
        self.failing.extend(ids.iter().map(|id| id.to_string()));
        self
    }

    /// Successfully delivered messages as `(connection id, message)`
    pub fn posts(&self) -> Vec<(String, Value)> {
        lock(&self.posts).clone()
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    async fn post(&self, connection_id: &str, data: &[u8]) -> std::result::Result<(), GatewayError> {
        if self.gone.contains(connection_id) {
            return Err(GatewayError::Gone);
        }
        if self.failing.contains(connection_id) {
            return Err(GatewayError::Other("simulated post failure".to_string()));
        }
        let message = serde_json::from_slice(data).map_err(|e| GatewayError::Other(e.to_string()))?;
        lock(&self.posts).push((connection_id.to_string(), message));
        Ok(())
    }
}

/// [`Services`] backed by in-memory doubles, with handles to inspect them
pub struct TestServices {
    pub services: Services,
    pub events: Arc<MemoryStore>,
    pub registrations: Arc<MemoryStore>,
    pub event_types: Arc<MemoryStore>,
    pub judges: Arc<MemoryStore>,
    pub officials: Arc<MemoryStore>,
    pub organizers: Arc<MemoryStore>,
    pub users: Arc<MemoryStore>,
    pub email_templates: Arc<MemoryStore>,
    pub transactions: Arc<MemoryStore>,
    pub audit: Arc<MemoryStore>,
    pub mailer: Arc<RecordingMailer>,
}

impl TestServices {
    pub fn new() -> Self {
        Self::with_mailer(RecordingMailer::new())
    }

    pub fn with_mailer(mailer: RecordingMailer) -> Self {
        let config = Config::from_lookup(|_| None);
        let events = Arc::new(MemoryStore::new(&config.tables.event, &["eventType", "id"]));
        let registrations = Arc::new(MemoryStore::new(&config.tables.registration, &["eventId", "id"]));
        let event_types = Arc::new(MemoryStore::new(&config.tables.event_type, &["eventType"]));
        let judges = Arc::new(MemoryStore::new(&config.tables.judge, &["id"]));
        let officials = Arc::new(MemoryStore::new(&config.tables.official, &["id"]));
        let organizers = Arc::new(MemoryStore::new(&config.tables.organizer, &["id"]));
        let users = Arc::new(MemoryStore::new(&config.tables.user, &["id"]));
        let email_templates = Arc::new(MemoryStore::new(&config.tables.email_template, &["id"]));
        let transactions = Arc::new(MemoryStore::new(&config.tables.transaction, &["transactionId"]));
        let audit = Arc::new(MemoryStore::new(&config.tables.audit, &["auditKey", "id"]));
        let mailer = Arc::new(mailer);

        let services = Services {
            config,
            events: events.clone(),
            registrations: registrations.clone(),
            event_types: event_types.clone(),
            judges: judges.clone(),
            officials: officials.clone(),
            organizers: organizers.clone(),
            users: users.clone(),
            email_templates: email_templates.clone(),
            transactions: transactions.clone(),
            audit: audit.clone(),
            mailer: mailer.clone(),
        };

        Self {
            services,
            events,
            registrations,
            event_types,
            judges,
            officials,
            organizers,
            users,
            email_templates,
            transactions,
            audit,
            mailer,
        }
    }
}

impl Default for TestServices {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::key;
    use serde_json::json;

    #[tokio::test]
    async fn test_query_and_update() {
        let store = MemoryStore::new("registration", &["eventId", "id"]);
        store.insert(json!({"eventId": "e1", "id": "r1"}));
        store.insert(json!({"eventId": "e1", "id": "r2"}));
        store.insert(json!({"eventId": "e2", "id": "r3"}));

        let values = object(json!({":eventId": "e1"}));
        assert_eq!(store.query("eventId = :eventId", &values).await.unwrap().len(), 2);

        let values = object(json!({":entries": 2}));
        store
            .update(&key([("eventId", "e1"), ("id", "r1")]), "set #entries = :entries", &[("#entries", "entries")], &values)
            .await
            .unwrap();
        let updated = store.get(&key([("eventId", "e1"), ("id", "r1")])).unwrap();
        assert_eq!(updated["entries"], json!(2));
        assert_eq!(store.calls(), vec!["query", "update"]);
    }

    #[tokio::test]
    async fn test_simulated_failure() {
        let store = MemoryStore::new("event", &["id"]);
        store.fail_on("write", 500);
        let err = store.write(&object(json!({"id": "1"}))).await.unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert!(store.is_empty());
    }
}
