//! Data access facade over a single table
//!
//! Items are handled as JSON objects; typed conversion happens at the call
//! site with [`to_item`] / [`from_item`].

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::errors::{Error, Result};

/// A stored record
pub type Item = Map<String, Value>;

/// Primary key attributes of a record
pub type Key = Map<String, Value>;

/// Attribute marking a soft-deleted record
pub const DELETED_AT: &str = "deletedAt";

/// One write of a [`Store::transact`] call
#[derive(Debug, Clone, PartialEq)]
pub enum TransactWrite {
    Put(Item),
    /// Delete an item; the whole transaction is dropped unless it exists
    DeleteExisting(Key),
    /// Add `delta` to a numeric attribute
    Add { key: Key, field: String, delta: i64 },
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Name of the backing table
    fn table(&self) -> &str;

    /// Get a single item by key
    async fn read(&self, key: &Key) -> Result<Option<Item>>;

    /// Scan the whole table, skipping soft-deleted items
    async fn read_all(&self) -> Result<Vec<Item>>;

    /// Query by key condition, e.g. `eventId = :eventId`
    async fn query(&self, key_expression: &str, values: &Item) -> Result<Vec<Item>>;

    /// Put an item, replacing any existing one
    async fn write(&self, item: &Item) -> Result<()>;

    /// Apply an update expression such as `set #a = :a`
    async fn update(&self, key: &Key, expression: &str, names: &[(&str, &str)], values: &Item) -> Result<()>;

    /// Apply all writes or none, `Ok(false)` when a delete found no item
    async fn transact(&self, writes: &[TransactWrite]) -> Result<bool>;
}

/// Whether the item carries a non-empty soft-delete timestamp
pub fn is_deleted(item: &Item) -> bool {
    match item.get(DELETED_AT) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Build a key from `(attribute, value)` pairs
pub fn key<const N: usize>(parts: [(&str, &str); N]) -> Key {
    parts
        .into_iter()
        .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
        .collect()
}

pub fn to_item<T: Serialize>(value: &T) -> Result<Item> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Internal(format!("expected an object, got {}", other))),
    }
}

/// Decode a stored item, a record that does not fit the type is a server fault
pub fn from_item<T: DeserializeOwned>(item: Item) -> Result<T> {
    serde_json::from_value(Value::Object(item)).map_err(|e| Error::DynamoSerialization(e.to_string()))
}
