//! Generic handlers for lookup tables
//!
//! One handler performs exactly one operation on one store: scan all
//! records, read one by the path parameters, or write the request body.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::info;

use super::{body_object, instrumented, timestamp};
use crate::auth::get_username;
use crate::errors::{Error, Result};
use crate::models::new_id;
use crate::request::ApiRequest;
use crate::response::ApiResponse;
use crate::store::{Key, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ReadAll,
    Read,
    Write,
}

type Validator = fn(&Value) -> Result<()>;

fn validate_as<T: DeserializeOwned>(value: &Value) -> Result<()> {
    serde_json::from_value::<T>(value.clone())
        .map(|_| ())
        .map_err(|e| Error::Validation(e.to_string()))
}

pub struct CrudHandler {
    store: Arc<dyn Store>,
    name: &'static str,
    operation: Operation,
    key_attribute: &'static str,
    validate: Option<Validator>,
}

pub fn read_all_handler(store: Arc<dyn Store>, name: &'static str) -> CrudHandler {
    CrudHandler::new(store, name, Operation::ReadAll)
}

pub fn read_handler(store: Arc<dyn Store>, name: &'static str) -> CrudHandler {
    CrudHandler::new(store, name, Operation::Read)
}

pub fn write_handler(store: Arc<dyn Store>, name: &'static str) -> CrudHandler {
    CrudHandler::new(store, name, Operation::Write)
}

impl CrudHandler {
    pub fn new(store: Arc<dyn Store>, name: &'static str, operation: Operation) -> Self {
        Self {
            store,
            name,
            operation,
            key_attribute: "id",
            validate: None,
        }
    }

    /// Records keyed by something other than a generated `id`
    pub fn keyed_by(mut self, attribute: &'static str) -> Self {
        self.key_attribute = attribute;
        self
    }

    /// Reject write bodies that do not deserialize as `T`
    pub fn validated<T: DeserializeOwned>(mut self) -> Self {
        self.validate = Some(validate_as::<T>);
        self
    }

    pub async fn handle(&self, request: &ApiRequest) -> ApiResponse {
        instrumented(self.name, request, self.run(request)).await
    }

    async fn run(&self, request: &ApiRequest) -> Result<ApiResponse> {
        match self.operation {
            Operation::ReadAll => {
                let items = self.store.read_all().await?;
                Ok(ApiResponse::ok(&items))
            }
            Operation::Read => {
                let key: Key = request
                    .path_parameters
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect();
                let item = self.store.read(&key).await?;
                Ok(ApiResponse::ok(&item))
            }
            Operation::Write => {
                let mut item = body_object(request)?;
                if let Some(validate) = self.validate {
                    validate(&Value::Object(item.clone()))?;
                }

                let username = get_username(request);
                let now = timestamp();
                let has_key = item
                    .get(self.key_attribute)
                    .and_then(Value::as_str)
                    .is_some_and(|k| !k.is_empty());

                if !has_key {
                    if self.key_attribute != "id" {
                        return Err(Error::Validation(format!("{} is required", self.key_attribute)));
                    }
                    item.insert("id".to_string(), Value::String(new_id()));
                    item.insert("createdAt".to_string(), Value::String(now.clone()));
                    item.insert("createdBy".to_string(), Value::String(username.clone()));
                }
                item.insert("modifiedAt".to_string(), Value::String(now));
                item.insert("modifiedBy".to_string(), Value::String(username));

                self.store.write(&item).await?;
                info!(table = %self.store.table(), operation = %self.name, "Record written");
                Ok(ApiResponse::ok(&item))
            }
        }
    }
}
