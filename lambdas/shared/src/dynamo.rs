//! DynamoDB implementation of [`Store`]
//!
//! Every table has a plain key schema (`id`, `{eventType, id}`,
//! `{eventId, id}`, `transactionId` or `connectionId`). Items are converted
//! between JSON objects and attribute maps with `serde_dynamo`.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_dynamodb::config::http::HttpResponse;
use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{AttributeValue, Delete, Put, TransactWriteItem, Update};
use aws_sdk_dynamodb::Client;
use serde_dynamo::{from_item, to_attribute_value, to_item};
use tracing::{debug, info};

use crate::config::Config;
use crate::errors::{Error, Result};
use crate::store::{is_deleted, Item, Key, Store, TransactWrite};

type AttributeMap = HashMap<String, AttributeValue>;

/// Load the shared AWS configuration
pub async fn load_sdk_config() -> SdkConfig {
    aws_config::load_defaults(BehaviorVersion::latest()).await
}

/// Build a DynamoDB client, pointed at the local emulator when configured
pub fn dynamodb_client(sdk_config: &SdkConfig, config: &Config) -> Client {
    let mut builder = aws_sdk_dynamodb::config::Builder::from(sdk_config);
    if let Some(endpoint) = &config.local_endpoint {
        info!(endpoint = %endpoint, "Using local DynamoDB endpoint");
        builder = builder.endpoint_url(endpoint);
    }
    Client::from_conf(builder.build())
}

/// DynamoDB client bound to one table
#[derive(Clone)]
pub struct DynamoClient {
    client: Client,
    table_name: String,
}

impl DynamoClient {
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

/// Map an SDK failure, keeping the HTTP status of the response when there was one
pub(crate) fn sdk_error<E>(err: SdkError<E, HttpResponse>) -> Error
where
    E: std::error::Error + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    Error::Database {
        status,
        message: DisplayErrorContext(&err).to_string(),
    }
}

fn to_attributes(item: &Item) -> Result<AttributeMap> {
    to_item(item).map_err(|e| Error::DynamoSerialization(e.to_string()))
}

fn from_attributes(item: AttributeMap) -> Result<Item> {
    from_item(item).map_err(|e| Error::DynamoSerialization(e.to_string()))
}

fn to_attribute_values(values: &Item) -> Result<AttributeMap> {
    values
        .iter()
        .map(|(name, value)| {
            to_attribute_value(value)
                .map(|attr| (name.clone(), attr))
                .map_err(|e| Error::DynamoSerialization(e.to_string()))
        })
        .collect()
}

/// DynamoDB rejects empty expression maps
fn non_empty(values: AttributeMap) -> Option<AttributeMap> {
    (!values.is_empty()).then_some(values)
}

fn build_error(err: aws_sdk_dynamodb::error::BuildError) -> Error {
    Error::Internal(format!("Invalid transaction: {}", err))
}

/// A conditional delete of the transaction found no item
fn condition_failed(err: &TransactWriteItemsError) -> bool {
    match err {
        TransactWriteItemsError::TransactionCanceledException(e) => e
            .cancellation_reasons()
            .iter()
            .any(|reason| reason.code() == Some("ConditionalCheckFailed")),
        _ => false,
    }
}

impl DynamoClient {
    fn transact_item(&self, write: &TransactWrite) -> Result<TransactWriteItem> {
        let item = match write {
            TransactWrite::Put(item) => TransactWriteItem::builder().put(
                Put::builder()
                    .table_name(&self.table_name)
                    .set_item(Some(to_attributes(item)?))
                    .build()
                    .map_err(build_error)?,
            ),
            TransactWrite::DeleteExisting(key) => {
                let attr = key
                    .keys()
                    .next()
                    .ok_or_else(|| Error::Internal("empty key".to_string()))?;
                TransactWriteItem::builder().delete(
                    Delete::builder()
                        .table_name(&self.table_name)
                        .set_key(Some(to_attributes(key)?))
                        .condition_expression("attribute_exists(#key)")
                        .expression_attribute_names("#key", attr)
                        .build()
                        .map_err(build_error)?,
                )
            }
            TransactWrite::Add { key, field, delta } => TransactWriteItem::builder().update(
                Update::builder()
                    .table_name(&self.table_name)
                    .set_key(Some(to_attributes(key)?))
                    .update_expression("ADD #field :delta")
                    .expression_attribute_names("#field", field)
                    .expression_attribute_values(":delta", AttributeValue::N(delta.to_string()))
                    .build()
                    .map_err(build_error)?,
            ),
        };
        Ok(item.build())
    }
}

#[async_trait]
impl Store for DynamoClient {
    fn table(&self) -> &str {
        &self.table_name
    }

    async fn read(&self, key: &Key) -> Result<Option<Item>> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(to_attributes(key)?))
            .send()
            .await
            .map_err(sdk_error)?;

        result.item.map(from_attributes).transpose()
    }

    async fn read_all(&self) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        let mut start_key: Option<AttributeMap> = None;

        loop {
            let result = self
                .client
                .scan()
                .table_name(&self.table_name)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(sdk_error)?;

            for item in result.items.unwrap_or_default() {
                let item = from_attributes(item)?;
                if !is_deleted(&item) {
                    items.push(item);
                }
            }

            match result.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        debug!(table = %self.table_name, count = items.len(), "Scanned table");
        Ok(items)
    }

    async fn query(&self, key_expression: &str, values: &Item) -> Result<Vec<Item>> {
        let values = to_attribute_values(values)?;
        let mut items = Vec::new();
        let mut start_key: Option<AttributeMap> = None;

        loop {
            let result = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression(key_expression)
                .set_expression_attribute_values(non_empty(values.clone()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(sdk_error)?;

            for item in result.items.unwrap_or_default() {
                items.push(from_attributes(item)?);
            }

            match result.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }

        Ok(items)
    }

    async fn write(&self, item: &Item) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(to_attributes(item)?))
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(())
    }

    async fn update(&self, key: &Key, expression: &str, names: &[(&str, &str)], values: &Item) -> Result<()> {
        let names: HashMap<String, String> = names
            .iter()
            .map(|(placeholder, attr)| (placeholder.to_string(), attr.to_string()))
            .collect();

        self.client
            .update_item()
            .table_name(&self.table_name)
            .set_key(Some(to_attributes(key)?))
            .update_expression(expression)
            .set_expression_attribute_names((!names.is_empty()).then_some(names))
            .set_expression_attribute_values(non_empty(to_attribute_values(values)?))
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(())
    }

    async fn transact(&self, writes: &[TransactWrite]) -> Result<bool> {
        let items = writes
            .iter()
            .map(|write| self.transact_item(write))
            .collect::<Result<Vec<_>>>()?;

        match self.client.transact_write_items().set_transact_items(Some(items)).send().await {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some_and(condition_failed) => {
                debug!(table = %self.table_name, "Transaction condition failed");
                Ok(false)
            }
            Err(err) => Err(sdk_error(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_values() {
        let values = json!({":eventId": "e1", ":count": 3}).as_object().cloned().unwrap();
        let attrs = to_attribute_values(&values).unwrap();
        assert_eq!(attrs.get(":eventId"), Some(&AttributeValue::S("e1".into())));
        assert_eq!(attrs.get(":count"), Some(&AttributeValue::N("3".into())));
    }

    #[test]
    fn test_item_conversion_keeps_nested_values() {
        let item = json!({"id": "r1", "dog": {"regNo": "FI1/20"}, "dates": [{"time": "ap"}]})
            .as_object()
            .cloned()
            .unwrap();
        let back = from_attributes(to_attributes(&item).unwrap()).unwrap();
        assert_eq!(back, item);
    }

    fn client() -> DynamoClient {
        let config = aws_sdk_dynamodb::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .build();
        DynamoClient::new(Client::from_conf(config), "ws-connections")
    }

    #[test]
    fn test_transact_items() {
        let client = client();
        let key = json!({"connectionId": "c1"}).as_object().cloned().unwrap();

        let delete = client.transact_item(&TransactWrite::DeleteExisting(key.clone())).unwrap();
        let delete = delete.delete().unwrap();
        assert_eq!(delete.table_name(), "ws-connections");
        assert_eq!(delete.condition_expression(), Some("attribute_exists(#key)"));
        assert_eq!(
            delete.expression_attribute_names().and_then(|names| names.get("#key")),
            Some(&"connectionId".to_string())
        );

        let add = TransactWrite::Add {
            key,
            field: "connectionCount".to_string(),
            delta: -1,
        };
        let update = client.transact_item(&add).unwrap();
        let update = update.update().unwrap();
        assert_eq!(update.update_expression(), "ADD #field :delta");
        assert_eq!(
            update.expression_attribute_values().and_then(|values| values.get(":delta")),
            Some(&AttributeValue::N("-1".into()))
        );
    }
}
