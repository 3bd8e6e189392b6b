//! Live connection count over the WebSocket API
//!
//! Each open connection is a row keyed by `connectionId`. One reserved row
//! holds the `connectionCount` counter. The connection row and the counter
//! change together in one transaction.

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_apigatewaymanagement::error::DisplayErrorContext;
use aws_sdk_apigatewaymanagement::primitives::Blob;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::errors::Result;
use crate::store::{key, Key, Store, TransactWrite};

pub const CONNECTION_ID: &str = "connectionId";
pub const CONNECTION_COUNT_ID: &str = "$connectionCount";
pub const CONNECTION_COUNT: &str = "connectionCount";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The client has disconnected without a `$disconnect`
    #[error("connection is gone")]
    Gone,
    #[error("{0}")]
    Other(String),
}

/// Message delivery to connected clients
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn post(&self, connection_id: &str, data: &[u8]) -> std::result::Result<(), GatewayError>;
}

/// API Gateway Management API client
pub struct ApiGatewayClient {
    client: aws_sdk_apigatewaymanagement::Client,
}

impl ApiGatewayClient {
    /// `endpoint` is `https://{domain}/{stage}` of the WebSocket API
    pub fn new(sdk_config: &SdkConfig, endpoint: &str) -> Self {
        let config = aws_sdk_apigatewaymanagement::config::Builder::from(sdk_config)
            .endpoint_url(endpoint)
            .build();
        Self {
            client: aws_sdk_apigatewaymanagement::Client::from_conf(config),
        }
    }
}

#[async_trait]
impl Gateway for ApiGatewayClient {
    async fn post(&self, connection_id: &str, data: &[u8]) -> std::result::Result<(), GatewayError> {
        self.client
            .post_to_connection()
            .connection_id(connection_id)
            .data(Blob::new(data))
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|e| e.is_gone_exception()) {
                    GatewayError::Gone
                } else {
                    GatewayError::Other(DisplayErrorContext(&err).to_string())
                }
            })?;
        Ok(())
    }
}

fn connection_key(connection_id: &str) -> Key {
    key([(CONNECTION_ID, connection_id)])
}

fn counter_key() -> Key {
    connection_key(CONNECTION_COUNT_ID)
}

fn count_change(delta: i64) -> TransactWrite {
    TransactWrite::Add {
        key: counter_key(),
        field: CONNECTION_COUNT.to_string(),
        delta,
    }
}

async fn connection_count(store: &dyn Store) -> Result<Option<i64>> {
    let counter = store.read(&counter_key()).await?;
    Ok(counter.and_then(|row| row.get(CONNECTION_COUNT).and_then(Value::as_i64)))
}

/// Register a new connection and tell the others about it
pub async fn ws_connect(store: &dyn Store, gateway: &dyn Gateway, connection_id: &str) -> Result<i64> {
    store
        .transact(&[TransactWrite::Put(connection_key(connection_id)), count_change(1)])
        .await?;
    let count = connection_count(store).await?.unwrap_or_default();
    info!(connection_id = %connection_id, count, "Connected");

    broadcast_connection_count(store, gateway, Some(count), Some(connection_id)).await?;
    Ok(count)
}

/// Remove a connection; the counter only moves when the connection was known
pub async fn ws_disconnect(store: &dyn Store, gateway: &dyn Gateway, connection_id: &str) -> Result<Option<i64>> {
    let count = remove_connection(store, connection_id).await?;
    info!(connection_id = %connection_id, count = ?count, "Disconnected");

    broadcast_connection_count(store, gateway, count, None).await?;
    Ok(count)
}

/// Delete the connection row and decrement the counter, returning the count
async fn remove_connection(store: &dyn Store, connection_id: &str) -> Result<Option<i64>> {
    let removed = store
        .transact(&[TransactWrite::DeleteExisting(connection_key(connection_id)), count_change(-1)])
        .await?;
    if !removed {
        debug!(connection_id = %connection_id, "Unknown connection");
    }
    connection_count(store).await
}

/// Post `{"count": n}` to every connection except `except`
pub async fn broadcast_connection_count(
    store: &dyn Store,
    gateway: &dyn Gateway,
    count: Option<i64>,
    except: Option<&str>,
) -> Result<()> {
    match count {
        Some(count) if count > 0 => broadcast(store, gateway, &json!({ "count": count }), except).await,
        _ => {
            debug!(count = ?count, "Nothing to broadcast");
            Ok(())
        }
    }
}

/// Post a message to all connections except `except`
pub async fn broadcast(store: &dyn Store, gateway: &dyn Gateway, message: &Value, except: Option<&str>) -> Result<()> {
    let data = message.to_string();
    let connections = store.read_all().await?;

    for row in connections {
        let Some(connection_id) = row.get(CONNECTION_ID).and_then(Value::as_str) else {
            continue;
        };
        if connection_id == CONNECTION_COUNT_ID || Some(connection_id) == except {
            continue;
        }

        match gateway.post(connection_id, data.as_bytes()).await {
            Ok(()) => {}
            Err(GatewayError::Gone) => {
                warn!(connection_id = %connection_id, "Removing stale connection");
                if let Err(err) = remove_connection(store, connection_id).await {
                    error!(connection_id = %connection_id, error = %err, "Failed to remove stale connection");
                }
            }
            Err(GatewayError::Other(message)) => {
                error!(connection_id = %connection_id, error = %message, "Failed to post to connection");
            }
        }
    }

    Ok(())
}
