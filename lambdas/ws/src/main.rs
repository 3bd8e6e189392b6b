//! Koekalenteri WebSocket Lambda
//!
//! Handles the `$connect` and `$disconnect` routes of the WebSocket API and
//! broadcasts the live connection count to the connected clients.

use aws_config::SdkConfig;
use aws_lambda_events::apigw::{ApiGatewayProxyResponse, ApiGatewayWebsocketProxyRequest};
use koekalenteri_core::broadcast::{ws_connect, ws_disconnect, ApiGatewayClient, Gateway};
use koekalenteri_core::dynamo::{dynamodb_client, load_sdk_config};
use koekalenteri_core::{init_tracing, Config, DynamoClient, Error, Result, Store};
use lambda_runtime::{service_fn, Error as LambdaError, LambdaEvent};
use tracing::{error, info, warn};

/// Route the event to the connection bookkeeping
async fn dispatch(store: &dyn Store, gateway: &dyn Gateway, route: &str, connection_id: &str) -> Result<()> {
    match route {
        "CONNECT" => {
            ws_connect(store, gateway, connection_id).await?;
        }
        "DISCONNECT" => {
            ws_disconnect(store, gateway, connection_id).await?;
        }
        other => warn!(route = %other, "Ignoring WebSocket event"),
    }
    Ok(())
}

fn ok() -> ApiGatewayProxyResponse {
    ApiGatewayProxyResponse {
        status_code: 200,
        ..Default::default()
    }
}

async fn handler(
    sdk_config: &SdkConfig,
    store: &dyn Store,
    event: LambdaEvent<ApiGatewayWebsocketProxyRequest>,
) -> std::result::Result<ApiGatewayProxyResponse, LambdaError> {
    let context = &event.payload.request_context;
    let route = context.event_type.as_deref().unwrap_or_default();
    let connection_id = context
        .connection_id
        .as_deref()
        .ok_or_else(|| Error::Validation("missing connectionId".to_string()))?;
    let domain = context.domain_name.as_deref().unwrap_or_default();
    let stage = context.stage.as_deref().unwrap_or_default();

    info!(route = %route, connection_id = %connection_id, "Processing WebSocket event");

    let gateway = ApiGatewayClient::new(sdk_config, &format!("https://{}/{}", domain, stage));
    if let Err(err) = dispatch(store, &gateway, route, connection_id).await {
        error!(error = %err, route = %route, connection_id = %connection_id, "WebSocket event failed");
        return Err(err.into());
    }

    Ok(ok())
}

#[tokio::main]
async fn main() -> std::result::Result<(), LambdaError> {
    init_tracing();

    let config = Config::from_env();
    let sdk_config = load_sdk_config().await;
    let store = DynamoClient::new(dynamodb_client(&sdk_config, &config), config.tables.ws_connections.clone());

    let sdk_config = &sdk_config;
    let store = &store;
    lambda_runtime::run(service_fn(
        move |event: LambdaEvent<ApiGatewayWebsocketProxyRequest>| async move { handler(sdk_config, store, event).await },
    ))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use koekalenteri_core::broadcast::{CONNECTION_COUNT, CONNECTION_COUNT_ID, CONNECTION_ID};
    use koekalenteri_core::store::key;
    use koekalenteri_core::testing::{MemoryStore, RecordingGateway};
    use serde_json::json;

    fn count(store: &MemoryStore) -> Option<i64> {
        store
            .get(&key([(CONNECTION_ID, CONNECTION_COUNT_ID)]))
            .and_then(|row| row[CONNECTION_COUNT].as_i64())
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let store = MemoryStore::new("ws-connections", &[CONNECTION_ID]);
        let gateway = RecordingGateway::new();

        dispatch(&store, &gateway, "CONNECT", "a").await.unwrap();
        dispatch(&store, &gateway, "CONNECT", "b").await.unwrap();
        assert_eq!(count(&store), Some(2));
        assert_eq!(gateway.posts(), vec![("a".to_string(), json!({"count": 2}))]);

        dispatch(&store, &gateway, "DISCONNECT", "a").await.unwrap();
        assert_eq!(count(&store), Some(1));
        assert_eq!(gateway.posts().last(), Some(&("b".to_string(), json!({"count": 1}))));
    }

    #[tokio::test]
    async fn test_other_routes_are_ignored() {
        let store = MemoryStore::new("ws-connections", &[CONNECTION_ID]);
        let gateway = RecordingGateway::new();

        dispatch(&store, &gateway, "MESSAGE", "a").await.unwrap();
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let store = MemoryStore::new("ws-connections", &[CONNECTION_ID]);
        store.fail_on("transact", 500);
        let gateway = RecordingGateway::new();

        let err = dispatch(&store, &gateway, "CONNECT", "a").await.unwrap_err();
        assert_eq!(err.status_code(), 500);
    }
}
