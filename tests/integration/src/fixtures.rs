//! Test fixtures and utilities

use std::collections::HashMap;

use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::types::AttributeValue;
use serde_json::{json, Value};
use uuid::Uuid;

pub const EVENT_TYPE: &str = "NOME-B";

/// Generate a unique record ID for testing
pub fn unique_id(prefix: &str) -> String {
    format!("{}-{}", prefix, &Uuid::new_v4().simple().to_string()[..8])
}

/// Generate a unique dog registration number
pub fn unique_reg_no() -> String {
    format!("FI{}/24", &Uuid::new_v4().simple().to_string()[..6])
}

/// Load `.env` and check if the API URL is configured
pub fn api_url_configured() -> bool {
    dotenvy::dotenv().ok();
    std::env::var("KOEKALENTERI_API_URL").is_ok()
}

/// A registration body for `event_id`
pub fn registration(event_id: &str, reg_no: &str) -> Value {
    json!({
        "eventId": event_id,
        "eventType": EVENT_TYPE,
        "language": "fi",
        "class": "ALO",
        "dates": [{"date": "2030-06-01T06:00:00.000Z", "time": "ap"}],
        "dog": {"regNo": reg_no, "name": "Testikoira"},
        "owner": {"name": "Omistaja", "email": "owner@example.com"},
        "handler": {"name": "Ohjaaja", "email": "owner@example.com"}
    })
}

/// Put a confirmed event straight into the event table named by `EVENT_TABLE_NAME`
///
/// Returns `None` when the table is not configured.
pub async fn seed_event() -> Option<String> {
    let table = std::env::var("EVENT_TABLE_NAME").ok()?;
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Ok(endpoint) = std::env::var("LOCAL_DYNAMODB_ENDPOINT") {
        loader = loader.endpoint_url(endpoint);
    }
    let client = aws_sdk_dynamodb::Client::new(&loader.load().await);

    let id = unique_id("event");
    let class = HashMap::from([("class".to_string(), AttributeValue::S("ALO".to_string()))]);
    client
        .put_item()
        .table_name(table)
        .item("eventType", AttributeValue::S(EVENT_TYPE.to_string()))
        .item("id", AttributeValue::S(id.clone()))
        .item("name", AttributeValue::S("Integraatiotesti".to_string()))
        .item("state", AttributeValue::S("confirmed".to_string()))
        .item("startDate", AttributeValue::S("2030-06-01T06:00:00.000Z".to_string()))
        .item("endDate", AttributeValue::S("2030-06-01T06:00:00.000Z".to_string()))
        .item("classes", AttributeValue::L(vec![AttributeValue::M(class)]))
        .item("places", AttributeValue::N("20".to_string()))
        .item("entries", AttributeValue::N("0".to_string()))
        .send()
        .await
        .expect("Failed to seed event");

    Some(id)
}
