//! Integration tests for the Koekalenteri API
//!
//! Run with: KOEKALENTERI_API_URL=https://your-api.execute-api.eu-north-1.amazonaws.com/dev cargo test
//!
//! These tests require a deployed Koekalenteri instance.

use koekalenteri_integration_tests::{
    client::KoekalenteriClient,
    fixtures::{api_url_configured, registration, seed_event, unique_id, unique_reg_no, EVENT_TYPE},
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

/// Helper to get client or skip test
fn get_client() -> Option<KoekalenteriClient> {
    if api_url_configured() {
        Some(KoekalenteriClient::from_env())
    } else {
        eprintln!("Skipping: KOEKALENTERI_API_URL not set");
        None
    }
}

/// Helper to get client and a seeded event, or skip test
async fn get_client_and_event() -> Option<(KoekalenteriClient, String)> {
    let client = get_client()?;
    match seed_event().await {
        Some(event_id) => Some((client, event_id)),
        None => {
            eprintln!("Skipping: EVENT_TABLE_NAME not set");
            None
        }
    }
}

// ============================================================================
// Event Tests
// ============================================================================

#[tokio::test]
async fn test_public_events_exclude_drafts() {
    let Some(client) = get_client() else { return };

    let events = client.get_events().await.expect("Failed to list events");

    assert!(events.iter().all(|e| e["state"] != "draft"));
    assert!(events.iter().all(|e| e.get("deletedAt").map_or(true, |d| d.is_null() || d == "")));
}

#[tokio::test]
async fn test_get_missing_event() {
    let Some(client) = get_client() else { return };

    let err = client
        .get_event(EVENT_TYPE, &unique_id("missing"))
        .await
        .expect_err("Missing event should fail");

    assert_eq!(err.status(), Some(404));
    assert_eq!(err.response().map(|r| r.error), Some("not_found".to_string()));
}

// ============================================================================
// Lookup Tests
// ============================================================================

#[tokio::test]
async fn test_lookups_are_lists() {
    let Some(client) = get_client() else { return };

    for kind in ["eventType", "judge", "official", "organizer"] {
        let items = client
            .get_lookup(kind)
            .await
            .unwrap_or_else(|e| panic!("Failed to list {}: {}", kind, e));
        assert!(items.iter().all(Value::is_object), "{} items are objects", kind);
    }
}

// ============================================================================
// Registration Tests
// ============================================================================

#[tokio::test]
async fn test_registration_to_missing_event() {
    let Some(client) = get_client() else { return };

    let event_id = unique_id("missing");
    let err = client
        .put_registration(&registration(&event_id, &unique_reg_no()))
        .await
        .expect_err("Registration to a missing event should fail");

    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_invalid_registration() {
    let Some(client) = get_client() else { return };

    let err = client
        .put_registration(&json!({"eventId": "x", "eventType": EVENT_TYPE}))
        .await
        .expect_err("Registration without a dog should fail");

    assert_eq!(err.status(), Some(400));
}

#[tokio::test]
async fn test_registration_updates_entries() {
    let Some((client, event_id)) = get_client_and_event().await else { return };

    let first = client
        .put_registration(&registration(&event_id, &unique_reg_no()))
        .await
        .expect("Failed to register");
    client
        .put_registration(&registration(&event_id, &unique_reg_no()))
        .await
        .expect("Failed to register");

    let id = first["id"].as_str().expect("Registration has an id");
    assert!(!id.is_empty());
    assert_eq!(first["createdBy"], "anonymous");

    let event = client.get_event(EVENT_TYPE, &event_id).await.expect("Failed to get event");
    assert_eq!(event["entries"], json!(2));
    assert_eq!(event["classes"][0]["entries"], json!(2));

    let fetched = client.get_registration(&event_id, id).await.expect("Failed to get registration");
    assert_eq!(fetched["dog"], first["dog"]);
    assert!(fetched.get("group").is_none());
}

#[tokio::test]
async fn test_duplicate_dog_is_rejected() {
    let Some((client, event_id)) = get_client_and_event().await else { return };

    let reg_no = unique_reg_no();
    client
        .put_registration(&registration(&event_id, &reg_no))
        .await
        .expect("Failed to register");

    let err = client
        .put_registration(&registration(&event_id, &reg_no))
        .await
        .expect_err("Second registration of the same dog should fail");
    assert_eq!(err.status(), Some(409));
}

#[tokio::test]
async fn test_cancel_registration() {
    let Some((client, event_id)) = get_client_and_event().await else { return };

    let mut reg = client
        .put_registration(&registration(&event_id, &unique_reg_no()))
        .await
        .expect("Failed to register");
    reg["cancelled"] = json!(true);

    let saved = client.put_registration(&reg).await.expect("Failed to cancel");
    assert_eq!(saved["cancelled"], true);
    assert_eq!(saved["createdAt"], reg["createdAt"]);
}

// ============================================================================
// Error Tests
// ============================================================================

#[tokio::test]
async fn test_admin_requires_authorization() {
    let Some(client) = get_client() else { return };

    let err = client
        .send::<Value, Value>("GET", "/admin/user", None)
        .await
        .expect_err("Admin API without credentials should fail");

    assert!(matches!(err.status(), Some(401) | Some(403)));

    for (method, path) in [
        ("GET", "/admin/registration/audit/e1/r1"),
        ("POST", "/admin/reg-groups/e1"),
        ("POST", "/admin/email-send"),
    ] {
        let err = client
            .send::<Value, Value>(method, path, Some(&json!([])))
            .await
            .expect_err("Admin API without credentials should fail");
        assert!(matches!(err.status(), Some(401) | Some(403)), "{} {}", method, path);
    }
}
