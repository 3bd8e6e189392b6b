//! Registration audit trail
//!
//! Every change to a registration leaves a record keyed by `auditKey`
//! (`{eventId}:{id}`) and a record id. Writing a record never fails the
//! change it describes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::errors::Result;
use crate::handlers::timestamp;
use crate::models::new_id;
use crate::store::{to_item, Item, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub audit_key: String,
    pub id: String,
    pub timestamp: String,
    pub user: String,
    pub message: String,
}

pub fn registration_audit_key(event_id: &str, id: &str) -> String {
    format!("{}:{}", event_id, id)
}

/// Store an audit record, failures are logged and dropped
pub async fn audit(store: &dyn Store, audit_key: &str, user: &str, message: &str) {
    let record = AuditRecord {
        audit_key: audit_key.to_string(),
        id: new_id(),
        timestamp: timestamp(),
        user: user.to_string(),
        message: message.to_string(),
    };
    let written = match to_item(&record) {
        Ok(item) => store.write(&item).await,
        Err(err) => Err(err),
    };
    if let Err(err) = written {
        error!(audit_key = %audit_key, error = %err, "Failed to write audit record");
    }
}

/// Records of one audit key, oldest first
pub async fn audit_trail(store: &dyn Store, audit_key: &str) -> Result<Vec<Item>> {
    let values: Item = [(":auditKey".to_string(), Value::String(audit_key.to_string()))]
        .into_iter()
        .collect();
    let mut items = store.query("auditKey = :auditKey", &values).await?;
    items.sort_by(|a, b| {
        let time = |item: &Item| item.get("timestamp").and_then(Value::as_str).map(str::to_string);
        time(a).cmp(&time(b))
    });
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new("audit", &["auditKey", "id"])
    }

    #[tokio::test]
    async fn test_trail_is_per_key_and_ordered() {
        let store = store();
        store.insert(json!({"auditKey": "e1:r1", "id": "b", "timestamp": "2024-05-02T00:00:00.000Z", "message": "second"}));
        store.insert(json!({"auditKey": "e1:r1", "id": "a", "timestamp": "2024-05-01T00:00:00.000Z", "message": "first"}));
        store.insert(json!({"auditKey": "e1:r2", "id": "c", "timestamp": "2024-05-01T00:00:00.000Z", "message": "other"}));

        let trail = audit_trail(&store, &registration_audit_key("e1", "r1")).await.unwrap();
        let messages: Vec<&str> = trail.iter().map(|r| r["message"].as_str().unwrap()).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_audit_failure_is_swallowed() {
        let store = store();
        store.fail_on("write", 500);

        audit(&store, "e1:r1", "Admin", "Ilmoittautui").await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_audit_record() {
        let store = store();
        audit(&store, "e1:r1", "Admin", "Ilmoittautui").await;

        let items = store.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["auditKey"], "e1:r1");
        assert_eq!(items[0]["user"], "Admin");
        assert_eq!(items[0]["message"], "Ilmoittautui");
        assert!(!items[0]["timestamp"].as_str().unwrap().is_empty());
    }
}
