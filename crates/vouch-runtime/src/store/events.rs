//! Sanitized, fire-and-forget audit event log.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use vouch_core::normalize::short_hash;

use super::{CatalogStore, EventRecord};

/// Strip raw vendor ids, descriptions, prices and synonym text from a
/// payload, keeping only hashes, lengths and presence flags.
pub fn sanitize(payload: Value) -> Value {
    match payload {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                match key.as_str() {
                    "vendor_id" => {
                        let hash = value.as_str().map(short_hash);
                        out.insert("vendor_id_hash".to_string(), hash.map_or(Value::Null, Value::from));
                    }
                    "description" => {
                        out.insert("description_length".to_string(), text_length(&value));
                    }
                    "unit_price" => {
                        out.insert("price_present".to_string(), Value::Bool(!value.is_null()));
                    }
                    "items" => {
                        let count = value.as_array().map_or(0, Vec::len);
                        out.insert("item_count".to_string(), Value::from(count));
                    }
                    "synonym" | "synonym_text" => {
                        out.insert("synonym_length".to_string(), text_length(&value));
                    }
                    _ => {
                        out.insert(key, sanitize(value));
                    }
                }
            }
            Value::Object(out)
        }
        Value::Array(values) => Value::Array(values.into_iter().map(sanitize).collect()),
        other => other,
    }
}

fn text_length(value: &Value) -> Value {
    Value::from(value.as_str().map_or(0, |s| s.chars().count()))
}

/// Writes sanitized events to the store, never failing the caller.
#[derive(Clone)]
pub struct EventLog {
    store: Arc<dyn CatalogStore>,
}

impl EventLog {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub async fn log(
        &self,
        invoice_id: Option<&str>,
        line_item_id: Option<&str>,
        stage: &str,
        payload: Value,
    ) {
        let event = EventRecord {
            invoice_id: invoice_id.map(str::to_string),
            line_item_id: line_item_id.map(str::to_string),
            stage: stage.to_string(),
            payload: sanitize(payload),
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.append_event(event).await {
            tracing::warn!(stage = %stage, error = %e, "failed to log event");
        }
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::FlakyStore;
    use crate::store::InMemoryCatalogStore;
    use proptest::prelude::*;
    use serde_json::json;

    fn has_sensitive_key(value: &Value) -> bool {
        match value {
            Value::Object(map) => map.iter().any(|(key, v)| {
                matches!(
                    key.as_str(),
                    "vendor_id" | "description" | "unit_price" | "items" | "synonym" | "synonym_text"
                ) || has_sensitive_key(v)
            }),
            Value::Array(values) => values.iter().any(has_sensitive_key),
            _ => false,
        }
    }

    fn payload() -> impl Strategy<Value = Value> {
        let key = prop::sample::select(vec![
            "vendor_id", "description", "unit_price", "items", "synonym", "synonym_text", "stage",
            "confidence",
        ]);
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            (-1e6f64..1e6).prop_map(Value::from),
            "[a-z ]{0,12}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 24, 4, move |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map(key.clone(), inner, 0..4).prop_map(|m| {
                    Value::Object(m.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_sanitize_leaves_no_sensitive_keys(value in payload()) {
            prop_assert!(!has_sensitive_key(&sanitize(value)));
        }
    }

    #[test]
    fn test_sanitize_replaces_sensitive_fields() {
        let payload = json!({
            "vendor_id": "acme",
            "description": "Office Chair",
            "unit_price": 150.0,
            "items": [1, 2, 3],
            "nested": {"synonym": "desk chair", "confidence": 0.8},
        });
        let clean = sanitize(payload);

        assert_eq!(clean["vendor_id_hash"], json!(short_hash("acme")));
        assert_eq!(clean["description_length"], json!(12));
        assert_eq!(clean["price_present"], json!(true));
        assert_eq!(clean["item_count"], json!(3));
        assert_eq!(clean["nested"]["synonym_length"], json!(10));
        assert_eq!(clean["nested"]["confidence"], json!(0.8));

        let text = clean.to_string();
        assert!(!text.contains("acme"));
        assert!(!text.contains("Office Chair"));
    }

    #[tokio::test]
    async fn test_log_appends_sanitized_event() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let log = EventLog::new(store.clone());
        log.log(Some("inv-1"), Some("li-1"), "MATCHING_START", json!({"description": "chair"}))
            .await;

        let events = store.events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, "MATCHING_START");
        assert_eq!(events[0].payload, json!({"description_length": 5}));
    }

    #[tokio::test]
    async fn test_log_swallows_store_errors() {
        let store = Arc::new(FlakyStore::new(InMemoryCatalogStore::new()));
        store.fail_writes(true);
        let log = EventLog::new(store.clone());

        log.log(None, None, "PIPELINE_START", json!({})).await;
        store.fail_writes(false);
        assert!(store.events().await.unwrap().is_empty());
    }
}
