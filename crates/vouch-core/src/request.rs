//! Raw invoice request parsing.
//!
//! The envelope (`invoice_id`, `vendor_id`, `items`) must validate against
//! `schema/invoice_request.schema.json` or the whole request is rejected.
//! Each item is then validated on its own against
//! `schema/line_item.schema.json`, so one malformed item is reported for that
//! item only and its siblings are still decided.
//!
//! Decisions are keyed by line-item id, so ids are made unique here: missing
//! ids are generated around the ones the caller supplied, and a repeated id
//! turns the later item invalid under a fresh key (see [`dedupe_ids`]).

use std::collections::HashSet;
use std::sync::OnceLock;

use serde::Deserialize;
use thiserror::Error;

use crate::types::LineItem;

const INVOICE_SCHEMA_JSON: &str = include_str!("../schema/invoice_request.schema.json");
const LINE_ITEM_SCHEMA_JSON: &str = include_str!("../schema/line_item.schema.json");

static INVOICE_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();
static LINE_ITEM_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request failed schema validation: {}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn compiled(
    cell: &'static OnceLock<Result<jsonschema::Validator, String>>,
    source: &'static str,
) -> Result<&'static jsonschema::Validator, RequestError> {
    let result = cell.get_or_init(|| {
        let value: serde_json::Value = match serde_json::from_str(source) {
            Ok(v) => v,
            Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
        };
        jsonschema::options()
            .build(&value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(RequestError::LoadError(e.clone())),
    }
}

fn schema_errors(validator: &jsonschema::Validator, value: &serde_json::Value) -> Vec<String> {
    validator
        .iter_errors(value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect()
}

/// A line item as submitted: either usable or rejected with a reason.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemInput {
    Valid(LineItem),
    Invalid { id: String, reason: String },
}

impl ItemInput {
    pub fn id(&self) -> &str {
        match self {
            ItemInput::Valid(item) => &item.id,
            ItemInput::Invalid { id, .. } => id,
        }
    }
}

impl From<LineItem> for ItemInput {
    fn from(item: LineItem) -> Self {
        ItemInput::Valid(item)
    }
}

#[derive(Debug, Deserialize)]
struct RawLineItem {
    description: String,
    quantity: f64,
    unit_price: f64,
}

/// Parsed invoice request.
#[derive(Debug, Clone)]
pub struct InvoiceRequest {
    pub invoice_id: String,
    pub vendor_id: String,
    pub items: Vec<ItemInput>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    invoice_id: String,
    vendor_id: String,
    items: Vec<serde_json::Value>,
}

impl InvoiceRequest {
    pub fn from_json(input: &str) -> Result<Self, RequestError> {
        let value: serde_json::Value = serde_json::from_str(input)?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, RequestError> {
        let errors = schema_errors(compiled(&INVOICE_SCHEMA, INVOICE_SCHEMA_JSON)?, &value);
        if !errors.is_empty() {
            return Err(RequestError::Schema(errors));
        }

        let envelope: Envelope = serde_json::from_value(value)?;
        let line_schema = compiled(&LINE_ITEM_SCHEMA, LINE_ITEM_SCHEMA_JSON)?;

        let mut taken: HashSet<String> = envelope.items.iter().filter_map(supplied_id).collect();
        let items = envelope
            .items
            .into_iter()
            .enumerate()
            .map(|(index, raw)| {
                let id = match supplied_id(&raw) {
                    Some(id) => id,
                    None => {
                        let id = fresh_id(&format!("item-{}", index), &taken);
                        taken.insert(id.clone());
                        id
                    }
                };
                parse_item(line_schema, id, raw)
            })
            .collect();

        Ok(Self {
            invoice_id: envelope.invoice_id,
            vendor_id: envelope.vendor_id,
            items: dedupe_ids(items),
        })
    }
}

fn supplied_id(raw: &serde_json::Value) -> Option<String> {
    raw.get("id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// `base`, or `base-1`, `base-2`, ... whichever is first not in `taken`.
fn fresh_id(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Make line-item ids unique.
///
/// The first item with a given id keeps it. Every later item with the same
/// id becomes [`ItemInput::Invalid`] under `<id>#<position>` (or a suffixed
/// variant if that is taken too), so each submitted item gets its own
/// decision and none is overwritten.
pub fn dedupe_ids(items: Vec<ItemInput>) -> Vec<ItemInput> {
    let mut taken: HashSet<String> = items.iter().map(|item| item.id().to_string()).collect();
    let mut assigned: HashSet<String> = HashSet::with_capacity(items.len());

    items
        .into_iter()
        .enumerate()
        .map(|(position, item)| {
            if assigned.insert(item.id().to_string()) {
                return item;
            }
            let original = item.id().to_string();
            let key = fresh_id(&format!("{}#{}", original, position), &taken);
            taken.insert(key.clone());
            assigned.insert(key.clone());
            tracing::debug!(item = %original, key = %key, "duplicate line item id");
            ItemInput::Invalid {
                id: key,
                reason: format!("duplicate line item id '{}'", original),
            }
        })
        .collect()
}

fn parse_item(schema: &jsonschema::Validator, id: String, raw: serde_json::Value) -> ItemInput {
    let errors = schema_errors(schema, &raw);
    if !errors.is_empty() {
        tracing::debug!(item = %id, errors = errors.len(), "line item failed schema validation");
        return ItemInput::Invalid {
            id,
            reason: errors.join("; "),
        };
    }

    match serde_json::from_value::<RawLineItem>(raw) {
        Ok(item) => ItemInput::Valid(LineItem {
            id,
            description: item.description,
            quantity: item.quantity,
            unit_price: item.unit_price,
        }),
        Err(e) => ItemInput::Invalid {
            id,
            reason: e.to_string(),
        },
    }
}
