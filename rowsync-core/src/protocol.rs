//! JSON wire protocol.
//!
//! Every frame is a JSON object tagged by `operation`:
//! ```text
//! server → client                         client → server
//! ┌───────────────────────────────┐      ┌───────────────────────────────┐
//! │ {"operation": "data",         │      │ {"operation": "changeData",   │
//! │  "items": {"<key>": {...}}}   │      │  "items": {"<key>": {...}}}   │
//! │ {"operation": "rowsInserted", │      │ {"operation": "remove",       │
//! │  "items": [{...}],            │      │  "items": ["<key>", ...]}     │
//! │  "start": 3, "end": 3}        │      │ {"operation": "insert", ...}  │
//! └───────────────────────────────┘      └───────────────────────────────┘
//! ```
//!
//! Key-addressed operations carry `items` as an object keyed by row key;
//! order-preserving ("row-based") operations carry an array plus explicit
//! inclusive `start`/`end` row indices.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which wire shape an adapter speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Protocol {
    /// Rows keyed by their key field value.
    #[default]
    KeyAddressed,
    /// Rows as an array in row order with start/end indices.
    RowBased,
}

/// Outbound message, server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Full snapshot, key-addressed.
    Data { items: Map<String, Value> },
    /// Full snapshot, row-based. `key` names the key field inside each row.
    RowData { items: Vec<Value>, key: String },
    DataChanged { items: Map<String, Value> },
    RowDataChanged {
        items: Vec<Value>,
        start: usize,
        end: usize,
    },
    /// Keys of rows that were removed.
    Removed { items: Vec<String> },
    RowsRemoved { start: usize, end: usize },
    Inserted { items: Map<String, Value> },
    RowsInserted {
        items: Vec<Value>,
        start: usize,
        end: usize,
    },
}

impl ServerMessage {
    /// Wire name of the operation.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Data { .. } => "data",
            Self::RowData { .. } => "rowData",
            Self::DataChanged { .. } => "dataChanged",
            Self::RowDataChanged { .. } => "rowDataChanged",
            Self::Removed { .. } => "removed",
            Self::RowsRemoved { .. } => "rowsRemoved",
            Self::Inserted { .. } => "inserted",
            Self::RowsInserted { .. } => "rowsInserted",
        }
    }

    /// Whether this message replaces the whole client-side table.
    pub fn is_snapshot(&self) -> bool {
        matches!(self, Self::Data { .. } | Self::RowData { .. })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Inbound message, client → server.
///
/// The server side parses inbound frames field by field (see
/// [`crate::applier`]) so that malformed envelopes can be classified; this
/// type is what well-behaved clients send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Partial field updates keyed by row key.
    ChangeData { items: Map<String, Value> },
    /// Keys of rows to remove.
    Remove { items: Vec<Value> },
    /// Object keyed by new row key, or an array of rows.
    Insert { items: Value },
}

impl ClientMessage {
    pub fn change(key: impl Into<String>, fields: Map<String, Value>) -> Self {
        let mut items = Map::new();
        items.insert(key.into(), Value::Object(fields));
        Self::ChangeData { items }
    }

    pub fn remove<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self::Remove {
            items: keys.into_iter().map(|k| Value::String(k.into())).collect(),
        }
    }

    pub fn insert_keyed(key: impl Into<String>, fields: Map<String, Value>) -> Self {
        let mut items = Map::new();
        items.insert(key.into(), Value::Object(fields));
        Self::Insert {
            items: Value::Object(items),
        }
    }

    pub fn insert_rows(rows: Vec<Map<String, Value>>) -> Self {
        Self::Insert {
            items: Value::Array(rows.into_iter().map(Value::Object).collect()),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
