//! Client-side replica of a served table.
//!
//! A mirror is rebuilt by every snapshot and then patched by each
//! incremental message. Its shape follows the server's protocol: an object
//! keyed by row key (`data`) or an ordered array of rows (`rowData`).

use serde_json::{Map, Value};

use rowsync_core::{key_string, ServerMessage};

#[derive(Debug, Clone, PartialEq)]
enum Items {
    Keyed(Map<String, Value>),
    Rows(Vec<Value>),
}

/// Local copy of a remote table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMirror {
    items: Items,
    key_field: String,
    synced: bool,
}

impl Default for TableMirror {
    fn default() -> Self {
        Self {
            items: Items::Keyed(Map::new()),
            key_field: "id".to_string(),
            synced: false,
        }
    }
}

impl TableMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the key field. Row-based snapshots announce it.
    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    /// Whether a snapshot has been received.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn is_row_based(&self) -> bool {
        matches!(self.items, Items::Rows(_))
    }

    pub fn len(&self) -> usize {
        match &self.items {
            Items::Keyed(map) => map.len(),
            Items::Rows(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows in display order.
    pub fn items(&self) -> Vec<Value> {
        match &self.items {
            Items::Keyed(map) => map.values().cloned().collect(),
            Items::Rows(rows) => rows.clone(),
        }
    }

    /// Row with the given key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match &self.items {
            Items::Keyed(map) => map.get(key),
            Items::Rows(rows) => rows
                .iter()
                .find(|row| row.get(&self.key_field).and_then(key_string).as_deref() == Some(key)),
        }
    }

    /// Apply one server message.
    pub fn apply(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::Data { items } => {
                self.items = Items::Keyed(items.clone());
                self.synced = true;
            }
            ServerMessage::RowData { items, key } => {
                self.items = Items::Rows(items.clone());
                if !key.is_empty() {
                    self.key_field = key.clone();
                }
                self.synced = true;
            }
            _ => {
                if !self.patch(message) {
                    log::debug!(
                        "Ignoring {} for a {} mirror",
                        message.operation(),
                        if self.is_row_based() { "row-based" } else { "keyed" }
                    );
                }
            }
        }
    }

    /// Apply an incremental message. Returns false if it does not fit the
    /// mirror's shape.
    fn patch(&mut self, message: &ServerMessage) -> bool {
        match (message, &mut self.items) {
            (ServerMessage::Inserted { items }, Items::Keyed(map)) => {
                map.extend(items.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            (ServerMessage::DataChanged { items }, Items::Keyed(map)) => {
                // Rows inserted without a key first show up here.
                for (key, fields) in items {
                    match (map.get_mut(key), fields) {
                        (Some(Value::Object(row)), Value::Object(fields)) => {
                            row.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                        }
                        _ => {
                            map.insert(key.clone(), fields.clone());
                        }
                    }
                }
            }
            (ServerMessage::Removed { items }, Items::Keyed(map)) => {
                for key in items {
                    map.remove(key);
                }
            }
            (ServerMessage::RowsInserted { items, start, .. }, Items::Rows(rows)) => {
                let at = (*start).min(rows.len());
                rows.splice(at..at, items.iter().cloned());
            }
            (ServerMessage::RowsRemoved { start, end }, Items::Rows(rows)) => {
                let range = clamp(rows.len(), *start, *end);
                rows.drain(range);
            }
            (ServerMessage::RowDataChanged { items, start, end }, Items::Rows(rows)) => {
                let range = clamp(rows.len(), *start, *end);
                rows.splice(range, items.iter().cloned());
            }
            _ => return false,
        }
        true
    }
}

fn clamp(len: usize, start: usize, end: usize) -> std::ops::Range<usize> {
    let end = end.saturating_add(1).min(len);
    start.min(end)..end
}
