//! Inbound message decoding and application.
//!
//! An inbound frame is validated in three steps (JSON object, string
//! `operation`, present `items`); any failure drops the whole message. Past
//! that point processing is best-effort: unresolved keys are skipped, and
//! rejected mutations are logged and counted, never retried or rolled back.

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::encoder::FieldTable;
use crate::error::ProtocolError;
use crate::key_cache::RowKeyCache;
use crate::model::{key_string, FieldRef, TableModel};

/// Inbound operations understood by the applier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ChangeData,
    Remove,
    Insert,
}

impl Operation {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "changeData" => Some(Self::ChangeData),
            "remove" => Some(Self::Remove),
            "insert" => Some(Self::Insert),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChangeData => "changeData",
            Self::Remove => "remove",
            Self::Insert => "insert",
        }
    }
}

/// Validated `{operation, items}` envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub operation: String,
    pub items: Value,
}

impl Envelope {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(mut object) = value else {
            return Err(ProtocolError::NotAnObject);
        };
        let operation = match object.remove("operation") {
            None => return Err(ProtocolError::MissingOperation),
            Some(Value::String(operation)) => operation,
            Some(_) => return Err(ProtocolError::OperationNotString),
        };
        let items = object.remove("items").ok_or(ProtocolError::MissingItems)?;
        Ok(Self { operation, items })
    }
}

/// Outcome of applying one inbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// `None` for operations this side does not know.
    pub operation: Option<Operation>,
    /// Items applied to the source
    pub applied: usize,
    /// Items skipped because their key did not resolve or was malformed
    pub skipped: usize,
    /// Mutations the source rejected
    pub failed: usize,
    /// Processing stopped early on a malformed item
    pub aborted: bool,
    /// Source accepted the commit
    pub committed: bool,
}

impl ApplyReport {
    pub fn is_ignored(&self) -> bool {
        self.operation.is_none()
    }
}

/// Parse `raw` and apply it to `model`.
pub fn apply(
    model: &mut dyn TableModel,
    fields: &FieldTable,
    cache: &Mutex<RowKeyCache>,
    raw: &str,
) -> Result<ApplyReport, ProtocolError> {
    let envelope = Envelope::parse(raw)?;
    let Some(operation) = Operation::parse(&envelope.operation) else {
        log::debug!("Ignoring unknown operation {:?}", envelope.operation);
        return Ok(ApplyReport::default());
    };

    let mut applier = Applier::new(model, fields, cache, operation);
    match operation {
        Operation::ChangeData => applier.change_data(envelope.items)?,
        Operation::Remove => applier.remove(envelope.items)?,
        Operation::Insert => applier.insert(envelope.items)?,
    }
    Ok(applier.report)
}

struct Applier<'a> {
    model: &'a mut dyn TableModel,
    cache: &'a Mutex<RowKeyCache>,
    key: FieldRef,
    names: Vec<(FieldRef, String)>,
    report: ApplyReport,
}

impl<'a> Applier<'a> {
    fn new(
        model: &'a mut dyn TableModel,
        fields: &FieldTable,
        cache: &'a Mutex<RowKeyCache>,
        operation: Operation,
    ) -> Self {
        let names = fields.fields(model.view()).into_owned();
        Self {
            model,
            cache,
            key: fields.key(),
            names,
            report: ApplyReport {
                operation: Some(operation),
                ..ApplyReport::default()
            },
        }
    }

    /// The cache lock is released before returning, so the caller may
    /// mutate the source (whose events take the same lock).
    fn resolve(&mut self, key: &str) -> Option<usize> {
        self.cache.lock().resolve(self.model.view(), key)
    }

    fn invalidate(&self) {
        self.cache.lock().invalidate();
    }

    fn change_data(&mut self, items: Value) -> Result<(), ProtocolError> {
        let Value::Object(items) = items else {
            return Err(ProtocolError::ItemsShape {
                operation: "changeData",
                expected: "an object",
            });
        };

        for (key, value) in items {
            let Some(row) = self.resolve(&key) else {
                log::debug!("Row for {key} not found");
                self.report.skipped += 1;
                continue;
            };
            let Value::Object(item) = value else {
                log::warn!("Item {key} is not an object, dropping the rest of the batch");
                self.report.aborted = true;
                break;
            };
            self.write_fields(row, &item, false);
            self.report.applied += 1;
        }

        self.commit();
        Ok(())
    }

    fn remove(&mut self, items: Value) -> Result<(), ProtocolError> {
        let Value::Array(keys) = items else {
            return Err(ProtocolError::ItemsShape {
                operation: "remove",
                expected: "an array of keys",
            });
        };

        for value in keys {
            let key = match &value {
                Value::String(_) | Value::Number(_) => key_string(&value),
                _ => None,
            };
            let Some(key) = key else {
                log::debug!("Ignoring invalid key {value} in remove");
                self.report.skipped += 1;
                continue;
            };
            let Some(row) = self.resolve(&key) else {
                log::debug!("Row for {key} not found");
                self.report.skipped += 1;
                continue;
            };
            match self.model.remove_row(row) {
                Ok(()) => {
                    // Later keys must resolve against the shifted rows.
                    self.invalidate();
                    self.report.applied += 1;
                }
                Err(e) => {
                    log::error!("Failed to remove row {row} ({key}): {e}");
                    self.report.failed += 1;
                }
            }
        }

        self.commit();
        Ok(())
    }

    fn insert(&mut self, items: Value) -> Result<(), ProtocolError> {
        let entries: Vec<(Option<String>, Value)> = match items {
            Value::Object(map) => map.into_iter().map(|(k, v)| (Some(k), v)).collect(),
            Value::Array(rows) => rows.into_iter().map(|v| (None, v)).collect(),
            _ => {
                return Err(ProtocolError::ItemsShape {
                    operation: "insert",
                    expected: "an object or an array",
                })
            }
        };
        if entries.is_empty() {
            self.commit();
            return Ok(());
        }

        let start = self.model.row_count();
        if let Err(e) = self.model.insert_rows(start, entries.len()) {
            log::error!("Failed to insert {} rows at {start}: {e}", entries.len());
            self.report.failed += entries.len();
            self.commit();
            return Ok(());
        }
        self.invalidate();

        for (offset, (key, value)) in entries.into_iter().enumerate() {
            let row = start + offset;
            let Value::Object(item) = value else {
                log::warn!("Inserted item {offset} is not an object, row {row} left empty");
                self.report.skipped += 1;
                continue;
            };
            match key {
                Some(key) => {
                    let key_value = self.typed_key(&item, &key).unwrap_or(Value::String(key));
                    self.set(row, self.key, key_value);
                    self.write_fields(row, &item, false);
                }
                None => self.write_fields(row, &item, true),
            }
            self.report.applied += 1;
        }

        self.commit();
        Ok(())
    }

    /// Key value carried inside the item, when it agrees with the entry key.
    fn typed_key(&self, item: &Map<String, Value>, key: &str) -> Option<Value> {
        let (_, name) = self.names.iter().find(|(field, _)| *field == self.key)?;
        item.get(name)
            .filter(|value| key_string(value).as_deref() == Some(key))
            .cloned()
    }

    fn write_fields(&mut self, row: usize, item: &Map<String, Value>, include_key: bool) {
        let names = std::mem::take(&mut self.names);
        for (field, name) in &names {
            if *field == self.key && !include_key {
                continue;
            }
            if let Some(value) = item.get(name) {
                self.set(row, *field, value.clone());
            }
        }
        self.names = names;
    }

    fn set(&mut self, row: usize, field: FieldRef, value: Value) {
        if let Err(e) = self.model.set_field_value(row, field, value) {
            log::error!("Failed to set {field:?} of row {row}: {e}");
            self.report.failed += 1;
        }
    }

    fn commit(&mut self) {
        match self.model.commit() {
            Ok(()) => self.report.committed = true,
            Err(e) => log::error!("Commit failed: {e}"),
        }
    }
}
