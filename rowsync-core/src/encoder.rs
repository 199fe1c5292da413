//! Rendering of row ranges into wire messages.
//!
//! Two strategies implement [`ChangeEncoder`]:
//!
//! | Strategy              | items shape          | snapshot  | extra fields |
//! |-----------------------|----------------------|-----------|--------------|
//! | [`KeyAddressedEncoder`] | `{key: {fields}}`  | `data`    | (none)       |
//! | [`RowBasedEncoder`]     | `[{fields}, ...]`  | `rowData` | start, end   |
//!
//! The strategy is picked once per adapter via [`encoder_for`].

use std::borrow::Cow;

use serde_json::{Map, Value};

use crate::model::{field_names, key_string, FieldRef, TableView};
use crate::protocol::{Protocol, ServerMessage};

/// Wire names of the fields of one binding.
#[derive(Debug, Clone)]
pub struct FieldTable {
    key: FieldRef,
    cached: Option<Vec<(FieldRef, String)>>,
}

impl FieldTable {
    /// Capture the names once (`cache == true`) or query them on every use.
    pub fn new(view: &dyn TableView, key: FieldRef, cache: bool) -> Self {
        let cached = cache.then(|| field_names(view, key.mode()));
        Self { key, cached }
    }

    pub fn key(&self) -> FieldRef {
        self.key
    }

    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }

    /// Every named field, key field included.
    pub fn fields<'a>(&'a self, view: &dyn TableView) -> Cow<'a, [(FieldRef, String)]> {
        match &self.cached {
            Some(names) => Cow::Borrowed(names.as_slice()),
            None => Cow::Owned(field_names(view, self.key.mode())),
        }
    }

    /// Wire name of the key field.
    pub fn key_name(&self, view: &dyn TableView) -> Option<String> {
        self.fields(view)
            .iter()
            .find(|(field, _)| *field == self.key)
            .map(|(_, name)| name.clone())
    }

    /// Fields of `row` as a JSON object.
    pub fn row_object(&self, view: &dyn TableView, row: usize, include_key: bool) -> Map<String, Value> {
        let mut out = Map::new();
        for (field, name) in self.fields(view).iter() {
            if *field == self.key && !include_key {
                continue;
            }
            out.insert(name.clone(), view.field_value(row, *field));
        }
        out
    }

    /// Key string of `row`, if its key field holds a valid key.
    pub fn row_key(&self, view: &dyn TableView, row: usize) -> Option<String> {
        key_string(&view.field_value(row, self.key))
    }
}

/// Renders source state and change events as outbound messages.
pub trait ChangeEncoder: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Items for rows `first..=last`.
    fn encode_range(
        &self,
        view: &dyn TableView,
        fields: &FieldTable,
        first: usize,
        last: usize,
        include_key: bool,
    ) -> Value;

    /// Items for every row of the source.
    fn encode_full(&self, view: &dyn TableView, fields: &FieldTable, include_key: bool) -> Value {
        match view.row_count() {
            0 => self.encode_range(view, fields, 1, 0, include_key),
            n => self.encode_range(view, fields, 0, n - 1, include_key),
        }
    }

    fn snapshot(&self, view: &dyn TableView, fields: &FieldTable) -> ServerMessage;

    fn range_changed(
        &self,
        view: &dyn TableView,
        fields: &FieldTable,
        first: usize,
        last: usize,
    ) -> ServerMessage;

    /// Called before the rows disappear.
    fn rows_about_to_be_removed(
        &self,
        view: &dyn TableView,
        fields: &FieldTable,
        first: usize,
        last: usize,
    ) -> ServerMessage;

    fn rows_inserted(
        &self,
        view: &dyn TableView,
        fields: &FieldTable,
        first: usize,
        last: usize,
    ) -> ServerMessage;
}

/// Pick the encoder strategy for a protocol.
pub fn encoder_for(protocol: Protocol) -> Box<dyn ChangeEncoder> {
    match protocol {
        Protocol::KeyAddressed => Box::new(KeyAddressedEncoder),
        Protocol::RowBased => Box::new(RowBasedEncoder),
    }
}

/// Inclusive row range clamped to the source.
fn clamp(view: &dyn TableView, first: usize, last: usize) -> std::ops::Range<usize> {
    let end = last.saturating_add(1).min(view.row_count());
    first.min(end)..end
}

/// Rows keyed by their key field value.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyAddressedEncoder;

impl KeyAddressedEncoder {
    fn keyed_rows(
        &self,
        view: &dyn TableView,
        fields: &FieldTable,
        first: usize,
        last: usize,
        include_key: bool,
    ) -> Map<String, Value> {
        let mut items = Map::new();
        for row in clamp(view, first, last) {
            let Some(key) = fields.row_key(view, row) else {
                log::debug!("Row {row} has no valid key, not encoded");
                continue;
            };
            items.insert(key, Value::Object(fields.row_object(view, row, include_key)));
        }
        items
    }
}

impl ChangeEncoder for KeyAddressedEncoder {
    fn protocol(&self) -> Protocol {
        Protocol::KeyAddressed
    }

    fn encode_range(
        &self,
        view: &dyn TableView,
        fields: &FieldTable,
        first: usize,
        last: usize,
        include_key: bool,
    ) -> Value {
        Value::Object(self.keyed_rows(view, fields, first, last, include_key))
    }

    fn snapshot(&self, view: &dyn TableView, fields: &FieldTable) -> ServerMessage {
        let items = match view.row_count() {
            0 => Map::new(),
            n => self.keyed_rows(view, fields, 0, n - 1, false),
        };
        ServerMessage::Data { items }
    }

    fn range_changed(
        &self,
        view: &dyn TableView,
        fields: &FieldTable,
        first: usize,
        last: usize,
    ) -> ServerMessage {
        ServerMessage::DataChanged {
            items: self.keyed_rows(view, fields, first, last, false),
        }
    }

    fn rows_about_to_be_removed(
        &self,
        view: &dyn TableView,
        fields: &FieldTable,
        first: usize,
        last: usize,
    ) -> ServerMessage {
        // Keys are unrecoverable once the rows are gone.
        let items = clamp(view, first, last)
            .filter_map(|row| fields.row_key(view, row))
            .collect();
        ServerMessage::Removed { items }
    }

    fn rows_inserted(
        &self,
        view: &dyn TableView,
        fields: &FieldTable,
        first: usize,
        last: usize,
    ) -> ServerMessage {
        ServerMessage::Inserted {
            items: self.keyed_rows(view, fields, first, last, false),
        }
    }
}

/// Rows as an array in row order.
///
/// Every row carries its key field, the `rowData` snapshot included: a
/// row-based mirror has no other source for a row's key, and needs it to
/// address the row in later `changeData`/`remove` requests. The snapshot
/// names that field in `key`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowBasedEncoder;

impl RowBasedEncoder {
    fn rows(
        &self,
        view: &dyn TableView,
        fields: &FieldTable,
        first: usize,
        last: usize,
        include_key: bool,
    ) -> Vec<Value> {
        clamp(view, first, last)
            .map(|row| Value::Object(fields.row_object(view, row, include_key)))
            .collect()
    }
}

impl ChangeEncoder for RowBasedEncoder {
    fn protocol(&self) -> Protocol {
        Protocol::RowBased
    }

    fn encode_range(
        &self,
        view: &dyn TableView,
        fields: &FieldTable,
        first: usize,
        last: usize,
        include_key: bool,
    ) -> Value {
        Value::Array(self.rows(view, fields, first, last, include_key))
    }

    fn snapshot(&self, view: &dyn TableView, fields: &FieldTable) -> ServerMessage {
        let items = match view.row_count() {
            0 => Vec::new(),
            n => self.rows(view, fields, 0, n - 1, true),
        };
        let key = fields.key_name(view).unwrap_or_default();
        ServerMessage::RowData { items, key }
    }

    fn range_changed(
        &self,
        view: &dyn TableView,
        fields: &FieldTable,
        first: usize,
        last: usize,
    ) -> ServerMessage {
        ServerMessage::RowDataChanged {
            items: self.rows(view, fields, first, last, true),
            start: first,
            end: last,
        }
    }

    fn rows_about_to_be_removed(
        &self,
        _view: &dyn TableView,
        _fields: &FieldTable,
        first: usize,
        last: usize,
    ) -> ServerMessage {
        ServerMessage::RowsRemoved { start: first, end: last }
    }

    fn rows_inserted(
        &self,
        view: &dyn TableView,
        fields: &FieldTable,
        first: usize,
        last: usize,
    ) -> ServerMessage {
        ServerMessage::RowsInserted {
            items: self.rows(view, fields, first, last, true),
            start: first,
            end: last,
        }
    }
}
