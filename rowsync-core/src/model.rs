//! Data source capability set.
//!
//! A synchronized source is anything that implements [`TableModel`]: an
//! ordered list of rows whose fields are addressed either by column
//! ([`FieldRef::Column`]) or by role ([`FieldRef::Role`]). Sources announce
//! their own mutations to registered [`ModelObserver`]s; [`ObserverSet`] is
//! the bookkeeping most sources need for that.
//!
//! ```text
//! producer ──┐                     ┌── ModelObserver (SyncAdapter)
//!            ├── TableModel ──────►│
//! applier  ──┘   (events fired     └── ModelObserver (...)
//!                 under the lock)
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::ModelError;

/// Address of one field of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldRef {
    /// Column index (column mode)
    Column(usize),
    /// Role id of column 0 (role mode)
    Role(u32),
}

impl FieldRef {
    /// Addressing mode implied by this field reference.
    pub fn mode(self) -> AddressMode {
        match self {
            FieldRef::Column(_) => AddressMode::Columns,
            FieldRef::Role(_) => AddressMode::Roles,
        }
    }
}

/// How the fields of a row are addressed for one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Columns,
    Roles,
}

/// Read access to a tabular data source.
pub trait TableView {
    fn row_count(&self) -> usize;

    fn column_count(&self) -> usize;

    /// Horizontal header of `column`, if the source names it.
    fn header(&self, column: usize) -> Option<String>;

    /// Role id → role name for role-mode sources.
    fn role_names(&self) -> BTreeMap<u32, String> {
        BTreeMap::new()
    }

    /// Value of one field. Absent fields read as `Value::Null`.
    fn field_value(&self, row: usize, field: FieldRef) -> Value;
}

/// Opaque handle returned by [`TableModel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Change notifications emitted by a data source.
///
/// Every callback receives the source's read view as it is at the moment the
/// event fires. Ranges are inclusive.
pub trait ModelObserver: Send {
    fn range_changed(&mut self, view: &dyn TableView, first: usize, last: usize);

    /// Fired while the doomed rows are still readable.
    fn rows_about_to_be_removed(&mut self, view: &dyn TableView, first: usize, last: usize);

    fn rows_inserted(&mut self, view: &dyn TableView, first: usize, last: usize);

    fn reset(&mut self, view: &dyn TableView);
}

/// Mutable data source consumed by the sync adapter.
pub trait TableModel: TableView {
    /// Read view handed to encoders and the key cache.
    fn view(&self) -> &dyn TableView;

    fn set_field_value(&mut self, row: usize, field: FieldRef, value: Value)
        -> Result<(), ModelError>;

    /// Reserve `count` empty rows starting at `at`.
    fn insert_rows(&mut self, at: usize, count: usize) -> Result<(), ModelError>;

    fn remove_row(&mut self, row: usize) -> Result<(), ModelError>;

    /// Submit batched edits.
    fn commit(&mut self) -> Result<(), ModelError>;

    fn subscribe(&mut self, observer: Box<dyn ModelObserver>) -> SubscriptionId;

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool;
}

/// A data source shared between its producer and the sync adapter.
///
/// All mutations go through the lock, so change events and inbound
/// messages for one source are serialized.
pub type SharedModel = Arc<Mutex<dyn TableModel + Send>>;

/// Wrap a concrete source for sharing.
pub fn share<M: TableModel + Send + 'static>(model: M) -> Arc<Mutex<M>> {
    Arc::new(Mutex::new(model))
}

/// Registered observers of one data source.
#[derive(Default)]
pub struct ObserverSet {
    next_id: u64,
    observers: Vec<(SubscriptionId, Box<dyn ModelObserver>)>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, observer: Box<dyn ModelObserver>) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.observers.push((id, observer));
        id
    }

    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sid, _)| *sid != id);
        self.observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn range_changed(&mut self, view: &dyn TableView, first: usize, last: usize) {
        for (_, observer) in &mut self.observers {
            observer.range_changed(view, first, last);
        }
    }

    pub fn rows_about_to_be_removed(&mut self, view: &dyn TableView, first: usize, last: usize) {
        for (_, observer) in &mut self.observers {
            observer.rows_about_to_be_removed(view, first, last);
        }
    }

    pub fn rows_inserted(&mut self, view: &dyn TableView, first: usize, last: usize) {
        for (_, observer) in &mut self.observers {
            observer.rows_inserted(view, first, last);
        }
    }

    pub fn reset(&mut self, view: &dyn TableView) {
        for (_, observer) in &mut self.observers {
            observer.reset(view);
        }
    }
}

/// String form of a key field value.
///
/// Strings are used verbatim, numbers and booleans by their JSON text.
/// `null`, arrays and objects are not valid keys.
pub fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Query the wire names of every field for `mode`.
///
/// Unnamed columns fall back to their index, like a default header.
pub fn field_names(view: &dyn TableView, mode: AddressMode) -> Vec<(FieldRef, String)> {
    match mode {
        AddressMode::Columns => (0..view.column_count())
            .map(|c| {
                let name = view.header(c).unwrap_or_else(|| c.to_string());
                (FieldRef::Column(c), name)
            })
            .collect(),
        AddressMode::Roles => view
            .role_names()
            .into_iter()
            .map(|(role, name)| (FieldRef::Role(role), name))
            .collect(),
    }
}
