//! In-memory reference data source.
//!
//! `MemoryTable` stores rows as vectors of JSON values and supports both
//! addressing modes: a column layout (one slot per header) and a role layout
//! (one slot per role of column 0). It emits the full event set through an
//! [`ObserverSet`], so it can be bound to a sync adapter directly.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::ModelError;
use crate::model::{FieldRef, ModelObserver, ObserverSet, SubscriptionId, TableModel, TableView};

#[derive(Debug, Clone)]
enum Layout {
    Columns(Vec<String>),
    Roles(Vec<(u32, String)>),
}

/// Row storage, separate from the observers so events can borrow it.
#[derive(Debug, Clone)]
struct TableData {
    layout: Layout,
    rows: Vec<Vec<Value>>,
}

impl TableData {
    fn width(&self) -> usize {
        match &self.layout {
            Layout::Columns(headers) => headers.len(),
            Layout::Roles(roles) => roles.len(),
        }
    }

    fn slot(&self, field: FieldRef) -> Option<usize> {
        match (&self.layout, field) {
            (Layout::Columns(headers), FieldRef::Column(c)) if c < headers.len() => Some(c),
            (Layout::Roles(roles), FieldRef::Role(role)) => {
                roles.iter().position(|(id, _)| *id == role)
            }
            _ => None,
        }
    }

    fn normalize(&self, mut row: Vec<Value>) -> Vec<Value> {
        row.resize(self.width(), Value::Null);
        row
    }
}

impl TableView for TableData {
    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn column_count(&self) -> usize {
        match &self.layout {
            Layout::Columns(headers) => headers.len(),
            Layout::Roles(_) => 1,
        }
    }

    fn header(&self, column: usize) -> Option<String> {
        match &self.layout {
            Layout::Columns(headers) => headers.get(column).cloned(),
            Layout::Roles(_) => None,
        }
    }

    fn role_names(&self) -> BTreeMap<u32, String> {
        match &self.layout {
            Layout::Columns(_) => BTreeMap::new(),
            Layout::Roles(roles) => roles.iter().cloned().collect(),
        }
    }

    fn field_value(&self, row: usize, field: FieldRef) -> Value {
        self.slot(field)
            .and_then(|slot| self.rows.get(row).and_then(|r| r.get(slot)))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// Vector-backed table implementing [`TableModel`].
pub struct MemoryTable {
    data: TableData,
    observers: ObserverSet,
    commits: usize,
    reject_inserts: bool,
    reject_commits: bool,
}

impl MemoryTable {
    /// Empty column-mode table with the given headers.
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_layout(Layout::Columns(headers.into_iter().map(Into::into).collect()))
    }

    /// Empty role-mode table with the given role ids and names.
    pub fn with_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        Self::with_layout(Layout::Roles(
            roles.into_iter().map(|(id, name)| (id, name.into())).collect(),
        ))
    }

    /// Column-mode table pre-filled with `rows`.
    pub fn from_rows<I, S>(headers: I, rows: Vec<Vec<Value>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(headers).with_rows(rows)
    }

    fn with_layout(layout: Layout) -> Self {
        Self {
            data: TableData { layout, rows: Vec::new() },
            observers: ObserverSet::new(),
            commits: 0,
            reject_inserts: false,
            reject_commits: false,
        }
    }

    /// Replace the rows without emitting events (construction only).
    pub fn with_rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.data.rows = rows.into_iter().map(|r| self.data.normalize(r)).collect();
        self
    }

    pub fn row(&self, row: usize) -> Option<&[Value]> {
        self.data.rows.get(row).map(Vec::as_slice)
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.data.rows
    }

    /// Append a filled row and announce it. Returns its index.
    pub fn append_row(&mut self, values: Vec<Value>) -> usize {
        let row = self.data.rows.len();
        let values = self.data.normalize(values);
        self.data.rows.push(values);
        self.observers.rows_inserted(&self.data, row, row);
        row
    }

    /// Remove `count` rows starting at `first` as one event.
    pub fn remove_rows(&mut self, first: usize, count: usize) -> Result<(), ModelError> {
        if count == 0 {
            return Ok(());
        }
        let row_count = self.data.rows.len();
        let last = first + count - 1;
        if last >= row_count {
            return Err(ModelError::RowOutOfRange { row: last, row_count });
        }
        self.observers.rows_about_to_be_removed(&self.data, first, last);
        self.data.rows.drain(first..=last);
        Ok(())
    }

    /// Replace every row and announce a reset.
    pub fn reset(&mut self, rows: Vec<Vec<Value>>) {
        self.data.rows = rows.into_iter().map(|r| self.data.normalize(r)).collect();
        self.observers.reset(&self.data);
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> usize {
        self.commits
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Make `insert_rows` fail, to exercise rejection paths.
    pub fn set_reject_inserts(&mut self, reject: bool) {
        self.reject_inserts = reject;
    }

    /// Make `commit` fail.
    pub fn set_reject_commits(&mut self, reject: bool) {
        self.reject_commits = reject;
    }
}

impl TableView for MemoryTable {
    fn row_count(&self) -> usize {
        self.data.row_count()
    }

    fn column_count(&self) -> usize {
        self.data.column_count()
    }

    fn header(&self, column: usize) -> Option<String> {
        self.data.header(column)
    }

    fn role_names(&self) -> BTreeMap<u32, String> {
        self.data.role_names()
    }

    fn field_value(&self, row: usize, field: FieldRef) -> Value {
        self.data.field_value(row, field)
    }
}

impl TableModel for MemoryTable {
    fn view(&self) -> &dyn TableView {
        &self.data
    }

    fn set_field_value(&mut self, row: usize, field: FieldRef, value: Value) -> Result<(), ModelError> {
        let row_count = self.data.rows.len();
        let slot = self.data.slot(field).ok_or(ModelError::UnknownField(field))?;
        let cell = self
            .data
            .rows
            .get_mut(row)
            .and_then(|r| r.get_mut(slot))
            .ok_or(ModelError::RowOutOfRange { row, row_count })?;
        if *cell == value {
            return Ok(());
        }
        *cell = value;
        self.observers.range_changed(&self.data, row, row);
        Ok(())
    }

    fn insert_rows(&mut self, at: usize, count: usize) -> Result<(), ModelError> {
        if self.reject_inserts {
            return Err(ModelError::Rejected("table does not accept inserts".into()));
        }
        let row_count = self.data.rows.len();
        if at > row_count {
            return Err(ModelError::RowOutOfRange { row: at, row_count });
        }
        if count == 0 {
            return Ok(());
        }
        let width = self.data.width();
        self.data
            .rows
            .splice(at..at, std::iter::repeat_with(|| vec![Value::Null; width]).take(count));
        self.observers.rows_inserted(&self.data, at, at + count - 1);
        Ok(())
    }

    fn remove_row(&mut self, row: usize) -> Result<(), ModelError> {
        self.remove_rows(row, 1)
    }

    fn commit(&mut self) -> Result<(), ModelError> {
        if self.reject_commits {
            return Err(ModelError::Rejected("commit refused".into()));
        }
        self.commits += 1;
        Ok(())
    }

    fn subscribe(&mut self, observer: Box<dyn ModelObserver>) -> SubscriptionId {
        self.observers.add(observer)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    impl ModelObserver for Recorder {
        fn range_changed(&mut self, view: &dyn TableView, first: usize, last: usize) {
            self.0.lock().push(format!("changed {first}-{last} of {}", view.row_count()));
        }
        fn rows_about_to_be_removed(&mut self, view: &dyn TableView, first: usize, last: usize) {
            self.0.lock().push(format!("removing {first}-{last} of {}", view.row_count()));
        }
        fn rows_inserted(&mut self, view: &dyn TableView, first: usize, last: usize) {
            self.0.lock().push(format!("inserted {first}-{last} of {}", view.row_count()));
        }
        fn reset(&mut self, view: &dyn TableView) {
            self.0.lock().push(format!("reset {}", view.row_count()));
        }
    }

    fn events(recorder: &Recorder) -> Vec<String> {
        recorder.0.lock().clone()
    }

    #[test]
    fn test_column_layout_reads() {
        let table = MemoryTable::from_rows(vec!["id", "name"], vec![vec![json!(1)]]);
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.column_count(), 2);
        assert_eq!(table.header(1).as_deref(), Some("name"));
        assert_eq!(table.field_value(0, FieldRef::Column(0)), json!(1));
        // Short rows are padded.
        assert_eq!(table.field_value(0, FieldRef::Column(1)), Value::Null);
        assert_eq!(table.field_value(5, FieldRef::Column(0)), Value::Null);
        assert_eq!(table.field_value(0, FieldRef::Role(256)), Value::Null);
    }

    #[test]
    fn test_role_layout_reads() {
        let table = MemoryTable::with_roles(vec![(256, "id"), (300, "title")])
            .with_rows(vec![vec![json!("k"), json!("T")]]);
        assert_eq!(table.column_count(), 1);
        assert_eq!(table.header(0), None);
        assert_eq!(table.role_names().get(&300).map(String::as_str), Some("title"));
        assert_eq!(table.field_value(0, FieldRef::Role(300)), json!("T"));
        assert_eq!(table.field_value(0, FieldRef::Column(0)), Value::Null);
    }

    #[test]
    fn test_mutations_emit_events() {
        let recorder = Recorder::default();
        let mut table = MemoryTable::new(vec!["id"]);
        table.subscribe(Box::new(recorder.clone()));

        table.insert_rows(0, 2).unwrap();
        table.set_field_value(1, FieldRef::Column(0), json!("b")).unwrap();
        table.append_row(vec![json!("c")]);
        table.remove_rows(0, 2).unwrap();
        table.reset(vec![]);

        assert_eq!(
            events(&recorder),
            vec![
                "inserted 0-1 of 2",
                "changed 1-1 of 2",
                "inserted 2-2 of 3",
                "removing 0-1 of 3",
                "reset 0",
            ]
        );
        assert_eq!(table.row_count(), 0);
    }

    #[test]
    fn test_unchanged_value_is_silent() {
        let recorder = Recorder::default();
        let mut table = MemoryTable::from_rows(vec!["id"], vec![vec![json!(1)]]);
        table.subscribe(Box::new(recorder.clone()));
        table.set_field_value(0, FieldRef::Column(0), json!(1)).unwrap();
        assert!(events(&recorder).is_empty());
    }

    #[test]
    fn test_mutation_errors() {
        let mut table = MemoryTable::from_rows(vec!["id"], vec![vec![json!(1)]]);
        assert_eq!(
            table.set_field_value(3, FieldRef::Column(0), json!(2)),
            Err(ModelError::RowOutOfRange { row: 3, row_count: 1 })
        );
        assert_eq!(
            table.set_field_value(0, FieldRef::Column(9), json!(2)),
            Err(ModelError::UnknownField(FieldRef::Column(9)))
        );
        assert!(table.remove_row(1).is_err());
        assert!(table.insert_rows(5, 1).is_err());

        table.set_reject_inserts(true);
        assert!(matches!(table.insert_rows(1, 1), Err(ModelError::Rejected(_))));
        table.set_reject_commits(true);
        assert!(table.commit().is_err());
        assert_eq!(table.commit_count(), 0);
    }

    #[test]
    fn test_unsubscribe_stops_events() {
        let recorder = Recorder::default();
        let mut table = MemoryTable::new(vec!["id"]);
        let id = table.subscribe(Box::new(recorder.clone()));
        assert_eq!(table.observer_count(), 1);
        assert!(table.unsubscribe(id));
        table.append_row(vec![json!(1)]);
        assert!(events(&recorder).is_empty());
        assert_eq!(table.observer_count(), 0);
    }

    #[test]
    fn test_commit_counts() {
        let mut table = MemoryTable::new(vec!["id"]);
        table.commit().unwrap();
        table.commit().unwrap();
        assert_eq!(table.commit_count(), 2);
    }
}
