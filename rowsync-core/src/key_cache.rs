//! Row identity cache: logical key → current row index.
//!
//! Filled lazily. A miss scans only rows that have not been visited in the
//! current structural epoch, remembering every row it passes so repeated
//! misses amortize to one pass over the source. Any insert, remove or reset
//! ends the epoch and the whole cache is dropped; indices are never patched.

use std::collections::{HashMap, HashSet};

use crate::model::{key_string, FieldRef, TableView};

/// Key → row lookup for one bound source.
#[derive(Debug, Clone)]
pub struct RowKeyCache {
    key_field: FieldRef,
    rows_by_key: HashMap<String, usize>,
    known_rows: HashSet<usize>,
}

impl RowKeyCache {
    pub fn new(key_field: FieldRef) -> Self {
        Self {
            key_field,
            rows_by_key: HashMap::new(),
            known_rows: HashSet::new(),
        }
    }

    pub fn key_field(&self) -> FieldRef {
        self.key_field
    }

    /// Find the current row whose key field equals `key`.
    ///
    /// With duplicate keys the first row in scan order wins.
    pub fn resolve(&mut self, view: &dyn TableView, key: &str) -> Option<usize> {
        let row_count = view.row_count();

        if let Some(&row) = self.rows_by_key.get(key) {
            if row < row_count && self.key_at(view, row).as_deref() == Some(key) {
                return Some(row);
            }
            // Row moved or its key was edited in place; start over.
            log::debug!("Cached row {row} no longer holds key {key}, invalidating");
            self.invalidate();
        }

        for row in 0..row_count {
            if self.known_rows.contains(&row) {
                continue;
            }
            self.known_rows.insert(row);

            let Some(value) = self.key_at(view, row) else {
                continue;
            };
            let found = value == key;
            self.rows_by_key.entry(value).or_insert(row);
            if found {
                return Some(row);
            }
        }

        None
    }

    fn key_at(&self, view: &dyn TableView, row: usize) -> Option<String> {
        key_string(&view.field_value(row, self.key_field))
    }

    /// Drop every mapping. Called on any structural change.
    pub fn invalidate(&mut self) {
        self.rows_by_key.clear();
        self.known_rows.clear();
    }

    /// Number of keys currently cached.
    pub fn len(&self) -> usize {
        self.rows_by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows_by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::cell::Cell;

    /// Single key column; counts field reads to observe scanning.
    struct Keys {
        keys: Vec<Value>,
        reads: Cell<usize>,
    }

    impl Keys {
        fn new(keys: Vec<Value>) -> Self {
            Self { keys, reads: Cell::new(0) }
        }
    }

    impl TableView for Keys {
        fn row_count(&self) -> usize {
            self.keys.len()
        }
        fn column_count(&self) -> usize {
            1
        }
        fn header(&self, _: usize) -> Option<String> {
            Some("id".into())
        }
        fn field_value(&self, row: usize, _: FieldRef) -> Value {
            self.reads.set(self.reads.get() + 1);
            self.keys.get(row).cloned().unwrap_or(Value::Null)
        }
    }

    #[test]
    fn test_resolve_scans_then_hits() {
        let view = Keys::new(vec![json!(10), json!(20), json!(30)]);
        let mut cache = RowKeyCache::new(FieldRef::Column(0));

        assert_eq!(cache.resolve(&view, "20"), Some(1));
        assert_eq!(view.reads.get(), 2);

        // Row 0 was remembered on the way; a hit costs one check.
        assert_eq!(cache.resolve(&view, "10"), Some(0));
        assert_eq!(view.reads.get(), 3);

        // Scan resumes after the rows already visited.
        assert_eq!(cache.resolve(&view, "30"), Some(2));
        assert_eq!(view.reads.get(), 4);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_resolve_unknown_key() {
        let view = Keys::new(vec![json!("a"), json!("b")]);
        let mut cache = RowKeyCache::new(FieldRef::Column(0));

        assert_eq!(cache.resolve(&view, "zzz"), None);
        assert_eq!(cache.len(), 2);

        // Second miss does not rescan.
        let reads = view.reads.get();
        assert_eq!(cache.resolve(&view, "zzz"), None);
        assert_eq!(view.reads.get(), reads);
    }

    #[test]
    fn test_invalid_keys_are_skipped() {
        let view = Keys::new(vec![Value::Null, json!({"x": 1}), json!("c")]);
        let mut cache = RowKeyCache::new(FieldRef::Column(0));
        assert_eq!(cache.resolve(&view, "c"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_duplicate_keys_first_wins() {
        let view = Keys::new(vec![json!("dup"), json!("x"), json!("dup")]);
        let mut cache = RowKeyCache::new(FieldRef::Column(0));
        assert_eq!(cache.resolve(&view, "missing"), None);
        assert_eq!(cache.resolve(&view, "dup"), Some(0));
    }

    #[test]
    fn test_invalidate_after_structural_change() {
        let mut view = Keys::new(vec![json!("a"), json!("b"), json!("c")]);
        let mut cache = RowKeyCache::new(FieldRef::Column(0));
        assert_eq!(cache.resolve(&view, "c"), Some(2));

        view.keys.remove(0);
        cache.invalidate();
        assert!(cache.is_empty());
        assert_eq!(cache.resolve(&view, "c"), Some(1));
    }

    #[test]
    fn test_out_of_range_entry_is_not_returned() {
        let mut view = Keys::new(vec![json!("a"), json!("b"), json!("c")]);
        let mut cache = RowKeyCache::new(FieldRef::Column(0));
        assert_eq!(cache.resolve(&view, "c"), Some(2));

        // Truncated behind the cache's back.
        view.keys.truncate(1);
        assert_eq!(cache.resolve(&view, "c"), None);
        assert_eq!(cache.resolve(&view, "a"), Some(0));
    }

    #[test]
    fn test_key_edited_in_place() {
        let mut view = Keys::new(vec![json!("a"), json!("b")]);
        let mut cache = RowKeyCache::new(FieldRef::Column(0));
        assert_eq!(cache.resolve(&view, "b"), Some(1));

        view.keys[1] = json!("renamed");
        assert_eq!(cache.resolve(&view, "b"), None);
        assert_eq!(cache.resolve(&view, "renamed"), Some(1));
    }

    #[test]
    fn test_numeric_and_string_keys_share_form() {
        let view = Keys::new(vec![json!(1), json!("2")]);
        let mut cache = RowKeyCache::new(FieldRef::Column(0));
        assert_eq!(cache.resolve(&view, "1"), Some(0));
        assert_eq!(cache.resolve(&view, "2"), Some(1));
    }
}
