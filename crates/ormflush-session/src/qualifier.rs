//! WHERE-clause snapshots for UPDATE and DELETE statements.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use ormflush_core::{KeyValues, Value};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::row_op::RowOp;

/// The values identifying a row in a WHERE clause.
///
/// Starts from the row's canonical key and may be extended with additional
/// qualifiers, typically optimistic-lock columns. Columns bound to NULL are
/// tracked separately because they render as `col IS NULL`.
#[derive(Debug, Clone)]
pub struct Qualifier {
    identity_key: KeyValues,
    additional: KeyValues,
    null_columns: BTreeSet<String>,
    optimistic_lock: bool,
    snapshot: OnceLock<KeyValues>,
}

impl Qualifier {
    /// Qualifier of the row targeted by `op`.
    ///
    /// An unresolved pending identity contributes whatever primary-key
    /// bindings the op carries.
    pub fn new(op: &RowOp) -> Self {
        Self {
            identity_key: op.key_snapshot(),
            additional: KeyValues::new(),
            null_columns: BTreeSet::new(),
            optimistic_lock: false,
            snapshot: OnceLock::new(),
        }
    }

    /// Add a qualifier column; `optimistic_lock` marks it as a lock value.
    ///
    /// Key columns always qualify with the row's key value; a qualifier on a
    /// key column is ignored.
    pub fn add_additional_qualifier(
        &mut self,
        column: impl Into<String>,
        value: impl Into<Value>,
        optimistic_lock: bool,
    ) {
        let column = column.into();
        if self.identity_key.contains_column(&column) {
            tracing::warn!(column = %column, "Ignoring additional qualifier on a key column");
            return;
        }
        let value = value.into();
        if value.is_null() {
            self.null_columns.insert(column.clone());
        } else {
            self.null_columns.remove(&column);
        }
        self.additional.insert(column, value);
        if optimistic_lock {
            self.optimistic_lock = true;
        }
        self.snapshot = OnceLock::new();
    }

    /// Add a qualifier column that is not a lock value.
    pub fn add_additional_qualifier_plain(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.add_additional_qualifier(column, value, false);
    }

    /// Key values plus additional qualifiers.
    pub fn snapshot(&self) -> &KeyValues {
        self.snapshot.get_or_init(|| {
            let mut snapshot = self.identity_key.clone();
            snapshot.extend_from(&self.additional);
            snapshot
        })
    }

    /// Whether any optimistic-lock qualifier has been added.
    pub fn is_using_optimistic_locking(&self) -> bool {
        self.optimistic_lock
    }

    /// Additional qualifier columns bound to NULL.
    pub fn null_columns(&self) -> &BTreeSet<String> {
        &self.null_columns
    }

    /// Whether both qualifiers constrain the same set of columns.
    ///
    /// Values are ignored; comparing entities is up to the caller.
    pub fn is_same_batch(&self, other: &Qualifier) -> bool {
        self.snapshot().same_columns(other.snapshot())
    }

    /// [`Self::is_same_batch`] plus identical NULL columns, i.e. the two
    /// qualifiers render to the same WHERE clause text.
    pub fn is_same_statement_shape(&self, other: &Qualifier) -> bool {
        self.is_same_batch(other) && self.null_columns == other.null_columns
    }
}

impl Serialize for Qualifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Qualifier", 3)?;
        state.serialize_field("snapshot", self.snapshot())?;
        state.serialize_field("null_columns", &self.null_columns)?;
        state.serialize_field("optimistic_lock", &self.optimistic_lock)?;
        state.end()
    }
}
