//! Pending per-row database mutations.
//!
//! A [`RowOp`] is one INSERT, UPDATE or DELETE against one logical row. The
//! change-capture layer may emit several ops for the same row; they are equal
//! (and hash equally) whenever their canonical identities match, regardless
//! of kind, so the merger can collapse them.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use ormflush_core::{EntityRef, KeyValues, Value};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::ObjectRef;
use crate::identity::{RowIdentity, normalize};

/// Kind of row mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowOpKind {
    Insert,
    Update,
    Delete,
}

impl RowOpKind {
    /// SQL verb for logs and diagnostics.
    pub const fn as_str(self) -> &'static str {
        match self {
            RowOpKind::Insert => "INSERT",
            RowOpKind::Update => "UPDATE",
            RowOpKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for RowOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Column bindings accumulated on a row op.
///
/// Each binding may be flagged as an optimistic-lock value; the flag belongs
/// to the binding and is replaced together with it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Values {
    bindings: KeyValues,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    lock_columns: BTreeSet<String>,
}

impl Values {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a column, replacing any previous binding and its lock flag.
    pub fn insert(
        &mut self,
        column: impl Into<String>,
        value: impl Into<Value>,
        is_optimistic_lock_value: bool,
    ) {
        let column = column.into();
        if is_optimistic_lock_value {
            self.lock_columns.insert(column.clone());
        } else {
            self.lock_columns.remove(&column);
        }
        self.bindings.insert(column, value);
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.bindings.get(column)
    }

    pub fn contains_column(&self, column: &str) -> bool {
        self.bindings.contains_column(column)
    }

    /// Check whether a bound column is flagged as an optimistic-lock value.
    pub fn is_optimistic_lock(&self, column: &str) -> bool {
        self.lock_columns.contains(column)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// All bindings, ordered by column name.
    pub fn bindings(&self) -> &KeyValues {
        &self.bindings
    }

    /// Bindings flagged as optimistic-lock values.
    pub fn lock_values(&self) -> KeyValues {
        self.bindings
            .project(self.lock_columns.iter().map(String::as_str))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.bindings.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// Overlay `newer` onto `self`; `newer` wins on conflicting columns.
    pub(crate) fn overlay(&mut self, newer: &Values) {
        for (column, value) in newer.bindings.iter() {
            self.insert(column.clone(), value.clone(), newer.is_optimistic_lock(column));
        }
    }
}

/// A pending mutation of one row.
///
/// Equality and hashing use the canonical identity only; see
/// [`crate::identity::normalize`].
#[derive(Debug, Clone)]
pub struct RowOp {
    kind: RowOpKind,
    entity: EntityRef,
    source: ObjectRef,
    identity: RowIdentity,
    op_id: RowIdentity,
    values: Values,
}

impl RowOp {
    /// Create a row op. Values start empty.
    pub fn new(kind: RowOpKind, source: ObjectRef, entity: EntityRef, identity: RowIdentity) -> Self {
        let op_id = normalize(&identity);
        Self {
            kind,
            entity,
            source,
            identity,
            op_id,
            values: Values::new(),
        }
    }

    pub fn insert(source: ObjectRef, entity: EntityRef, identity: RowIdentity) -> Self {
        Self::new(RowOpKind::Insert, source, entity, identity)
    }

    pub fn update(source: ObjectRef, entity: EntityRef, identity: RowIdentity) -> Self {
        Self::new(RowOpKind::Update, source, entity, identity)
    }

    pub fn delete(source: ObjectRef, entity: EntityRef, identity: RowIdentity) -> Self {
        Self::new(RowOpKind::Delete, source, entity, identity)
    }

    /// Bind a column value (builder pattern).
    #[must_use]
    pub fn with_value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_value(column, value, false);
        self
    }

    /// Bind a column value, optionally flagging it as an optimistic-lock value.
    pub fn add_value(
        &mut self,
        column: impl Into<String>,
        value: impl Into<Value>,
        is_optimistic_lock_value: bool,
    ) {
        self.values.insert(column, value, is_optimistic_lock_value);
    }

    pub fn kind(&self) -> RowOpKind {
        self.kind
    }

    pub fn is_insert(&self) -> bool {
        self.kind == RowOpKind::Insert
    }

    pub fn is_update(&self) -> bool {
        self.kind == RowOpKind::Update
    }

    pub fn is_delete(&self) -> bool {
        self.kind == RowOpKind::Delete
    }

    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    pub fn entity_name(&self) -> &str {
        self.entity.name()
    }

    /// Domain object that produced this op.
    pub fn source(&self) -> &ObjectRef {
        &self.source
    }

    /// Identity as supplied at construction.
    pub fn identity(&self) -> &RowIdentity {
        &self.identity
    }

    /// Canonical identity, computed once at construction.
    pub fn op_id(&self) -> &RowIdentity {
        &self.op_id
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub(crate) fn replace_values(&mut self, values: Values) {
        self.values = values;
    }

    /// Retarget the op at `identity`, recomputing its canonical form.
    pub(crate) fn replace_identity(&mut self, identity: RowIdentity) {
        self.op_id = normalize(&identity);
        self.identity = identity;
    }

    /// Key values of the targeted row, used to detect key reuse.
    ///
    /// This is the canonical identity's key map. An unresolved pending
    /// identity falls back to the op's own bindings of the primary-key
    /// columns (application-assigned keys), which may be empty.
    pub fn key_snapshot(&self) -> KeyValues {
        match self.op_id.key_values() {
            Some(key) => key.clone(),
            None => self.values.bindings().project(
                self.entity
                    .primary_key_columns()
                    .iter()
                    .map(String::as_str),
            ),
        }
    }
}

impl PartialEq for RowOp {
    fn eq(&self, other: &Self) -> bool {
        self.op_id == other.op_id
    }
}

impl Eq for RowOp {}

impl Hash for RowOp {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.op_id.hash(state);
    }
}

impl fmt::Display for RowOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.op_id)
    }
}

impl Serialize for RowOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RowOp", 4)?;
        state.serialize_field("kind", &self.kind)?;
        state.serialize_field("entity", self.entity.name())?;
        state.serialize_field("identity", &self.op_id.to_string())?;
        state.serialize_field("values", &self.values)?;
        state.end()
    }
}
