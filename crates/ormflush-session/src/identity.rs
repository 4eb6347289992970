//! Row identities and their canonical (op-id) form.
//!
//! A [`RowIdentity`] names the logical row a pending mutation targets. It is
//! either *permanent* (the primary-key values are known) or *pending* (a new
//! row whose key is not assigned yet). Pending identities acquire key values
//! through explicit transitions that return new identities; existing aliases
//! never observe the change.
//!
//! [`normalize`] turns an identity into the value used as a merge-map key.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ormflush_core::{IdentityError, IdentityErrorKind, KeyValues, Value};
use serde::{Deserialize, Serialize};

static NEXT_PENDING_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Process-unique marker distinguishing pending identities from each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PendingToken(u64);

impl PendingToken {
    fn next() -> Self {
        Self(NEXT_PENDING_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw token value.
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
enum IdentityState {
    Permanent(KeyValues),
    Pending {
        token: PendingToken,
        replacement: KeyValues,
    },
}

#[derive(Debug)]
struct IdentityInner {
    entity: String,
    state: IdentityState,
}

/// Identity of the row targeted by a pending mutation.
///
/// Cloning is cheap and preserves reference identity (see [`RowIdentity::ptr_eq`]).
///
/// Equality:
/// - permanent vs permanent: same entity and equal key maps;
/// - pending vs pending: same entity and same pending token;
/// - permanent vs pending: never equal.
#[derive(Debug, Clone)]
pub struct RowIdentity(Arc<IdentityInner>);

impl RowIdentity {
    fn from_parts(entity: String, state: IdentityState) -> Self {
        Self(Arc::new(IdentityInner { entity, state }))
    }

    /// Identity of an existing row with known key values.
    pub fn permanent(entity: impl Into<String>, key: KeyValues) -> Self {
        Self::from_parts(entity.into(), IdentityState::Permanent(key))
    }

    /// Identity of an existing row keyed by a single column.
    pub fn single(entity: impl Into<String>, column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::permanent(entity, KeyValues::single(column, value))
    }

    /// Identity of a new row whose key is not known yet.
    pub fn pending(entity: impl Into<String>) -> Self {
        Self::from_parts(
            entity.into(),
            IdentityState::Pending {
                token: PendingToken::next(),
                replacement: KeyValues::new(),
            },
        )
    }

    /// Entity name of the targeted row.
    pub fn entity_name(&self) -> &str {
        &self.0.entity
    }

    /// Check whether the row key is still unassigned.
    pub fn is_pending(&self) -> bool {
        matches!(self.0.state, IdentityState::Pending { .. })
    }

    /// Check whether the row key is known.
    pub fn is_permanent(&self) -> bool {
        !self.is_pending()
    }

    /// Pending token, for pending identities.
    pub fn pending_token(&self) -> Option<PendingToken> {
        match &self.0.state {
            IdentityState::Pending { token, .. } => Some(*token),
            IdentityState::Permanent(_) => None,
        }
    }

    /// Key values known for this row.
    ///
    /// Permanent identities return their key; pending identities return their
    /// replacement values, or `None` while no value has been attached.
    pub fn key_values(&self) -> Option<&KeyValues> {
        match &self.0.state {
            IdentityState::Permanent(key) => Some(key),
            IdentityState::Pending { replacement, .. } if !replacement.is_empty() => {
                Some(replacement)
            }
            IdentityState::Pending { .. } => None,
        }
    }

    /// Replacement values attached to a pending identity.
    pub fn replacement_values(&self) -> Option<&KeyValues> {
        match &self.0.state {
            IdentityState::Pending { replacement, .. } => Some(replacement),
            IdentityState::Permanent(_) => None,
        }
    }

    /// Attach one replacement key value, returning the extended identity.
    ///
    /// The result keeps the pending token, so it is still equal to `self`.
    pub fn with_replacement_value(
        &self,
        column: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<RowIdentity, IdentityError> {
        let mut extra = KeyValues::new();
        extra.insert(column, value);
        self.with_replacement(&extra)
    }

    /// Attach several replacement key values, returning the extended identity.
    pub fn with_replacement(&self, values: &KeyValues) -> Result<RowIdentity, IdentityError> {
        let IdentityState::Pending { token, replacement } = &self.0.state else {
            return Err(IdentityError::new(
                IdentityErrorKind::AlreadyPermanent,
                self.entity_name(),
                "replacement key values can only be attached to a pending identity",
            ));
        };
        if let Some((column, _)) = values.iter().find(|(_, v)| v.is_null()) {
            return Err(IdentityError::new(
                IdentityErrorKind::InvalidKey,
                self.entity_name(),
                format!("replacement key column '{}' cannot be NULL", column),
            ));
        }

        let mut merged = replacement.clone();
        merged.extend_from(values);
        tracing::trace!(
            entity = self.entity_name(),
            token = token.get(),
            replacement = %merged,
            "Attached replacement key values"
        );
        Ok(Self::from_parts(
            self.0.entity.clone(),
            IdentityState::Pending {
                token: *token,
                replacement: merged,
            },
        ))
    }

    /// Turn a pending identity into the permanent identity of its row.
    ///
    /// A permanent identity resolves to itself (same reference).
    pub fn resolve(&self) -> Result<RowIdentity, IdentityError> {
        match &self.0.state {
            IdentityState::Permanent(_) => Ok(self.clone()),
            IdentityState::Pending { replacement, .. } if !replacement.is_empty() => Ok(
                Self::permanent(self.0.entity.clone(), replacement.clone()),
            ),
            IdentityState::Pending { .. } => Err(IdentityError::new(
                IdentityErrorKind::Unresolved,
                self.entity_name(),
                "pending identity has no key values",
            )),
        }
    }

    /// Canonical form of this identity; see [`normalize`].
    pub fn normalized(&self) -> RowIdentity {
        normalize(self)
    }

    /// Check whether both handles share the same allocation.
    pub fn ptr_eq(&self, other: &RowIdentity) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Derive the canonical identity used as a merge-map key.
///
/// - Permanent identities are returned unchanged: the result is the same
///   reference (`ptr_eq` holds), no allocation happens.
/// - Pending identities with replacement values become a new permanent-state
///   identity over exactly those values, so distinct pending identities that
///   resolve to the same row collapse together.
/// - Pending identities without values keep their token; unresolved new rows
///   never collapse into each other.
pub fn normalize(id: &RowIdentity) -> RowIdentity {
    match &id.0.state {
        IdentityState::Permanent(_) => id.clone(),
        IdentityState::Pending { replacement, .. } if !replacement.is_empty() => {
            RowIdentity::permanent(id.0.entity.clone(), replacement.clone())
        }
        IdentityState::Pending { token, .. } => RowIdentity::from_parts(
            id.0.entity.clone(),
            IdentityState::Pending {
                token: *token,
                replacement: KeyValues::new(),
            },
        ),
    }
}

impl PartialEq for RowIdentity {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.0.entity != other.0.entity {
            return false;
        }
        match (&self.0.state, &other.0.state) {
            (IdentityState::Permanent(a), IdentityState::Permanent(b)) => a == b,
            (IdentityState::Pending { token: a, .. }, IdentityState::Pending { token: b, .. }) => {
                a == b
            }
            _ => false,
        }
    }
}

impl Eq for RowIdentity {}

impl Hash for RowIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.entity.hash(state);
        match &self.0.state {
            IdentityState::Permanent(key) => {
                0u8.hash(state);
                key.hash(state);
            }
            IdentityState::Pending { token, .. } => {
                1u8.hash(state);
                token.hash(state);
            }
        }
    }
}

impl fmt::Display for RowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.state {
            IdentityState::Permanent(key) => write!(f, "{}{}", self.0.entity, key),
            IdentityState::Pending { token, replacement } if replacement.is_empty() => {
                write!(f, "{}<pending #{}>", self.0.entity, token.get())
            }
            IdentityState::Pending { token, replacement } => {
                write!(f, "{}<pending #{} -> {}>", self.0.entity, token.get(), replacement)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_permanent_equality_by_value() {
        let a = RowIdentity::single("artist", "id", 1i64);
        let b = RowIdentity::single("artist", "id", 1i64);
        assert!(!a.ptr_eq(&b));
        assert_eq!(a, b);
        assert_ne!(a, RowIdentity::single("artist", "id", 2i64));
        assert_ne!(a, RowIdentity::single("gallery", "id", 1i64));
    }

    #[test]
    fn test_different_key_columns_never_equal() {
        let id = RowIdentity::single("test", "id", 1i64);
        let id2 = RowIdentity::single("test", "id2", 1i64);
        assert_ne!(id, id2);
    }

    #[test]
    fn test_normalize_permanent_is_same_reference() {
        let id = RowIdentity::single("artist", "id", 1i64);
        let normalized = normalize(&id);
        assert!(normalized.ptr_eq(&id));
    }

    #[test]
    fn test_normalize_pending_builds_new_value() {
        let pending = RowIdentity::pending("test")
            .with_replacement_value("id2", 1i64)
            .unwrap();
        let normalized = normalize(&pending);

        assert!(!normalized.ptr_eq(&pending));
        assert!(normalized.is_permanent());
        assert_eq!(normalized.key_values(), Some(&KeyValues::single("id2", 1i64)));
        assert_ne!(normalized, RowIdentity::single("test", "id", 1i64));
        assert_eq!(normalized, RowIdentity::single("test", "id2", 1i64));
    }

    #[test]
    fn test_normalize_unresolved_pending_keeps_token() {
        let a = RowIdentity::pending("artist");
        let b = RowIdentity::pending("artist");
        assert_ne!(normalize(&a), normalize(&b));
        assert_eq!(normalize(&a), a);
        assert_eq!(normalize(&a).pending_token(), a.pending_token());
    }

    #[test]
    fn test_distinct_pendings_resolving_to_same_row_collapse() {
        let a = RowIdentity::pending("artist")
            .with_replacement_value("id", 10i64)
            .unwrap();
        let b = RowIdentity::pending("artist")
            .with_replacement_value("id", 10i64)
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(normalize(&a), normalize(&b));
    }

    #[test]
    fn test_replacement_does_not_touch_aliases() {
        let original = RowIdentity::pending("artist");
        let alias = original.clone();
        let extended = original.with_replacement_value("id", 3i64).unwrap();

        assert!(alias.key_values().is_none());
        assert_eq!(extended.key_values(), Some(&KeyValues::single("id", 3i64)));
        assert_eq!(extended, alias);
        assert_eq!(extended.pending_token(), alias.pending_token());
    }

    #[test]
    fn test_replacement_rejected_for_permanent() {
        let id = RowIdentity::single("artist", "id", 1i64);
        let err = id.with_replacement_value("id", 2i64).unwrap_err();
        assert_eq!(err.kind, IdentityErrorKind::AlreadyPermanent);
    }

    #[test]
    fn test_replacement_rejects_null() {
        let err = RowIdentity::pending("artist")
            .with_replacement_value("id", Value::Null)
            .unwrap_err();
        assert_eq!(err.kind, IdentityErrorKind::InvalidKey);
    }

    #[test]
    fn test_resolve() {
        let id = RowIdentity::single("artist", "id", 1i64);
        assert!(id.resolve().unwrap().ptr_eq(&id));

        let pending = RowIdentity::pending("artist");
        let err = pending.resolve().unwrap_err();
        assert_eq!(err.kind, IdentityErrorKind::Unresolved);

        let resolved = pending
            .with_replacement_value("id", 5i64)
            .unwrap()
            .resolve()
            .unwrap();
        assert!(resolved.is_permanent());
        assert_eq!(resolved, RowIdentity::single("artist", "id", 5i64));
        assert!(pending.is_pending());
    }

    #[test]
    fn test_hash_consistent_with_eq() {
        let mut set = HashSet::new();
        set.insert(RowIdentity::single("artist", "id", 1i64));
        assert!(set.contains(&RowIdentity::single("artist", "id", 1i64)));
        assert!(!set.contains(&RowIdentity::single("artist", "id2", 1i64)));

        let pending = RowIdentity::pending("artist");
        set.insert(pending.clone());
        let extended = pending.with_replacement_value("id", 9i64).unwrap();
        assert!(set.contains(&extended));
    }

    #[test]
    fn test_composite_key() {
        let key: KeyValues = [("artist_id", 1i64), ("painting_id", 2i64)]
            .into_iter()
            .collect();
        let id = RowIdentity::permanent("artist_painting", key.clone());
        assert_eq!(id.key_values(), Some(&key));
        assert_eq!(id.to_string(), "artist_painting{artist_id: 1, painting_id: 2}");
    }

    #[test]
    fn test_display_pending() {
        let pending = RowIdentity::pending("artist");
        let token = pending.pending_token().unwrap().get();
        assert_eq!(pending.to_string(), format!("artist<pending #{}>", token));
    }
}
