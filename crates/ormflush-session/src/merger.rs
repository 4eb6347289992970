//! Collapsing redundant row ops.
//!
//! Change capture may emit several ops for one row (an insert followed by
//! updates, an update followed by a delete, ...). Merging reduces them to the
//! single op that must actually run:
//!
//! - a DELETE absorbs everything else for the row;
//! - otherwise the later op survives with the union of both ops' bindings,
//!   later bindings winning.
//!
//! Ops on one pending identity belong to the same row even when only the
//! later ones were created after its key was attached; they share the
//! identity's pending token and merge like any other pair.
//!
//! Merging never looks at the source object.

use std::collections::HashMap;

use crate::error::FlushError;
use crate::identity::{PendingToken, RowIdentity};
use crate::row_op::RowOp;

/// Merge two ops targeting the same row; `earlier` was emitted first.
///
/// Fails with [`FlushError::IdentityMismatch`] if the canonical identities
/// differ and the ops do not share a pending token.
pub fn merge(earlier: RowOp, later: RowOp) -> Result<RowOp, FlushError> {
    if earlier.op_id() != later.op_id() && !same_pending_row(&earlier, &later) {
        return Err(FlushError::IdentityMismatch {
            earlier: earlier.op_id().clone(),
            later: later.op_id().clone(),
        });
    }
    Ok(fold(earlier, later))
}

fn same_pending_row(a: &RowOp, b: &RowOp) -> bool {
    match (a.identity().pending_token(), b.identity().pending_token()) {
        (Some(a_token), Some(b_token)) => {
            a_token == b_token && a.entity_name() == b.entity_name()
        }
        _ => false,
    }
}

/// Merge and keep the key values known to either side.
fn fold(earlier: RowOp, later: RowOp) -> RowOp {
    let resolved = [later.identity(), earlier.identity()]
        .into_iter()
        .find(|id| id.key_values().is_some())
        .cloned();
    let mut survivor = absorb(earlier, later);
    if let Some(identity) = resolved.filter(|_| survivor.identity().key_values().is_none()) {
        survivor.replace_identity(identity);
    }
    survivor
}

fn absorb(earlier: RowOp, mut later: RowOp) -> RowOp {
    if later.is_delete() {
        return later;
    }
    if earlier.is_delete() {
        return earlier;
    }

    let mut values = earlier.values().clone();
    values.overlay(later.values());
    later.replace_values(values);
    later
}

/// Collapse a bag of ops to one op per row.
///
/// Ops meet in one slot when their canonical identities are equal or their
/// identities share a pending token. Survivors are emitted in the order their
/// row first appeared.
#[tracing::instrument(level = "debug", skip(ops))]
pub fn merge_all(ops: impl IntoIterator<Item = RowOp>) -> Vec<RowOp> {
    let mut index: HashMap<RowIdentity, usize> = HashMap::new();
    let mut tokens: HashMap<(String, PendingToken), usize> = HashMap::new();
    let mut merged: Vec<Option<RowOp>> = Vec::new();
    let mut absorbed = 0usize;

    for op in ops {
        let token = op
            .identity()
            .pending_token()
            .map(|token| (op.entity_name().to_string(), token));
        let found = index
            .get(op.op_id())
            .or_else(|| token.as_ref().and_then(|key| tokens.get(key)))
            .copied();

        let slot = match found {
            Some(slot) => {
                absorbed += 1;
                if let Some(existing) = merged[slot].take() {
                    tracing::trace!(
                        earlier = %existing,
                        later = %op,
                        "Merging row ops for the same row"
                    );
                    merged[slot] = Some(fold(existing, op));
                }
                slot
            }
            None => {
                merged.push(Some(op));
                merged.len() - 1
            }
        };

        if let Some(survivor) = &merged[slot] {
            index.insert(survivor.op_id().clone(), slot);
        }
        if let Some(key) = token {
            tokens.insert(key, slot);
        }
    }

    tracing::debug!(survivors = merged.len(), absorbed, "Row ops merged");
    merged.into_iter().flatten().collect()
}
