//! Unit of Work: the collection point for pending row ops.
//!
//! Change capture feeds every mutation it observes into a [`UnitOfWork`] as
//! a [`RowOp`], possibly several per row. At flush time the unit of work
//! hands the whole bag to a [`FlushPlanner`].
//!
//! # Example
//!
//! ```ignore
//! let mut uow = UnitOfWork::new();
//! uow.track(RowOp::insert(ObjectRef::new(artist), artist_entity, artist_id));
//! uow.track(RowOp::update(ObjectRef::new(painting), painting_entity, painting_id));
//!
//! let planner = FlushPlanner::with_defaults(graph);
//! let plan = uow.take_flush_plan(&planner)?;
//! ```

use ormflush_core::Error;

use crate::flush::{FlushPlan, FlushPlanner};
use crate::row_op::{RowOp, RowOpKind};
use crate::sorter::EntitySorter;

/// Tracks all pending row ops of a session.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    /// Ops in the order they were tracked.
    ops: Vec<RowOp>,
}

impl UnitOfWork {
    /// Create a new empty Unit of Work.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track one pending op.
    pub fn track(&mut self, op: RowOp) {
        tracing::trace!(op = %op, "Tracking row op");
        self.ops.push(op);
    }

    /// Track several pending ops in order.
    pub fn track_all(&mut self, ops: impl IntoIterator<Item = RowOp>) {
        for op in ops {
            self.track(op);
        }
    }

    /// Tracked ops in tracking order.
    pub fn ops(&self) -> &[RowOp] {
        &self.ops
    }

    /// Check if there are any pending changes.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.ops.is_empty()
    }

    /// Count of tracked ops by kind, before merging.
    #[must_use]
    pub fn pending_counts(&self) -> PendingCounts {
        let mut counts = PendingCounts::default();
        for op in &self.ops {
            match op.kind() {
                RowOpKind::Insert => counts.new += 1,
                RowOpKind::Update => counts.dirty += 1,
                RowOpKind::Delete => counts.deleted += 1,
            }
        }
        counts
    }

    /// Compute the flush plan for the tracked ops, keeping them tracked.
    ///
    /// # Errors
    ///
    /// Propagates planning errors from [`FlushPlanner::plan`].
    pub fn compute_flush_plan<S: EntitySorter>(
        &self,
        planner: &FlushPlanner<S>,
    ) -> Result<FlushPlan, Error> {
        planner.plan(self.ops.iter().cloned())
    }

    /// Compute the flush plan and stop tracking the ops it covers.
    ///
    /// On error nothing is cleared.
    pub fn take_flush_plan<S: EntitySorter>(
        &mut self,
        planner: &FlushPlanner<S>,
    ) -> Result<FlushPlan, Error> {
        let plan = planner.plan(self.ops.iter().cloned())?;
        self.ops.clear();
        Ok(plan)
    }

    /// Clear all tracked changes.
    pub fn clear(&mut self) {
        tracing::debug!(dropped = self.ops.len(), "Clearing unit of work");
        self.ops.clear();
    }
}

/// Count of pending operations by type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    /// Ops pending INSERT.
    pub new: usize,
    /// Ops pending UPDATE.
    pub dirty: usize,
    /// Ops pending DELETE.
    pub deleted: usize,
}

impl PendingCounts {
    /// Total number of pending operations.
    #[must_use]
    pub fn total(&self) -> usize {
        self.new + self.dirty + self.deleted
    }

    /// Check if there are no pending operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new == 0 && self.dirty == 0 && self.deleted == 0
    }
}
