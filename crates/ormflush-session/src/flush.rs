//! Flush planning for pending row ops.
//!
//! The planner turns the unordered bag of ops produced by change capture into
//! an executable [`FlushPlan`]:
//!
//! 1. ops targeting the same row are merged into one;
//! 2. the survivors are ordered (parents written first, deleted last);
//! 3. every op gets the [`Qualifier`] for its WHERE clause;
//! 4. consecutive ops that render to the same statement are batched.

use std::ops::Range;

use ormflush_core::{Error, IdentityError, IdentityErrorKind};
use serde::{Deserialize, Serialize};

use crate::config::FlushConfig;
use crate::error::FlushError;
use crate::merger::merge_all;
use crate::qualifier::Qualifier;
use crate::row_op::{RowOp, RowOpKind};
use crate::sorter::{EntitySorter, OpSorter};

/// A row op together with its WHERE-clause qualifier.
#[derive(Debug, Clone, Serialize)]
pub struct QualifiedOp {
    op: RowOp,
    qualifier: Qualifier,
}

impl QualifiedOp {
    /// Qualify `op`, adding its lock-flagged bindings when `optimistic_locking` is on.
    pub fn new(op: RowOp, optimistic_locking: bool) -> Self {
        let mut qualifier = Qualifier::new(&op);
        if optimistic_locking && !op.is_insert() {
            for (column, value) in &op.values().lock_values() {
                qualifier.add_additional_qualifier(column.clone(), value.clone(), true);
            }
        }
        Self { op, qualifier }
    }

    pub fn op(&self) -> &RowOp {
        &self.op
    }

    pub fn qualifier(&self) -> &Qualifier {
        &self.qualifier
    }

    pub fn into_parts(self) -> (RowOp, Qualifier) {
        (self.op, self.qualifier)
    }

    /// Whether `next` can share a parameterized statement with `self`.
    fn batches_with(&self, next: &QualifiedOp) -> bool {
        let (a, b) = (&self.op, &next.op);
        if a.kind() != b.kind() || a.entity_name() != b.entity_name() {
            return false;
        }
        match a.kind() {
            RowOpKind::Insert => a.values().bindings().same_columns(b.values().bindings()),
            RowOpKind::Update => {
                a.values().bindings().same_columns(b.values().bindings())
                    && self.qualifier.is_same_statement_shape(&next.qualifier)
            }
            RowOpKind::Delete => self.qualifier.is_same_statement_shape(&next.qualifier),
        }
    }
}

/// A run of consecutive plan ops sharing one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpBatch {
    /// Target entity name.
    pub entity: String,
    /// Statement kind.
    pub kind: RowOpKind,
    /// Positions of the batch's ops in [`FlushPlan::ops`].
    pub range: Range<usize>,
}

impl OpBatch {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Counters describing a flush plan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushStats {
    /// Number of INSERT ops planned.
    pub inserts: usize,
    /// Number of UPDATE ops planned.
    pub updates: usize,
    /// Number of DELETE ops planned.
    pub deletes: usize,
    /// Number of input ops folded into another op for the same row.
    pub merged_away: usize,
    /// Number of statement batches.
    pub batches: usize,
}

impl FlushStats {
    /// Total planned ops.
    pub fn total(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }
}

/// Ordered, qualified and batched ops ready for execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushPlan {
    ops: Vec<QualifiedOp>,
    batches: Vec<OpBatch>,
    stats: FlushStats,
}

impl FlushPlan {
    /// Ops in execution order.
    pub fn ops(&self) -> &[QualifiedOp] {
        &self.ops
    }

    /// Statement batches in execution order.
    pub fn batches(&self) -> &[OpBatch] {
        &self.batches
    }

    /// Ops belonging to one batch of this plan.
    pub fn batch_ops(&self, batch: &OpBatch) -> &[QualifiedOp] {
        self.ops.get(batch.range.clone()).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn stats(&self) -> FlushStats {
        self.stats
    }

    pub fn into_ops(self) -> Vec<QualifiedOp> {
        self.ops
    }
}

/// Builds [`FlushPlan`]s from pending row ops.
#[derive(Debug, Clone)]
pub struct FlushPlanner<S> {
    sorter: S,
    config: FlushConfig,
}

impl<S: EntitySorter> FlushPlanner<S> {
    pub fn new(sorter: S, config: FlushConfig) -> Self {
        Self { sorter, config }
    }

    /// Planner with default configuration.
    pub fn with_defaults(sorter: S) -> Self {
        Self::new(sorter, FlushConfig::default())
    }

    pub fn sorter(&self) -> &S {
        &self.sorter
    }

    pub fn config(&self) -> &FlushConfig {
        &self.config
    }

    /// Merge, order, qualify and batch `ops`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the configuration is invalid, or if an UPDATE or
    /// DELETE targets a new row whose key is still unknown.
    #[tracing::instrument(level = "info", skip(self, ops))]
    pub fn plan(&self, ops: impl IntoIterator<Item = RowOp>) -> Result<FlushPlan, Error> {
        self.config.validate()?;

        let ops: Vec<RowOp> = ops.into_iter().collect();
        let submitted = ops.len();
        let merged = merge_all(ops);
        let merged_away = submitted - merged.len();

        for op in &merged {
            if !op.is_insert() && op.key_snapshot().is_empty() {
                return Err(FlushError::Identity(IdentityError::new(
                    IdentityErrorKind::Unresolved,
                    op.entity_name(),
                    format!("cannot {} a row whose key is not known", op.kind()),
                ))
                .into());
            }
        }

        let sorted = OpSorter::new(&self.sorter).sort(merged);
        let ops: Vec<QualifiedOp> = sorted
            .into_iter()
            .map(|op| QualifiedOp::new(op, self.config.optimistic_locking))
            .collect();
        let batches = self.batch(&ops);

        let mut stats = FlushStats {
            merged_away,
            batches: batches.len(),
            ..FlushStats::default()
        };
        for op in &ops {
            match op.op().kind() {
                RowOpKind::Insert => stats.inserts += 1,
                RowOpKind::Update => stats.updates += 1,
                RowOpKind::Delete => stats.deletes += 1,
            }
        }

        tracing::info!(
            inserts = stats.inserts,
            updates = stats.updates,
            deletes = stats.deletes,
            merged_away = stats.merged_away,
            batches = stats.batches,
            "Flush plan computed"
        );

        Ok(FlushPlan {
            ops,
            batches,
            stats,
        })
    }

    fn batch(&self, ops: &[QualifiedOp]) -> Vec<OpBatch> {
        let mut batches: Vec<OpBatch> = Vec::new();
        for (i, op) in ops.iter().enumerate() {
            if let Some(current) = batches.last_mut() {
                let extends = self.config.batching
                    && current.len() < self.config.max_batch_size
                    && ops[current.range.start].batches_with(op);
                if extends {
                    current.range.end = i + 1;
                    continue;
                }
            }
            batches.push(OpBatch {
                entity: op.op().entity_name().to_string(),
                kind: op.op().kind(),
                range: i..i + 1,
            });
        }
        tracing::debug!(ops = ops.len(), batches = batches.len(), "Ops batched");
        batches
    }
}
