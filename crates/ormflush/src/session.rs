//! Flush sessions for ormflush.
//!
//! A [`FlushSession`] bundles the entity dependency graph, the flush
//! configuration and a [`UnitOfWork`], so callers only track ops and flush.
//!
//! # Example
//!
//! ```rust,ignore
//! use ormflush::prelude::*;
//!
//! let mut session = FlushSession::builder()
//!     .entity(EntityInfo::new("artist").primary_key(["id"]))
//!     .entity(
//!         EntityInfo::new("painting")
//!             .primary_key(["id"])
//!             .foreign_key("artist_id", "artist", "id"),
//!     )
//!     .build()?;
//!
//! session.track(RowOp::insert(ObjectRef::new(painting), session.entity("painting")?, painting_id));
//! let plan = session.flush()?;
//! ```

use ormflush_core::{EntityInfo, EntityRef, Error, MetadataError, MetadataErrorKind, Result};
use ormflush_session::{
    DependencyGraph, FlushConfig, FlushPlan, FlushPlanner, PendingCounts, RowOp, UnitOfWork,
};

/// Tracks row ops for a fixed set of entities and plans their flush.
#[derive(Debug)]
pub struct FlushSession {
    planner: FlushPlanner<DependencyGraph>,
    unit_of_work: UnitOfWork,
}

impl FlushSession {
    /// Create a session builder.
    #[must_use]
    pub fn builder() -> FlushSessionBuilder {
        FlushSessionBuilder::new()
    }

    /// Registered metadata for an entity.
    pub fn entity(&self, name: &str) -> Result<EntityRef> {
        self.planner.sorter().entity(name).cloned().ok_or_else(|| {
            Error::Metadata(MetadataError::new(
                MetadataErrorKind::UnknownEntity,
                format!("entity '{}' is not registered", name),
            ))
        })
    }

    /// The planner used by [`Self::flush`].
    pub fn planner(&self) -> &FlushPlanner<DependencyGraph> {
        &self.planner
    }

    /// Track a pending op.
    pub fn track(&mut self, op: RowOp) {
        self.unit_of_work.track(op);
    }

    /// Track several pending ops in order.
    pub fn track_all(&mut self, ops: impl IntoIterator<Item = RowOp>) {
        self.unit_of_work.track_all(ops);
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.unit_of_work.has_changes()
    }

    #[must_use]
    pub fn pending_counts(&self) -> PendingCounts {
        self.unit_of_work.pending_counts()
    }

    /// Plan the tracked ops without clearing them.
    pub fn preview(&self) -> Result<FlushPlan> {
        self.unit_of_work.compute_flush_plan(&self.planner)
    }

    /// Plan the tracked ops as pretty JSON, for diagnostics.
    pub fn preview_json(&self) -> Result<String> {
        let plan = self.preview()?;
        Ok(serde_json::to_string_pretty(&plan)?)
    }

    /// Plan the tracked ops and clear them.
    ///
    /// Ops stay tracked if planning fails.
    pub fn flush(&mut self) -> Result<FlushPlan> {
        self.unit_of_work.take_flush_plan(&self.planner)
    }

    /// Drop all tracked ops.
    pub fn discard(&mut self) {
        self.unit_of_work.clear();
    }
}

/// Builder for [`FlushSession`].
#[derive(Debug, Default)]
pub struct FlushSessionBuilder {
    entities: Vec<EntityInfo>,
    config: FlushConfig,
}

impl FlushSessionBuilder {
    /// Create a builder with no entities and default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity (builder pattern).
    #[must_use]
    pub fn entity(mut self, entity: EntityInfo) -> Self {
        self.entities.push(entity);
        self
    }

    /// Register several entities (builder pattern).
    #[must_use]
    pub fn entities(mut self, entities: impl IntoIterator<Item = EntityInfo>) -> Self {
        self.entities.extend(entities);
        self
    }

    /// Use the given configuration (builder pattern).
    #[must_use]
    pub fn config(mut self, config: FlushConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a configuration parsed from JSON.
    pub fn config_json(mut self, json: &str) -> Result<Self> {
        self.config = FlushConfig::from_json(json)?;
        Ok(self)
    }

    /// Validate everything and build the session.
    pub fn build(self) -> Result<FlushSession> {
        self.config.validate()?;
        let graph =
            DependencyGraph::with_entities(self.entities.into_iter().map(EntityInfo::into_ref))?;

        let cycles = graph.cycles();
        if !cycles.is_empty() {
            tracing::info!(cycles = ?cycles, "Entities in dependency cycles are flushed in caller order");
        }
        tracing::debug!(entities = graph.len(), "Flush session built");

        Ok(FlushSession {
            planner: FlushPlanner::new(graph, self.config),
            unit_of_work: UnitOfWork::new(),
        })
    }
}
