//! ormflush - commit-flush ordering for object-relational persistence.
//!
//! ormflush takes the pending per-row mutations of a unit of work and turns
//! them into a safe statement sequence:
//!
//! - Redundant ops for the same row are merged into one
//! - Foreign-key dependencies order inserts parent-first and deletes child-first
//! - Self-referencing entities keep the caller's order
//! - Every op gets its WHERE-clause qualifier, optionally with optimistic locking
//! - Compatible consecutive ops are grouped into batches
//!
//! # Quick Start
//!
//! ```ignore
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
//! let artist = session.entity("artist")?;
//! let id = RowIdentity::pending("artist").with_replacement_value("id", 1_i64)?;
//! session.track(RowOp::insert(ObjectRef::new(monet), artist, id).with_value("name", "Monet"));
//!
//! let plan = session.flush()?;
//! for batch in plan.batches() {
//!     // hand plan.batch_ops(batch) to the statement layer
//! }
//! ```

// Re-export all public types from sub-crates
pub use ormflush_core::{
    ConfigError, EntityInfo, EntityRef, Error, ForeignKeyInfo, IdentityError, IdentityErrorKind,
    KeyValues, MetadataError, MetadataErrorKind, Result, Value, is_valid_identifier,
};

pub use ormflush_session::{
    DEFAULT_MAX_BATCH_SIZE, DependencyGraph, EntitySorter, FlushConfig, FlushError, FlushPlan,
    FlushPlanner, FlushStats, ObjectRef, OpBatch, OpSorter, PendingCounts, PendingToken,
    QualifiedOp, Qualifier, RowIdentity, RowOp, RowOpKind, UnitOfWork, Values, merge, merge_all,
    normalize,
};

// Session management
pub mod session;
pub use session::{FlushSession, FlushSessionBuilder};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use ormflush::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Metadata
        DependencyGraph,
        EntityInfo,
        EntitySorter,
        Error,
        // Planning
        FlushConfig,
        FlushPlan,
        FlushPlanner,
        // Session
        FlushSession,
        KeyValues,
        ObjectRef,
        Result,
        // Row ops
        RowIdentity,
        RowOp,
        RowOpKind,
        Value,
    };
}
