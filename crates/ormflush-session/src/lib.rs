//! Commit-flush ordering for ormflush.
//!
//! `ormflush-session` is the **flush layer**. It takes the unordered bag of
//! per-row mutations produced by change capture and turns it into a safe,
//! minimal statement sequence.
//!
//! # Role In The Architecture
//!
//! - **Identity**: [`RowIdentity`] names the row a mutation targets, whether
//!   its key is known yet or not; [`normalize`] gives the canonical form.
//! - **Merging**: [`merge`] / [`merge_all`] collapse ops for the same row.
//! - **Ordering**: [`OpSorter`] orders ops by foreign-key dependencies using
//!   an [`EntitySorter`] such as [`DependencyGraph`], keeping reflexive
//!   entities in caller order.
//! - **Planning**: [`FlushPlanner`] runs the whole pipeline and attaches a
//!   [`Qualifier`] to every op.
//!
//! # Design Philosophy
//!
//! - **Pure**: no I/O, no async; statement execution lives elsewhere.
//! - **Immutable identities**: key acquisition returns new identities, so
//!   aliases never observe a key changing under them.
//! - **Type erasure**: source objects are carried as [`ObjectRef`].
//!
//! # Example
//!
//! ```ignore
//! let graph = DependencyGraph::with_entities([artist.clone(), painting.clone()])?;
//! let planner = FlushPlanner::new(graph, FlushConfig::default());
//!
//! let plan = planner.plan(vec![
//!     RowOp::insert(ObjectRef::new(p), painting, RowIdentity::single("painting", "id", 10)),
//!     RowOp::insert(ObjectRef::new(a), artist, RowIdentity::single("artist", "id", 1)),
//! ])?;
//!
//! for batch in plan.batches() {
//!     execute(batch, plan.batch_ops(batch))?;
//! }
//! ```

pub mod config;
pub mod dependency;
pub mod error;
pub mod flush;
pub mod identity;
pub mod merger;
pub mod qualifier;
pub mod row_op;
pub mod sorter;
pub mod unit_of_work;

pub use config::{DEFAULT_MAX_BATCH_SIZE, FlushConfig};
pub use dependency::DependencyGraph;
pub use error::FlushError;
pub use flush::{FlushPlan, FlushPlanner, FlushStats, OpBatch, QualifiedOp};
pub use identity::{PendingToken, RowIdentity, normalize};
pub use merger::{merge, merge_all};
pub use qualifier::Qualifier;
pub use row_op::{RowOp, RowOpKind, Values};
pub use sorter::{EntitySorter, OpSorter};
pub use unit_of_work::{PendingCounts, UnitOfWork};

use std::any::Any;
use std::sync::Arc;

// ============================================================================
// Object References
// ============================================================================

/// Type-erased shared handle to the domain object behind a row op.
///
/// The flush layer never inspects the object; it only carries it through so
/// the execution layer can write back generated keys.
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn Any + Send + Sync>);

impl ObjectRef {
    /// Wrap an owned object.
    pub fn new<T: Any + Send + Sync>(object: T) -> Self {
        Self(Arc::new(object))
    }

    /// Wrap an already shared object without copying it.
    pub fn from_arc<T: Any + Send + Sync>(object: Arc<T>) -> Self {
        Self(object)
    }

    /// Borrow the object as `T`, if that is its type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Check whether both handles point to the same object.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast::<()>()
    }
}

impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ObjectRef").field(&self.addr()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Hero {
        name: &'static str,
    }

    #[test]
    fn test_object_ref_downcast() {
        let obj = ObjectRef::new(Hero { name: "Spider-Boy" });
        assert_eq!(obj.downcast_ref::<Hero>(), Some(&Hero { name: "Spider-Boy" }));
        assert!(obj.downcast_ref::<String>().is_none());
    }

    #[test]
    fn test_object_ref_identity() {
        let shared = Arc::new(Hero { name: "Deadpond" });
        let a = ObjectRef::from_arc(Arc::clone(&shared));
        let b = ObjectRef::from_arc(shared);
        let c = ObjectRef::new(Hero { name: "Deadpond" });
        assert!(a.ptr_eq(&b));
        assert!(a.clone().ptr_eq(&a));
        assert!(!a.ptr_eq(&c));
    }

    #[test]
    fn test_object_ref_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ObjectRef>();
        assert_send_sync::<RowOp>();
        assert_send_sync::<FlushPlan>();
    }
}
