//! Execution ordering for merged row ops.
//!
//! Ordering happens in two layers:
//!
//! 1. **Entities.** The distinct entities present are ordered with the
//!    [`EntitySorter`] comparator ("referenced before referencing"). Inserts
//!    and updates walk that order; deletes walk it backwards so child rows go
//!    first.
//! 2. **Rows within an entity.** Input order is kept, except that a delete
//!    freeing a key that an insert or update of the same entity reuses is
//!    moved right in front of it. The deletes of every entity depending on
//!    that entity move along, children first, so the early delete never
//!    orphans a child row.
//!
//! Reflexive entities (self-referencing, directly or through a short cycle)
//! have no safe acyclic order for their rows. Their writes run in the
//! caller's order at the entity's insert slot and their deletes in the
//! caller's order at its delete slot.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use ormflush_core::{EntityInfo, EntityRef, KeyValues};

use crate::row_op::{RowOp, RowOpKind};

/// Dependency information supplied by the entity-relationship model.
///
/// Answers must stay stable for the duration of one [`OpSorter::sort`] call.
pub trait EntitySorter {
    /// `Less` if `a` must be written before `b` (`b` references `a`),
    /// `Greater` for the opposite, `Equal` when unrelated.
    fn compare(&self, a: &EntityInfo, b: &EntityInfo) -> Ordering;

    /// Whether rows of `entity` may reference other rows of the same entity.
    fn is_reflexive(&self, entity: &EntityInfo) -> bool;
}

impl<T: EntitySorter + ?Sized> EntitySorter for &T {
    fn compare(&self, a: &EntityInfo, b: &EntityInfo) -> Ordering {
        (**self).compare(a, b)
    }

    fn is_reflexive(&self, entity: &EntityInfo) -> bool {
        (**self).is_reflexive(entity)
    }
}

impl<T: EntitySorter + ?Sized> EntitySorter for Arc<T> {
    fn compare(&self, a: &EntityInfo, b: &EntityInfo) -> Ordering {
        (**self).compare(a, b)
    }

    fn is_reflexive(&self, entity: &EntityInfo) -> bool {
        (**self).is_reflexive(entity)
    }
}

/// Ops of one entity, split by the phase they run in.
#[derive(Default)]
struct EntityPhases {
    inserts: Vec<RowOp>,
    updates: Vec<RowOp>,
    deletes: Vec<RowOp>,
    /// Per delete, the write (inserts, then updates) reusing its key.
    reused_by: Vec<Option<usize>>,
}

impl EntityPhases {
    /// Reflexive entities keep all writes in one block in input order.
    fn split(ops: Vec<RowOp>, reflexive: bool) -> Self {
        let mut phases = Self::default();
        for op in ops {
            match op.kind() {
                RowOpKind::Delete => phases.deletes.push(op),
                RowOpKind::Update if !reflexive => phases.updates.push(op),
                RowOpKind::Insert | RowOpKind::Update => phases.inserts.push(op),
            }
        }
        let write_keys: Vec<KeyValues> = phases
            .inserts
            .iter()
            .chain(phases.updates.iter())
            .map(RowOp::key_snapshot)
            .collect();
        phases.reused_by = phases
            .deletes
            .iter()
            .map(|delete| {
                let key = delete.key_snapshot();
                if key.is_empty() {
                    None
                } else {
                    write_keys.iter().position(|k| *k == key)
                }
            })
            .collect();
        phases
    }

    fn reuses_keys(&self) -> bool {
        self.reused_by.iter().any(Option::is_some)
    }

    /// All deletes not emitted yet, in input order.
    fn take_deletes(&mut self) -> Vec<RowOp> {
        self.reused_by.clear();
        std::mem::take(&mut self.deletes)
    }

    /// Inserts and updates, each preceded by the deletes freeing its key.
    fn take_writes(&mut self) -> (Vec<RowOp>, Vec<RowOp>) {
        let writes = self.inserts.len() + self.updates.len();
        let mut before: Vec<Vec<RowOp>> = vec![Vec::new(); writes];
        let mut remaining = Vec::new();
        let reused_by = std::mem::take(&mut self.reused_by);
        for (delete, target) in std::mem::take(&mut self.deletes).into_iter().zip(reused_by) {
            match target {
                Some(pos) => {
                    tracing::trace!(op = %delete, "Delete hoisted ahead of key reuse");
                    before[pos].push(delete);
                }
                None => remaining.push(delete),
            }
        }
        self.reused_by = vec![None; remaining.len()];
        self.deletes = remaining;

        let mut before = before.into_iter();
        let mut interleave = |writes: Vec<RowOp>| {
            let mut out = Vec::with_capacity(writes.len());
            for (write, freed) in writes.into_iter().zip(before.by_ref()) {
                out.extend(freed);
                out.push(write);
            }
            out
        };
        let inserts = interleave(std::mem::take(&mut self.inserts));
        let updates = interleave(std::mem::take(&mut self.updates));
        (inserts, updates)
    }
}

struct EntityGroup {
    entity: EntityRef,
    ops: Vec<RowOp>,
}

/// Orders a merged set of row ops for execution.
pub struct OpSorter<'a> {
    entities: &'a dyn EntitySorter,
}

impl<'a> OpSorter<'a> {
    pub fn new(entities: &'a dyn EntitySorter) -> Self {
        Self { entities }
    }

    /// Order `rows` (at most one op per row) for execution.
    #[tracing::instrument(level = "debug", skip(self, rows), fields(rows = rows.len()))]
    pub fn sort(&self, rows: Vec<RowOp>) -> Vec<RowOp> {
        if rows.is_empty() {
            return rows;
        }
        let total = rows.len();
        let groups = group_by_entity(rows);
        let (order, successors) = self.entity_order(&groups);

        let mut phases: Vec<EntityPhases> = groups
            .into_iter()
            .map(|group| {
                let reflexive = self.entities.is_reflexive(&group.entity);
                if reflexive {
                    tracing::trace!(
                        entity = group.entity.name(),
                        ops = group.ops.len(),
                        "Reflexive entity kept in input order"
                    );
                }
                EntityPhases::split(group.ops, reflexive)
            })
            .collect();

        let mut sorted = Vec::with_capacity(total);
        let mut updates = Vec::new();
        for (position, &slot) in order.iter().enumerate() {
            if phases[slot].reuses_keys() {
                // Rows referencing the freed keys must be gone first.
                let dependents = descendants(slot, &successors);
                for &other in order[position + 1..].iter().rev() {
                    if dependents[other] {
                        sorted.extend(phases[other].take_deletes());
                    }
                }
            }
            let (inserts, entity_updates) = phases[slot].take_writes();
            sorted.extend(inserts);
            updates.extend(entity_updates);
        }
        sorted.extend(updates);
        for &slot in order.iter().rev() {
            sorted.extend(phases[slot].take_deletes());
        }

        tracing::debug!(entities = order.len(), ops = sorted.len(), "Row ops sorted");
        sorted
    }

    /// Stable topological order of the groups from pairwise comparisons,
    /// with the "must run before" successor lists it was built from.
    ///
    /// Ready entities are taken in first-appearance order. The comparator is
    /// not consulted when only one entity is present.
    fn entity_order(&self, groups: &[EntityGroup]) -> (Vec<usize>, Vec<Vec<usize>>) {
        let n = groups.len();
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
        if n == 1 {
            return (vec![0], successors);
        }

        let mut in_degree = vec![0usize; n];
        for (i, a) in groups.iter().enumerate() {
            for (j, b) in groups.iter().enumerate().skip(i + 1) {
                let (before, after) = match self.entities.compare(&a.entity, &b.entity) {
                    Ordering::Less => (i, j),
                    Ordering::Greater => (j, i),
                    Ordering::Equal => continue,
                };
                successors[before].push(after);
                in_degree[after] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &succ in &successors[next] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    ready.insert(succ);
                }
            }
        }

        if order.len() < n {
            let stuck: Vec<&str> = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| groups[i].entity.name())
                .collect();
            tracing::warn!(
                entities = ?stuck,
                "Entity dependency cycle outside reflexive entities; keeping input order for the rest"
            );
            order.extend((0..n).filter(|&i| in_degree[i] > 0));
        }
        (order, successors)
    }
}

/// Groups transitively depending on `root`.
fn descendants(root: usize, successors: &[Vec<usize>]) -> Vec<bool> {
    let mut seen = vec![false; successors.len()];
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        for &next in &successors[node] {
            if !seen[next] {
                seen[next] = true;
                stack.push(next);
            }
        }
    }
    seen[root] = false;
    seen
}

fn group_by_entity(rows: Vec<RowOp>) -> Vec<EntityGroup> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<EntityGroup> = Vec::new();
    for op in rows {
        let slot = match slots.get(op.entity_name()) {
            Some(&slot) => slot,
            None => {
                slots.insert(op.entity_name().to_string(), groups.len());
                groups.push(EntityGroup {
                    entity: op.entity().clone(),
                    ops: Vec::new(),
                });
                groups.len() - 1
            }
        };
        groups[slot].ops.push(op);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectRef;
    use crate::identity::RowIdentity;
    use proptest::prelude::*;
    use std::cell::Cell;

    /// Comparator from an explicit "a before b" edge list.
    struct Edges {
        edges: Vec<(&'static str, &'static str)>,
        reflexive: Vec<&'static str>,
        calls: Cell<usize>,
    }

    impl Edges {
        fn new(edges: Vec<(&'static str, &'static str)>) -> Self {
            Self {
                edges,
                reflexive: Vec::new(),
                calls: Cell::new(0),
            }
        }

        fn reflexive(mut self, name: &'static str) -> Self {
            self.reflexive.push(name);
            self
        }
    }

    impl EntitySorter for Edges {
        fn compare(&self, a: &EntityInfo, b: &EntityInfo) -> Ordering {
            self.calls.set(self.calls.get() + 1);
            if self.edges.contains(&(a.name(), b.name())) {
                Ordering::Less
            } else if self.edges.contains(&(b.name(), a.name())) {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }

        fn is_reflexive(&self, entity: &EntityInfo) -> bool {
            self.reflexive.contains(&entity.name())
        }
    }

    fn entity(name: &str) -> EntityRef {
        EntityInfo::new(name).primary_key(["id"]).into_ref()
    }

    fn make_op(kind: RowOpKind, table: &str, id: i64) -> RowOp {
        RowOp::new(kind, ObjectRef::new(id), entity(table), RowIdentity::single(table, "id", id))
    }

    fn labels(ops: &[RowOp]) -> Vec<String> {
        ops.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_empty_input() {
        let edges = Edges::new(vec![]);
        assert!(OpSorter::new(&edges).sort(Vec::new()).is_empty());
        assert_eq!(edges.calls.get(), 0);
    }

    #[test]
    fn test_reflexive_bypass() {
        let edges = Edges::new(vec![]).reflexive("node");
        let ops: Vec<RowOp> = (1..=4).map(|id| make_op(RowOpKind::Insert, "node", id)).collect();
        let expected = labels(&ops);

        let sorted = OpSorter::new(&edges).sort(ops);
        assert_eq!(labels(&sorted), expected);
        assert_eq!(edges.calls.get(), 0);
    }

    #[test]
    fn test_reflexive_writes_and_deletes_keep_input_order() {
        let edges = Edges::new(vec![]).reflexive("node");
        let ops = vec![
            make_op(RowOpKind::Delete, "node", 1),
            make_op(RowOpKind::Update, "node", 3),
            make_op(RowOpKind::Insert, "node", 2),
            make_op(RowOpKind::Delete, "node", 4),
        ];
        assert_eq!(
            labels(&OpSorter::new(&edges).sort(ops)),
            vec![
                "UPDATE node{id: 3}",
                "INSERT node{id: 2}",
                "DELETE node{id: 1}",
                "DELETE node{id: 4}",
            ]
        );
    }

    #[test]
    fn test_reflexive_deletes_wait_for_child_deletes() {
        let edges = Edges::new(vec![("node", "leaf")]).reflexive("node");
        let ops = vec![
            make_op(RowOpKind::Insert, "node", 1),
            make_op(RowOpKind::Delete, "node", 2),
            make_op(RowOpKind::Delete, "leaf", 5),
        ];
        assert_eq!(
            labels(&OpSorter::new(&edges).sort(ops)),
            vec!["INSERT node{id: 1}", "DELETE leaf{id: 5}", "DELETE node{id: 2}"]
        );
    }

    #[test]
    fn test_no_spurious_reordering() {
        let edges = Edges::new(vec![]);
        let ops = vec![
            make_op(RowOpKind::Insert, "d", 1),
            make_op(RowOpKind::Insert, "b", 1),
            make_op(RowOpKind::Insert, "a", 1),
            make_op(RowOpKind::Insert, "c", 1),
        ];
        let expected = labels(&ops);
        assert_eq!(labels(&OpSorter::new(&edges).sort(ops)), expected);
        assert_eq!(edges.calls.get(), 6);
    }

    #[test]
    fn test_single_entity_never_compares() {
        let edges = Edges::new(vec![]);
        let ops = vec![
            make_op(RowOpKind::Insert, "artist", 1),
            make_op(RowOpKind::Insert, "artist", 2),
        ];
        OpSorter::new(&edges).sort(ops);
        assert_eq!(edges.calls.get(), 0);
    }

    #[test]
    fn test_parent_before_child_inserts() {
        let edges = Edges::new(vec![("artist", "painting")]);
        let ops = vec![
            make_op(RowOpKind::Insert, "painting", 10),
            make_op(RowOpKind::Insert, "artist", 1),
            make_op(RowOpKind::Insert, "painting", 11),
        ];
        assert_eq!(
            labels(&OpSorter::new(&edges).sort(ops)),
            vec!["INSERT artist{id: 1}", "INSERT painting{id: 10}", "INSERT painting{id: 11}"]
        );
    }

    #[test]
    fn test_child_before_parent_deletes() {
        let edges = Edges::new(vec![("artist", "painting")]);
        let ops = vec![
            make_op(RowOpKind::Delete, "artist", 1),
            make_op(RowOpKind::Delete, "painting", 10),
        ];
        assert_eq!(
            labels(&OpSorter::new(&edges).sort(ops)),
            vec!["DELETE painting{id: 10}", "DELETE artist{id: 1}"]
        );
    }

    #[test]
    fn test_phases_insert_update_delete() {
        let edges = Edges::new(vec![("artist", "painting")]);
        let ops = vec![
            make_op(RowOpKind::Delete, "painting", 10),
            make_op(RowOpKind::Update, "artist", 2),
            make_op(RowOpKind::Insert, "painting", 11),
            make_op(RowOpKind::Delete, "artist", 3),
            make_op(RowOpKind::Insert, "artist", 1),
        ];
        assert_eq!(
            labels(&OpSorter::new(&edges).sort(ops)),
            vec![
                "INSERT artist{id: 1}",
                "INSERT painting{id: 11}",
                "UPDATE artist{id: 2}",
                "DELETE painting{id: 10}",
                "DELETE artist{id: 3}",
            ]
        );
    }

    #[test]
    fn test_transitive_chain() {
        let edges = Edges::new(vec![("a", "b"), ("b", "c"), ("a", "c")]);
        let ops = vec![
            make_op(RowOpKind::Insert, "c", 1),
            make_op(RowOpKind::Insert, "b", 1),
            make_op(RowOpKind::Insert, "a", 1),
        ];
        assert_eq!(
            labels(&OpSorter::new(&edges).sort(ops)),
            vec!["INSERT a{id: 1}", "INSERT b{id: 1}", "INSERT c{id: 1}"]
        );
    }

    #[test]
    fn test_delete_hoisted_before_key_reuse() {
        let edges = Edges::new(vec![]);
        let reused = RowOp::insert(
            ObjectRef::new(()),
            entity("artist"),
            RowIdentity::pending("artist"),
        )
        .with_value("id", 1i64);
        let ops = vec![
            make_op(RowOpKind::Insert, "artist", 5),
            reused,
            make_op(RowOpKind::Delete, "artist", 2),
            make_op(RowOpKind::Delete, "artist", 1),
        ];
        let sorted = OpSorter::new(&edges).sort(ops);
        let kinds: Vec<(RowOpKind, KeyValues)> =
            sorted.iter().map(|op| (op.kind(), op.key_snapshot())).collect();
        assert_eq!(
            kinds,
            vec![
                (RowOpKind::Insert, KeyValues::single("id", 5i64)),
                (RowOpKind::Delete, KeyValues::single("id", 1i64)),
                (RowOpKind::Insert, KeyValues::single("id", 1i64)),
                (RowOpKind::Delete, KeyValues::single("id", 2i64)),
            ]
        );
    }

    fn steps(ops: &[RowOp]) -> Vec<(RowOpKind, String, KeyValues)> {
        ops.iter()
            .map(|op| (op.kind(), op.entity_name().to_string(), op.key_snapshot()))
            .collect()
    }

    fn step(kind: RowOpKind, table: &str, id: i64) -> (RowOpKind, String, KeyValues) {
        (kind, table.to_string(), KeyValues::single("id", id))
    }

    fn reusing_insert(table: &str, id: i64) -> RowOp {
        RowOp::insert(ObjectRef::new(()), entity(table), RowIdentity::pending(table))
            .with_value("id", id)
    }

    #[test]
    fn test_key_reuse_deletes_children_first() {
        let edges = Edges::new(vec![("artist", "painting")]);
        let ops = vec![
            make_op(RowOpKind::Delete, "painting", 10),
            make_op(RowOpKind::Delete, "artist", 1),
            reusing_insert("artist", 1),
        ];
        assert_eq!(
            steps(&OpSorter::new(&edges).sort(ops)),
            vec![
                step(RowOpKind::Delete, "painting", 10),
                step(RowOpKind::Delete, "artist", 1),
                step(RowOpKind::Insert, "artist", 1),
            ]
        );
    }

    #[test]
    fn test_key_reuse_pulls_transitive_dependents_only() {
        let edges = Edges::new(vec![("artist", "painting"), ("painting", "sketch")]);
        let ops = vec![
            make_op(RowOpKind::Delete, "gallery", 3),
            make_op(RowOpKind::Delete, "sketch", 7),
            make_op(RowOpKind::Delete, "artist", 1),
            make_op(RowOpKind::Delete, "painting", 10),
            make_op(RowOpKind::Insert, "painting", 11),
            reusing_insert("artist", 1),
        ];
        assert_eq!(
            steps(&OpSorter::new(&edges).sort(ops)),
            vec![
                step(RowOpKind::Delete, "sketch", 7),
                step(RowOpKind::Delete, "painting", 10),
                step(RowOpKind::Delete, "artist", 1),
                step(RowOpKind::Insert, "artist", 1),
                step(RowOpKind::Insert, "painting", 11),
                step(RowOpKind::Delete, "gallery", 3),
            ]
        );
    }

    #[test]
    fn test_cycle_falls_back_to_input_order() {
        let edges = Edges::new(vec![("a", "b"), ("b", "c"), ("c", "a")]);
        let ops = vec![
            make_op(RowOpKind::Insert, "x", 1),
            make_op(RowOpKind::Insert, "b", 1),
            make_op(RowOpKind::Insert, "a", 1),
            make_op(RowOpKind::Insert, "c", 1),
        ];
        assert_eq!(
            labels(&OpSorter::new(&edges).sort(ops)),
            vec!["INSERT x{id: 1}", "INSERT b{id: 1}", "INSERT a{id: 1}", "INSERT c{id: 1}"]
        );
    }

    #[test]
    fn test_reflexive_all_deletes_run_in_delete_phase() {
        let edges = Edges::new(vec![("artist", "node")]).reflexive("node");
        let ops = vec![
            make_op(RowOpKind::Delete, "node", 1),
            make_op(RowOpKind::Delete, "node", 2),
            make_op(RowOpKind::Insert, "artist", 1),
            make_op(RowOpKind::Delete, "artist", 7),
        ];
        assert_eq!(
            labels(&OpSorter::new(&edges).sort(ops)),
            vec![
                "INSERT artist{id: 1}",
                "DELETE node{id: 1}",
                "DELETE node{id: 2}",
                "DELETE artist{id: 7}",
            ]
        );
    }

    fn arb_rows() -> impl Strategy<Value = Vec<RowOp>> {
        prop::collection::vec(
            (
                prop_oneof![
                    Just(RowOpKind::Insert),
                    Just(RowOpKind::Update),
                    Just(RowOpKind::Delete),
                ],
                prop_oneof![Just("artist"), Just("gallery"), Just("painting")],
                0i64..50,
            ),
            0..24,
        )
        .prop_map(|specs| {
            let mut seen = std::collections::HashSet::new();
            specs
                .into_iter()
                .filter(|(_, table, id)| seen.insert((*table, *id)))
                .map(|(kind, table, id)| make_op(kind, table, id))
                .collect()
        })
    }

    fn arb_key_reuse() -> impl Strategy<Value = Vec<RowOp>> {
        prop::collection::vec(
            (any::<bool>(), prop_oneof![Just("artist"), Just("painting")], 0i64..4),
            0..16,
        )
        .prop_map(|specs| {
            let mut deleted = std::collections::HashSet::new();
            specs
                .into_iter()
                .filter_map(|(is_delete, table, id)| {
                    if !is_delete {
                        Some(reusing_insert(table, id))
                    } else if deleted.insert((table, id)) {
                        Some(make_op(RowOpKind::Delete, table, id))
                    } else {
                        None
                    }
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn key_reuse_keeps_delete_order(rows in arb_key_reuse()) {
            let edges = Edges::new(vec![("artist", "painting")]);
            let sorted = steps(&OpSorter::new(&edges).sort(rows));
            for (i, (kind, table, key)) in sorted.iter().enumerate() {
                let later = &sorted[i + 1..];
                if *kind == RowOpKind::Delete && table == "artist" {
                    let child_delete_later = later
                        .iter()
                        .any(|(k, t, _)| *k == RowOpKind::Delete && t == "painting");
                    prop_assert!(!child_delete_later);
                }
                if *kind == RowOpKind::Insert {
                    let freed_later = later
                        .iter()
                        .any(|(k, t, other)| *k == RowOpKind::Delete && t == table && other == key);
                    prop_assert!(!freed_later);
                }
            }
        }

        #[test]
        fn sort_is_a_permutation(rows in arb_rows()) {
            let edges = Edges::new(vec![("artist", "painting"), ("gallery", "painting")]);
            let mut before = labels(&rows);
            let mut after = labels(&OpSorter::new(&edges).sort(rows));
            before.sort();
            after.sort();
            prop_assert_eq!(before, after);
        }

        #[test]
        fn parents_written_before_children_deleted_after(rows in arb_rows()) {
            let edges = Edges::new(vec![("artist", "painting"), ("gallery", "painting")]);
            let sorted = OpSorter::new(&edges).sort(rows);
            let position = |kind: RowOpKind, table: &str| -> Vec<usize> {
                sorted
                    .iter()
                    .enumerate()
                    .filter(|(_, op)| op.kind() == kind && op.entity_name() == table)
                    .map(|(i, _)| i)
                    .collect()
            };
            for parent in ["artist", "gallery"] {
                for p in position(RowOpKind::Insert, parent) {
                    prop_assert!(position(RowOpKind::Insert, "painting").iter().all(|&c| c > p));
                }
                for p in position(RowOpKind::Delete, parent) {
                    prop_assert!(position(RowOpKind::Delete, "painting").iter().all(|&c| c < p));
                }
            }
        }
    }
}
