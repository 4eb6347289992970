//! Entity dependency graph built from foreign-key metadata.
//!
//! [`DependencyGraph`] is the stock [`EntitySorter`]: an entity referenced by
//! a foreign key must be written before the entity holding the key. Cycles
//! are contracted into strongly connected components; every entity in a
//! multi-member component, and every self-referencing entity, is reflexive.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::OnceLock;

use ormflush_core::{EntityInfo, EntityRef, MetadataError, MetadataErrorKind};

use crate::sorter::EntitySorter;

/// Derived view of the graph, rebuilt lazily after registrations.
#[derive(Debug, Clone)]
struct GraphIndex {
    /// Component of each registered entity.
    component: Vec<usize>,
    /// Members of each component, in registration order.
    members: Vec<Vec<usize>>,
    /// Components in dependency order (referenced first).
    topo: Vec<usize>,
    /// Components reachable from each component, excluding itself.
    reaches: Vec<HashSet<usize>>,
}

/// Foreign-key dependency graph over registered entities.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    entities: Vec<EntityRef>,
    slots: HashMap<String, usize>,
    index: OnceLock<GraphIndex>,
}

impl DependencyGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity.
    ///
    /// Foreign keys to entities that are never registered are ignored.
    pub fn register(&mut self, entity: EntityRef) -> Result<(), MetadataError> {
        entity.validate()?;
        if self.slots.contains_key(entity.name()) {
            return Err(MetadataError::new(
                MetadataErrorKind::DuplicateEntity,
                format!("entity '{}' is already registered", entity.name()),
            ));
        }
        tracing::debug!(
            entity = entity.name(),
            references = ?entity.referenced_entities(),
            "Registering entity dependencies"
        );
        self.slots.insert(entity.name().to_string(), self.entities.len());
        self.entities.push(entity);
        self.index = OnceLock::new();
        Ok(())
    }

    /// Register several entities in order.
    pub fn register_all(
        &mut self,
        entities: impl IntoIterator<Item = EntityRef>,
    ) -> Result<(), MetadataError> {
        for entity in entities {
            self.register(entity)?;
        }
        Ok(())
    }

    /// Build a graph from entities (builder pattern).
    pub fn with_entities(
        entities: impl IntoIterator<Item = EntityRef>,
    ) -> Result<Self, MetadataError> {
        let mut graph = Self::new();
        graph.register_all(entities)?;
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Registered metadata for an entity name.
    pub fn entity(&self, name: &str) -> Option<&EntityRef> {
        self.slots.get(name).map(|&slot| &self.entities[slot])
    }

    /// Registered entity names in dependency order.
    ///
    /// Members of one cycle are listed together in registration order.
    pub fn order(&self) -> Vec<&str> {
        let index = self.index();
        index
            .topo
            .iter()
            .flat_map(|&c| index.members[c].iter())
            .map(|&slot| self.entities[slot].name())
            .collect()
    }

    /// Groups of entities that reference each other in a cycle.
    pub fn cycles(&self) -> Vec<Vec<&str>> {
        let index = self.index();
        index
            .topo
            .iter()
            .filter(|&&c| index.members[c].len() > 1)
            .map(|&c| {
                index.members[c]
                    .iter()
                    .map(|&slot| self.entities[slot].name())
                    .collect()
            })
            .collect()
    }

    fn index(&self) -> &GraphIndex {
        self.index.get_or_init(|| {
            let index = build_index(&self.entities, &self.slots);
            tracing::debug!(
                entities = self.entities.len(),
                components = index.members.len(),
                "Dependency graph indexed"
            );
            index
        })
    }

    fn component_of(&self, name: &str) -> Option<usize> {
        self.slots.get(name).map(|&slot| self.index().component[slot])
    }
}

impl EntitySorter for DependencyGraph {
    fn compare(&self, a: &EntityInfo, b: &EntityInfo) -> Ordering {
        let (Some(ca), Some(cb)) = (self.component_of(a.name()), self.component_of(b.name())) else {
            return Ordering::Equal;
        };
        if ca == cb {
            return Ordering::Equal;
        }
        let reaches = &self.index().reaches;
        if reaches[ca].contains(&cb) {
            Ordering::Less
        } else if reaches[cb].contains(&ca) {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }

    fn is_reflexive(&self, entity: &EntityInfo) -> bool {
        match self.slots.get(entity.name()) {
            Some(&slot) => {
                let index = self.index();
                self.entities[slot].references_itself()
                    || index.members[index.component[slot]].len() > 1
            }
            None => entity.references_itself(),
        }
    }
}

fn build_index(entities: &[EntityRef], slots: &HashMap<String, usize>) -> GraphIndex {
    let n = entities.len();

    // Edge target -> source: the referenced entity goes first.
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (source, entity) in entities.iter().enumerate() {
        for target in entity.referenced_entities() {
            if let Some(&target) = slots.get(target) {
                if target != source {
                    adj[target].push(source);
                }
            }
        }
    }

    let component = strongly_connected(&adj);
    let count = component.iter().copied().max().map_or(0, |max| max + 1);

    let mut members: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (slot, &c) in component.iter().enumerate() {
        members[c].push(slot);
    }

    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); count];
    for (from, targets) in adj.iter().enumerate() {
        for &to in targets {
            if component[from] != component[to] {
                successors[component[from]].insert(component[to]);
            }
        }
    }

    // Kahn over components; ties go to the earliest registered member.
    let mut in_degree = vec![0usize; count];
    for succ in &successors {
        for &c in succ {
            in_degree[c] += 1;
        }
    }
    let first_member = |c: usize| members[c].first().copied().unwrap_or(usize::MAX);
    let mut ready: BTreeSet<(usize, usize)> = (0..count)
        .filter(|&c| in_degree[c] == 0)
        .map(|c| (first_member(c), c))
        .collect();
    let mut topo = Vec::with_capacity(count);
    while let Some((_, c)) = ready.pop_first() {
        topo.push(c);
        for &next in &successors[c] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert((first_member(next), next));
            }
        }
    }

    let mut reaches: Vec<HashSet<usize>> = vec![HashSet::new(); count];
    for &c in topo.iter().rev() {
        let mut reach = HashSet::new();
        for &next in &successors[c] {
            reach.insert(next);
            reach.extend(reaches[next].iter().copied());
        }
        reaches[c] = reach;
    }

    GraphIndex {
        component,
        members,
        topo,
        reaches,
    }
}

/// Tarjan's algorithm, iterative. Returns the component id of every node.
fn strongly_connected(adj: &[Vec<usize>]) -> Vec<usize> {
    let n = adj.len();
    let mut next_index = 0usize;
    let mut indices = vec![usize::MAX; n];
    let mut lowlinks = vec![usize::MAX; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut component = vec![usize::MAX; n];
    let mut next_component = 0usize;

    for start in 0..n {
        if indices[start] != usize::MAX {
            continue;
        }
        indices[start] = next_index;
        lowlinks[start] = next_index;
        next_index += 1;
        stack.push(start);
        on_stack[start] = true;
        let mut dfs: Vec<(usize, usize)> = vec![(start, 0)];

        while let Some((v, edge)) = dfs.last_mut() {
            let v = *v;
            if *edge < adj[v].len() {
                let w = adj[v][*edge];
                *edge += 1;
                if indices[w] == usize::MAX {
                    indices[w] = next_index;
                    lowlinks[w] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    dfs.push((w, 0));
                } else if on_stack[w] {
                    lowlinks[v] = lowlinks[v].min(indices[w]);
                }
                continue;
            }

            if lowlinks[v] == indices[v] {
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component[w] = next_component;
                    if w == v {
                        break;
                    }
                }
                next_component += 1;
            }
            let low = lowlinks[v];
            dfs.pop();
            if let Some((parent, _)) = dfs.last() {
                lowlinks[*parent] = lowlinks[*parent].min(low);
            }
        }
    }
    component
}
