use super::{CommitOrder, DependencyEdge};
use crate::error::{CommitError, CommitResult};
use crate::types::EntityType;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Computes the commit order of `types`.
///
/// Two layered Kahn sorts:
///
/// 1. Over `mapping_edges`, ties broken by type name. When every remaining
///    type still waits on another, the candidates are the members of a
///    structural cycle that waits on nothing outside itself. Among them the
///    smallest-named type whose unsatisfied edges are all optional (else the
///    smallest-named one) is emitted anyway and those edges are recorded as
///    broken. A type that only hangs off a cycle is never chosen, so broken
///    edges always lie on a cycle. Self-references are not ordering
///    constraints.
/// 2. Over `explicit_edges` plus the edges pass 1 honoured, ties broken by
///    pass-1 position. A cycle here is an error.
///
/// # Errors
///
/// Returns `UnknownEntityType` if an edge names a type not in `types`, and
/// `CyclicDependency` naming one concrete cycle if explicit edges cannot be
/// satisfied.
pub fn compute_order(
    types: &[EntityType],
    mapping_edges: &[DependencyEdge],
    explicit_edges: &[DependencyEdge],
) -> CommitResult<CommitOrder> {
    let mut nodes: Vec<EntityType> = types.to_vec();
    nodes.sort();
    nodes.dedup();
    let index: HashMap<&EntityType, usize> =
        nodes.iter().enumerate().map(|(i, t)| (t, i)).collect();

    let lookup = |t: &EntityType| {
        index
            .get(t)
            .copied()
            .ok_or_else(|| CommitError::unknown_type(t))
    };

    let mut structural = Graph::new(nodes.len());
    for edge in mapping_edges {
        let dependent = lookup(&edge.dependent)?;
        let prerequisite = lookup(&edge.prerequisite)?;
        if dependent != prerequisite {
            structural.add(dependent, prerequisite, edge.mandatory);
        }
    }

    let first = structural.sort_breaking_cycles(&nodes);
    let mut position = vec![0; nodes.len()];
    for (pos, &node) in first.order.iter().enumerate() {
        position[node] = pos;
    }

    let mut layered = Graph::new(nodes.len());
    for (dependent, prerequisites) in structural.prerequisites.iter().enumerate() {
        for &(prerequisite, mandatory) in prerequisites {
            if !first.broken.contains(&(dependent, prerequisite)) {
                layered.add(dependent, prerequisite, mandatory);
            }
        }
    }
    for edge in explicit_edges {
        let dependent = lookup(&edge.dependent)?;
        let prerequisite = lookup(&edge.prerequisite)?;
        if dependent == prerequisite {
            return Err(CommitError::CyclicDependency {
                members: vec![edge.dependent.clone(), edge.prerequisite.clone()],
            });
        }
        layered.add(dependent, prerequisite, true);
    }

    let order = layered.sort_strict(&position, &nodes)?;
    let broken_edges = first
        .broken
        .iter()
        .map(|&(dependent, prerequisite)| {
            let mandatory = structural.is_mandatory(dependent, prerequisite);
            DependencyEdge::new(nodes[dependent].clone(), nodes[prerequisite].clone(), mandatory)
        })
        .collect();

    Ok(CommitOrder::new(
        order.into_iter().map(|i| nodes[i].clone()).collect(),
        broken_edges,
    ))
}

struct FirstPass {
    order: Vec<usize>,
    broken: BTreeSet<(usize, usize)>,
}

/// Adjacency lists over node indices.
struct Graph {
    /// node -> (prerequisite, mandatory)
    prerequisites: Vec<Vec<(usize, bool)>>,
    /// node -> dependents
    dependents: Vec<Vec<usize>>,
}

impl Graph {
    fn new(size: usize) -> Self {
        Self {
            prerequisites: vec![Vec::new(); size],
            dependents: vec![Vec::new(); size],
        }
    }

    fn add(&mut self, dependent: usize, prerequisite: usize, mandatory: bool) {
        let existing = self.prerequisites[dependent]
            .iter_mut()
            .find(|(p, _)| *p == prerequisite);
        match existing {
            Some((_, m)) => *m |= mandatory,
            None => {
                self.prerequisites[dependent].push((prerequisite, mandatory));
                self.dependents[prerequisite].push(dependent);
            }
        }
    }

    fn is_mandatory(&self, dependent: usize, prerequisite: usize) -> bool {
        self.prerequisites[dependent]
            .iter()
            .any(|&(p, m)| p == prerequisite && m)
    }

    fn pending_counts(&self) -> Vec<usize> {
        self.prerequisites.iter().map(Vec::len).collect()
    }

    /// Kahn sort by node index (name order); never fails.
    fn sort_breaking_cycles(&self, nodes: &[EntityType]) -> FirstPass {
        let size = self.prerequisites.len();
        let mut pending = self.pending_counts();
        let mut emitted = vec![false; size];
        let mut ready: BTreeSet<usize> = (0..size).filter(|&n| pending[n] == 0).collect();
        let mut order = Vec::with_capacity(size);
        let mut broken = BTreeSet::new();

        while order.len() < size {
            let node = match ready.pop_first() {
                Some(node) => node,
                None => {
                    let done = &emitted;
                    let roots = self.root_cycle_members(done);
                    let unsatisfied = |n: usize| {
                        self.prerequisites[n]
                            .iter()
                            .filter(move |&&(p, _)| !done[p])
                    };
                    let chosen = roots
                        .iter()
                        .copied()
                        .find(|&n| unsatisfied(n).all(|&(_, mandatory)| !mandatory))
                        .or_else(|| roots.first().copied());
                    let Some(node) = chosen else { break };
                    for &(prerequisite, _) in unsatisfied(node) {
                        debug!(
                            dependent = %nodes[node],
                            prerequisite = %nodes[prerequisite],
                            "breaking structural cycle"
                        );
                        broken.insert((node, prerequisite));
                    }
                    node
                }
            };
            emitted[node] = true;
            order.push(node);
            for &dependent in &self.dependents[node] {
                if emitted[dependent] {
                    continue;
                }
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        FirstPass { order, broken }
    }

    /// Nodes not yet `done` reachable from `start` over prerequisites that
    /// are not yet `done`.
    fn reachable(&self, start: usize, done: &[bool]) -> Vec<bool> {
        let mut seen = vec![false; done.len()];
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for &(prerequisite, _) in &self.prerequisites[node] {
                if !done[prerequisite] && !seen[prerequisite] {
                    seen[prerequisite] = true;
                    stack.push(prerequisite);
                }
            }
        }
        seen
    }

    /// Remaining nodes, in index order, whose every remaining prerequisite
    /// leads back to them: the members of strongly connected components with
    /// no remaining prerequisite component.
    fn root_cycle_members(&self, done: &[bool]) -> Vec<usize> {
        let reach: Vec<Vec<bool>> = (0..done.len())
            .map(|n| {
                if done[n] {
                    Vec::new()
                } else {
                    self.reachable(n, done)
                }
            })
            .collect();
        (0..done.len())
            .filter(|&n| !done[n])
            .filter(|&n| (0..done.len()).all(|m| !reach[n][m] || reach[m][n]))
            .collect()
    }

    /// Kahn sort by `priority`; fails on a cycle.
    fn sort_strict(&self, priority: &[usize], nodes: &[EntityType]) -> CommitResult<Vec<usize>> {
        let size = self.prerequisites.len();
        let mut pending = self.pending_counts();
        let mut emitted = vec![false; size];
        let mut ready: BTreeSet<(usize, usize)> = (0..size)
            .filter(|&n| pending[n] == 0)
            .map(|n| (priority[n], n))
            .collect();
        let mut order = Vec::with_capacity(size);

        while let Some((_, node)) = ready.pop_first() {
            emitted[node] = true;
            order.push(node);
            for &dependent in &self.dependents[node] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.insert((priority[dependent], dependent));
                }
            }
        }

        if order.len() < size {
            return Err(CommitError::CyclicDependency {
                members: self.find_cycle(&emitted, priority, nodes),
            });
        }
        Ok(order)
    }

    /// Walks unsatisfied prerequisites from the first stuck node until a node
    /// repeats. Every stuck node has at least one stuck prerequisite, so the
    /// walk always closes.
    fn find_cycle(&self, emitted: &[bool], priority: &[usize], nodes: &[EntityType]) -> Vec<EntityType> {
        let Some(start) = (0..emitted.len())
            .filter(|&n| !emitted[n])
            .min_by_key(|&n| priority[n])
        else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut seen = HashMap::from([(start, 0usize)]);
        let mut current = start;
        loop {
            let next = self.prerequisites[current]
                .iter()
                .map(|&(p, _)| p)
                .filter(|&p| !emitted[p])
                .min_by_key(|&p| priority[p]);
            let Some(next) = next else { break };
            if let Some(&at) = seen.get(&next) {
                let mut members: Vec<EntityType> =
                    path[at..].iter().map(|&n| nodes[n].clone()).collect();
                members.push(nodes[next].clone());
                return members;
            }
            seen.insert(next, path.len());
            path.push(next);
            current = next;
        }
        path.into_iter().map(|n| nodes[n].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn types(names: &[&str]) -> Vec<EntityType> {
        names.iter().map(|n| EntityType::new(*n)).collect()
    }

    fn edge(dependent: &str, prerequisite: &str) -> DependencyEdge {
        DependencyEdge::new(dependent, prerequisite, true)
    }

    fn optional(dependent: &str, prerequisite: &str) -> DependencyEdge {
        DependencyEdge::new(dependent, prerequisite, false)
    }

    fn names(order: &CommitOrder) -> Vec<&str> {
        order.iter().map(EntityType::as_str).collect()
    }

    #[test]
    fn chain_roots_first() {
        let order = compute_order(
            &types(&["Feed", "Post", "User", "Company"]),
            &[edge("User", "Company"), edge("Post", "User"), edge("Feed", "Post")],
            &[],
        )
        .unwrap();
        assert_eq!(names(&order), vec!["Company", "User", "Post", "Feed"]);
        assert!(order.broken_edges().is_empty());
    }

    #[test]
    fn ties_broken_by_name() {
        let order = compute_order(&types(&["Zeta", "Alpha", "Mid"]), &[], &[]).unwrap();
        assert_eq!(names(&order), vec!["Alpha", "Mid", "Zeta"]);
    }

    #[test]
    fn self_reference_is_not_a_constraint() {
        let order = compute_order(
            &types(&["Employee", "Company"]),
            &[optional("Employee", "Employee"), edge("Employee", "Company")],
            &[],
        )
        .unwrap();
        assert_eq!(names(&order), vec!["Company", "Employee"]);
        assert!(order.broken_edges().is_empty());
    }

    #[test]
    fn structural_cycle_breaks_optional_edge() {
        // Department.manager is optional, Employee.department is mandatory.
        let order = compute_order(
            &types(&["Department", "Employee"]),
            &[
                optional("Department", "Employee"),
                edge("Employee", "Department"),
            ],
            &[],
        )
        .unwrap();
        assert_eq!(names(&order), vec!["Department", "Employee"]);
        assert_eq!(order.broken_edges(), &[optional("Department", "Employee")]);
    }

    #[test]
    fn all_mandatory_cycle_falls_back_to_name() {
        let order = compute_order(
            &types(&["B", "A"]),
            &[edge("A", "B"), edge("B", "A")],
            &[],
        )
        .unwrap();
        assert_eq!(names(&order), vec!["A", "B"]);
        assert_eq!(order.broken_edges().len(), 1);
        assert!(order.broken_edges()[0].mandatory);
    }

    #[test]
    fn type_hanging_off_a_cycle_waits_for_it() {
        // "Aaa" sorts first but only depends on the X/Y cycle.
        let order = compute_order(
            &types(&["Aaa", "X", "Y"]),
            &[edge("X", "Y"), edge("Y", "X"), edge("Aaa", "X")],
            &[],
        )
        .unwrap();
        assert_eq!(names(&order), vec!["X", "Aaa", "Y"]);
        assert_eq!(order.broken_edges(), &[edge("X", "Y")]);
    }

    #[test]
    fn optional_edge_inside_downstream_cycle_is_broken_after_upstream_one() {
        // B <-> C hangs off the A <-> D cycle; only cycle edges break.
        let order = compute_order(
            &types(&["A", "B", "C", "D"]),
            &[
                edge("A", "D"),
                edge("D", "A"),
                optional("B", "C"),
                edge("C", "B"),
                edge("B", "D"),
            ],
            &[],
        )
        .unwrap();
        assert_eq!(names(&order), vec!["A", "D", "B", "C"]);
        assert_eq!(
            order.broken_edges(),
            &[edge("A", "D"), optional("B", "C")]
        );
    }

    #[test]
    fn explicit_edge_forces_swap() {
        let order = compute_order(
            &types(&["Audit", "Invoice", "Ledger"]),
            &[],
            &[edge("Audit", "Ledger")],
        )
        .unwrap();
        assert_eq!(names(&order), vec!["Invoice", "Ledger", "Audit"]);
    }

    #[test]
    fn explicit_edge_keeps_pass_one_order_otherwise() {
        let order = compute_order(
            &types(&["A", "B", "C", "D"]),
            &[edge("B", "A")],
            &[edge("C", "D")],
        )
        .unwrap();
        assert_eq!(names(&order), vec!["A", "B", "D", "C"]);
    }

    #[test]
    fn explicit_cycle_is_an_error() {
        let result = compute_order(
            &types(&["A", "B", "C"]),
            &[edge("B", "A")],
            &[edge("C", "B"), edge("A", "C")],
        );
        match result {
            Err(CommitError::CyclicDependency { members }) => {
                assert_eq!(members.first(), members.last());
                let inner: BTreeSet<_> = members.iter().map(EntityType::as_str).collect();
                assert_eq!(inner, BTreeSet::from(["A", "B", "C"]));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn explicit_self_edge_is_an_error() {
        let result = compute_order(&types(&["A"]), &[], &[edge("A", "A")]);
        assert!(matches!(result, Err(CommitError::CyclicDependency { .. })));
    }

    #[test]
    fn unknown_type_in_edge() {
        let result = compute_order(&types(&["A"]), &[], &[edge("A", "Ghost")]);
        assert!(matches!(result, Err(CommitError::UnknownEntityType { name }) if name == "Ghost"));
    }

    /// Metadata whose edges always point from a higher to a lower index, so
    /// both layers are acyclic together.
    fn acyclic_metadata() -> impl Strategy<Value = (Vec<EntityType>, Vec<DependencyEdge>, Vec<DependencyEdge>)> {
        (2usize..12).prop_flat_map(|n| {
            let pairs = proptest::collection::vec((0..n, 0..n, any::<bool>(), any::<bool>()), 0..n * 2);
            pairs.prop_map(move |pairs| {
                let types: Vec<EntityType> = (0..n).map(|i| EntityType::new(format!("T{i:02}"))).collect();
                let mut mapping = Vec::new();
                let mut explicit = Vec::new();
                for (a, b, mandatory, is_explicit) in pairs {
                    if a == b {
                        continue;
                    }
                    let (dependent, prerequisite) = if a > b { (a, b) } else { (b, a) };
                    let edge = DependencyEdge::new(
                        types[dependent].clone(),
                        types[prerequisite].clone(),
                        mandatory,
                    );
                    if is_explicit {
                        explicit.push(edge);
                    } else {
                        mapping.push(edge);
                    }
                }
                (types, mapping, explicit)
            })
        })
    }

    proptest! {
        #[test]
        fn order_respects_every_edge((types, mapping, explicit) in acyclic_metadata()) {
            let order = compute_order(&types, &mapping, &explicit).unwrap();
            prop_assert_eq!(order.len(), types.len());
            prop_assert!(order.broken_edges().is_empty());
            for edge in mapping.iter().chain(&explicit) {
                let before = order.position(&edge.prerequisite).unwrap();
                let after = order.position(&edge.dependent).unwrap();
                prop_assert!(before < after);
            }
        }

        #[test]
        fn order_is_deterministic((types, mapping, explicit) in acyclic_metadata()) {
            let first = compute_order(&types, &mapping, &explicit).unwrap();
            let mut shuffled = types.clone();
            shuffled.reverse();
            let mut reversed_mapping = mapping.clone();
            reversed_mapping.reverse();
            let second = compute_order(&shuffled, &reversed_mapping, &explicit).unwrap();
            prop_assert_eq!(first.as_slice(), second.as_slice());
        }
    }
}
