use std::collections::HashMap;

use crate::scheduler::operation::{Operation, OperationId};

/// Batch after dependency resolution.
#[derive(Debug, Default)]
pub struct ResolvedBatch {
    /// Every dependency precedes its dependents.
    pub ordered: Vec<Operation>,
    /// Operations sharing a connected component with a dependency cycle.
    pub dropped: Vec<Operation>,
}

/// Stable grouping by operation type in affinity order.
#[must_use]
pub fn group_by_kind(mut operations: Vec<Operation>) -> Vec<Operation> {
    operations.sort_by_key(Operation::kind);
    operations
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Orders a batch so dependencies run first.
///
/// Dependencies on ids outside the batch are treated as satisfied. When a cycle is
/// found, every operation weakly connected to it within the batch is moved to
/// [`ResolvedBatch::dropped`]; the rest keep a topological order that otherwise
/// follows the input order.
#[must_use]
pub fn resolve_batch(operations: Vec<Operation>) -> ResolvedBatch {
    let positions: HashMap<OperationId, usize> =
        operations.iter().enumerate().map(|(i, op)| (op.id, i)).collect();

    let edges: Vec<Vec<usize>> = operations
        .iter()
        .map(|op| op.dependencies.iter().filter_map(|dep| positions.get(dep).copied()).collect())
        .collect();

    let in_cycle = find_cycle_nodes(&edges);
    let dropped_nodes = if in_cycle.iter().any(|&c| c) {
        expand_to_components(&edges, &in_cycle)
    } else {
        in_cycle
    };

    let order = topological_order(&edges, &dropped_nodes);

    let mut slots: Vec<Option<Operation>> = operations.into_iter().map(Some).collect();
    let ordered = order.into_iter().filter_map(|i| slots[i].take()).collect();
    let dropped = slots
        .into_iter()
        .enumerate()
        .filter(|(i, _)| dropped_nodes[*i])
        .filter_map(|(_, op)| op)
        .collect();

    ResolvedBatch { ordered, dropped }
}

/// Marks nodes that close a cycle (reached again while still on the DFS stack).
fn find_cycle_nodes(edges: &[Vec<usize>]) -> Vec<bool> {
    let mut marks = vec![Mark::Unvisited; edges.len()];
    let mut in_cycle = vec![false; edges.len()];

    for start in 0..edges.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        // Iterative DFS: (node, next edge index).
        let mut stack = vec![(start, 0usize)];
        marks[start] = Mark::OnStack;

        while let Some(&mut (node, ref mut next)) = stack.last_mut() {
            if let Some(&dep) = edges[node].get(*next) {
                *next += 1;
                match marks[dep] {
                    Mark::Unvisited => {
                        marks[dep] = Mark::OnStack;
                        stack.push((dep, 0));
                    }
                    Mark::OnStack => in_cycle[dep] = true,
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                stack.pop();
            }
        }
    }

    in_cycle
}

fn find_root(parent: &mut [usize], mut node: usize) -> usize {
    while parent[node] != node {
        parent[node] = parent[parent[node]];
        node = parent[node];
    }
    node
}

/// Widens the cycle marks to every node in the same weakly connected component.
fn expand_to_components(edges: &[Vec<usize>], in_cycle: &[bool]) -> Vec<bool> {
    let mut parent: Vec<usize> = (0..edges.len()).collect();
    for (node, deps) in edges.iter().enumerate() {
        for &dep in deps {
            let a = find_root(&mut parent, node);
            let b = find_root(&mut parent, dep);
            if a != b {
                parent[a] = b;
            }
        }
    }

    let mut tainted = vec![false; edges.len()];
    for node in 0..edges.len() {
        if in_cycle[node] {
            let root = find_root(&mut parent, node);
            tainted[root] = true;
        }
    }

    (0..edges.len()).map(|node| tainted[find_root(&mut parent, node)]).collect()
}

/// Post-order DFS over the surviving nodes, visiting roots in input order.
fn topological_order(edges: &[Vec<usize>], skip: &[bool]) -> Vec<usize> {
    let mut visited = skip.to_vec();
    let mut order = Vec::with_capacity(edges.len());

    for start in 0..edges.len() {
        if visited[start] {
            continue;
        }
        let mut stack = vec![(start, 0usize)];
        visited[start] = true;

        while let Some(&mut (node, ref mut next)) = stack.last_mut() {
            if let Some(&dep) = edges[node].get(*next) {
                *next += 1;
                if !visited[dep] {
                    visited[dep] = true;
                    stack.push((dep, 0));
                }
            } else {
                order.push(node);
                stack.pop();
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::operation::{
        ApproveParams, OperationPayload, RevokeParams, VoteParams,
    };

    fn call(label: &str) -> Operation {
        Operation::new(OperationPayload::call(label, None))
    }

    fn labels(ops: &[Operation]) -> Vec<String> {
        ops.iter()
            .map(|o| match &o.payload {
                OperationPayload::Call(call) => call.method.clone(),
                other => other.kind().to_string(),
            })
            .collect()
    }

    #[test]
    fn test_dependencies_run_first() {
        let a = call("A");
        let c = call("C").depends_on(a.id);
        let b = call("B").depends_on(c.id);

        let resolved = resolve_batch(vec![b, c, a]);
        assert_eq!(labels(&resolved.ordered), vec!["A", "C", "B"]);
        assert!(resolved.dropped.is_empty());
    }

    #[test]
    fn test_missing_dependencies_are_satisfied() {
        let outside = call("outside");
        let a = call("A").depends_on(outside.id);
        let b = call("B");

        let resolved = resolve_batch(vec![a, b]);
        assert_eq!(labels(&resolved.ordered), vec!["A", "B"]);
    }

    #[test]
    fn test_cycle_drops_whole_component() {
        let mut x = call("X");
        let y = call("Y").depends_on(x.id);
        x.dependencies.push(y.id);
        // Z hangs off the cycle; W is independent.
        let z = call("Z").depends_on(y.id);
        let w = call("W");

        let resolved = resolve_batch(vec![x, w, y, z]);
        assert_eq!(labels(&resolved.ordered), vec!["W"]);
        let mut dropped = labels(&resolved.dropped);
        dropped.sort();
        assert_eq!(dropped, vec!["X", "Y", "Z"]);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut a = call("A");
        a.dependencies.push(a.id);
        let resolved = resolve_batch(vec![a, call("B")]);
        assert_eq!(labels(&resolved.ordered), vec!["B"]);
        assert_eq!(resolved.dropped.len(), 1);
    }

    #[test]
    fn test_group_by_kind_is_stable() {
        let revoke = Operation::new(OperationPayload::Revoke(RevokeParams {
            token: "t".into(),
            spender: "s".into(),
        }));
        let approve = Operation::new(OperationPayload::Approve(ApproveParams {
            token: "t".into(),
            spender: "s".into(),
            amount: "1".into(),
        }));
        let vote =
            Operation::new(OperationPayload::Vote(VoteParams { proposal_id: "1".into(), support: true }));

        let grouped = group_by_kind(vec![revoke, call("c1"), vote, approve, call("c2")]);
        assert_eq!(labels(&grouped), vec!["approve", "vote", "c1", "c2", "revoke"]);
    }
}
