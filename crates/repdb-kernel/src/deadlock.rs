//! Deadlock detection over the wait-for graph.
//!
//! Detection is a pure read of the current edge set. A single depth-first
//! traversal marks each transaction unseen, in progress or done; reaching
//! an in-progress transaction closes a cycle, which is read off the active
//! DFS path. The traversal keeps going after a cycle is found, so
//! independent deadlocked groups are all reported by one call.
//!
//! Each cycle yields one victim: the member that started last (ties go to
//! the lowest id). The traversal uses an explicit stack, so long chains of
//! waiters cannot exhaust the call stack.

use std::collections::{BTreeMap, BTreeSet};

use repdb_types::{Tick, TxnId};

use crate::waiting::WaitEdge;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unseen,
    InProgress,
    Done,
}

/// Builds the adjacency list: waiter -> blockers, in edge order.
fn adjacency<'a>(edges: impl IntoIterator<Item = &'a WaitEdge>) -> BTreeMap<TxnId, Vec<TxnId>> {
    let mut graph: BTreeMap<TxnId, Vec<TxnId>> = BTreeMap::new();
    for edge in edges {
        let blockers = graph.entry(edge.waiter).or_default();
        if !blockers.contains(&edge.blocker) {
            blockers.push(edge.blocker);
        }
    }
    graph
}

/// Enumerates the cycles closed by back edges of a DFS over the graph.
///
/// Every returned cycle lists its members in wait order: each member waits
/// on the next, and the last waits on the first.
pub fn find_cycles<'a>(edges: impl IntoIterator<Item = &'a WaitEdge>) -> Vec<Vec<TxnId>> {
    let graph = adjacency(edges);
    let mut marks: BTreeMap<TxnId, Mark> = BTreeMap::new();
    let mut cycles = Vec::new();

    for &root in graph.keys() {
        if marks.get(&root).copied().unwrap_or(Mark::Unseen) != Mark::Unseen {
            continue;
        }

        marks.insert(root, Mark::InProgress);
        let mut path = vec![root];
        let mut cursors = vec![0usize];

        while let Some(&node) = path.last() {
            let depth = path.len() - 1;
            let children = graph.get(&node).map_or(&[][..], Vec::as_slice);

            if let Some(&child) = children.get(cursors[depth]) {
                cursors[depth] += 1;
                match marks.get(&child).copied().unwrap_or(Mark::Unseen) {
                    Mark::InProgress => {
                        // Walk the active path back to `child`.
                        if let Some(start) = path.iter().rposition(|member| *member == child) {
                            cycles.push(path[start..].to_vec());
                        }
                    }
                    Mark::Unseen => {
                        marks.insert(child, Mark::InProgress);
                        path.push(child);
                        cursors.push(0);
                    }
                    Mark::Done => {}
                }
            } else {
                marks.insert(node, Mark::Done);
                path.pop();
                cursors.pop();
            }
        }
    }

    cycles
}

/// Picks the youngest member of each cycle.
///
/// `start_time` must return the begin tick of every transaction that
/// appears in `cycles`.
pub fn select_victims(
    cycles: &[Vec<TxnId>],
    start_time: impl Fn(TxnId) -> Tick,
) -> BTreeSet<TxnId> {
    cycles
        .iter()
        .filter_map(|cycle| {
            cycle.iter().copied().max_by(|a, b| {
                start_time(*a)
                    .cmp(&start_time(*b))
                    .then_with(|| b.cmp(a))
            })
        })
        .collect()
}

/// Finds every cycle in `edges` and returns the deduplicated victim set.
pub fn detect<'a>(
    edges: impl IntoIterator<Item = &'a WaitEdge>,
    start_time: impl Fn(TxnId) -> Tick,
) -> BTreeSet<TxnId> {
    let cycles = find_cycles(edges);
    if !cycles.is_empty() {
        tracing::debug!(?cycles, "wait-for cycles found");
    }
    select_victims(&cycles, start_time)
}
