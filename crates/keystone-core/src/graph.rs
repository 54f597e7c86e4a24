// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Directed-graph helpers used by dependency diagnostics.
//!
//! Kahn's algorithm orders the nodes; whatever it cannot order is either on a
//! cycle or downstream of one, and [`find_cycles`] walks that remainder to
//! extract the actual loops.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

/// The nodes that could not be ordered because of at least one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError<T> {
    /// Nodes on a cycle or reachable only through one.
    pub unresolved: Vec<T>,
}

fn adjacency<T: Copy + Eq + Hash>(edges: impl IntoIterator<Item = (T, T)>) -> HashMap<T, Vec<T>> {
    let mut adjacency_list: HashMap<T, Vec<T>> = HashMap::new();
    for (from, to) in edges {
        adjacency_list.entry(from).or_default().push(to);
    }
    adjacency_list
}

/// Orders `nodes` so that every edge `(from, to)` has `from` before `to`.
///
/// # Errors
///
/// Returns [`CycleError`] with the unresolved nodes, in input order, if the
/// graph has a cycle.
pub fn topological_sort<T>(
    nodes: impl IntoIterator<Item = T>,
    edges: impl IntoIterator<Item = (T, T)>,
) -> Result<Vec<T>, CycleError<T>>
where
    T: Copy + Eq + Hash,
{
    let node_list: Vec<T> = nodes.into_iter().collect();
    let adjacency_list = adjacency(edges);
    let mut in_degree: HashMap<T, usize> = node_list.iter().map(|id| (*id, 0)).collect();
    for targets in adjacency_list.values() {
        for target in targets {
            if let Some(degree) = in_degree.get_mut(target) {
                *degree += 1;
            }
        }
    }

    let mut queue: VecDeque<T> = node_list
        .iter()
        .copied()
        .filter(|n| in_degree.get(n).copied().unwrap_or(0) == 0)
        .collect();

    let mut sorted = Vec::with_capacity(node_list.len());
    while let Some(node) = queue.pop_front() {
        sorted.push(node);
        for next in adjacency_list.get(&node).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*next);
                }
            }
        }
    }

    if sorted.len() == node_list.len() {
        Ok(sorted)
    } else {
        let done: HashSet<T> = sorted.into_iter().collect();
        Err(CycleError {
            unresolved: node_list.into_iter().filter(|n| !done.contains(n)).collect(),
        })
    }
}

/// Finds cycles with a depth-first walk; each distinct loop found is reported once.
///
/// Every cycle is returned as its node path, starting from the node first
/// met in `nodes` order; the closing edge back to the first node is implied.
pub fn find_cycles<T>(
    nodes: impl IntoIterator<Item = T>,
    edges: impl IntoIterator<Item = (T, T)>,
) -> Vec<Vec<T>>
where
    T: Copy + Eq + Hash,
{
    let node_list: Vec<T> = nodes.into_iter().collect();
    let adjacency_list = adjacency(edges);
    let mut cycles: Vec<Vec<T>> = Vec::new();
    let mut seen: HashSet<Vec<T>> = HashSet::new();
    let mut finished: HashSet<T> = HashSet::new();

    for &start in &node_list {
        if finished.contains(&start) {
            continue;
        }
        let mut path: Vec<T> = vec![start];
        let mut cursors: Vec<usize> = vec![0];
        while let Some(&node) = path.last() {
            let depth = path.len() - 1;
            let next = adjacency_list
                .get(&node)
                .and_then(|targets| targets.get(cursors[depth]).copied());
            cursors[depth] += 1;
            match next {
                Some(next) => {
                    if let Some(index) = path.iter().position(|n| *n == next) {
                        let cycle = path[index..].to_vec();
                        if seen.insert(canonical(&cycle, &node_list)) {
                            cycles.push(cycle);
                        }
                    } else if !finished.contains(&next) {
                        path.push(next);
                        cursors.push(0);
                    }
                }
                None => {
                    finished.insert(node);
                    path.pop();
                    cursors.pop();
                }
            }
        }
    }
    cycles
}

/// Rotates a cycle so it starts at its earliest node in `order`.
fn canonical<T: Copy + Eq>(cycle: &[T], order: &[T]) -> Vec<T> {
    let rank = |n: &T| order.iter().position(|o| o == n).unwrap_or(usize::MAX);
    let start = (0..cycle.len())
        .min_by_key(|&i| rank(&cycle[i]))
        .unwrap_or(0);
    cycle[start..]
        .iter()
        .chain(cycle[..start].iter())
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_orders_dependencies_first() {
        let order = topological_sort([1, 2, 3], [(1, 2), (2, 3)]).unwrap();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_sort_reports_unresolved_nodes() {
        let err = topological_sort([1, 2, 3, 4], [(1, 2), (2, 3), (3, 2), (3, 4)]).unwrap_err();
        assert_eq!(err.unresolved, vec![2, 3, 4]);
    }

    #[test]
    fn test_find_cycles_reports_each_loop_once() {
        let cycles = find_cycles([1, 2, 3, 4], [(1, 2), (2, 1), (3, 4), (4, 3), (2, 3)]);
        assert_eq!(cycles, vec![vec![1, 2], vec![3, 4]]);
    }

    #[test]
    fn test_find_cycles_on_acyclic_graph() {
        assert!(find_cycles(["a", "b"], [("a", "b")]).is_empty());
    }

    #[test]
    fn test_self_loop() {
        assert_eq!(find_cycles([7], [(7, 7)]), vec![vec![7]]);
    }
}
