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

//! Kahn's algorithm over a generic directed graph.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;

/// A cycle was detected. Holds the nodes that could not be ordered, in
/// their original input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError<T> {
    /// Nodes on, or downstream of, a cycle.
    pub unresolved: Vec<T>,
}

/// Performs a topological sort on a directed graph given as nodes and
/// `(parent, child)` edges.
///
/// Ties are broken by input order: among nodes whose dependencies are all
/// satisfied, the one listed first in `nodes` comes first. Edges naming
/// unknown nodes are ignored.
pub fn topological_sort<T>(
    nodes: impl IntoIterator<Item = T>,
    edges: impl IntoIterator<Item = (T, T)>,
) -> Result<Vec<T>, CycleError<T>>
where
    T: Copy + Eq + Hash,
{
    let node_list: Vec<T> = nodes.into_iter().collect();
    let mut in_degree: HashMap<T, usize> = node_list.iter().map(|id| (*id, 0)).collect();
    let mut adjacency_list: HashMap<T, Vec<T>> = HashMap::new();

    for (parent, child) in edges {
        if !in_degree.contains_key(&parent) {
            continue;
        }
        if let Some(degree) = in_degree.get_mut(&child) {
            *degree += 1;
            adjacency_list.entry(parent).or_default().push(child);
        }
    }

    // Ready nodes are keyed by their position in `nodes`.
    let position: HashMap<T, usize> = node_list
        .iter()
        .enumerate()
        .rev()
        .map(|(index, id)| (*id, index))
        .collect();
    let mut ready: BinaryHeap<Reverse<usize>> = node_list
        .iter()
        .enumerate()
        .filter(|(index, node)| in_degree.get(*node) == Some(&0) && position[*node] == *index)
        .map(|(index, _)| Reverse(index))
        .collect();

    let mut sorted_list = Vec::with_capacity(node_list.len());
    while let Some(Reverse(index)) = ready.pop() {
        let parent_node = node_list[index];
        sorted_list.push(parent_node);
        if let Some(children) = adjacency_list.get(&parent_node) {
            for child_node in children {
                if let Some(degree) = in_degree.get_mut(child_node) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(position[child_node]));
                    }
                }
            }
        }
    }

    if sorted_list.len() == node_list.len() {
        Ok(sorted_list)
    } else {
        let unresolved = node_list
            .into_iter()
            .filter(|node| in_degree.get(node).is_some_and(|degree| *degree > 0))
            .collect();
        Err(CycleError { unresolved })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_graph() {
        let sorted = topological_sort(Vec::<u32>::new(), Vec::new()).unwrap();
        assert!(sorted.is_empty());
    }

    #[test]
    fn test_chain_and_diamond() {
        //   1
        //  / \
        // 2   3
        //  \ /
        //   4
        let sorted = topological_sort([1, 2, 3, 4], [(1, 2), (1, 3), (2, 4), (3, 4)]).unwrap();
        assert_eq!(sorted, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_ties_follow_input_order() {
        let sorted = topological_sort([5, 3, 9], Vec::new()).unwrap();
        assert_eq!(sorted, vec![5, 3, 9]);
    }

    #[test]
    fn test_released_node_goes_before_later_roots() {
        // 'b' becomes ready after 'a', but is listed before 'c'.
        let sorted = topological_sort(['a', 'b', 'c'], [('a', 'b')]).unwrap();
        assert_eq!(sorted, vec!['a', 'b', 'c']);

        let sorted = topological_sort([4, 1, 3, 2], [(4, 2), (1, 3)]).unwrap();
        assert_eq!(sorted, vec![4, 1, 3, 2]);
    }

    #[test]
    fn test_cycle_reports_unresolved_nodes() {
        let err = topological_sort([0, 1, 2, 3], [(0, 1), (1, 2), (2, 1), (2, 3)]).unwrap_err();
        assert_eq!(err.unresolved, vec![1, 2, 3]);
    }

    #[test]
    fn test_edges_to_unknown_nodes_are_ignored() {
        let sorted = topological_sort([1, 2], [(1, 2), (2, 99), (42, 1)]).unwrap();
        assert_eq!(sorted, vec![1, 2]);
    }
}
