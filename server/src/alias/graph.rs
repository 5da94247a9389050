//! Alias dependency graph / cycle detector (C4, spec §4.4).
//!
//! Grounded on `server/utils/alias_graph.py`'s `networkx.DiGraph` wrapper:
//! one node per alias name, an edge from an alias to the first token of
//! each `;`/`&&`/`||`-separated segment of its body. Non-alias targets are
//! kept as terminal nodes so expansion depth can still be measured.

use std::collections::HashMap;
use std::sync::LazyLock;

use petgraph::algo::all_simple_paths;
use petgraph::graph::{DiGraph, NodeIndex};
use regex::Regex;

use super::model::AliasBundle;

static SEGMENT_SPLIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[;&|]+").unwrap());

/// Default expansion-depth cap (spec §4.4, §4.5).
pub const MAX_EXPANSION_DEPTH: usize = 10;

pub struct AliasGraph {
    graph: DiGraph<String, ()>,
    index_of: HashMap<String, NodeIndex>,
}

impl AliasGraph {
    /// Rebuilds the graph from scratch. Bundles are small (<=50 aliases),
    /// so a full rebuild per mutation (spec §9) is the simplest correct
    /// strategy.
    pub fn build(bundle: &AliasBundle) -> Self {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();

        for alias in &bundle.aliases {
            let key = alias.name.to_ascii_lowercase();
            index_of.entry(key).or_insert_with(|| graph.add_node(alias.name.clone()));
        }

        for alias in &bundle.aliases {
            let from = index_of[&alias.name.to_ascii_lowercase()];
            for target in extract_references(&alias.body) {
                let key = target.to_ascii_lowercase();
                let to = *index_of.entry(key).or_insert_with(|| graph.add_node(target.clone()));
                graph.add_edge(from, to, ());
            }
        }

        Self { graph, index_of }
    }

    fn node(&self, name: &str) -> Option<NodeIndex> {
        self.index_of.get(&name.to_ascii_lowercase()).copied()
    }

    /// DFS for a cycle reachable from `name`; returns the cycle path if
    /// found. A back-edge to *any* node already on the current path closes
    /// a cycle, not only one back to `name` itself — `a -> b -> c -> b` is
    /// a cycle reachable from `a` even though `a` is never revisited.
    pub fn detect_cycle(&self, name: &str) -> Option<Vec<String>> {
        let start = self.node(name)?;
        let mut stack = vec![(start, vec![start])];

        while let Some((current, path)) = stack.pop() {
            for neighbor in self.graph.neighbors(current) {
                if path.contains(&neighbor) {
                    let mut cycle = path.clone();
                    cycle.push(neighbor);
                    return Some(cycle.into_iter().map(|idx| self.graph[idx].clone()).collect());
                }
                let mut next_path = path.clone();
                next_path.push(neighbor);
                stack.push((neighbor, next_path));
            }
        }
        None
    }

    pub fn is_safe_to_expand(&self, name: &str) -> bool {
        self.detect_cycle(name).is_none()
    }

    /// Length of the longest simple path from `name` to any reachable
    /// terminal node. 0 if `name` is not in the graph or has no out-edges.
    pub fn expansion_depth(&self, name: &str) -> usize {
        let Some(start) = self.node(name) else { return 0 };
        let terminals: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&n| self.graph.neighbors(n).count() == 0)
            .collect();

        if terminals.is_empty() {
            return 0;
        }

        terminals
            .iter()
            .flat_map(|&end| all_simple_paths::<Vec<_>, _>(&self.graph, start, end, 0, None))
            .map(|path| path.len().saturating_sub(1))
            .max()
            .unwrap_or(0)
    }
}

/// Splits an alias body on `;`, `&&`, `||` and takes the first token of
/// each resulting segment as a dependency edge target.
fn extract_references(body: &str) -> Vec<String> {
    SEGMENT_SPLIT
        .split(body)
        .filter_map(|segment| segment.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::alias::model::Alias;

    fn bundle(pairs: &[(&str, &str)]) -> AliasBundle {
        let now = Utc::now();
        AliasBundle {
            version: "1.0".into(),
            aliases: pairs.iter().map(|(n, b)| Alias::new(*n, *b, now).unwrap()).collect(),
        }
    }

    #[test]
    fn detects_direct_cycle() {
        let b = bundle(&[("a", "b"), ("b", "a")]);
        let graph = AliasGraph::build(&b);
        let cycle = graph.detect_cycle("a").expect("cycle expected");
        assert_eq!(cycle.first().unwrap(), "a");
    }

    #[test]
    fn detects_indirect_cycle_not_passing_through_the_queried_name() {
        let b = bundle(&[("a", "b"), ("b", "c"), ("c", "b")]);
        let graph = AliasGraph::build(&b);
        let cycle = graph.detect_cycle("a").expect("cycle expected");
        assert_eq!(cycle.first().unwrap(), "a");
        assert!(!graph.is_safe_to_expand("a"));
    }

    #[test]
    fn terminal_chain_is_safe() {
        let b = bundle(&[("a", "look"), ("b", "a; go north")]);
        let graph = AliasGraph::build(&b);
        assert!(graph.is_safe_to_expand("a"));
        assert!(graph.is_safe_to_expand("b"));
    }

    #[test]
    fn expansion_depth_counts_longest_chain() {
        let b = bundle(&[("a", "b"), ("b", "c"), ("c", "look")]);
        let graph = AliasGraph::build(&b);
        assert_eq!(graph.expansion_depth("a"), 3);
        assert_eq!(graph.expansion_depth("c"), 1);
    }

    #[test]
    fn unknown_alias_has_zero_depth() {
        let b = bundle(&[("a", "look")]);
        let graph = AliasGraph::build(&b);
        assert_eq!(graph.expansion_depth("nope"), 0);
    }
}
