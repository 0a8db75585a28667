//! Name-level dependency graph over analyzed entities.
//!
//! Nodes are function and class names; edges are `calls` and `inherits`.
//! The graph is a directed multigraph and may contain cycles (mutual
//! recursion), which the PageRank centrality handles via the standard
//! damped iteration.

use crate::ast::FileAnalysis;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Edge kinds in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Calls,
    Inherits,
}

/// Directed dependency multigraph over entity names.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashSet<String>,
    edges: HashMap<String, Vec<(String, EdgeKind)>>,
}

impl DependencyGraph {
    /// Build the graph from a set of file analyses.
    ///
    /// Call edges are only added between entities known to the graph, so
    /// stdlib calls do not become dangling nodes.
    pub fn from_analyses<'a>(analyses: impl IntoIterator<Item = &'a FileAnalysis>) -> Self {
        let analyses: Vec<&FileAnalysis> = analyses.into_iter().collect();
        let mut graph = Self::default();

        for analysis in &analyses {
            for func in analysis.all_functions() {
                graph.nodes.insert(func.name.clone());
            }
            for class in &analysis.classes {
                graph.nodes.insert(class.name.clone());
            }
        }

        for analysis in &analyses {
            for func in analysis.all_functions() {
                for callee in &func.calls {
                    if graph.nodes.contains(callee) && *callee != func.name {
                        graph.add_edge(&func.name, callee, EdgeKind::Calls);
                    }
                }
            }
            for class in &analysis.classes {
                for base in &class.bases {
                    if graph.nodes.contains(base) {
                        graph.add_edge(&class.name, base, EdgeKind::Inherits);
                    }
                }
            }
        }
        graph
    }

    pub fn add_node(&mut self, name: impl Into<String>) {
        self.nodes.insert(name.into());
    }

    pub fn add_edge(&mut self, from: &str, to: &str, kind: EdgeKind) {
        self.nodes.insert(from.to_string());
        self.nodes.insert(to.to_string());
        self.edges
            .entry(from.to_string())
            .or_default()
            .push((to.to_string(), kind));
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains(name)
    }

    /// Most central entities by damped PageRank (damping 0.85).
    pub fn important_entities(&self, top_n: usize) -> Vec<(String, f64)> {
        const DAMPING: f64 = 0.85;
        const ITERATIONS: usize = 50;
        const EPSILON: f64 = 1e-8;

        let n = self.nodes.len();
        if n == 0 {
            return Vec::new();
        }

        let names: Vec<&String> = self.nodes.iter().collect();
        let index: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        // Outgoing adjacency by index.
        let mut out: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (from, targets) in &self.edges {
            let fi = index[from.as_str()];
            for (to, _) in targets {
                out[fi].push(index[to.as_str()]);
            }
        }

        let mut rank = vec![1.0 / n as f64; n];
        for _ in 0..ITERATIONS {
            let mut next = vec![(1.0 - DAMPING) / n as f64; n];
            let mut dangling = 0.0;
            for (i, targets) in out.iter().enumerate() {
                if targets.is_empty() {
                    dangling += rank[i];
                } else {
                    let share = DAMPING * rank[i] / targets.len() as f64;
                    for &t in targets {
                        next[t] += share;
                    }
                }
            }
            // Dangling mass is spread uniformly.
            let dangling_share = DAMPING * dangling / n as f64;
            for value in next.iter_mut() {
                *value += dangling_share;
            }

            let delta: f64 = rank
                .iter()
                .zip(next.iter())
                .map(|(a, b)| (a - b).abs())
                .sum();
            rank = next;
            if delta < EPSILON {
                break;
            }
        }

        let mut scored: Vec<(String, f64)> = names
            .iter()
            .enumerate()
            .map(|(i, name)| ((*name).clone(), rank[i]))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_n);
        scored
    }

    /// Names reachable from `name` within `max_depth` hops, BFS order.
    pub fn dependencies(&self, name: &str, max_depth: usize) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back((name.to_string(), 0usize));
        seen.insert(name.to_string());

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            if let Some(targets) = self.edges.get(&current) {
                for (to, _) in targets {
                    if seen.insert(to.clone()) {
                        result.push(to.clone());
                        queue.push_back((to.clone(), depth + 1));
                    }
                }
            }
        }
        result
    }
}
