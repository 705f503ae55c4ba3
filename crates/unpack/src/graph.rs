//! Module dependency graph.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use petgraph::Direction;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// One require edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    /// The require argument as written.
    pub request: String,
    /// Local name the required module is bound to, if any.
    pub binding: Option<String>,
}

/// Modules as nodes, require calls as edges.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    graph: DiGraph<String, Dependency>,
    nodes: HashMap<String, NodeIndex>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(id.to_string());
        self.nodes.insert(id.to_string(), idx);
        idx
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Adds `from → to`. Both modules must exist; repeated requests of the
    /// same target with the same request string are recorded once, keeping
    /// the first binding seen.
    pub fn add_dependency(&mut self, from: &str, to: &str, request: &str, binding: Option<&str>) -> bool {
        let (Some(&a), Some(&b)) = (self.nodes.get(from), self.nodes.get(to)) else {
            return false;
        };
        let existing = self
            .graph
            .edges_connecting(a, b)
            .find(|edge| edge.weight().request == request)
            .map(|edge| edge.id());
        match existing {
            Some(edge) => {
                let dependency = &mut self.graph[edge];
                if dependency.binding.is_none() {
                    dependency.binding = binding.map(str::to_string);
                }
            }
            None => {
                self.graph.add_edge(
                    a,
                    b,
                    Dependency {
                        request: request.to_string(),
                        binding: binding.map(str::to_string),
                    },
                );
            }
        }
        true
    }

    /// `(request, target id)` pairs of one module.
    pub fn dependencies(&self, id: &str) -> Vec<(&str, &str)> {
        self.edges(id, Direction::Outgoing)
            .into_iter()
            .map(|(dep, other)| (dep.request.as_str(), other))
            .collect()
    }

    /// Outgoing edges of one module with their bindings.
    pub fn imports(&self, id: &str) -> Vec<(&Dependency, &str)> {
        self.edges(id, Direction::Outgoing)
    }

    /// `(request, requiring id)` pairs pointing at one module.
    pub fn dependents(&self, id: &str) -> Vec<(&str, &str)> {
        self.edges(id, Direction::Incoming)
            .into_iter()
            .map(|(dep, other)| (dep.request.as_str(), other))
            .collect()
    }

    fn edges(&self, id: &str, direction: Direction) -> Vec<(&Dependency, &str)> {
        let Some(&idx) = self.nodes.get(id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(idx, direction)
            .map(|edge| {
                let other = match direction {
                    Direction::Outgoing => edge.target(),
                    Direction::Incoming => edge.source(),
                };
                (edge.weight(), self.graph[other].as_str())
            })
            .collect();
        // petgraph lists edges newest first.
        edges.reverse();
        edges
    }

    /// Breadth-first order from the entries, followed by every module not
    /// reachable from them in insertion order.
    pub fn traversal_order<'a>(&'a self, entries: &[String]) -> Vec<&'a str> {
        let mut seen = HashSet::new();
        let mut order = Vec::with_capacity(self.graph.node_count());
        let roots = entries
            .iter()
            .filter_map(|id| self.nodes.get(id).copied())
            .chain(self.graph.node_indices());
        for root in roots {
            if seen.contains(&root) {
                continue;
            }
            let mut bfs = Bfs::new(&self.graph, root);
            while let Some(idx) = bfs.next(&self.graph) {
                if seen.insert(idx) {
                    order.push(self.graph[idx].as_str());
                }
            }
        }
        order
    }

    pub fn module_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ModuleGraph {
        let mut graph = ModuleGraph::new();
        for id in ["0", "1", "2", "3"] {
            graph.add_module(id);
        }
        assert!(graph.add_dependency("2", "0", "0", None));
        assert!(graph.add_dependency("0", "1", "./b", None));
        assert!(graph.add_dependency("0", "1", "./b", Some("b")));
        assert!(!graph.add_dependency("0", "9", "9", None));
        graph
    }

    #[test]
    fn test_edges() {
        let graph = sample();
        assert_eq!(graph.dependency_count(), 2);
        assert_eq!(graph.dependencies("0"), vec![("./b", "1")]);
        assert_eq!(graph.dependents("0"), vec![("0", "2")]);
    }

    #[test]
    fn test_imports_keep_bindings() {
        let graph = sample();
        let imports = graph.imports("0");
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].0.binding.as_deref(), Some("b"));
        assert_eq!(imports[0].1, "1");
    }

    #[test]
    fn test_traversal_order_starts_at_entries() {
        let graph = sample();
        assert_eq!(graph.traversal_order(&["2".to_string()]), vec!["2", "0", "1", "3"]);
    }
}
