//! Route graph built from an ordered list of traceroute hops.

use std::collections::BTreeSet;

use serde::Serialize;

/// Label of the synthetic node every route starts from.
pub const START_NODE: &str = "Start";

/// Undirected graph of route hops. Nodes keep first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteGraph {
    nodes: Vec<String>,
    /// Edges are stored with the lexically smaller label first.
    edges: BTreeSet<(String, String)>,
}

impl Default for RouteGraph {
    fn default() -> Self {
        Self {
            nodes: vec![START_NODE.to_string()],
            edges: BTreeSet::new(),
        }
    }
}

impl RouteGraph {
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.edges.iter().map(|(a, b)| (a.as_str(), b.as_str()))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains_node(&self, label: &str) -> bool {
        self.nodes.iter().any(|n| n == label)
    }

    /// Order of the two labels does not matter.
    pub fn contains_edge(&self, a: &str, b: &str) -> bool {
        self.edges.contains(&edge_key(a, b))
    }

    fn add_node(&mut self, label: &str) {
        if !self.contains_node(label) {
            self.nodes.push(label.to_string());
        }
    }

    fn add_edge(&mut self, a: &str, b: &str) {
        // a hop repeated back to back is the same responder
        if a != b {
            self.edges.insert(edge_key(a, b));
        }
    }
}

fn edge_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Chain `hops` in order starting from [`START_NODE`].
///
/// Labels are deduplicated: a label seen twice maps to the same node, so a
/// route that revisits a hop produces a cycle rather than a second node.
pub fn build_graph<I, S>(hops: I) -> RouteGraph
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut graph = RouteGraph::default();
    let mut prev = START_NODE.to_string();

    for hop in hops {
        let label = hop.as_ref();
        graph.add_node(label);
        graph.add_edge(&prev, label);
        prev = label.to_string();
    }

    graph
}
