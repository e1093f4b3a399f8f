//! OKG Graph - Final knowledge graph assembly
//!
//! Folds canonical nodes and edges into an immutable [`KnowledgeGraph`] and
//! computes aggregate statistics over it.

pub mod assembler;
pub mod stats;

pub use assembler::GraphAssembler;
pub use stats::{ChunkCounts, GraphStatistics, RunStatistics};

use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use okg_core::{Edge, Node};

/// The assembled graph of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeGraph {
    /// Canonical nodes in document order
    pub nodes: Vec<Node>,

    /// Canonical edges in resolution order
    pub edges: Vec<Edge>,

    /// Edges discarded because an endpoint was missing from `nodes`
    pub dangling_edges_dropped: usize,
}

impl KnowledgeGraph {
    pub fn node(&self, id: &Uuid) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == *id)
    }

    /// Nodes whose normalized name matches `name`
    pub fn nodes_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        let wanted = okg_extractor::registry::normalize_name(name);
        self.nodes
            .iter()
            .filter(move |node| okg_extractor::registry::normalize_name(node.name()) == wanted)
    }

    /// Edges leaving or entering `id`
    pub fn edges_of<'a>(&'a self, id: &'a Uuid) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges
            .iter()
            .filter(move |edge| edge.source_id == *id || edge.target_id == *id)
    }

    /// Topology view for graph algorithms.
    ///
    /// Parallel edges of different types collapse into one; the weight is the
    /// index in `edges` of the last of them.
    pub fn topology(&self) -> DiGraphMap<Uuid, usize> {
        let mut graph = DiGraphMap::with_capacity(self.nodes.len(), self.edges.len());
        for node in &self.nodes {
            graph.add_node(node.id);
        }
        for (index, edge) in self.edges.iter().enumerate() {
            graph.add_edge(edge.source_id, edge.target_id, index);
        }
        graph
    }

    pub fn statistics(&self) -> GraphStatistics {
        GraphStatistics::from_graph(self)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}
