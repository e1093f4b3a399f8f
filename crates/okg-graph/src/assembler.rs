//! Graph Assembler module
//!
//! Accumulates canonical nodes and edges, keyed by id so repeated snapshots
//! of the same node or edge replace rather than duplicate each other.

use std::collections::HashSet;

use indexmap::IndexMap;
use uuid::Uuid;

use okg_core::{Edge, Node};

use crate::KnowledgeGraph;

/// Builds a [`KnowledgeGraph`] from canonical snapshots
#[derive(Debug, Default)]
pub struct GraphAssembler {
    nodes: IndexMap<Uuid, Node>,
    edges: IndexMap<Uuid, Edge>,
}

impl GraphAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node snapshot
    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id, node);
    }

    /// Insert or replace an edge snapshot
    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.insert(edge.id, edge);
    }

    pub fn extend_nodes(&mut self, nodes: impl IntoIterator<Item = Node>) {
        for node in nodes {
            self.add_node(node);
        }
    }

    pub fn extend_edges(&mut self, edges: impl IntoIterator<Item = Edge>) {
        for edge in edges {
            self.add_edge(edge);
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Finish the graph.
    ///
    /// Nodes are ordered by the chunk of their earliest source location;
    /// within a chunk they keep insertion order, which callers supply in
    /// first-seen order. Nodes never observed sort last. Edges keep insertion
    /// order, minus any whose endpoints are missing.
    pub fn assemble(self) -> KnowledgeGraph {
        let mut nodes: Vec<Node> = self.nodes.into_values().collect();
        nodes.sort_by_key(|node| {
            let chunk = node.first_location().map(|location| location.chunk_index);
            (chunk.is_none(), chunk)
        });

        let node_ids: HashSet<Uuid> = nodes.iter().map(|node| node.id).collect();
        let mut dangling_edges_dropped = 0;
        let edges: Vec<Edge> = self
            .edges
            .into_values()
            .filter(|edge| {
                let connected =
                    node_ids.contains(&edge.source_id) && node_ids.contains(&edge.target_id);
                if !connected {
                    dangling_edges_dropped += 1;
                    tracing::warn!(edge = %edge.id, "Dropped edge with a missing endpoint");
                }
                connected
            })
            .collect();

        tracing::debug!(
            nodes = nodes.len(),
            edges = edges.len(),
            dangling_edges_dropped,
            "Assembled graph"
        );

        KnowledgeGraph {
            nodes,
            edges,
            dangling_edges_dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use okg_core::{CandidateEntity, PropertyMap, SourceLocation};

    fn node(name: &str, chunk_index: usize, start_offset: usize) -> Node {
        Node {
            id: Uuid::new_v4(),
            node_type: "Airport".to_string(),
            properties: CandidateEntity::new("t", "Airport", name).properties,
            source_locations: vec![SourceLocation {
                chunk_index,
                start_offset,
                end_offset: start_offset + 3,
            }],
            unknown_type: false,
        }
    }

    fn edge(source: &Node, target: &Node) -> Edge {
        Edge {
            id: Uuid::new_v4(),
            edge_type: "CONNECTS_TO".to_string(),
            source_id: source.id,
            target_id: target.id,
            properties: PropertyMap::new(),
            source_locations: vec![],
            unknown_type: false,
        }
    }

    #[test]
    fn test_nodes_sorted_by_first_location() {
        let bom = node("BOM", 1, 55);
        let ist = node("IST", 0, 0);
        let mut orphan = node("XXX", 0, 0);
        orphan.source_locations.clear();

        let mut assembler = GraphAssembler::new();
        assembler.extend_nodes([orphan, bom, ist]);
        let graph = assembler.assemble();

        let names: Vec<&str> = graph.nodes.iter().map(Node::name).collect();
        assert_eq!(names, vec!["IST", "BOM", "XXX"]);
    }

    #[test]
    fn test_nodes_within_chunk_keep_insertion_order() {
        // Whole-chunk locations tie; the caller's order decides
        let aaa = node("AAA", 0, 0);
        let bbb = node("BBB", 0, 0);
        let late = node("CCC", 1, 0);

        let mut assembler = GraphAssembler::new();
        assembler.extend_nodes([late, aaa, bbb]);
        let graph = assembler.assemble();

        let names: Vec<&str> = graph.nodes.iter().map(Node::name).collect();
        assert_eq!(names, vec!["AAA", "BBB", "CCC"]);
    }

    #[test]
    fn test_upsert_replaces_snapshot() {
        let mut ist = node("IST", 0, 0);
        let mut assembler = GraphAssembler::new();
        assembler.add_node(ist.clone());

        ist.source_locations.push(SourceLocation {
            chunk_index: 1,
            start_offset: 20,
            end_offset: 23,
        });
        assembler.add_node(ist.clone());

        assert_eq!(assembler.node_count(), 1);
        let graph = assembler.assemble();
        assert_eq!(graph.nodes[0].source_locations.len(), 2);
    }

    #[test]
    fn test_dangling_edges_dropped() {
        let ist = node("IST", 0, 0);
        let bom = node("BOM", 1, 55);
        let ghost = node("GHOST", 2, 0);

        let mut assembler = GraphAssembler::new();
        assembler.extend_nodes([ist.clone(), bom.clone()]);
        assembler.extend_edges([edge(&ist, &bom), edge(&ist, &ghost)]);
        let graph = assembler.assemble();

        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.dangling_edges_dropped, 1);
        assert_eq!(graph.edges_of(&bom.id).count(), 1);
        assert_eq!(graph.nodes_named("ist").count(), 1);
    }
}
