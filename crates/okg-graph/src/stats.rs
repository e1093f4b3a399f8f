//! Graph and run statistics

use std::collections::BTreeMap;

use petgraph::algo::connected_components;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use okg_extractor::{RegistryStats, ResolverStats};

use crate::KnowledgeGraph;

/// Shape of the assembled graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStatistics {
    pub node_count: usize,
    pub edge_count: usize,
    pub nodes_by_type: BTreeMap<String, usize>,
    pub edges_by_type: BTreeMap<String, usize>,
    /// Nodes or edges whose type is not in the ontology
    pub unknown_type_nodes: usize,
    pub unknown_type_edges: usize,
    /// Weakly connected components
    pub connected_components: usize,
    /// Nodes without any edge
    pub isolated_nodes: usize,
    pub dangling_edges_dropped: usize,
}

impl GraphStatistics {
    pub fn from_graph(graph: &KnowledgeGraph) -> Self {
        let mut stats = Self {
            node_count: graph.nodes.len(),
            edge_count: graph.edges.len(),
            dangling_edges_dropped: graph.dangling_edges_dropped,
            ..Default::default()
        };

        for node in &graph.nodes {
            *stats.nodes_by_type.entry(node.node_type.clone()).or_default() += 1;
            if node.unknown_type {
                stats.unknown_type_nodes += 1;
            }
        }
        for edge in &graph.edges {
            *stats.edges_by_type.entry(edge.edge_type.clone()).or_default() += 1;
            if edge.unknown_type {
                stats.unknown_type_edges += 1;
            }
        }

        let topology = graph.topology();
        if topology.node_count() > 0 {
            stats.connected_components = connected_components(&topology);
        }
        stats.isolated_nodes = topology
            .nodes()
            .filter(|&id| {
                topology
                    .neighbors_directed(id, Direction::Outgoing)
                    .chain(topology.neighbors_directed(id, Direction::Incoming))
                    .next()
                    .is_none()
            })
            .count();

        stats
    }
}

/// Everything a run counted, flattened for reporting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatistics {
    // Chunks
    pub chunks_total: usize,
    pub chunks_succeeded: usize,
    pub chunks_failed: usize,
    pub chunks_cancelled: usize,

    // Entities
    pub total_extracted: usize,
    pub unique_entities: usize,
    pub duplicates_removed: usize,
    pub deduplication_rate: f32,
    pub rejected_missing_name: usize,
    pub rejected_unknown_type: usize,
    pub rejection_rate: f32,
    pub temp_id_conflicts: usize,

    // Relationships
    pub relationships_submitted: usize,
    pub resolved: usize,
    pub orphaned: usize,
    pub dropped_unknown_type: usize,
    pub dropped_missing_type: usize,
    pub resolution_rate: f32,
    pub edges_created: usize,
    pub edge_deduplication_rate: f32,

    pub graph: GraphStatistics,
}

/// Per-run chunk outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkCounts {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl RunStatistics {
    pub fn collect(
        chunks: ChunkCounts,
        registry: &RegistryStats,
        resolver: &ResolverStats,
        graph: GraphStatistics,
    ) -> Self {
        Self {
            chunks_total: chunks.total,
            chunks_succeeded: chunks.succeeded,
            chunks_failed: chunks.failed,
            chunks_cancelled: chunks.cancelled,

            total_extracted: registry.total_submitted,
            unique_entities: registry.unique_entities,
            duplicates_removed: registry.duplicates_removed(),
            deduplication_rate: registry.deduplication_rate(),
            rejected_missing_name: registry.rejected_missing_name,
            rejected_unknown_type: registry.rejected_unknown_type,
            rejection_rate: registry.rejection_rate(),
            temp_id_conflicts: registry.temp_id_conflicts,

            relationships_submitted: resolver.submitted,
            resolved: resolver.resolved(),
            orphaned: resolver.orphaned(),
            dropped_unknown_type: resolver.dropped_unknown_type,
            dropped_missing_type: resolver.dropped_missing_type,
            resolution_rate: resolver.resolution_rate(),
            edges_created: resolver.created,
            edge_deduplication_rate: resolver.deduplication_rate(),

            graph,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use okg_core::{Edge, Node, PropertyMap};
    use uuid::Uuid;

    fn node(node_type: &str) -> Node {
        Node {
            id: Uuid::new_v4(),
            node_type: node_type.to_string(),
            properties: PropertyMap::new(),
            source_locations: vec![],
            unknown_type: node_type == "City",
        }
    }

    #[test]
    fn test_graph_statistics() {
        let ist = node("Airport");
        let bom = node("Airport");
        let istanbul = node("City");
        let lonely = node("Airline");

        let graph = KnowledgeGraph {
            edges: vec![
                Edge {
                    id: Uuid::new_v4(),
                    edge_type: "CONNECTS_TO".to_string(),
                    source_id: ist.id,
                    target_id: bom.id,
                    properties: PropertyMap::new(),
                    source_locations: vec![],
                    unknown_type: false,
                },
                Edge {
                    id: Uuid::new_v4(),
                    edge_type: "LOCATED_IN".to_string(),
                    source_id: ist.id,
                    target_id: istanbul.id,
                    properties: PropertyMap::new(),
                    source_locations: vec![],
                    unknown_type: true,
                },
            ],
            nodes: vec![ist, bom, istanbul, lonely],
            dangling_edges_dropped: 0,
        };

        let stats = graph.statistics();
        assert_eq!(stats.node_count, 4);
        assert_eq!(stats.edge_count, 2);
        assert_eq!(stats.nodes_by_type["Airport"], 2);
        assert_eq!(stats.edges_by_type["LOCATED_IN"], 1);
        assert_eq!(stats.unknown_type_nodes, 1);
        assert_eq!(stats.unknown_type_edges, 1);
        assert_eq!(stats.connected_components, 2);
        assert_eq!(stats.isolated_nodes, 1);
    }

    #[test]
    fn test_empty_graph_statistics() {
        let stats = KnowledgeGraph::default().statistics();
        assert_eq!(stats, GraphStatistics::default());
    }

    #[test]
    fn test_run_statistics_collect() {
        let registry = RegistryStats {
            total_submitted: 4,
            unique_entities: 2,
            merged: 1,
            rejected_missing_name: 1,
            ..Default::default()
        };
        let resolver = ResolverStats {
            submitted: 2,
            created: 1,
            dropped_unresolved_endpoint: 1,
            ..Default::default()
        };

        let stats = RunStatistics::collect(
            ChunkCounts {
                total: 2,
                succeeded: 2,
                ..Default::default()
            },
            &registry,
            &resolver,
            GraphStatistics::default(),
        );

        assert_eq!(stats.total_extracted, 4);
        assert_eq!(stats.duplicates_removed, 1);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.orphaned, 1);
        assert!((stats.resolution_rate - 0.5).abs() < f32::EPSILON);
        assert!((stats.rejection_rate - 0.25).abs() < f32::EPSILON);
    }
}
