//! Pipeline results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use okg_core::{Edge, Node};
use okg_extractor::{DropRecord, GatewayError, RegistryError};
use okg_graph::{KnowledgeGraph, RunStatistics};

use crate::state::PipelineState;

/// Outcome of one chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkStatus {
    /// Extracted and registered
    Succeeded {
        entities: usize,
        relationships: usize,
        rejected: usize,
    },
    /// Gateway failure or crashed worker
    Failed { reason: String },
    /// Never dispatched, or its result arrived after cancellation
    Cancelled,
}

impl ChunkStatus {
    pub(crate) fn failed(error: &GatewayError) -> Self {
        Self::Failed {
            reason: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Per-chunk report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReport {
    pub index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    #[serde(flatten)]
    pub status: ChunkStatus,
}

/// A candidate entity the registry refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionRecord {
    pub chunk_index: usize,
    pub error: RegistryError,
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    /// Final state: `Completed` or `Cancelled`
    pub state: PipelineState,

    /// Set when any chunk failed or was cancelled
    pub partial: bool,

    /// Indices of chunks whose extraction failed
    pub failed_chunks: Vec<usize>,

    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub chunks: Vec<ChunkReport>,

    /// Dropped relationship candidates
    pub dropped_relationships: Vec<DropRecord>,

    /// Rejected entity candidates
    pub rejected_entities: Vec<RejectionRecord>,

    pub statistics: RunStatistics,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl PipelineResult {
    /// The nodes and edges as a graph
    pub fn graph(&self) -> KnowledgeGraph {
        KnowledgeGraph {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            dangling_edges_dropped: self.statistics.graph.dangling_edges_dropped,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == PipelineState::Completed && !self.partial
    }
}
