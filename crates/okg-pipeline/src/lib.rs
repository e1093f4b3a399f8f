//! OKG Pipeline - Ontology-guided extraction orchestrator
//!
//! Drives one document through the whole extraction:
//! - Chunking with offset tracking
//! - Concurrent, bounded extraction through an [`ExtractionGateway`]
//! - Entity registration behind a single async mutex
//! - Relationship resolution in chunk order
//! - Graph assembly and statistics
//!
//! Per-chunk failures never abort a run; they surface in the result's
//! `partial` flag and chunk reports. Only configuration errors are fatal.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future;
use futures::stream::{self, StreamExt};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use okg_core::{
    AppConfig, CandidateRelationship, Chunk, OkgError, Ontology, PipelineConfig, Result,
};
use okg_extractor::{EntityRegistry, ExtractionGateway, GatewayError, RelationshipResolver};
use okg_graph::{ChunkCounts, GraphAssembler, RunStatistics};
use okg_parser::{chunk_text, ChunkConfig};

pub mod result;
pub mod state;

pub use result::{ChunkReport, ChunkStatus, PipelineResult, RejectionRecord};
pub use state::PipelineState;

// ============================================================================
// Worker outcomes
// ============================================================================

/// What a worker hands back to the coordinator
enum WorkerOutcome {
    Registered {
        relationships: Vec<CandidateRelationship>,
        entities: usize,
        rejected: Vec<okg_extractor::RegistryError>,
    },
    Failed(GatewayError),
    Discarded,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Extraction pipeline bound to one gateway
pub struct Pipeline<G: ExtractionGateway + 'static> {
    gateway: Arc<G>,
    config: PipelineConfig,
    chunking: ChunkConfig,
    state: watch::Sender<PipelineState>,
}

impl<G: ExtractionGateway + 'static> Pipeline<G> {
    /// Create a pipeline with default chunking
    pub fn new(gateway: G, config: PipelineConfig) -> Self {
        let (state, _) = watch::channel(PipelineState::Pending);
        Self {
            gateway: Arc::new(gateway),
            config,
            chunking: ChunkConfig::default(),
            state,
        }
    }

    /// Create a pipeline from the application configuration
    pub fn from_config(gateway: G, config: &AppConfig) -> Self {
        Self::new(gateway, config.pipeline.clone())
            .with_chunking(ChunkConfig::from(&config.chunking))
    }

    /// Set chunk size and overlap
    pub fn with_chunking(mut self, chunking: ChunkConfig) -> Self {
        self.chunking = chunking;
        self
    }

    /// Watch the state of the current run
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Current state
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    fn set_state(&self, state: PipelineState) {
        tracing::debug!(%state, progress = state.progress_percent(), "Pipeline state changed");
        self.state.send_replace(state);
    }

    /// Run the pipeline over `document`
    pub async fn run(&self, document: &str, ontology: &Ontology) -> Result<PipelineResult> {
        self.run_with_cancellation(document, ontology, CancellationToken::new())
            .await
    }

    /// Run the pipeline, stopping dispatch once `cancel` fires.
    ///
    /// In-flight gateway calls are allowed to finish but their results are
    /// discarded. Whatever was registered before cancellation is still
    /// resolved and assembled.
    pub async fn run_with_cancellation(
        &self,
        document: &str,
        ontology: &Ontology,
        cancel: CancellationToken,
    ) -> Result<PipelineResult> {
        let started_at = Utc::now();
        let start_time = Instant::now();
        self.set_state(PipelineState::Pending);

        tracing::info!(
            chars = document.chars().count(),
            strict_mode = self.config.strict_mode,
            max_concurrency = self.config.max_concurrency,
            "Extraction run started"
        );

        // 1. Chunk the document
        self.set_state(PipelineState::Chunking);
        if self.config.max_concurrency == 0 {
            self.set_state(PipelineState::Failed);
            return Err(OkgError::Configuration(
                "max_concurrency must be greater than zero".to_string(),
            ));
        }
        let chunks = match chunk_text(document, &self.chunking) {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::error!(error = %e, "Extraction run rejected");
                self.set_state(PipelineState::Failed);
                return Err(e);
            }
        };
        let total = chunks.len();
        tracing::debug!("Document split into {} chunks", total);

        // 2. Extract and register concurrently
        let ontology = Arc::new(ontology.clone());
        let registry = Arc::new(Mutex::new(EntityRegistry::new(
            ontology.clone(),
            self.config.strict_mode,
        )));
        let outcomes = self
            .extract_all(&chunks, &ontology, &registry, &cancel)
            .await;

        // 3. Collect per-chunk outcomes in chunk order
        let mut reports = Vec::with_capacity(total);
        let mut pending_relationships = Vec::new();
        let mut rejected_entities = Vec::new();
        let mut counts = ChunkCounts {
            total,
            ..Default::default()
        };

        for (chunk, outcome) in chunks.iter().zip(outcomes) {
            let status = match outcome {
                Some(WorkerOutcome::Registered {
                    relationships,
                    entities,
                    rejected,
                }) => {
                    counts.succeeded += 1;
                    let status = ChunkStatus::Succeeded {
                        entities,
                        relationships: relationships.len(),
                        rejected: rejected.len(),
                    };
                    rejected_entities.extend(rejected.into_iter().map(|error| RejectionRecord {
                        chunk_index: chunk.index,
                        error,
                    }));
                    pending_relationships.push((chunk, relationships));
                    status
                }
                Some(WorkerOutcome::Failed(error)) => {
                    counts.failed += 1;
                    ChunkStatus::failed(&error)
                }
                Some(WorkerOutcome::Discarded) | None => {
                    counts.cancelled += 1;
                    ChunkStatus::Cancelled
                }
            };
            reports.push(ChunkReport {
                index: chunk.index,
                start_offset: chunk.start_offset,
                end_offset: chunk.end_offset,
                status,
            });
        }

        // 4. Resolve relationships in chunk order
        self.set_state(PipelineState::Resolving);
        let registry = registry.lock().await;
        let mut resolver = RelationshipResolver::new(ontology.clone(), self.config.strict_mode);
        for (chunk, relationships) in &pending_relationships {
            resolver.resolve_chunk(chunk, relationships, &registry);
        }

        // 5. Assemble the graph
        self.set_state(PipelineState::Assembling);
        let mut assembler = GraphAssembler::new();
        assembler.extend_nodes(registry.nodes());
        assembler.extend_edges(resolver.edges());
        let graph = assembler.assemble();

        let statistics = RunStatistics::collect(
            counts,
            registry.stats(),
            resolver.stats(),
            graph.statistics(),
        );

        let (final_state, partial) = run_outcome(cancel.is_cancelled(), &counts);
        let failed_chunks: Vec<usize> = reports
            .iter()
            .filter(|report| matches!(report.status, ChunkStatus::Failed { .. }))
            .map(|report| report.index)
            .collect();

        let duration_ms = start_time.elapsed().as_millis() as u64;
        tracing::info!(
            state = %final_state,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            failed_chunks = counts.failed,
            cancelled_chunks = counts.cancelled,
            partial,
            duration_ms,
            "Extraction run finished"
        );
        self.set_state(final_state);

        Ok(PipelineResult {
            state: final_state,
            partial,
            failed_chunks,
            nodes: graph.nodes,
            edges: graph.edges,
            chunks: reports,
            dropped_relationships: resolver.drops().to_vec(),
            rejected_entities,
            statistics,
            started_at,
            completed_at: Utc::now(),
            duration_ms,
        })
    }

    /// Dispatch every chunk to a worker task, at most `max_concurrency` at a
    /// time. Returns one slot per chunk; `None` for chunks never dispatched.
    async fn extract_all(
        &self,
        chunks: &[Chunk],
        ontology: &Arc<Ontology>,
        registry: &Arc<Mutex<EntityRegistry>>,
        cancel: &CancellationToken,
    ) -> Vec<Option<WorkerOutcome>> {
        let total = chunks.len();
        let mut outcomes: Vec<Option<WorkerOutcome>> = (0..total).map(|_| None).collect();
        self.set_state(PipelineState::Extracting {
            completed: 0,
            total,
        });

        let mut finished = stream::iter(chunks.iter().cloned())
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|chunk| {
                let index = chunk.index;
                let handle = tokio::spawn(extract_chunk(
                    self.gateway.clone(),
                    chunk,
                    ontology.clone(),
                    registry.clone(),
                    cancel.clone(),
                ));
                async move { (index, handle.await) }
            })
            .buffer_unordered(self.config.max_concurrency);

        let mut completed = 0;
        while let Some((index, joined)) = finished.next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(chunk = index, error = %e, "Chunk worker crashed");
                    WorkerOutcome::Failed(GatewayError::Upstream(format!("worker crashed: {e}")))
                }
            };
            outcomes[index] = Some(outcome);
            completed += 1;
            self.set_state(PipelineState::Extracting { completed, total });
        }

        if cancel.is_cancelled() {
            tracing::info!(
                dispatched = completed,
                total,
                "Extraction cancelled; remaining chunks were not dispatched"
            );
        }

        outcomes
    }
}

/// Final state and `partial` flag of a finished run.
///
/// A cancelled run is always partial, even when every chunk had already
/// finished before the token fired.
fn run_outcome(cancelled: bool, counts: &ChunkCounts) -> (PipelineState, bool) {
    if cancelled {
        (PipelineState::Cancelled, true)
    } else {
        (
            PipelineState::Completed,
            counts.failed > 0 || counts.cancelled > 0,
        )
    }
}

/// Extract one chunk and register its entities.
///
/// The registry lock is held for the chunk's whole registration batch so the
/// lookup-then-insert of each key is never interleaved with another chunk.
async fn extract_chunk<G: ExtractionGateway + 'static>(
    gateway: Arc<G>,
    chunk: Chunk,
    ontology: Arc<Ontology>,
    registry: Arc<Mutex<EntityRegistry>>,
    cancel: CancellationToken,
) -> WorkerOutcome {
    let result = gateway.extract(&chunk, &ontology).await;

    if cancel.is_cancelled() {
        tracing::debug!(chunk = chunk.index, "Discarding result after cancellation");
        return WorkerOutcome::Discarded;
    }

    match result {
        Ok(candidates) => {
            let registration = {
                let mut registry = registry.lock().await;
                registry.register_chunk(&chunk, &candidates.entities)
            };
            tracing::debug!(
                chunk = chunk.index,
                entities = candidates.entities.len(),
                relationships = candidates.relationships.len(),
                rejected = registration.rejected.len(),
                "Chunk registered"
            );
            WorkerOutcome::Registered {
                relationships: candidates.relationships,
                entities: candidates.entities.len(),
                rejected: registration.rejected,
            }
        }
        Err(error) => {
            tracing::warn!(chunk = chunk.index, %error, "Chunk extraction failed");
            WorkerOutcome::Failed(error)
        }
    }
}

// ============================================================================
// Convenience entry point
// ============================================================================

/// Run a one-off extraction with explicit chunking and strictness
pub async fn run<G: ExtractionGateway + 'static>(
    document: &str,
    ontology: &Ontology,
    gateway: G,
    chunk_size: usize,
    overlap_percent: u32,
    strict_mode: bool,
) -> Result<PipelineResult> {
    let config = PipelineConfig {
        strict_mode,
        ..Default::default()
    };
    Pipeline::new(gateway, config)
        .with_chunking(ChunkConfig::new(chunk_size, overlap_percent))
        .run(document, ontology)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_outcome() {
        let clean = ChunkCounts {
            total: 3,
            succeeded: 3,
            ..Default::default()
        };
        assert_eq!(run_outcome(false, &clean), (PipelineState::Completed, false));

        // Cancellation that fires after the last chunk still marks the run
        assert_eq!(run_outcome(true, &clean), (PipelineState::Cancelled, true));

        let failed = ChunkCounts {
            total: 3,
            succeeded: 2,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(run_outcome(false, &failed), (PipelineState::Completed, true));
    }
}
