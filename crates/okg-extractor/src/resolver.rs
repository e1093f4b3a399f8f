//! Relationship Resolver module
//!
//! Maps chunk-local relationship candidates onto canonical node ids and
//! deduplicates them into canonical edges keyed by (source, target, type).
//! Candidates that cannot be resolved are dropped and recorded with a reason.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use okg_core::{
    ontology::normalize_token, CandidateRelationship, Chunk, Edge, Ontology, PropertyMap,
};

use crate::merge::{add_location, DocumentOrder, RankedProperties};
use crate::registry::EntityRegistry;

// ============================================================================
// Outcomes
// ============================================================================

/// Why a relationship candidate did not become an edge
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// An endpoint was never registered in this chunk
    #[error("unresolved endpoint")]
    UnresolvedEndpoint,

    /// Strict mode and the type is not in the ontology
    #[error("unknown relationship type")]
    UnknownRelationshipType,

    /// The candidate carried no type at all
    #[error("missing relationship type")]
    MissingRelationshipType,
}

/// One dropped relationship candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropRecord {
    pub chunk_index: usize,
    /// Candidate id, or `source-[type]->target` when it had none
    pub candidate: String,
    pub reason: DropReason,
}

/// Result of resolving one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The candidate maps to `edge_id`; `merged` when the edge already existed
    Resolved { edge_id: Uuid, merged: bool },
    Dropped(DropReason),
}

/// Resolution counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolverStats {
    pub submitted: usize,
    pub created: usize,
    pub merged: usize,
    pub dropped_unresolved_endpoint: usize,
    pub dropped_unknown_type: usize,
    pub dropped_missing_type: usize,
}

impl ResolverStats {
    /// Candidates that became or joined an edge
    pub fn resolved(&self) -> usize {
        self.created + self.merged
    }

    /// Candidates whose endpoints could not be found
    pub fn orphaned(&self) -> usize {
        self.dropped_unresolved_endpoint
    }

    pub fn dropped(&self) -> usize {
        self.dropped_unresolved_endpoint + self.dropped_unknown_type + self.dropped_missing_type
    }

    pub fn resolution_rate(&self) -> f32 {
        if self.submitted == 0 {
            0.0
        } else {
            self.resolved() as f32 / self.submitted as f32
        }
    }

    /// Share of resolved candidates that repeated an existing edge
    pub fn deduplication_rate(&self) -> f32 {
        if self.resolved() == 0 {
            0.0
        } else {
            self.merged as f32 / self.resolved() as f32
        }
    }

    fn record_drop(&mut self, reason: DropReason) {
        match reason {
            DropReason::UnresolvedEndpoint => self.dropped_unresolved_endpoint += 1,
            DropReason::UnknownRelationshipType => self.dropped_unknown_type += 1,
            DropReason::MissingRelationshipType => self.dropped_missing_type += 1,
        }
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Deduplication key: (source id, target id, type key)
type EdgeKey = (Uuid, Uuid, String);

#[derive(Debug, Clone)]
struct Entry {
    edge: Edge,
    first_seen: DocumentOrder,
    properties: RankedProperties,
}

/// Canonical relationship store of a run
#[derive(Debug)]
pub struct RelationshipResolver {
    ontology: Arc<Ontology>,
    strict: bool,
    edges: IndexMap<EdgeKey, Entry>,
    drops: Vec<DropRecord>,
    stats: ResolverStats,
}

impl RelationshipResolver {
    pub fn new(ontology: Arc<Ontology>, strict: bool) -> Self {
        Self {
            ontology,
            strict,
            edges: IndexMap::new(),
            drops: Vec::new(),
            stats: ResolverStats::default(),
        }
    }

    /// Resolve one candidate observed at `position` within `chunk`.
    ///
    /// Endpoints are looked up among the temporary ids `registry` recorded for
    /// the same chunk, so the chunk's entities must be registered first.
    pub fn resolve(
        &mut self,
        candidate: &CandidateRelationship,
        chunk: &Chunk,
        position: usize,
        registry: &EntityRegistry,
    ) -> Resolution {
        self.stats.submitted += 1;

        let endpoints = registry
            .canonical_id(chunk.index, &candidate.source_temp_id)
            .zip(registry.canonical_id(chunk.index, &candidate.target_temp_id));
        let Some((source_id, target_id)) = endpoints else {
            return self.drop_candidate(candidate, chunk, DropReason::UnresolvedEndpoint);
        };

        if normalize_token(&candidate.relationship_type).is_empty() {
            return self.drop_candidate(candidate, chunk, DropReason::MissingRelationshipType);
        }
        let resolved = match self
            .ontology
            .resolve_relationship_type(&candidate.relationship_type, self.strict)
        {
            Ok(resolved) => resolved,
            Err(_) => {
                return self.drop_candidate(candidate, chunk, DropReason::UnknownRelationshipType)
            }
        };

        let order = DocumentOrder::new(chunk.index, position);
        let location = chunk.locate(candidate.span);
        let key = (source_id, target_id, resolved.key.clone());

        match self.edges.get_mut(&key) {
            Some(entry) => {
                entry
                    .properties
                    .merge(&mut entry.edge.properties, &candidate.properties, order);
                add_location(&mut entry.edge.source_locations, location);
                if order < entry.first_seen {
                    entry.first_seen = order;
                    entry.edge.edge_type = resolved.name;
                }
                self.stats.merged += 1;
                tracing::debug!(
                    chunk = chunk.index,
                    candidate = %candidate.label(),
                    id = %entry.edge.id,
                    "Merged relationship into existing edge"
                );
                Resolution::Resolved {
                    edge_id: entry.edge.id,
                    merged: true,
                }
            }
            None => {
                let mut entry = Entry {
                    edge: Edge {
                        id: Uuid::new_v4(),
                        edge_type: resolved.name,
                        source_id,
                        target_id,
                        properties: PropertyMap::new(),
                        source_locations: vec![location],
                        unknown_type: !resolved.known,
                    },
                    first_seen: order,
                    properties: RankedProperties::default(),
                };
                entry
                    .properties
                    .merge(&mut entry.edge.properties, &candidate.properties, order);

                let edge_id = entry.edge.id;
                self.edges.insert(key, entry);
                self.stats.created += 1;
                Resolution::Resolved {
                    edge_id,
                    merged: false,
                }
            }
        }
    }

    /// Resolve every relationship candidate of a chunk, in candidate order
    pub fn resolve_chunk(
        &mut self,
        chunk: &Chunk,
        candidates: &[CandidateRelationship],
        registry: &EntityRegistry,
    ) -> Vec<Resolution> {
        candidates
            .iter()
            .enumerate()
            .map(|(position, candidate)| self.resolve(candidate, chunk, position, registry))
            .collect()
    }

    fn drop_candidate(
        &mut self,
        candidate: &CandidateRelationship,
        chunk: &Chunk,
        reason: DropReason,
    ) -> Resolution {
        tracing::warn!(
            chunk = chunk.index,
            candidate = %candidate.label(),
            %reason,
            "Dropped relationship"
        );
        self.stats.record_drop(reason);
        self.drops.push(DropRecord {
            chunk_index: chunk.index,
            candidate: candidate.label(),
            reason,
        });
        Resolution::Dropped(reason)
    }

    /// Snapshot of all canonical edges in resolution order
    pub fn edges(&self) -> Vec<Edge> {
        self.edges.values().map(|entry| entry.edge.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Every dropped candidate, in resolution order
    pub fn drops(&self) -> &[DropRecord] {
        &self.drops
    }

    pub fn stats(&self) -> &ResolverStats {
        &self.stats
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use okg_core::{CandidateEntity, EntityTypeDef, RelationshipTypeDef};

    fn ontology() -> Arc<Ontology> {
        Arc::new(
            Ontology::new(
                vec![EntityTypeDef::new("Airport")],
                vec![RelationshipTypeDef::new("CONNECTS_TO").with_variations(["flies to"])],
            )
            .unwrap(),
        )
    }

    fn chunk(index: usize) -> Chunk {
        Chunk::new(index, index * 20, index * 20 + 40, "x".repeat(40))
    }

    fn registry_with(strict: bool, chunks: &[usize]) -> EntityRegistry {
        let mut registry = EntityRegistry::new(ontology(), strict);
        for &index in chunks {
            registry.register_chunk(
                &chunk(index),
                &[
                    CandidateEntity::new("a1", "Airport", "IST"),
                    CandidateEntity::new("b2", "Airport", "BOM"),
                ],
            );
        }
        registry
    }

    #[test]
    fn test_resolve_creates_edge() {
        let registry = registry_with(false, &[0]);
        let mut resolver = RelationshipResolver::new(ontology(), false);

        let resolution = resolver.resolve(
            &CandidateRelationship::new("a1", "connects to", "b2").with_property("daily", 3),
            &chunk(0),
            0,
            &registry,
        );

        assert!(matches!(resolution, Resolution::Resolved { merged: false, .. }));
        let edges = resolver.edges();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].edge_type, "CONNECTS_TO");
        assert_eq!(
            Some(edges[0].source_id),
            registry.canonical_id(0, "a1")
        );
        assert_eq!(edges[0].properties["daily"], serde_json::json!(3));
    }

    #[test]
    fn test_same_triple_from_two_chunks_merges() {
        let registry = registry_with(false, &[0, 1]);
        let mut resolver = RelationshipResolver::new(ontology(), false);

        resolver.resolve(
            &CandidateRelationship::new("a1", "CONNECTS_TO", "b2"),
            &chunk(0),
            0,
            &registry,
        );
        let second = resolver.resolve(
            &CandidateRelationship::new("a1", "Flies To", "b2"),
            &chunk(1),
            0,
            &registry,
        );

        assert!(matches!(second, Resolution::Resolved { merged: true, .. }));
        let edges = resolver.edges();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source_locations.len(), 2);
        assert_eq!(resolver.stats().resolved(), 2);
        assert!((resolver.stats().deduplication_rate() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_direction_matters() {
        let registry = registry_with(false, &[0]);
        let mut resolver = RelationshipResolver::new(ontology(), false);

        let candidates = [
            CandidateRelationship::new("a1", "CONNECTS_TO", "b2"),
            CandidateRelationship::new("b2", "CONNECTS_TO", "a1"),
        ];
        resolver.resolve_chunk(&chunk(0), &candidates, &registry);

        assert_eq!(resolver.len(), 2);
    }

    #[test]
    fn test_unresolved_endpoint_dropped() {
        let mut registry = EntityRegistry::new(ontology(), false);
        registry.register_chunk(
            &chunk(0),
            &[
                CandidateEntity::new("a1", "Airport", "IST"),
                CandidateEntity::new("b2", "Airport", ""),
            ],
        );
        let mut resolver = RelationshipResolver::new(ontology(), false);

        let resolution = resolver.resolve(
            &CandidateRelationship::new("a1", "CONNECTS_TO", "b2").with_id("r1"),
            &chunk(0),
            0,
            &registry,
        );

        assert_eq!(resolution, Resolution::Dropped(DropReason::UnresolvedEndpoint));
        assert!(resolver.is_empty());
        assert_eq!(
            resolver.drops(),
            &[DropRecord {
                chunk_index: 0,
                candidate: "r1".to_string(),
                reason: DropReason::UnresolvedEndpoint,
            }]
        );
        assert_eq!(resolver.stats().orphaned(), 1);
    }

    #[test]
    fn test_temp_ids_are_chunk_scoped() {
        let registry = registry_with(false, &[0]);
        let mut resolver = RelationshipResolver::new(ontology(), false);

        // Chunk 1 never registered "a1"
        let resolution = resolver.resolve(
            &CandidateRelationship::new("a1", "CONNECTS_TO", "b2"),
            &chunk(1),
            0,
            &registry,
        );
        assert_eq!(resolution, Resolution::Dropped(DropReason::UnresolvedEndpoint));
    }

    #[test]
    fn test_type_checks() {
        let registry = registry_with(true, &[0]);

        let mut strict = RelationshipResolver::new(ontology(), true);
        let unknown = strict.resolve(
            &CandidateRelationship::new("a1", "OWNS", "b2"),
            &chunk(0),
            0,
            &registry,
        );
        assert_eq!(unknown, Resolution::Dropped(DropReason::UnknownRelationshipType));

        let missing = strict.resolve(
            &CandidateRelationship::new("a1", "  ", "b2"),
            &chunk(0),
            1,
            &registry,
        );
        assert_eq!(missing, Resolution::Dropped(DropReason::MissingRelationshipType));
        assert_eq!(strict.stats().dropped(), 2);
        assert_eq!(strict.stats().resolution_rate(), 0.0);

        let mut lenient = RelationshipResolver::new(ontology(), false);
        lenient.resolve(
            &CandidateRelationship::new("a1", "OWNS", "b2"),
            &chunk(0),
            0,
            &registry,
        );
        let edges = lenient.edges();
        assert!(edges[0].unknown_type);
        assert_eq!(edges[0].edge_type, "OWNS");
    }

    #[test]
    fn test_self_loop_allowed() {
        let registry = registry_with(false, &[0]);
        let mut resolver = RelationshipResolver::new(ontology(), false);

        let resolution = resolver.resolve(
            &CandidateRelationship::new("a1", "CONNECTS_TO", "a1"),
            &chunk(0),
            0,
            &registry,
        );
        assert!(matches!(resolution, Resolution::Resolved { .. }));
    }
}
