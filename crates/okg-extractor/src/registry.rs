//! Entity Registry module
//!
//! Deduplicates candidate entities into canonical nodes keyed by
//! (canonical type, normalized name), and remembers which canonical node each
//! chunk-local temporary id was registered as.
//!
//! The registry is the single shared mutable structure of a run. Callers must
//! serialize access to it; the pipeline keeps it behind an async mutex.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use okg_core::{CandidateEntity, Chunk, Node, Ontology, PrimitiveType, NAME_PROPERTY};

use crate::merge::{add_location, DocumentOrder, RankedProperties};

// ============================================================================
// Errors and statistics
// ============================================================================

/// Why a candidate entity was not registered
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryError {
    #[error("Candidate {temp_id} has no usable name")]
    MissingName { temp_id: String },

    #[error("Candidate {temp_id} has unknown entity type '{token}'")]
    UnknownEntityType { temp_id: String, token: String },
}

/// Registration counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Candidates submitted for registration
    pub total_submitted: usize,
    /// Canonical nodes minted
    pub unique_entities: usize,
    /// Registrations that matched an existing node
    pub merged: usize,
    /// Candidates rejected for a missing or blank name
    pub rejected_missing_name: usize,
    /// Candidates rejected for an unknown type (strict mode)
    pub rejected_unknown_type: usize,
    /// Temporary ids reused within a chunk for a different entity
    pub temp_id_conflicts: usize,
}

impl RegistryStats {
    /// Candidates that made it into the registry
    pub fn accepted(&self) -> usize {
        self.unique_entities + self.merged
    }

    pub fn rejected(&self) -> usize {
        self.rejected_missing_name + self.rejected_unknown_type
    }

    /// Accepted candidates folded into an existing node
    pub fn duplicates_removed(&self) -> usize {
        self.merged
    }

    /// Share of accepted candidates that were duplicates (merged / accepted)
    pub fn deduplication_rate(&self) -> f32 {
        if self.accepted() == 0 {
            0.0
        } else {
            self.merged as f32 / self.accepted() as f32
        }
    }

    /// Share of submitted candidates that were rejected
    pub fn rejection_rate(&self) -> f32 {
        if self.total_submitted == 0 {
            0.0
        } else {
            self.rejected() as f32 / self.total_submitted as f32
        }
    }
}

/// Outcome of registering all entity candidates of one chunk
#[derive(Debug, Clone, Default)]
pub struct ChunkRegistration {
    /// Canonical ids in candidate order (`None` for rejected candidates)
    pub ids: Vec<Option<Uuid>>,
    pub rejected: Vec<RegistryError>,
}

// ============================================================================
// Registry
// ============================================================================

/// Deduplication key: (type key, normalized name)
type EntityKey = (String, String);

#[derive(Debug, Clone)]
struct Entry {
    node: Node,
    first_seen: DocumentOrder,
    properties: RankedProperties,
}

/// Canonical entity store of a run
#[derive(Debug)]
pub struct EntityRegistry {
    ontology: Arc<Ontology>,
    strict: bool,
    entries: IndexMap<EntityKey, Entry>,
    by_id: HashMap<Uuid, usize>,
    temp_ids: HashMap<(usize, String), Uuid>,
    stats: RegistryStats,
}

impl EntityRegistry {
    pub fn new(ontology: Arc<Ontology>, strict: bool) -> Self {
        Self {
            ontology,
            strict,
            entries: IndexMap::new(),
            by_id: HashMap::new(),
            temp_ids: HashMap::new(),
            stats: RegistryStats::default(),
        }
    }

    /// Register one candidate observed at `position` within `chunk`.
    ///
    /// Returns the canonical id, minting a new node the first time a
    /// (type, normalized name) key is seen.
    pub fn register(
        &mut self,
        candidate: &CandidateEntity,
        chunk: &Chunk,
        position: usize,
    ) -> Result<Uuid, RegistryError> {
        self.stats.total_submitted += 1;
        let order = DocumentOrder::new(chunk.index, position);

        let Some(surface) = candidate
            .properties
            .get(NAME_PROPERTY)
            .and_then(name_text)
            .filter(|name| !normalize_name(name).is_empty())
        else {
            self.stats.rejected_missing_name += 1;
            return Err(RegistryError::MissingName {
                temp_id: candidate.temp_id.clone(),
            });
        };

        let resolved = match self
            .ontology
            .resolve_entity_type(&candidate.entity_type, self.strict)
        {
            Ok(resolved) => resolved,
            Err(_) => {
                self.stats.rejected_unknown_type += 1;
                return Err(RegistryError::UnknownEntityType {
                    temp_id: candidate.temp_id.clone(),
                    token: candidate.entity_type.clone(),
                });
            }
        };

        let key = (
            resolved.key.clone(),
            normalize_value(&surface, resolved.primitive_type),
        );

        let mut properties = candidate.properties.clone();
        properties.insert(NAME_PROPERTY.to_string(), Value::String(surface));
        let location = chunk.locate(candidate.span);

        let id = match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.properties.merge(&mut entry.node.properties, &properties, order);
                add_location(&mut entry.node.source_locations, location);
                if order < entry.first_seen {
                    entry.first_seen = order;
                    entry.node.node_type = resolved.name;
                }
                self.stats.merged += 1;
                tracing::debug!(
                    chunk = chunk.index,
                    temp_id = %candidate.temp_id,
                    id = %entry.node.id,
                    "Merged entity into existing node"
                );
                entry.node.id
            }
            None => {
                let mut entry = Entry {
                    node: Node {
                        id: Uuid::new_v4(),
                        node_type: resolved.name,
                        properties: Default::default(),
                        source_locations: vec![location],
                        unknown_type: !resolved.known,
                    },
                    first_seen: order,
                    properties: RankedProperties::default(),
                };
                entry.properties.merge(&mut entry.node.properties, &properties, order);

                let id = entry.node.id;
                let (index, _) = self.entries.insert_full(key, entry);
                self.by_id.insert(id, index);
                self.stats.unique_entities += 1;
                id
            }
        };

        match self.temp_ids.get(&(chunk.index, candidate.temp_id.clone())) {
            Some(existing) if *existing != id => {
                self.stats.temp_id_conflicts += 1;
                tracing::warn!(
                    chunk = chunk.index,
                    temp_id = %candidate.temp_id,
                    "Temporary id reused for a different entity; keeping the first mapping"
                );
            }
            Some(_) => {}
            None => {
                self.temp_ids
                    .insert((chunk.index, candidate.temp_id.clone()), id);
            }
        }

        Ok(id)
    }

    /// Register every entity candidate of a chunk, in candidate order
    pub fn register_chunk(
        &mut self,
        chunk: &Chunk,
        candidates: &[CandidateEntity],
    ) -> ChunkRegistration {
        let mut registration = ChunkRegistration::default();

        for (position, candidate) in candidates.iter().enumerate() {
            match self.register(candidate, chunk, position) {
                Ok(id) => registration.ids.push(Some(id)),
                Err(error) => {
                    tracing::warn!(chunk = chunk.index, %error, "Rejected candidate entity");
                    registration.ids.push(None);
                    registration.rejected.push(error);
                }
            }
        }

        registration
    }

    /// Canonical id registered for a chunk-local temporary id
    pub fn canonical_id(&self, chunk_index: usize, temp_id: &str) -> Option<Uuid> {
        self.temp_ids
            .get(&(chunk_index, temp_id.to_string()))
            .copied()
    }

    /// Find the node for an entity type token and name
    pub fn lookup(&self, entity_type: &str, name: &str) -> Option<&Node> {
        let resolved = self.ontology.resolve_entity_type(entity_type, false).ok()?;
        let key = (
            resolved.key,
            normalize_value(name, resolved.primitive_type),
        );
        self.entries.get(&key).map(|entry| &entry.node)
    }

    pub fn node(&self, id: &Uuid) -> Option<&Node> {
        self.by_id.get(id).map(|&index| &self.entries[index].node)
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.by_id.contains_key(id)
    }

    /// Snapshot of all canonical nodes in first-seen document order,
    /// independent of the order chunks were registered in
    pub fn nodes(&self) -> Vec<Node> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.first_seen);
        entries.into_iter().map(|entry| entry.node.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }

    pub fn ontology(&self) -> &Ontology {
        &self.ontology
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }
}

// ============================================================================
// Name normalization
// ============================================================================

/// Text form of a name value; numbers and booleans count as names
fn name_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Case-fold, trim and collapse internal whitespace
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalize a name according to its primitive type.
///
/// Names that parse as the primitive type share a key with every other
/// spelling of the same value; anything else falls back to text rules.
pub fn normalize_value(name: &str, primitive_type: PrimitiveType) -> String {
    let text = normalize_name(name);
    let numeric: String = text
        .chars()
        .filter(|c| !matches!(c, ',' | '_' | ' '))
        .collect();

    let canonical = match primitive_type {
        PrimitiveType::String => None,
        PrimitiveType::Integer => numeric.parse::<i128>().ok().map(|n| n.to_string()),
        PrimitiveType::Float => numeric
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(|n| if n == 0.0 { 0.0 } else { n })
            .map(|n| n.to_string()),
        PrimitiveType::Boolean => match text.as_str() {
            "true" | "yes" | "y" | "1" | "on" => Some("true".to_string()),
            "false" | "no" | "n" | "0" | "off" => Some("false".to_string()),
            _ => None,
        },
    };

    canonical.unwrap_or(text)
}

// ============================================================================
// Tests
// ============================================================================
