//! OKG Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout the OKG system:
//! - Ontology models (entity and relationship types with their variations)
//! - Document chunks and source locations
//! - Candidate extractions produced per chunk
//! - Canonical nodes and edges of the final graph
//! - Common error types
//! - Configuration management

pub mod config;
pub mod ontology;

pub use config::{AppConfig, ChunkingConfig, ConfigError, LoggingConfig, PipelineConfig};
pub use ontology::{
    EntityTypeDef, Ontology, OntologyDocument, OntologyTriple, PrimitiveType,
    RelationshipTypeDef, ResolvedType, TypeKind,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for OKG operations
#[derive(Error, Debug)]
pub enum OkgError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid ontology: {0}")]
    InvalidOntology(String),

    #[error("Unknown {kind} type: {token}")]
    UnknownType { kind: TypeKind, token: String },

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OkgError {
    /// Whether this error must abort a run before any extraction starts
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::InvalidOntology(_))
    }
}

impl From<ConfigError> for OkgError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OkgError>;

/// Property values attached to nodes, edges and candidates.
///
/// Insertion ordered so serialized output is stable.
pub type PropertyMap = IndexMap<String, serde_json::Value>;

/// Key of the mandatory display name property
pub const NAME_PROPERTY: &str = "name";

// ============================================================================
// Document Chunks
// ============================================================================

/// A contiguous, offset-tracked window of the source document.
///
/// Offsets count `char`s, not bytes, and are half-open: `[start_offset, end_offset)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Position of this chunk in the document's chunk sequence
    pub index: usize,

    /// First character offset covered by the chunk
    pub start_offset: usize,

    /// One past the last character offset covered by the chunk
    pub end_offset: usize,

    /// Chunk text
    pub text: String,
}

impl Chunk {
    /// Create a new chunk
    pub fn new(index: usize, start_offset: usize, end_offset: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            start_offset,
            end_offset,
            text: text.into(),
        }
    }

    /// Number of characters covered
    pub fn len(&self) -> usize {
        self.end_offset.saturating_sub(self.start_offset)
    }

    /// Whether the chunk covers no characters
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Source location spanning the whole chunk
    pub fn location(&self) -> SourceLocation {
        SourceLocation {
            chunk_index: self.index,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
        }
    }

    /// Translate a chunk-relative span into a document source location.
    ///
    /// Spans that are empty, inverted or run past the chunk fall back to the
    /// whole chunk.
    pub fn locate(&self, span: Option<TextSpan>) -> SourceLocation {
        match span {
            Some(span) if span.start < span.end && span.end <= self.len() => SourceLocation {
                chunk_index: self.index,
                start_offset: self.start_offset + span.start,
                end_offset: self.start_offset + span.end,
            },
            _ => self.location(),
        }
    }
}

/// A chunk-relative character span reported by the extraction oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub start: usize,
    pub end: usize,
}

impl TextSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Parse the oracle's `char_<start>_<end>` notation
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.trim().strip_prefix("char_")?;
        let (start, end) = rest.split_once('_')?;
        Some(Self {
            start: start.parse().ok()?,
            end: end.parse().ok()?,
        })
    }
}

/// Where in the document a node or edge was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub chunk_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl SourceLocation {
    /// Characters of surrounding text [`excerpt`](Self::excerpt) includes on
    /// each side
    pub const CONTEXT_CHARS: usize = 100;

    /// Look up the located text in the original document.
    ///
    /// Returns `None` when the range is empty or does not fit the document.
    pub fn excerpt(&self, document: &str) -> Option<LocationExcerpt> {
        self.excerpt_with_context(document, Self::CONTEXT_CHARS)
    }

    /// Like [`excerpt`](Self::excerpt) with `context_chars` of surrounding
    /// text on each side
    pub fn excerpt_with_context(
        &self,
        document: &str,
        context_chars: usize,
    ) -> Option<LocationExcerpt> {
        let chars: Vec<char> = document.chars().collect();
        let (start, end) = (self.start_offset, self.end_offset);
        if start >= end || end > chars.len() {
            return None;
        }

        let before = &chars[..start];
        let text: String = chars[start..end].iter().collect();
        let start_line = 1 + before.iter().filter(|&&ch| ch == '\n').count();
        let end_line = start_line + text.matches('\n').count();
        let column = 1 + before.iter().rev().take_while(|&&ch| ch != '\n').count();

        let context_start = start.saturating_sub(context_chars);
        let context_end = end.saturating_add(context_chars).min(chars.len());

        Some(LocationExcerpt {
            text,
            start_line,
            end_line,
            column,
            context: chars[context_start..context_end].iter().collect(),
            context_before: start - context_start,
            context_after: context_end - end,
        })
    }
}

/// Text found at a source location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationExcerpt {
    pub text: String,
    /// 1-based line of the first character
    pub start_line: usize,
    /// Start line plus the newlines inside `text`
    pub end_line: usize,
    /// 1-based column of the first character
    pub column: usize,
    /// `text` with surrounding characters
    pub context: String,
    /// Characters of `context` before `text`
    pub context_before: usize,
    /// Characters of `context` after `text`
    pub context_after: usize,
}

impl LocationExcerpt {
    /// The context with the located text wrapped in `>>>` and `<<<`
    pub fn highlighted(&self) -> String {
        let chars: Vec<char> = self.context.chars().collect();
        let text_end = chars.len() - self.context_after;
        let before: String = chars[..self.context_before].iter().collect();
        let inner: String = chars[self.context_before..text_end].iter().collect();
        let after: String = chars[text_end..].iter().collect();
        format!("{before}>>>{inner}<<<{after}")
    }
}

// ============================================================================
// Candidate Extractions
// ============================================================================

/// An unvalidated entity extracted from one chunk.
///
/// `temp_id` is only meaningful inside the chunk that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEntity {
    /// Chunk-local temporary identifier
    pub temp_id: String,

    /// Raw type token as reported by the oracle
    pub entity_type: String,

    /// Property values, expected to contain `name`
    pub properties: PropertyMap,

    /// Optional chunk-relative span of the mention
    pub span: Option<TextSpan>,
}

impl CandidateEntity {
    /// Create a candidate with a name property
    pub fn new(
        temp_id: impl Into<String>,
        entity_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let mut properties = PropertyMap::new();
        properties.insert(NAME_PROPERTY.to_string(), serde_json::Value::String(name.into()));
        Self {
            temp_id: temp_id.into(),
            entity_type: entity_type.into(),
            properties,
            span: None,
        }
    }

    /// Add a property value
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Set the chunk-relative span
    pub fn with_span(mut self, start: usize, end: usize) -> Self {
        self.span = Some(TextSpan::new(start, end));
        self
    }

    /// The raw `name` property, if it is a string
    pub fn name(&self) -> Option<&str> {
        self.properties.get(NAME_PROPERTY).and_then(|v| v.as_str())
    }
}

/// An unvalidated relationship extracted from one chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRelationship {
    /// Chunk-local identifier of the relationship itself (optional)
    pub temp_id: Option<String>,

    /// Raw type token as reported by the oracle
    pub relationship_type: String,

    /// Chunk-local id of the source entity
    pub source_temp_id: String,

    /// Chunk-local id of the target entity
    pub target_temp_id: String,

    /// Property values
    pub properties: PropertyMap,

    /// Optional chunk-relative span of the mention
    pub span: Option<TextSpan>,
}

impl CandidateRelationship {
    /// Create a new relationship candidate
    pub fn new(
        source_temp_id: impl Into<String>,
        relationship_type: impl Into<String>,
        target_temp_id: impl Into<String>,
    ) -> Self {
        Self {
            temp_id: None,
            relationship_type: relationship_type.into(),
            source_temp_id: source_temp_id.into(),
            target_temp_id: target_temp_id.into(),
            properties: PropertyMap::new(),
            span: None,
        }
    }

    /// Set the chunk-local id
    pub fn with_id(mut self, temp_id: impl Into<String>) -> Self {
        self.temp_id = Some(temp_id.into());
        self
    }

    /// Add a property value
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Set the chunk-relative span
    pub fn with_span(mut self, start: usize, end: usize) -> Self {
        self.span = Some(TextSpan::new(start, end));
        self
    }

    /// Identifier used in logs and drop manifests
    pub fn label(&self) -> String {
        match &self.temp_id {
            Some(id) => id.clone(),
            None => format!(
                "{}-[{}]->{}",
                self.source_temp_id, self.relationship_type, self.target_temp_id
            ),
        }
    }
}

/// Everything the extraction oracle returned for one chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkCandidates {
    pub entities: Vec<CandidateEntity>,
    pub relationships: Vec<CandidateRelationship>,
}

impl ChunkCandidates {
    pub fn new(entities: Vec<CandidateEntity>, relationships: Vec<CandidateRelationship>) -> Self {
        Self {
            entities,
            relationships,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

// ============================================================================
// Canonical Graph
// ============================================================================

/// A deduplicated, globally identified entity of the final graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Globally unique surrogate id
    pub id: Uuid,

    /// Canonical ontology type (or the raw token when unknown)
    #[serde(rename = "type")]
    pub node_type: String,

    /// Property values, always containing `name`
    pub properties: PropertyMap,

    /// Every place in the document this entity was observed
    pub source_locations: Vec<SourceLocation>,

    /// Set when the type passed through non-strict resolution unmatched
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unknown_type: bool,
}

impl Node {
    /// Display name of the node
    pub fn name(&self) -> &str {
        self.properties
            .get(NAME_PROPERTY)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
    }

    /// Earliest observation in document order
    pub fn first_location(&self) -> Option<SourceLocation> {
        self.source_locations.iter().min().copied()
    }
}

/// A deduplicated, globally identified relationship of the final graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Globally unique surrogate id
    pub id: Uuid,

    /// Canonical ontology relationship type (or the raw token when unknown)
    #[serde(rename = "type")]
    pub edge_type: String,

    /// Canonical id of the source node
    pub source_id: Uuid,

    /// Canonical id of the target node
    pub target_id: Uuid,

    /// Property values
    pub properties: PropertyMap,

    /// Every place in the document this relationship was observed
    pub source_locations: Vec<SourceLocation>,

    /// Set when the type passed through non-strict resolution unmatched
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unknown_type: bool,
}

// ============================================================================
// Traits
// ============================================================================

/// Trait for LLM clients
///
/// Provider integrations live outside the core; gateways only need a prompt in
/// and a completion out.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a response
    async fn generate(&self, prompt: &str) -> Result<String>;
}

// ============================================================================
// Tests
// ============================================================================
