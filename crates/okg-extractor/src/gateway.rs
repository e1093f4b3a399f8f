//! Extraction Gateway module
//!
//! The boundary between the pipeline and the external extraction oracle.
//! Gateways turn one chunk plus the ontology into candidate entities and
//! relationships, or a typed, chunk-scoped failure.
//!
//! Raw oracle output is decoded in exactly one place, [`decode_response`], so
//! parse failures surface as [`GatewayError::Malformed`] instead of panics.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use okg_core::{
    CandidateEntity, CandidateRelationship, Chunk, ChunkCandidates, LlmClient, Ontology,
    PropertyMap, TextSpan, NAME_PROPERTY,
};

// ============================================================================
// Contract
// ============================================================================

/// Recoverable, chunk-scoped extraction failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The oracle answered, but not in a decodable shape
    #[error("Malformed gateway response: {0}")]
    Malformed(String),

    /// The oracle did not answer in time
    #[error("Gateway timed out: {0}")]
    Timeout(String),

    /// The oracle (or its transport) reported an error
    #[error("Upstream gateway error: {0}")]
    Upstream(String),
}

/// Source of candidate extractions for a chunk.
///
/// Retry and backoff policies belong to implementations, not to the pipeline.
#[async_trait]
pub trait ExtractionGateway: Send + Sync {
    /// Extract candidates from one chunk
    async fn extract(
        &self,
        chunk: &Chunk,
        ontology: &Ontology,
    ) -> Result<ChunkCandidates, GatewayError>;
}

#[async_trait]
impl<G: ExtractionGateway + ?Sized> ExtractionGateway for Arc<G> {
    async fn extract(
        &self,
        chunk: &Chunk,
        ontology: &Ontology,
    ) -> Result<ChunkCandidates, GatewayError> {
        (**self).extract(chunk, ontology).await
    }
}

// ============================================================================
// Response decoding
// ============================================================================

/// Top-level oracle payload
#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default, alias = "entities")]
    nodes: Vec<WireNode>,
    #[serde(default)]
    relationships: Vec<WireRelationship>,
}

#[derive(Debug, Deserialize)]
struct WireNode {
    id: WireId,
    #[serde(rename = "type", default)]
    node_type: String,
    #[serde(default)]
    properties: Option<PropertyMap>,
    #[serde(default)]
    source_location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireRelationship {
    #[serde(default)]
    id: Option<WireId>,
    #[serde(rename = "type", default)]
    relationship_type: String,
    source_id: WireId,
    target_id: WireId,
    #[serde(default)]
    properties: Option<PropertyMap>,
    #[serde(default)]
    source_location: Option<String>,
}

/// Oracles emit ids as strings or bare numbers
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Text(String),
    Number(serde_json::Number),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

/// Decode raw oracle text into chunk candidates.
///
/// Accepts a bare JSON object, a JSON object inside a Markdown code fence, or
/// a JSON object surrounded by prose. Numeric and boolean `name` values are
/// coerced to text; `char_<start>_<end>` locations become chunk-relative spans.
pub fn decode_response(raw: &str) -> Result<ChunkCandidates, GatewayError> {
    let json = locate_json(raw)
        .ok_or_else(|| GatewayError::Malformed("no JSON object found in response".to_string()))?;

    let wire: WireResponse =
        serde_json::from_str(json).map_err(|e| GatewayError::Malformed(e.to_string()))?;

    Ok(from_wire(wire))
}

/// Decode an already parsed JSON value
pub fn decode_value(value: Value) -> Result<ChunkCandidates, GatewayError> {
    if !value.is_object() {
        return Err(GatewayError::Malformed(
            "response is not a JSON object".to_string(),
        ));
    }
    let wire: WireResponse =
        serde_json::from_value(value).map_err(|e| GatewayError::Malformed(e.to_string()))?;
    Ok(from_wire(wire))
}

fn from_wire(wire: WireResponse) -> ChunkCandidates {
    let entities = wire
        .nodes
        .into_iter()
        .map(|node| {
            let mut properties = node.properties.unwrap_or_default();
            if let Some(name) = properties.get_mut(NAME_PROPERTY) {
                coerce_name(name);
            }
            CandidateEntity {
                temp_id: node.id.into_string(),
                entity_type: node.node_type,
                properties,
                span: node.source_location.as_deref().and_then(TextSpan::parse),
            }
        })
        .collect();

    let relationships = wire
        .relationships
        .into_iter()
        .map(|rel| CandidateRelationship {
            temp_id: rel.id.map(WireId::into_string),
            relationship_type: rel.relationship_type,
            source_temp_id: rel.source_id.into_string(),
            target_temp_id: rel.target_id.into_string(),
            properties: rel.properties.unwrap_or_default(),
            span: rel.source_location.as_deref().and_then(TextSpan::parse),
        })
        .collect();

    ChunkCandidates::new(entities, relationships)
}

fn coerce_name(name: &mut Value) {
    let text = match name {
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return,
    };
    *name = Value::String(text);
}

/// Find the JSON object inside an oracle reply
fn locate_json(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    // Fenced block, with or without a language tag
    if let Some(open) = trimmed.find("```") {
        let after = &trimmed[open + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(close) = body.find("```") {
            let inner = body[..close].trim();
            if inner.starts_with('{') && inner.ends_with('}') {
                return Some(inner);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (start < end).then(|| &trimmed[start..=end])
}

// ============================================================================
// LLM-backed gateway
// ============================================================================

/// Gateway that prompts an [`LlmClient`] and decodes its completion
pub struct LlmGateway<C: LlmClient> {
    client: C,
    timeout: Option<Duration>,
}

impl<C: LlmClient> LlmGateway<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            timeout: None,
        }
    }

    /// Fail calls that take longer than `timeout` with [`GatewayError::Timeout`]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the extraction prompt
    pub fn build_prompt(&self, chunk: &Chunk, ontology: &Ontology) -> String {
        let entity_types: Vec<String> = ontology
            .entity_types()
            .iter()
            .map(|def| {
                let mut line = format!("- {} ({})", def.name, def.primitive_type);
                if !def.variations.is_empty() {
                    line.push_str(&format!(", also called: {}", def.variations.join(", ")));
                }
                line
            })
            .collect();

        let relationship_types: Vec<String> = ontology
            .relationship_types()
            .iter()
            .map(|def| {
                let mut line = format!("- {}", def.name);
                if !def.variations.is_empty() {
                    line.push_str(&format!(", also called: {}", def.variations.join(", ")));
                }
                line
            })
            .collect();

        format!(
            "Extract entities and relationships from the text using only these types.\n\n\
             Entity types:\n{}\n\nRelationship types:\n{}\n\n\
             Give every entity a unique id and a \"name\" property. Relationships reference \
             entity ids through source_id and target_id. Locations use the form \
             char_<start>_<end>, relative to the text.\n\n\
             Return JSON: {{\"nodes\": [{{\"id\", \"type\", \"properties\", \"source_location\"}}], \
             \"relationships\": [{{\"id\", \"type\", \"source_id\", \"target_id\", \"properties\", \
             \"source_location\"}}]}}\n\nText:\n{}",
            entity_types.join("\n"),
            relationship_types.join("\n"),
            chunk.text
        )
    }
}

#[async_trait]
impl<C: LlmClient> ExtractionGateway for LlmGateway<C> {
    async fn extract(
        &self,
        chunk: &Chunk,
        ontology: &Ontology,
    ) -> Result<ChunkCandidates, GatewayError> {
        let prompt = self.build_prompt(chunk, ontology);
        let request = self.client.generate(&prompt);

        let completion = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| GatewayError::Timeout(format!("no completion after {limit:?}")))?,
            None => request.await,
        }
        .map_err(|e| GatewayError::Upstream(e.to_string()))?;

        decode_response(&completion)
    }
}

// ============================================================================
// Recorded gateway
// ============================================================================

/// A recorded response: raw oracle text or an already structured payload
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Recording {
    Raw(String),
    Structured(Value),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecordingFile {
    Sequence(Vec<Recording>),
    Indexed(HashMap<String, Recording>),
}

/// Gateway that replays recorded responses by chunk index.
///
/// Chunks without a recording yield no candidates.
#[derive(Debug, Clone, Default)]
pub struct RecordedGateway {
    responses: HashMap<usize, Result<String, GatewayError>>,
}

impl RecordedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the raw response for a chunk
    pub fn with_response(mut self, chunk_index: usize, raw: impl Into<String>) -> Self {
        self.responses.insert(chunk_index, Ok(raw.into()));
        self
    }

    /// Record a failure for a chunk
    pub fn with_failure(mut self, chunk_index: usize, error: GatewayError) -> Self {
        self.responses.insert(chunk_index, Err(error));
        self
    }

    /// Parse a recording file.
    ///
    /// Either a JSON array (element `i` answers chunk `i`) or a JSON object
    /// keyed by chunk index. Each response is raw text or a JSON object.
    pub fn from_json_str(content: &str) -> Result<Self, GatewayError> {
        let file: RecordingFile = serde_json::from_str(content)
            .map_err(|e| GatewayError::Malformed(format!("invalid recording file: {e}")))?;

        let entries: Vec<(usize, Recording)> = match file {
            RecordingFile::Sequence(items) => items.into_iter().enumerate().collect(),
            RecordingFile::Indexed(items) => items
                .into_iter()
                .map(|(key, recording)| {
                    key.trim()
                        .parse::<usize>()
                        .map(|index| (index, recording))
                        .map_err(|_| {
                            GatewayError::Malformed(format!("invalid chunk index '{key}'"))
                        })
                })
                .collect::<Result<_, _>>()?,
        };

        let mut gateway = Self::new();
        for (index, recording) in entries {
            let raw = match recording {
                Recording::Raw(text) => text,
                Recording::Structured(value) => value.to_string(),
            };
            gateway = gateway.with_response(index, raw);
        }
        Ok(gateway)
    }

    /// Load a recording file from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Upstream(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&content)
    }

    /// Number of recorded chunks
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

#[async_trait]
impl ExtractionGateway for RecordedGateway {
    async fn extract(
        &self,
        chunk: &Chunk,
        _ontology: &Ontology,
    ) -> Result<ChunkCandidates, GatewayError> {
        match self.responses.get(&chunk.index) {
            Some(Ok(raw)) => decode_response(raw),
            Some(Err(error)) => Err(error.clone()),
            None => {
                tracing::debug!(chunk = chunk.index, "No recorded response");
                Ok(ChunkCandidates::default())
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use okg_core::{EntityTypeDef, OkgError, RelationshipTypeDef};

    const WIRE: &str = r#"{
        "nodes": [
            {"id": "a1", "type": "Airport", "properties": {"name": "IST"}, "source_location": "char_0_3"},
            {"id": 2, "type": "Airport", "properties": {"name": 1000}}
        ],
        "relationships": [
            {"id": "r1", "type": "CONNECTS_TO", "source_id": "a1", "target_id": 2}
        ]
    }"#;

    fn ontology() -> Ontology {
        Ontology::new(
            vec![EntityTypeDef::new("Airport")],
            vec![RelationshipTypeDef::new("CONNECTS_TO")],
        )
        .unwrap()
    }

    struct EchoClient(String);

    #[async_trait]
    impl LlmClient for EchoClient {
        async fn generate(&self, _prompt: &str) -> okg_core::Result<String> {
            Ok(self.0.clone())
        }
    }

    struct FailingClient;

    #[async_trait]
    impl LlmClient for FailingClient {
        async fn generate(&self, _prompt: &str) -> okg_core::Result<String> {
            Err(OkgError::Gateway("rate limited".to_string()))
        }
    }

    struct SlowClient;

    #[async_trait]
    impl LlmClient for SlowClient {
        async fn generate(&self, _prompt: &str) -> okg_core::Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("{}".to_string())
        }
    }

    #[test]
    fn test_decode_wire_shape() {
        let candidates = decode_response(WIRE).unwrap();

        assert_eq!(candidates.entities.len(), 2);
        assert_eq!(candidates.entities[0].temp_id, "a1");
        assert_eq!(candidates.entities[0].span, Some(TextSpan::new(0, 3)));
        assert_eq!(candidates.entities[1].temp_id, "2");
        // Numeric names are coerced to text
        assert_eq!(candidates.entities[1].name(), Some("1000"));

        let rel = &candidates.relationships[0];
        assert_eq!(rel.temp_id.as_deref(), Some("r1"));
        assert_eq!(rel.target_temp_id, "2");
        assert!(rel.properties.is_empty());
    }

    #[test]
    fn test_decode_fenced_and_prose() {
        let fenced = format!("Here you go:\n```json\n{WIRE}\n```\nDone.");
        assert_eq!(decode_response(&fenced).unwrap().entities.len(), 2);

        let prose = format!("Sure! {WIRE} Let me know if you need more.");
        assert_eq!(decode_response(&prose).unwrap().relationships.len(), 1);
    }

    #[test]
    fn test_decode_empty_object() {
        let candidates = decode_response("{}").unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode_response("I could not find anything."),
            Err(GatewayError::Malformed(_))
        ));
        assert!(matches!(
            decode_response(r#"{"nodes": [{"type": "Airport"}]}"#),
            Err(GatewayError::Malformed(_))
        ));
        assert!(matches!(
            decode_response(r#"{"nodes": "IST"}"#),
            Err(GatewayError::Malformed(_))
        ));
        assert!(matches!(
            decode_value(serde_json::json!([1, 2])),
            Err(GatewayError::Malformed(_))
        ));
    }

    #[test]
    fn test_prompt_lists_ontology() {
        let ontology = Ontology::new(
            vec![EntityTypeDef::new("Airport").with_variations(["Airfield"])],
            vec![RelationshipTypeDef::new("CONNECTS_TO")],
        )
        .unwrap();
        let gateway = LlmGateway::new(EchoClient(String::new()));
        let chunk = Chunk::new(0, 0, 10, "IST to BOM");

        let prompt = gateway.build_prompt(&chunk, &ontology);
        assert!(prompt.contains("- Airport (string), also called: Airfield"));
        assert!(prompt.contains("- CONNECTS_TO"));
        assert!(prompt.ends_with("IST to BOM"));
    }

    #[tokio::test]
    async fn test_llm_gateway_decodes_completion() {
        let gateway = LlmGateway::new(EchoClient(format!("```\n{WIRE}\n```")));
        let chunk = Chunk::new(0, 0, 10, "IST to BOM");

        let candidates = gateway.extract(&chunk, &ontology()).await.unwrap();
        assert_eq!(candidates.entities.len(), 2);
    }

    #[tokio::test]
    async fn test_llm_gateway_errors() {
        let chunk = Chunk::new(0, 0, 10, "IST to BOM");

        let upstream = LlmGateway::new(FailingClient)
            .extract(&chunk, &ontology())
            .await;
        assert!(matches!(upstream, Err(GatewayError::Upstream(_))));

        let timeout = LlmGateway::new(SlowClient)
            .with_timeout(Duration::from_millis(10))
            .extract(&chunk, &ontology())
            .await;
        assert!(matches!(timeout, Err(GatewayError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_recorded_gateway() {
        let gateway = RecordedGateway::new()
            .with_response(0, WIRE)
            .with_failure(1, GatewayError::Timeout("slow".to_string()));
        let ontology = ontology();

        let first = gateway
            .extract(&Chunk::new(0, 0, 3, "IST"), &ontology)
            .await
            .unwrap();
        assert_eq!(first.entities.len(), 2);

        let second = gateway.extract(&Chunk::new(1, 3, 6, "BOM"), &ontology).await;
        assert!(matches!(second, Err(GatewayError::Timeout(_))));

        let missing = gateway
            .extract(&Chunk::new(7, 6, 9, "xyz"), &ontology)
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_recording_file_formats() {
        let sequence = format!(r#"[{WIRE}, "not json at all"]"#);
        let gateway = RecordedGateway::from_json_str(&sequence).unwrap();
        assert_eq!(gateway.len(), 2);

        let indexed = format!(r#"{{"3": {WIRE}}}"#);
        let gateway = RecordedGateway::from_json_str(&indexed).unwrap();
        assert_eq!(gateway.len(), 1);

        assert!(RecordedGateway::from_json_str(r#"{"three": {}}"#).is_err());
    }
}
