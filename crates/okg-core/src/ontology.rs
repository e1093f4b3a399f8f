//! Ontology model
//!
//! The constrained vocabulary of entity and relationship types that guides
//! extraction. Each type has a canonical name and a list of variations; entity
//! types also carry the primitive type their names are interpreted as.
//!
//! An [`Ontology`] is validated once when it is built and is read-only
//! afterwards.

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{OkgError, Result};

const TYPE_NAME_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9_\s]*$";

/// Prefix marking the registry key of a type the ontology does not know
const UNKNOWN_KEY_PREFIX: char = '?';

// ============================================================================
// Definitions
// ============================================================================

/// How an entity's name should be interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
}

impl std::fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
            Self::Boolean => write!(f, "boolean"),
        }
    }
}

/// Which half of the ontology a type token belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Entity,
    Relationship,
}

impl std::fmt::Display for TypeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entity => write!(f, "entity"),
            Self::Relationship => write!(f, "relationship"),
        }
    }
}

/// An allowed entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTypeDef {
    /// Canonical type name
    #[serde(alias = "entity_type")]
    pub name: String,

    /// Synonyms the oracle may use instead of the canonical name
    #[serde(default, alias = "type_variations")]
    pub variations: Vec<String>,

    /// Interpretation of the entity's name
    #[serde(default)]
    pub primitive_type: PrimitiveType,
}

impl EntityTypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variations: Vec::new(),
            primitive_type: PrimitiveType::String,
        }
    }

    pub fn with_variations<I, S>(mut self, variations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variations = variations.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_primitive_type(mut self, primitive_type: PrimitiveType) -> Self {
        self.primitive_type = primitive_type;
        self
    }
}

/// An allowed relationship type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipTypeDef {
    /// Canonical type name
    #[serde(alias = "relationship_type")]
    pub name: String,

    /// Synonyms the oracle may use instead of the canonical name
    #[serde(default, alias = "type_variations")]
    pub variations: Vec<String>,
}

impl RelationshipTypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variations: Vec::new(),
        }
    }

    pub fn with_variations<I, S>(mut self, variations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variations = variations.into_iter().map(Into::into).collect();
        self
    }
}

/// Subject-relationship-object triple, the form ontologies are authored in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyTriple {
    pub subject: EntityTypeDef,
    pub relationship: RelationshipTypeDef,
    pub object: EntityTypeDef,
}

/// Serialized ontology as found in TOML or JSON files.
///
/// Either explicit type lists, triples, or both may be given.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OntologyDocument {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub entity_types: Vec<EntityTypeDef>,

    #[serde(default)]
    pub relationship_types: Vec<RelationshipTypeDef>,

    #[serde(default)]
    pub triples: Vec<OntologyTriple>,
}

/// Outcome of resolving a raw type token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
    /// Canonical name, or the trimmed raw token when unknown
    pub name: String,

    /// Identity used for deduplication
    pub key: String,

    /// Primitive type (always `String` for relationships and unknown types)
    pub primitive_type: PrimitiveType,

    /// Whether the token matched the ontology
    pub known: bool,
}

// ============================================================================
// Ontology
// ============================================================================

/// Validated, indexed ontology
#[derive(Debug, Clone)]
pub struct Ontology {
    name: Option<String>,
    entity_types: Vec<EntityTypeDef>,
    relationship_types: Vec<RelationshipTypeDef>,
    /// normalized token -> index into `entity_types`
    entity_index: HashMap<String, usize>,
    /// normalized token -> index into `relationship_types`
    relationship_index: HashMap<String, usize>,
}

impl Ontology {
    /// Build and validate an ontology from explicit type lists
    pub fn new(
        entity_types: Vec<EntityTypeDef>,
        relationship_types: Vec<RelationshipTypeDef>,
    ) -> Result<Self> {
        let pattern =
            Regex::new(TYPE_NAME_PATTERN).map_err(|e| OkgError::Other(anyhow::Error::new(e)))?;

        let entity_types: Vec<EntityTypeDef> = entity_types
            .into_iter()
            .map(|mut def| {
                def.name = def.name.trim().to_string();
                def.variations = clean_variations(def.variations);
                def
            })
            .collect();
        let relationship_types: Vec<RelationshipTypeDef> = relationship_types
            .into_iter()
            .map(|mut def| {
                def.name = def.name.trim().to_string();
                def.variations = clean_variations(def.variations);
                def
            })
            .collect();

        if entity_types.is_empty() {
            return Err(OkgError::InvalidOntology(
                "at least one entity type is required".to_string(),
            ));
        }

        let entity_index = build_index(
            TypeKind::Entity,
            &pattern,
            entity_types
                .iter()
                .map(|def| (def.name.as_str(), def.variations.as_slice())),
        )?;
        let relationship_index = build_index(
            TypeKind::Relationship,
            &pattern,
            relationship_types
                .iter()
                .map(|def| (def.name.as_str(), def.variations.as_slice())),
        )?;

        Ok(Self {
            name: None,
            entity_types,
            relationship_types,
            entity_index,
            relationship_index,
        })
    }

    /// Build an ontology from authored triples.
    ///
    /// Types repeated across triples are merged; their variations are unioned
    /// and the first primitive type wins.
    pub fn from_triples(triples: Vec<OntologyTriple>) -> Result<Self> {
        Self::from_document(OntologyDocument {
            triples,
            ..Default::default()
        })
    }

    /// Build an ontology from its serialized form
    pub fn from_document(document: OntologyDocument) -> Result<Self> {
        let mut entity_types = document.entity_types;
        let mut relationship_types = document.relationship_types;

        for triple in document.triples {
            merge_entity_def(&mut entity_types, triple.subject);
            merge_entity_def(&mut entity_types, triple.object);
            merge_relationship_def(&mut relationship_types, triple.relationship);
        }

        let mut ontology = Self::new(entity_types, relationship_types)?;
        ontology.name = document.name;
        Ok(ontology)
    }

    /// Parse a JSON ontology document
    pub fn from_json_str(content: &str) -> Result<Self> {
        let document: OntologyDocument = serde_json::from_str(content)
            .map_err(|e| OkgError::InvalidOntology(format!("malformed JSON: {e}")))?;
        Self::from_document(document)
    }

    /// Parse a TOML ontology document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let document: OntologyDocument = toml::from_str(content)
            .map_err(|e| OkgError::InvalidOntology(format!("malformed TOML: {e}")))?;
        Self::from_document(document)
    }

    /// Load an ontology file; `.json` files are parsed as JSON, anything else as TOML
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            OkgError::Configuration(format!("failed to read ontology {}: {e}", path.display()))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Ontology name, if the document carried one
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn entity_types(&self) -> &[EntityTypeDef] {
        &self.entity_types
    }

    pub fn relationship_types(&self) -> &[RelationshipTypeDef] {
        &self.relationship_types
    }

    /// Look up an entity type definition by any of its tokens
    pub fn entity_type(&self, token: &str) -> Option<&EntityTypeDef> {
        self.entity_index
            .get(&normalize_token(token))
            .map(|&i| &self.entity_types[i])
    }

    /// Look up a relationship type definition by any of its tokens
    pub fn relationship_type(&self, token: &str) -> Option<&RelationshipTypeDef> {
        self.relationship_index
            .get(&normalize_token(token))
            .map(|&i| &self.relationship_types[i])
    }

    /// Resolve a raw entity type token.
    ///
    /// In strict mode unknown tokens fail with [`OkgError::UnknownType`]; otherwise
    /// they pass through with `known == false`.
    pub fn resolve_entity_type(&self, token: &str, strict: bool) -> Result<ResolvedType> {
        match self.entity_type(token) {
            Some(def) => Ok(ResolvedType {
                name: def.name.clone(),
                key: def.name.clone(),
                primitive_type: def.primitive_type,
                known: true,
            }),
            None => unknown_type(TypeKind::Entity, token, strict),
        }
    }

    /// Resolve a raw relationship type token, with the same strictness rules
    /// as [`Ontology::resolve_entity_type`]
    pub fn resolve_relationship_type(&self, token: &str, strict: bool) -> Result<ResolvedType> {
        match self.relationship_type(token) {
            Some(def) => Ok(ResolvedType {
                name: def.name.clone(),
                key: def.name.clone(),
                primitive_type: PrimitiveType::String,
                known: true,
            }),
            None => unknown_type(TypeKind::Relationship, token, strict),
        }
    }
}

/// Normalize a type token for matching: case-folded, with runs of whitespace,
/// `_` and `-` collapsed into a single `_`.
pub fn normalize_token(token: &str) -> String {
    token
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|part| !part.is_empty())
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

fn unknown_type(kind: TypeKind, token: &str, strict: bool) -> Result<ResolvedType> {
    let key = normalize_token(token);
    if strict || key.is_empty() {
        return Err(OkgError::UnknownType {
            kind,
            token: token.to_string(),
        });
    }

    Ok(ResolvedType {
        name: token.trim().to_string(),
        key: format!("{UNKNOWN_KEY_PREFIX}{key}"),
        primitive_type: PrimitiveType::String,
        known: false,
    })
}

fn clean_variations(variations: Vec<String>) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for variation in variations {
        let variation = variation.trim();
        if !variation.is_empty() && !cleaned.iter().any(|v| v == variation) {
            cleaned.push(variation.to_string());
        }
    }
    cleaned
}

fn build_index<'a>(
    kind: TypeKind,
    pattern: &Regex,
    defs: impl Iterator<Item = (&'a str, &'a [String])>,
) -> Result<HashMap<String, usize>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut canonical: Vec<&str> = Vec::new();

    for (i, (name, variations)) in defs.enumerate() {
        if !pattern.is_match(name) {
            return Err(OkgError::InvalidOntology(format!(
                "{kind} type '{name}' must start with a letter and contain only letters, digits, underscores and spaces"
            )));
        }
        canonical.push(name);

        for token in std::iter::once(name).chain(variations.iter().map(String::as_str)) {
            let key = normalize_token(token);
            if key.is_empty() {
                continue;
            }
            match index.get(&key) {
                Some(&existing) if existing != i => {
                    return Err(OkgError::InvalidOntology(format!(
                        "{kind} token '{token}' maps to both '{}' and '{name}'",
                        canonical[existing]
                    )));
                }
                Some(_) => {}
                None => {
                    index.insert(key, i);
                }
            }
        }
    }

    Ok(index)
}

fn merge_entity_def(defs: &mut Vec<EntityTypeDef>, def: EntityTypeDef) {
    let key = normalize_token(&def.name);
    match defs.iter_mut().find(|d| normalize_token(&d.name) == key) {
        Some(existing) => {
            for variation in def.variations {
                if !existing.variations.contains(&variation) {
                    existing.variations.push(variation);
                }
            }
        }
        None => defs.push(def),
    }
}

fn merge_relationship_def(defs: &mut Vec<RelationshipTypeDef>, def: RelationshipTypeDef) {
    let key = normalize_token(&def.name);
    match defs.iter_mut().find(|d| normalize_token(&d.name) == key) {
        Some(existing) => {
            for variation in def.variations {
                if !existing.variations.contains(&variation) {
                    existing.variations.push(variation);
                }
            }
        }
        None => defs.push(def),
    }
}
