//! OKG Extractor - From oracle output to canonical entities and edges
//!
//! - [`gateway`]: the extraction boundary contract, response decoding and
//!   the bundled gateway adapters
//! - [`registry`]: entity deduplication and temporary-id remapping
//! - [`resolver`]: relationship resolution and edge deduplication

pub mod gateway;
mod merge;
pub mod registry;
pub mod resolver;

pub use gateway::{decode_response, ExtractionGateway, GatewayError, LlmGateway, RecordedGateway};
pub use merge::DocumentOrder;
pub use registry::{ChunkRegistration, EntityRegistry, RegistryError, RegistryStats};
pub use resolver::{DropReason, DropRecord, RelationshipResolver, Resolution, ResolverStats};
