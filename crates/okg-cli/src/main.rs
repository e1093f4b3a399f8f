//! OKG CLI - Command-line interface
//!
//! Usage:
//!   okg run --document <path> --ontology <path> --responses <path>
//!   okg chunk --document <path>
//!   okg ontology <path>

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use okg_core::{AppConfig, LoggingConfig, Ontology};
use okg_extractor::RecordedGateway;
use okg_parser::{chunk_text, load_document, ChunkConfig};
use okg_pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "okg")]
#[command(about = "Ontology-guided knowledge graph extraction")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a knowledge graph from a document using recorded responses
    Run {
        /// Document to extract from
        #[arg(long)]
        document: PathBuf,

        /// Ontology file (.json or .toml)
        #[arg(long)]
        ontology: PathBuf,

        /// Recorded extraction responses (JSON)
        #[arg(long)]
        responses: PathBuf,

        #[command(flatten)]
        chunking: ChunkingArgs,

        /// Reject types the ontology does not know
        #[arg(long)]
        strict: bool,

        /// Maximum number of chunks extracted at the same time
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the chunks a document splits into
    Chunk {
        /// Document to split
        #[arg(long)]
        document: PathBuf,

        #[command(flatten)]
        chunking: ChunkingArgs,
    },
    /// Validate an ontology file and print its types
    Ontology {
        /// Ontology file (.json or .toml)
        path: PathBuf,
    },
}

#[derive(Args)]
struct ChunkingArgs {
    /// Chunk size in characters
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Overlap between chunks, in percent of the chunk size
    #[arg(long)]
    overlap: Option<u32>,
}

impl ChunkingArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(chunk_size) = self.chunk_size {
            config.chunking.chunk_size = chunk_size;
        }
        if let Some(overlap) = self.overlap {
            config.chunking.overlap_percent = overlap;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;
    init_logging(&config.logging);

    match cli.command {
        Commands::Run {
            document,
            ontology,
            responses,
            chunking,
            strict,
            max_concurrency,
            output,
        } => {
            chunking.apply(&mut config);
            if strict {
                config.pipeline.strict_mode = true;
            }
            if let Some(max_concurrency) = max_concurrency {
                config.pipeline.max_concurrency = max_concurrency;
            }
            config.validate().context("Invalid configuration")?;

            let text = load_document(&document)
                .with_context(|| format!("Failed to load document {}", document.display()))?;
            let ontology = Ontology::from_file(&ontology)
                .with_context(|| format!("Failed to load ontology {}", ontology.display()))?;
            let gateway = RecordedGateway::from_file(&responses)
                .with_context(|| format!("Failed to load responses {}", responses.display()))?;

            tracing::info!(
                document = %document.display(),
                recorded_chunks = gateway.len(),
                "Starting extraction"
            );

            let pipeline = Pipeline::from_config(gateway, &config);
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted; cancelling remaining chunks");
                    on_interrupt.cancel();
                }
            });

            let result = pipeline
                .run_with_cancellation(&text, &ontology, cancel)
                .await?;

            if result.partial {
                tracing::warn!(
                    failed = result.failed_chunks.len(),
                    state = %result.state,
                    "Graph is partial"
                );
            }

            let json = serde_json::to_string_pretty(&result)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!(
                        "Wrote {} nodes and {} edges to {}",
                        result.nodes.len(),
                        result.edges.len(),
                        path.display()
                    );
                }
                None => println!("{json}"),
            }
        }
        Commands::Chunk { document, chunking } => {
            chunking.apply(&mut config);
            config.validate().context("Invalid configuration")?;

            let text = load_document(&document)
                .with_context(|| format!("Failed to load document {}", document.display()))?;
            let chunks = chunk_text(&text, &ChunkConfig::from(&config.chunking))?;
            println!("{}", serde_json::to_string_pretty(&chunks)?);
        }
        Commands::Ontology { path } => {
            let ontology = Ontology::from_file(&path)
                .with_context(|| format!("Failed to load ontology {}", path.display()))?;

            println!("Ontology: {}", ontology.name().unwrap_or("(unnamed)"));
            println!("Entity types:");
            for def in ontology.entity_types() {
                println!(
                    "  {} ({}) {}",
                    def.name,
                    def.primitive_type,
                    def.variations.join(", ")
                );
            }
            println!("Relationship types:");
            for def in ontology.relationship_types() {
                println!("  {} {}", def.name, def.variations.join(", "));
            }
        }
    }

    Ok(())
}

/// File settings first, then environment overrides
fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

/// Logs go to stderr so stdout stays parseable. `RUST_LOG` wins over the
/// configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}
