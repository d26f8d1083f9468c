//! sds-qabot CLI application
//!
//! Command-line interface for the sds-qabot library.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use sds_qabot::credentials::{resolve_registry_token, resolve_token};
use sds_qabot::registry::{Stage, build_registry, promote_latest, resolve_artifact_dir};
use sds_qabot::utils::format_file_size;
use sds_qabot::{
    Config, Ingestor, MetadataFilter, ModelArtifact, PredictFrame, QaBot, Retriever,
    build_embedder,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "sds-qabot")]
#[command(about = "Question answering over chemical safety data sheets")]
#[command(version)]
struct Cli {
    /// Configuration file (JSON); built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the vector index from the data directory
    Ingest {
        /// Directory of fact sheets (overrides paths.data_dir)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Index directory (overrides paths.vector_persist_dir)
        #[arg(short, long)]
        index_dir: Option<PathBuf>,
    },

    /// Show the chunks retrieved for a question
    Search {
        question: String,

        /// Restrict to one chemical's common name
        #[arg(short, long)]
        name: Option<String>,

        /// Number of chunks to return (overrides retrieval.k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Answer a single question
    Ask {
        question: String,

        /// Restrict to one chemical's common name
        #[arg(short, long)]
        name: Option<String>,

        /// Print the retrieved chunks after the answer
        #[arg(long)]
        show_sources: bool,
    },

    /// Answer a batch of questions from a JSON prediction frame
    Predict {
        /// Frame file, `-` for stdin
        input: PathBuf,

        /// Serve a packaged artifact instead of the configured index:
        /// a directory or a `models:/<name>/<stage|version>` URI
        #[arg(long)]
        artifact: Option<String>,
    },

    /// Package the configured index, prompt and settings into an artifact
    Package {
        /// Artifact output directory
        #[arg(short, long, default_value = "qabot-artifact")]
        output: PathBuf,
    },

    /// Register a packaged artifact as a new model version
    Register {
        /// Artifact directory
        artifact: PathBuf,

        /// Registered model name (overrides registry.model_name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Move the newest unstaged version to Production
    Promote {
        #[arg(short, long)]
        name: Option<String>,
    },

    /// List the latest version in each stage
    Versions {
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Write the effective configuration as JSON
    Config {
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::load_or_default(cli.config.as_deref())?;
    config.validate()?;

    match cli.command {
        Commands::Ingest { data_dir, index_dir } => {
            ingest_command(config, data_dir, index_dir).await?;
        }
        Commands::Search {
            question,
            name,
            top_k,
        } => {
            search_command(config, question, name, top_k).await?;
        }
        Commands::Ask {
            question,
            name,
            show_sources,
        } => {
            ask_command(config, question, name, show_sources).await?;
        }
        Commands::Predict { input, artifact } => {
            predict_command(config, input, artifact).await?;
        }
        Commands::Package { output } => {
            package_command(&config, &output)?;
        }
        Commands::Register { artifact, name } => {
            register_command(&config, &artifact, name).await?;
        }
        Commands::Promote { name } => {
            promote_command(&config, name).await?;
        }
        Commands::Versions { name } => {
            versions_command(&config, name).await?;
        }
        Commands::Config { output } => match output {
            Some(path) => {
                config.save(&path)?;
                println!("✅ Configuration written to {}", path.display());
            }
            None => println!("{}", serde_json::to_string_pretty(&config)?),
        },
    }

    Ok(())
}

/// Hub token if one is configured; local backends run without it
fn credential(config: &Config) -> Option<String> {
    match resolve_token(&config.credentials) {
        Ok(token) => Some(token),
        Err(e) => {
            log::debug!("No model-hosting credential: {}", e);
            None
        }
    }
}

fn name_filter(name: Option<String>) -> Option<MetadataFilter> {
    name.map(|name| MetadataFilter::single("Name", name))
}

async fn ingest_command(
    mut config: Config,
    data_dir: Option<PathBuf>,
    index_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(dir) = data_dir {
        config.paths.data_dir = dir;
    }
    if let Some(dir) = index_dir {
        config.paths.vector_persist_dir = dir;
    }
    println!("📚 Ingesting {}", config.paths.data_dir.display());

    let embedder = build_embedder(&config.embedding, credential(&config))?;
    let mut ingestor = Ingestor::new(config, embedder)?;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let result = ingestor
        .run_with_progress(|done, total, path| {
            bar.set_length(total as u64);
            bar.set_position(done as u64);
            bar.set_message(
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            );
        })
        .await;
    bar.finish_and_clear();
    let stats = result?;

    println!("✅ Ingestion complete!");
    println!("   📄 Documents: {} ({} skipped)", stats.documents, stats.skipped);
    println!("   🏷️  Named: {}", stats.named_documents);
    println!("   📊 Pages: {}, chunks: {}", stats.pages, stats.chunks);
    println!("   ⏱️  Time: {:.2}s", stats.processing_time);
    println!(
        "   📋 Index: {} ({})",
        stats.index_dir.display(),
        format_file_size(stats.index_bytes)
    );
    Ok(())
}

async fn search_command(
    config: Config,
    question: String,
    name: Option<String>,
    top_k: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Searching for: \"{}\"", question);

    let embedder = build_embedder(&config.embedding, credential(&config))?;
    let retriever = Retriever::open(&config, embedder)?;

    let mut retrieval_config = retriever.config().clone();
    if let Some(k) = top_k {
        retrieval_config.k = k;
        retrieval_config.fetch_k = retrieval_config.fetch_k.max(k);
    }
    let filter = name_filter(name);
    let retrieval = retriever
        .retrieve_with(&question, filter.as_ref(), &retrieval_config)
        .await?;

    if retrieval.is_empty() {
        println!("❌ No results found");
        return Ok(());
    }

    println!("📋 Found {} results:", retrieval.documents.len());
    println!();
    for (i, doc) in retrieval.documents.iter().enumerate() {
        println!("{}. [{}] {} (distance {:.3})", i + 1, doc.name(), doc.id, doc.distance);
        println!("   {}", doc.text);
        println!();
    }
    if retrieval.shortfall > 0 {
        println!("⚠️  {} fewer results than requested", retrieval.shortfall);
    }
    Ok(())
}

async fn ask_command(
    config: Config,
    question: String,
    name: Option<String>,
    show_sources: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let credential = credential(&config);
    let embedder = build_embedder(&config.embedding, credential.clone())?;
    let retriever = Retriever::open(&config, embedder)?;
    let mut bot = QaBot::new(config, retriever, credential);
    bot.initialize()?;

    let filter = name_filter(name);
    let answer = bot.answer(&question, filter.as_ref()).await?;

    println!("❓ {}", answer.question);
    println!("💬 {}", answer.text);
    if show_sources {
        println!();
        for doc in &answer.sources {
            println!("   • [{}] {}", doc.name(), doc.id);
        }
    }
    Ok(())
}

async fn predict_command(
    config: Config,
    input: PathBuf,
    artifact: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let raw = if input == Path::new("-") {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(&input)?
    };
    let frame = PredictFrame::from_json(&raw)?;

    let credential = credential(&config);
    let mut bot = match artifact {
        Some(location) => {
            let dir = if location.starts_with("models:/") {
                let registry =
                    build_registry(&config.registry, resolve_registry_token(&config.credentials))?;
                resolve_artifact_dir(registry.as_ref(), &location).await?
            } else {
                PathBuf::from(location)
            };
            QaBot::from_artifact(&ModelArtifact::load(&dir)?, credential)?
        }
        None => {
            let embedder = build_embedder(&config.embedding, credential.clone())?;
            let retriever = Retriever::open(&config, embedder)?;
            QaBot::new(config, retriever, credential)
        }
    };
    bot.initialize()?;

    let answers = bot.predict_frame(frame).await?;
    println!("{}", serde_json::to_string_pretty(&answers)?);
    Ok(())
}

fn package_command(config: &Config, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let artifact = ModelArtifact::package(config, output)?;
    println!("📦 Packaged {} into {}", artifact.manifest.name, artifact.dir.display());
    println!("   📊 Indexed chunks: {}", artifact.manifest.documents_indexed);
    Ok(())
}

async fn register_command(
    config: &Config,
    artifact: &Path,
    name: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    // Fail early on directories that are not artifacts
    ModelArtifact::load(artifact)?;

    let name = name.unwrap_or_else(|| config.registry.model_name.clone());
    let registry = build_registry(&config.registry, resolve_registry_token(&config.credentials))?;
    let source = artifact.canonicalize()?.to_string_lossy().to_string();
    let version = registry.register(&name, &source).await?;

    println!("✅ Registered {} version {}", version.name, version.version);
    Ok(())
}

async fn promote_command(config: &Config, name: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let name = name.unwrap_or_else(|| config.registry.model_name.clone());
    let registry = build_registry(&config.registry, resolve_registry_token(&config.credentials))?;
    let version = promote_latest(registry.as_ref(), &name).await?;

    println!("🚀 {} version {} is now in {}", version.name, version.version, version.stage);
    println!("   Serving endpoint: {}", config.registry.serving_endpoint_name);
    Ok(())
}

async fn versions_command(config: &Config, name: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let name = name.unwrap_or_else(|| config.registry.model_name.clone());
    let registry = build_registry(&config.registry, resolve_registry_token(&config.credentials))?;
    let versions = registry.latest_versions(&name, &Stage::ALL).await?;

    if versions.is_empty() {
        println!("❌ No versions of {}", name);
        return Ok(());
    }
    for version in versions {
        println!(
            "{:>4}  {:<10}  {}  {}",
            version.version,
            version.stage.as_str(),
            version.created_at.format("%Y-%m-%d %H:%M"),
            version.source
        );
    }
    Ok(())
}
