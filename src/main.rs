//! # ragmill CLI
//!
//! The `ragmill` binary drives the ingestion and retrieval pipeline:
//! database initialization, agent registration, source ingestion, crawling,
//! similarity search, and per-agent statistics.
//!
//! ## Usage
//!
//! ```bash
//! ragmill --config ./config/ragmill.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragmill init` | Create the SQLite database and run schema migrations |
//! | `ragmill agent register <id>` | Create or update an agent's configuration |
//! | `ragmill agent list` | List agents for the tenant |
//! | `ragmill source add <agent> ...` | Register a source without processing it |
//! | `ragmill process <source-id>` | Run the pipeline for a registered source |
//! | `ragmill ingest-url <agent> <url>` | Fetch, extract, and ingest a page (checksum-gated) |
//! | `ragmill reprocess <source-id>` | Re-chunk and re-embed regardless of checksum |
//! | `ragmill crawl <agent> <base-url>` | Crawl a site and ingest its pages |
//! | `ragmill search <agent> "<query>"` | Similarity search over an agent's chunks |
//! | `ragmill stats` | Per-agent ingestion and spend summary |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ragmill::{agents, config, crawler, db, embedding, ingest, migrate, models, search, stats};

/// ragmill — agent-scoped RAG ingestion and retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragmill.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ragmill",
    about = "ragmill — agent-scoped RAG ingestion and retrieval pipeline",
    version,
    long_about = "ragmill ingests source documents (web pages, uploads, manual text) per agent, \
    chunks and embeds them via an external embedding API, and serves tenant-scoped similarity \
    search over the stored vectors."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragmill.toml")]
    config: PathBuf,

    /// Tenant scope for this invocation; defaults to `defaults.tenant`.
    #[arg(long, global = true)]
    tenant: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (agents,
    /// sources, chunks, usage_records). Idempotent.
    Init,

    /// Manage agents (retrieval configuration records).
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },

    /// Manage sources without triggering processing.
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Run the full pipeline for a registered source.
    ///
    /// Extracts, chunks, embeds, and atomically replaces the source's
    /// stored chunks. Failures mark the source `failed` with the error.
    Process {
        /// Source UUID.
        source_id: String,
    },

    /// Fetch a URL and ingest it for an agent.
    ///
    /// Registers the source on first use. Unchanged content (by checksum)
    /// is skipped.
    IngestUrl {
        /// Agent id.
        agent: String,
        /// Page URL.
        url: String,
    },

    /// Re-chunk and re-embed a source regardless of its checksum.
    Reprocess {
        /// Source UUID.
        source_id: String,
    },

    /// Crawl a site and ingest its pages for an agent.
    ///
    /// Discovers pages via sitemap.xml (falling back to same-host links),
    /// honors robots.txt, and skips unchanged pages by checksum.
    Crawl {
        /// Agent id.
        agent: String,
        /// Site base URL.
        base_url: String,
    },

    /// Similarity search over an agent's chunks.
    Search {
        /// Agent id.
        agent: String,
        /// The search query string.
        query: String,
        /// Maximum number of results (capped at 20).
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Per-agent ingestion and spend summary.
    Stats,
}

/// Agent management subcommands.
#[derive(Subcommand)]
enum AgentAction {
    /// Create an agent or update its configuration.
    ///
    /// Unset knobs fall back to the `[defaults]` section of the config.
    Register {
        /// Agent id.
        id: String,
        /// Display name (defaults to the id).
        #[arg(long)]
        name: Option<String>,
        /// Embedding model override.
        #[arg(long)]
        model: Option<String>,
        /// Chunk size in approximate tokens.
        #[arg(long)]
        chunk_tokens: Option<usize>,
        /// Chunk overlap in approximate tokens (must be < chunk size).
        #[arg(long)]
        overlap_tokens: Option<usize>,
        /// Default result count for search.
        #[arg(long)]
        top_k: Option<i64>,
        /// Minimum similarity score for search hits, in [0, 1].
        #[arg(long)]
        similarity_threshold: Option<f64>,
    },
    /// List agents for the tenant.
    List,
    /// Show one agent's configuration.
    Show {
        /// Agent id.
        id: String,
    },
    /// Deactivate an agent (its data is kept).
    Deactivate {
        /// Agent id.
        id: String,
    },
}

/// Source management subcommands.
#[derive(Subcommand)]
enum SourceAction {
    /// Register a source for an agent without processing it.
    Add {
        /// Agent id.
        agent: String,
        /// Source kind: url, upload, or text.
        #[arg(long, default_value = "text")]
        kind: String,
        /// URL (for url kind) or label.
        #[arg(long)]
        location: Option<String>,
        /// Inline text content (text kind).
        #[arg(long)]
        text: Option<String>,
        /// File to read content from (upload kind).
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// List an agent's sources.
    List {
        /// Agent id.
        agent: String,
    },
    /// Delete a source and its chunks.
    Delete {
        /// Source UUID.
        source_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let tenant = cli
        .tenant
        .clone()
        .unwrap_or_else(|| cfg.defaults.tenant.clone());

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Agent { action } => {
            let pool = open_db(&cfg).await?;
            match action {
                AgentAction::Register {
                    id,
                    name,
                    model,
                    chunk_tokens,
                    overlap_tokens,
                    top_k,
                    similarity_threshold,
                } => {
                    let spec = agents::AgentSpec {
                        name,
                        embedding_model: model,
                        chunk_tokens,
                        overlap_tokens,
                        top_k,
                        similarity_threshold,
                    };
                    let agent = agents::register(&pool, &cfg, &id, &tenant, spec).await?;
                    println!("registered agent {}", agent.id);
                    print_agent(&agent);
                }
                AgentAction::List => {
                    let list = agents::list(&pool, &tenant).await?;
                    if list.is_empty() {
                        println!("No agents registered for tenant '{}'.", tenant);
                    } else {
                        println!("{:<20} {:<20} {:>6} {:>8}  ACTIVE", "ID", "NAME", "CHUNK", "TOP-K");
                        for a in &list {
                            println!(
                                "{:<20} {:<20} {:>6} {:>8}  {}",
                                a.id, a.name, a.chunk_tokens, a.top_k, a.active
                            );
                        }
                    }
                }
                AgentAction::Show { id } => {
                    let agent = agents::get_required(&pool, &id).await?;
                    print_agent(&agent);
                }
                AgentAction::Deactivate { id } => {
                    agents::deactivate(&pool, &id).await?;
                    println!("deactivated agent {}", id);
                }
            }
            pool.close().await;
        }
        Commands::Source { action } => {
            let pipeline = build_pipeline(&cfg).await?;
            match action {
                SourceAction::Add {
                    agent,
                    kind,
                    location,
                    text,
                    file,
                } => {
                    let kind = models::SourceKind::parse(&kind)?;
                    let content = match (&text, &file) {
                        (Some(t), None) => Some(t.clone()),
                        (None, Some(path)) => Some(std::fs::read_to_string(path)?),
                        (None, None) => None,
                        (Some(_), Some(_)) => {
                            anyhow::bail!("Pass either --text or --file, not both")
                        }
                    };
                    let location = location.or_else(|| {
                        file.as_ref().map(|p| p.display().to_string())
                    });
                    let source = pipeline
                        .add_source(&agent, &tenant, kind, location, content)
                        .await?;
                    println!("added source {} ({})", source.id, source.kind.as_str());
                    println!("  location: {}", source.location);
                    println!("  status:   {}", source.status.as_str());
                }
                SourceAction::List { agent } => {
                    let sources = pipeline.list_sources(&agent).await?;
                    if sources.is_empty() {
                        println!("No sources for agent '{}'.", agent);
                    } else {
                        for s in &sources {
                            println!("{}  {:<8} {:<10} {}", s.id, s.kind.as_str(), s.status.as_str(), s.location);
                            if let Some(ref err) = s.error_message {
                                println!("    error: {}", err);
                            }
                        }
                    }
                }
                SourceAction::Delete { source_id } => {
                    pipeline.delete_source(&source_id).await?;
                    println!("deleted source {}", source_id);
                }
            }
        }
        Commands::Process { source_id } => {
            let pipeline = build_pipeline(&cfg).await?;
            let outcome = pipeline.process_source(&source_id).await?;
            print_outcome("process", &outcome);
        }
        Commands::IngestUrl { agent, url } => {
            let pipeline = build_pipeline(&cfg).await?;
            let outcome = pipeline.ingest_url(&agent, &tenant, &url).await?;
            print_outcome("ingest-url", &outcome);
        }
        Commands::Reprocess { source_id } => {
            let pipeline = build_pipeline(&cfg).await?;
            let outcome = pipeline.reprocess(&source_id).await?;
            print_outcome("reprocess", &outcome);
        }
        Commands::Crawl { agent, base_url } => {
            let pipeline = build_pipeline(&cfg).await?;
            let crawler = crawler::Crawler::new(&pipeline, &cfg.crawler)?;
            let report = crawler.crawl(&agent, &tenant, &base_url).await?;
            println!("crawl {}", base_url);
            println!("  discovered: {} pages", report.discovered);
            println!("  ingested:   {}", report.ingested);
            println!("  skipped:    {}", report.skipped);
            println!("  failed:     {}", report.failed);
            println!("ok");
        }
        Commands::Search { agent, query, limit } => {
            let pool = open_db(&cfg).await?;
            let embedder = embedding::create_client(&cfg.embedding)?;
            search::print_search(&pool, embedder.as_ref(), &agent, &tenant, &query, limit).await?;
            pool.close().await;
        }
        Commands::Stats => {
            let pool = open_db(&cfg).await?;
            stats::run_stats(&pool, &tenant).await?;
            pool.close().await;
        }
    }

    Ok(())
}

/// Connect and migrate. Every command gets a ready schema, whether or not
/// `init` was ever run explicitly.
async fn open_db(cfg: &config::Config) -> Result<sqlx::SqlitePool> {
    let pool = db::connect(&cfg.db.path).await?;
    migrate::run_migrations(&pool).await?;
    Ok(pool)
}

async fn build_pipeline(cfg: &config::Config) -> Result<ingest::IngestPipeline> {
    let pool = open_db(cfg).await?;
    let embedder = embedding::create_client(&cfg.embedding)?;
    ingest::IngestPipeline::new(pool, embedder, cfg.clone())
}

fn print_agent(agent: &ragmill::models::Agent) {
    println!("  id:                   {}", agent.id);
    println!("  tenant:               {}", agent.tenant);
    println!("  name:                 {}", agent.name);
    println!("  embedding_model:      {}", agent.embedding_model);
    println!("  chunk_tokens:         {}", agent.chunk_tokens);
    println!("  overlap_tokens:       {}", agent.overlap_tokens);
    println!("  top_k:                {}", agent.top_k);
    println!("  similarity_threshold: {}", agent.similarity_threshold);
    println!("  active:               {}", agent.active);
}

fn print_outcome(command: &str, outcome: &ingest::IngestOutcome) {
    println!("{} {}", command, outcome.source_id);
    if outcome.skipped {
        println!("  skipped: content unchanged (checksum match)");
    } else {
        println!("  chunks:         {}", outcome.chunk_count);
        println!("  tokens:         {}", outcome.tokens);
        println!("  estimated cost: ${:.6}", outcome.estimated_cost);
    }
    println!("ok");
}
