//! # ragdag CLI
//!
//! Commands for store initialization, ingest, search, ask, graph
//! exploration, maintenance, config access, and the HTTP/JSON-RPC server.
//!
//! Exit codes: 0 success, 1 user error (bad arguments, not in a store,
//! missing capability), 2 operational error (I/O, provider failure).

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use ragdag::ask::AskOptions;
use ragdag::error::RagError;
use ragdag::ingest::AddOptions;
use ragdag::store::Store;
use ragdag::{graph, ingest, maintenance, search, server};

/// ragdag — a flat-file knowledge-graph engine for RAG over a local corpus.
///
/// Most commands locate the store by walking up from the current directory
/// (or from `RAGDAG_STORE` when set).
#[derive(Parser)]
#[command(
    name = "ragdag",
    about = "Flat-file knowledge-graph engine for retrieval-augmented generation",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a .ragdag store with default config. Idempotent.
    Init {
        /// Directory to create the store in (default: current directory).
        path: Option<PathBuf>,
    },

    /// Ingest files or directories: parse, chunk, store, link, embed.
    Add {
        /// Files or directories to ingest.
        paths: Vec<PathBuf>,

        /// Domain to file documents under; `auto` applies .domain-rules
        /// with an `unsorted` fallback.
        #[arg(long)]
        domain: Option<String>,

        /// Store documents directly under the store root (no domain).
        #[arg(long)]
        flat: bool,

        /// Skip embedding even when a provider is configured.
        #[arg(long)]
        no_embed: bool,
    },

    /// Search the corpus.
    Search {
        query: String,

        /// keyword, vector, or hybrid (default from config).
        #[arg(long)]
        mode: Option<String>,

        /// Limit search to one domain.
        #[arg(long)]
        domain: Option<String>,

        /// Maximum results (default from config).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Answer a question with retrieved context and an optional LLM.
    Ask {
        question: String,

        /// Limit retrieval to one domain.
        #[arg(long)]
        domain: Option<String>,

        /// Assemble context only; skip the LLM call.
        #[arg(long)]
        no_llm: bool,

        /// Number of primary candidates (default from config).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Show knowledge graph summary counts.
    Graph {
        #[arg(long)]
        domain: Option<String>,
    },

    /// List edges touching a node.
    Neighbors { node: String },

    /// Walk a node's provenance chain back to its origin.
    Trace { node: String },

    /// Create related_to edges between semantically similar chunks.
    Relate {
        #[arg(long)]
        domain: Option<String>,

        /// Cosine similarity threshold (default from config).
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Create a manual edge between two nodes.
    Link {
        source: String,
        target: String,

        /// Edge type (default: references).
        #[arg(long = "type")]
        edge_type: Option<String>,
    },

    /// Check store integrity.
    Verify,

    /// Remove orphaned edges from the edge log.
    Repair,

    /// Remove orphaned edges and stale processed records.
    Gc,

    /// Rebuild embeddings from the chunk tree.
    Reindex {
        #[arg(long)]
        domain: Option<String>,
    },

    /// Read or write config values.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Start the HTTP API and JSON-RPC tool server.
    Serve {
        /// Bind address.
        #[arg(long, default_value = "127.0.0.1:8420")]
        bind: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a config value (`section.key`).
    Get { key: String },
    /// Set a config value (`section.key`).
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {:#}", e);
        let code = e
            .downcast_ref::<RagError>()
            .map(|e| e.exit_code())
            .unwrap_or(2);
        std::process::exit(code);
    }
}

fn open_store() -> Result<Store> {
    let cwd = std::env::current_dir()?;
    Ok(Store::discover(&cwd)?)
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { path } => {
            let base = match path {
                Some(p) => p,
                None => std::env::current_dir()?,
            };
            let store = Store::init(&base)?;
            println!("Initialized store at {}", store.root().display());
        }

        Commands::Add {
            paths,
            domain,
            flat,
            no_embed,
        } => {
            if paths.is_empty() {
                return Err(RagError::BadConfig("no paths given to add".to_string()).into());
            }
            let store = open_store()?;
            let opts = AddOptions {
                domain,
                flat,
                embed: !no_embed,
            };
            let report = ingest::add(&store, &paths, &opts).await?;
            println!(
                "added {} files ({} chunks), skipped {}",
                report.files, report.chunks, report.skipped
            );
        }

        Commands::Search {
            query,
            mode,
            domain,
            top_k,
        } => {
            let store = open_store()?;
            let results = search::search(
                &store,
                &query,
                mode.as_deref(),
                domain.as_deref(),
                top_k,
            )
            .await?;

            if results.is_empty() {
                println!("No results.");
                return Ok(());
            }
            for (i, r) in results.iter().enumerate() {
                let preview: String =
                    r.content.chars().take(160).collect::<String>().replace('\n', " ");
                println!("{}. [{:.4}] {}", i + 1, r.score, r.path);
                if !r.domain.is_empty() {
                    println!("    domain: {}", r.domain);
                }
                println!("    {}", preview.trim());
                println!();
            }
        }

        Commands::Ask {
            question,
            domain,
            no_llm,
            top_k,
        } => {
            let store = open_store()?;
            let opts = AskOptions {
                domain,
                top_k,
                use_llm: !no_llm,
            };
            let result = ragdag::ask::ask(&store, &question, &opts).await?;

            match &result.answer {
                Some(answer) => println!("{}", answer),
                None => {
                    if result.context.is_empty() {
                        println!("No relevant context found.");
                        return Ok(());
                    }
                    println!("{}", result.context);
                }
            }
            if !result.sources.is_empty() {
                println!("\nSources:");
                for source in &result.sources {
                    println!("  - {}", source);
                }
            }
        }

        Commands::Graph { domain } => {
            let store = open_store()?;
            let stats = graph::summary(&store, domain.as_deref())?;
            println!("domains:   {}", stats.domains);
            println!("documents: {}", stats.documents);
            println!("chunks:    {}", stats.chunks);
            println!("edges:     {}", stats.edges);
            for (etype, count) in &stats.edge_types {
                println!("  {}: {}", etype, count);
            }
        }

        Commands::Neighbors { node } => {
            let store = open_store()?;
            let result = graph::neighbors(&store, &node)?;
            if result.outgoing.is_empty() && result.incoming.is_empty() {
                println!("No edges touch {}", node);
                return Ok(());
            }
            for n in result.outgoing.iter().chain(result.incoming.iter()) {
                if n.metadata.is_empty() {
                    println!("{} {} [{}]", n.direction, n.node, n.edge_type);
                } else {
                    println!("{} {} [{}] {}", n.direction, n.node, n.edge_type, n.metadata);
                }
            }
        }

        Commands::Trace { node } => {
            let store = open_store()?;
            for hop in graph::trace(&store, &node)? {
                match hop.parent {
                    Some(parent) => println!("{} → {} [{}]", hop.node, parent, hop.edge_type),
                    None => println!("{} (origin)", hop.node),
                }
            }
        }

        Commands::Relate { domain, threshold } => {
            let store = open_store()?;
            let threshold = threshold
                .unwrap_or_else(|| store.config().get_f64("edges.relate_threshold", 0.8));
            let added = graph::relate(&store, domain.as_deref(), threshold)?;
            println!("Added {} related_to edges (threshold={})", added, threshold);
        }

        Commands::Link {
            source,
            target,
            edge_type,
        } => {
            let store = open_store()?;
            graph::link(&store, &source, &target, edge_type.as_deref())?;
            println!("Linked {} → {}", source, target);
        }

        Commands::Verify => {
            let store = open_store()?;
            let report = maintenance::verify(&store)?;
            println!("chunks:          {}", report.chunks);
            println!("  unreadable:    {}", report.unreadable_chunks);
            println!("embedding sets:  {}", report.embedding_sets);
            println!("  corrupt:       {}", report.corrupt_embeddings);
            println!("orphan edges:    {}", report.orphan_edges);
            println!("stale processed: {}", report.stale_processed);
            if report.is_clean() {
                println!("Store is clean.");
            } else {
                println!("Issues found — run repair or gc.");
            }
        }

        Commands::Repair => {
            let store = open_store()?;
            let removed = maintenance::repair(&store)?;
            println!("Removed {} orphaned edges", removed);
        }

        Commands::Gc => {
            let store = open_store()?;
            let report = maintenance::gc(&store)?;
            println!(
                "Removed {} orphaned edges, {} stale processed records",
                report.removed_edges, report.removed_processed
            );
        }

        Commands::Reindex { domain } => {
            let store = open_store()?;
            let written = maintenance::reindex(&store, domain.as_deref()).await?;
            println!("Reindexed {} chunk vectors", written);
        }

        Commands::Config { action } => {
            let store = open_store()?;
            match action {
                ConfigAction::Get { key } => {
                    println!("{}", store.config().get(&key, ""));
                }
                ConfigAction::Set { key, value } => {
                    store.config().set(&key, &value)?;
                    println!("{} = {}", key, value);
                }
            }
        }

        Commands::Serve { bind } => {
            let store = open_store()?;
            server::run_server(store, &bind).await?;
        }
    }

    Ok(())
}
