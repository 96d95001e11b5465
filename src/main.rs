use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use docrag::commands::{
    build_engine, delete_document, ingest_file, list_documents, list_points, query, reset_index,
    show_config, show_stats,
};
use docrag::config::Config;

#[derive(Parser)]
#[command(name = "docrag")]
#[command(about = "Question answering over your own documents, backed by a local vector index")]
#[command(version)]
struct Cli {
    /// Configuration directory (defaults to ~/.docrag)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a document file into the index
    Ingest {
        /// Path to the file to ingest (.txt, .md, .csv)
        file: PathBuf,
    },
    /// Ask a question against the ingested documents
    Query {
        /// The question to answer
        question: String,
        /// Restrict retrieval to a single document
        #[arg(long)]
        document: Option<String>,
        /// Identity used for rate limiting
        #[arg(long)]
        identity: Option<String>,
    },
    /// List ingested documents
    List,
    /// Delete a document and its indexed chunks
    Delete {
        /// Document id to delete
        document_id: String,
    },
    /// Show index statistics
    Stats,
    /// List raw index points (debugging)
    Points {
        /// Maximum number of points to show
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Drop every document and indexed point
    Reset,
    /// Show or edit configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::default_base_dir()?,
    };
    let config = Config::load(&config_dir)?;

    match cli.command {
        Commands::Ingest { file } => {
            let engine = build_engine(config).await?;
            ingest_file(&engine, &file).await?;
        }
        Commands::Query {
            question,
            document,
            identity,
        } => {
            let engine = build_engine(config).await?;
            query(&engine, &question, document.as_deref(), identity.as_deref()).await?;
        }
        Commands::List => {
            let engine = build_engine(config).await?;
            list_documents(&engine).await?;
        }
        Commands::Delete { document_id } => {
            let engine = build_engine(config).await?;
            delete_document(&engine, &document_id).await?;
        }
        Commands::Stats => {
            let engine = build_engine(config).await?;
            show_stats(&engine).await?;
        }
        Commands::Points { limit } => {
            let engine = build_engine(config).await?;
            list_points(&engine, limit).await?;
        }
        Commands::Reset => {
            let engine = build_engine(config).await?;
            reset_index(&engine).await?;
        }
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                config.save()?;
                println!("Wrote configuration to {}", config.base_dir.display());
            }
        }
    }

    Ok(())
}
