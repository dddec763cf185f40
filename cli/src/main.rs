use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docqa_retrieval::{Document, DocumentQa, RetrievalConfig, SearchOutcome};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Ask questions about a collection of text documents.
#[derive(Parser, Debug)]
#[command(name = "docqa", version, about)]
struct Cli {
    /// Configuration file. Defaults to `<config dir>/docqa/config.toml` when present.
    #[arg(long, global = true, env = "DOCQA_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest text files. Each file's name becomes its document id.
    Ingest {
        /// Files to ingest as one batch.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Answer a question from the most relevant ingested document.
    Search {
        /// The question.
        query: String,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest { files } => {
            let documents = read_documents(&files).await?;
            let engine = DocumentQa::from_config(config).await?;
            let ids = engine.ingest(documents).await?;
            for id in ids {
                println!("{id}");
            }
        }
        Commands::Search { query } => {
            let engine = DocumentQa::from_config(config).await?;
            match engine.search(&query).await? {
                SearchOutcome::Answer(answer) => {
                    info!(
                        "Answer grounded on {} (score {:.3})",
                        answer.document_id, answer.score
                    );
                    println!("{}", answer.text);
                }
                SearchOutcome::NoResult => println!("No matching documents found"),
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(explicit: Option<&Path>) -> Result<RetrievalConfig> {
    if let Some(path) = explicit {
        return RetrievalConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()));
    }

    match RetrievalConfig::default_path().filter(|path| path.is_file()) {
        Some(path) => {
            debug!("Using config file {}", path.display());
            RetrievalConfig::load(&path)
                .with_context(|| format!("loading config from {}", path.display()))
        }
        None => Ok(RetrievalConfig::default()),
    }
}

async fn read_documents(files: &[PathBuf]) -> Result<Vec<Document>> {
    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        let Some(id) = path.file_name().and_then(|name| name.to_str()) else {
            bail!("{} has no usable file name", path.display());
        };
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        documents.push(Document::new(id, content));
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["docqa", "search", "what changed?", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Search { query } if query == "what changed?"));
    }

    #[test]
    fn test_ingest_requires_files() {
        assert!(Cli::try_parse_from(["docqa", "ingest"]).is_err());
    }
}
