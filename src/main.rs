//! `regindex` command line: ingest parsed pages, query, inspect tables.

use regindex::{BlockType, Engine, EngineConfig, PageDocument, SearchFilters, SearchMode};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "regindex", version, about = "Index and search structured regulation documents")]
struct Cli {
    /// TOML configuration file. `REGINDEX__*` environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a JSON array of parsed pages, replacing the regulation.
    Ingest {
        pages: PathBuf,
        /// Defaults to the reg_id of the first page.
        #[arg(long)]
        reg_id: Option<String>,
    },
    /// Search prose blocks and merged tables.
    Search {
        query: String,
        #[arg(long)]
        reg_id: Option<String>,
        /// Substring of the chapter path.
        #[arg(long)]
        chapter: Option<String>,
        #[arg(long = "block-type", value_parser = parse_block_type)]
        block_types: Vec<BlockType>,
        #[arg(long)]
        section: Option<String>,
        #[arg(long, default_value = "lexical")]
        mode: SearchMode,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Search merged tables only.
    Tables {
        query: String,
        #[arg(long)]
        reg_id: Option<String>,
        #[arg(long)]
        chapter: Option<String>,
        /// Use the vector index instead of the lexical one.
        #[arg(long)]
        semantic: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print one merged table.
    Table {
        table_id: String,
        #[arg(long)]
        reg_id: Option<String>,
    },
    /// Remove a regulation from every store.
    Delete { reg_id: String },
}

fn parse_block_type(value: &str) -> Result<BlockType, String> {
    match value {
        "text" | "heading" | "table" | "list" => Ok(BlockType::parse(value)),
        other => Err(format!("unknown block type: {other}")),
    }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("regindex=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let default_limit = config.default_limit;
    let engine = Engine::open(config).context("failed to open engine")?;

    match cli.command {
        Command::Ingest { pages, reg_id } => {
            let bytes = std::fs::read(&pages)
                .with_context(|| format!("failed to read {}", pages.display()))?;
            let pages: Vec<PageDocument> =
                serde_json::from_slice(&bytes).context("pages file is not a JSON array of pages")?;
            let reg_id = reg_id
                .or_else(|| pages.first().map(|page| page.reg_id.clone()))
                .context("no reg_id given and the pages file is empty")?;

            let stats = engine.indexer().ingest(&reg_id, &pages).await?;
            print_json(&stats)?;
        }
        Command::Search {
            query,
            reg_id,
            chapter,
            block_types,
            section,
            mode,
            limit,
        } => {
            let filters = SearchFilters {
                reg_id,
                chapter_scope: chapter,
                block_types,
                section_number: section,
            };
            let results = engine
                .search()
                .search(&query, &filters, mode, limit.unwrap_or(default_limit))
                .await;
            print_json(&results)?;
        }
        Command::Tables {
            query,
            reg_id,
            chapter,
            semantic,
            limit,
        } => {
            let tables = engine.tables();
            let limit = limit.unwrap_or(default_limit);
            let results = if semantic {
                tables
                    .search_tables_semantic(&query, reg_id.as_deref(), chapter.as_deref(), limit)
                    .await
            } else {
                tables
                    .search_tables(&query, reg_id.as_deref(), chapter.as_deref(), limit)
                    .await
            };
            print_json(&results)?;
        }
        Command::Table { table_id, reg_id } => {
            let tables = engine.tables();
            let entry = match reg_id {
                Some(reg_id) => tables.get_table(&reg_id, &table_id)?,
                None => tables.get_table_by_id(&table_id)?.map(|(_, entry)| entry),
            };
            let entry = entry.with_context(|| format!("table not found: {table_id}"))?;
            print_json(&entry)?;
        }
        Command::Delete { reg_id } => {
            engine.indexer().delete_regulation(&reg_id).await?;
            tracing::info!(reg_id, "deleted");
        }
    }

    engine.close().await?;
    Ok(())
}
