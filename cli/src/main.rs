//! govindex CLI: replay governance contract logs and query the result.
//!
//! Usage:
//! ```bash
//! govindex run --rpc-url https://eth.llamarpc.com --db govindex.db
//! govindex status --db govindex.db
//! govindex entity Delegate 0xb8c2c29ee19d8307cb7255e1cd9cbde883a267d5
//! govindex page Delegate byTokensRepresented --first 10
//! govindex download-logs --reducer ENSToken --out-dir logs/
//! govindex info
//! ```

mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::TryStreamExt;
use tokio::io::AsyncWriteExt;
use tracing::info;
#[cfg(not(feature = "sqlite"))]
use tracing::warn;

use govindex_core::indexer::IndexerConfig;
use govindex_core::store::{EntityStore, ReadOnlyEntityStore};
use govindex_evm::reducers::default_reducers;
use govindex_evm::{HttpRpcClient, IndexerBuilder, LogFetcher, ReducerPass, RetryPolicy};
use govindex_storage::{page_by_index, KvEntityStore, MemoryKv};

use logging::LogConfig;

#[derive(Debug, Parser)]
#[command(name = "govindex", version, about = "Governance event indexer")]
struct Cli {
    /// Store location. `:memory:` keeps nothing between runs.
    #[arg(long, global = true, env = "GOVINDEX_DB", default_value = "govindex.db")]
    db: String,

    /// Default log level (overridden by RUST_LOG).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit JSON log lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Per-crate level override, `<crate>=<level>` (repeatable).
    #[arg(long = "log", global = true, value_parser = logging::parse_component_level)]
    log: Vec<(String, String)>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            components: self.log.iter().cloned().collect(),
            json: self.log_json,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay every selected reducer up to the chain head.
    Run(RunArgs),
    /// Show the committed block and each reducer's checkpoint.
    Status,
    /// Print one entity as JSON.
    Entity { entity: String, id: String },
    /// Print one page of an index as a Relay connection.
    Page {
        entity: String,
        index: String,
        #[arg(long, default_value_t = 10)]
        first: usize,
        #[arg(long)]
        after: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Append each reducer's raw logs to `<reducer>.logs.jsonl`.
    DownloadLogs {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Show defaults and shipped reducers.
    Info,
}

#[derive(Debug, Args)]
struct SourceArgs {
    /// JSON config file (see `IndexerConfig`).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "GOVINDEX_RPC_URL")]
    rpc_url: Option<String>,

    /// Only these reducers (repeatable). Defaults to all.
    #[arg(long = "reducer")]
    reducers: Vec<String>,

    #[arg(long)]
    chunk_size: Option<u64>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(long)]
    confirmation_depth: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(&cli.log_config());

    match cli.command {
        Command::Run(args) => cmd_run(&cli.db, args).await,
        Command::Status => cmd_status(&cli.db).await,
        Command::Entity { entity, id } => cmd_entity(&cli.db, &entity, &id).await,
        Command::Page {
            entity,
            index,
            first,
            after,
            prefix,
        } => cmd_page(&cli.db, &entity, &index, first, after.as_deref(), prefix.as_deref()).await,
        Command::DownloadLogs { source, out_dir } => cmd_download_logs(source, &out_dir).await,
        Command::Info => {
            cmd_info();
            Ok(())
        }
    }
}

fn load_config(source: &SourceArgs) -> Result<IndexerConfig> {
    let mut config = match &source.config {
        Some(path) => IndexerConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => IndexerConfig::default(),
    };
    if let Some(url) = &source.rpc_url {
        config.rpc_url = url.clone();
    }
    if let Some(chunk_size) = source.chunk_size {
        config.chunk_size = chunk_size;
    }
    Ok(config)
}

fn select_reducers(names: &[String]) -> Result<Vec<Arc<dyn ReducerPass>>> {
    let all = default_reducers();
    if names.is_empty() {
        return Ok(all);
    }
    for name in names {
        if !all.iter().any(|r| r.name() == name.as_str()) {
            let known: Vec<&str> = all.iter().map(|r| r.name()).collect();
            bail!("unknown reducer {name}, expected one of: {}", known.join(", "));
        }
    }
    Ok(all
        .into_iter()
        .filter(|r| names.iter().any(|n| n.as_str() == r.name()))
        .collect())
}

async fn open_store(db: &str, scan_chunk: usize) -> Result<Arc<dyn EntityStore>> {
    if db == ":memory:" {
        return Ok(Arc::new(KvEntityStore::new(MemoryKv::new()).with_scan_chunk(scan_chunk)));
    }
    open_file_store(db, scan_chunk).await
}

#[cfg(feature = "sqlite")]
async fn open_file_store(db: &str, scan_chunk: usize) -> Result<Arc<dyn EntityStore>> {
    let kv = govindex_storage::SqliteKv::open(db)
        .await
        .with_context(|| format!("opening {db}"))?;
    Ok(Arc::new(KvEntityStore::new(kv).with_scan_chunk(scan_chunk)))
}

#[cfg(not(feature = "sqlite"))]
async fn open_file_store(db: &str, scan_chunk: usize) -> Result<Arc<dyn EntityStore>> {
    warn!(db, "built without sqlite, using an in-memory store");
    Ok(Arc::new(KvEntityStore::new(MemoryKv::new()).with_scan_chunk(scan_chunk)))
}

async fn cmd_run(db: &str, args: RunArgs) -> Result<()> {
    let mut config = load_config(&args.source)?;
    if let Some(depth) = args.confirmation_depth {
        config.confirmation_depth = depth;
    }
    let store = open_store(db, config.scan_chunk).await?;
    let reducers = select_reducers(&args.source.reducers)?;
    let engine = IndexerBuilder::from_config(config)
        .reducers(reducers)
        .build_http(store)
        .context("building replay engine")?;

    let report = engine.run_once().await.context("replay run")?;
    println!("head {}  target {}", report.head, report.target);
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(pass) if pass.is_up_to_date() => {
                println!("  {:<12} {}  up to date", outcome.reducer, outcome.state);
            }
            Ok(pass) => println!(
                "  {:<12} {}  blocks {}..={}  logs {}  applied {}  failures {}",
                outcome.reducer,
                outcome.state,
                pass.from,
                pass.to,
                pass.logs,
                pass.applied,
                pass.failures.len()
            ),
            Err(e) => println!("  {:<12} {}  {e}", outcome.reducer, outcome.state),
        }
    }
    for failure in report.failures() {
        println!("{}", serde_json::to_string(failure)?);
    }

    let failed = report.outcomes.iter().filter(|o| o.result.is_err()).count();
    if failed > 0 {
        bail!("{failed} reducer(s) failed");
    }
    Ok(())
}

async fn cmd_status(db: &str) -> Result<()> {
    let store = open_store(db, IndexerConfig::default().scan_chunk).await?;
    match store.get_finalized_block().await? {
        Some(block) => println!("latest committed block: {}", block.number),
        None => println!("latest committed block: none"),
    }
    for reducer in default_reducers() {
        match store.get_reducer_checkpoint(reducer.name()).await? {
            Some(checkpoint) => println!(
                "  {:<12} checkpoint {}  next {}",
                reducer.name(),
                checkpoint.block.number,
                checkpoint.block.next_block()
            ),
            None => println!(
                "  {:<12} no checkpoint, starts at {}",
                reducer.name(),
                reducer.starting_block()
            ),
        }
    }
    Ok(())
}

async fn cmd_entity(db: &str, entity: &str, id: &str) -> Result<()> {
    let store = open_store(db, IndexerConfig::default().scan_chunk).await?;
    match store.get_entity(entity, id).await? {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => bail!("{entity} {id} not found"),
    }
    Ok(())
}

async fn cmd_page(
    db: &str,
    entity: &str,
    index: &str,
    first: usize,
    after: Option<&str>,
    prefix: Option<&str>,
) -> Result<()> {
    let store = open_store(db, IndexerConfig::default().scan_chunk).await?;
    let page = page_by_index(store.as_ref(), entity, index, first, after, prefix).await?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}

async fn cmd_download_logs(source: SourceArgs, out_dir: &std::path::Path) -> Result<()> {
    let config = load_config(&source)?;
    if config.rpc_url.is_empty() {
        bail!("no RPC endpoint: pass --rpc-url or set GOVINDEX_RPC_URL");
    }
    let client = HttpRpcClient::default_for(&config.rpc_url)?;
    let fetcher = LogFetcher::new(Arc::new(client))
        .with_chunk_size(config.chunk_size)
        .with_retry(RetryPolicy::new(config.retry.clone()));
    let head = fetcher.head().await.context("reading chain head")?;

    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("creating {}", out_dir.display()))?;
    for reducer in select_reducers(&source.reducers)? {
        let path = out_dir.join(format!("{}.logs.jsonl", reducer.name()));
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;

        let mut written = 0usize;
        let mut batches = fetcher.logs(reducer.filter(), reducer.starting_block(), head);
        while let Some(batch) = batches.try_next().await? {
            for log in &batch.logs {
                let mut line = serde_json::to_vec(log)?;
                line.push(b'\n');
                file.write_all(&line).await?;
                written += 1;
            }
        }
        file.flush().await?;
        info!(reducer = reducer.name(), logs = written, path = %path.display(), "logs written");
    }
    Ok(())
}

fn cmd_info() {
    let config = IndexerConfig::default();
    println!("govindex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default chunk size: {} blocks/call", config.chunk_size);
    println!("  Default confirmation depth: {} blocks", config.confirmation_depth);
    println!(
        "  Retries: {} (backoff {}ms..{}ms)",
        config.retry.max_retries, config.retry.initial_backoff_ms, config.retry.max_backoff_ms
    );
    println!(
        "  Storage backends: memory{}",
        if cfg!(feature = "sqlite") { ", SQLite" } else { "" }
    );
    println!("  Reducers:");
    for reducer in default_reducers() {
        println!(
            "    {:<12} {}  from block {}",
            reducer.name(),
            reducer.filter().address,
            reducer.starting_block()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reducer_selection() {
        assert_eq!(select_reducers(&[]).unwrap().len(), 2);
        let only = select_reducers(&["ENSGovernor".to_string()]).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].name(), "ENSGovernor");
        assert!(select_reducers(&["Nouns".to_string()]).is_err());
    }

    #[test]
    fn flags_override_config() {
        let source = SourceArgs {
            config: None,
            rpc_url: Some("http://localhost:8545".into()),
            reducers: vec![],
            chunk_size: Some(10),
        };
        let config = load_config(&source).unwrap();
        assert_eq!(config.rpc_url, "http://localhost:8545");
        assert_eq!(config.chunk_size, 10);
    }

    #[test]
    fn cli_parses_page_command() {
        let cli = Cli::try_parse_from([
            "govindex", "--db", ":memory:", "page", "Vote", "byVoter", "--first", "5", "--prefix", "0xab",
        ])
        .unwrap();
        assert_eq!(cli.db, ":memory:");
        assert!(matches!(
            cli.command,
            Command::Page { first: 5, ref prefix, .. } if prefix.as_deref() == Some("0xab")
        ));
    }

    #[test]
    fn log_flags_fill_component_overrides() {
        let cli = Cli::try_parse_from([
            "govindex",
            "--log-level",
            "warn",
            "status",
            "--log",
            "govindex-storage=debug",
            "--log",
            "sqlx=error",
        ])
        .unwrap();
        let config = cli.log_config();
        assert_eq!(config.components.len(), 2);
        assert_eq!(config.directives(), "warn,govindex_storage=debug,sqlx=error");

        assert!(Cli::try_parse_from(["govindex", "--log", "sqlx", "status"]).is_err());
    }

    #[tokio::test]
    async fn memory_store_starts_empty() {
        let store = open_store(":memory:", 16).await.unwrap();
        assert!(store.get_finalized_block().await.unwrap().is_none());
    }
}
