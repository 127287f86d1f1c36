//! Event Indexer Service
//!
//! Reads decoded block batches (one JSON object per line), reconciles their
//! contract creation events into typed records and checkpoints the last fully
//! processed block in PostgreSQL.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reconciler::{
    BlockBatch, BlockError, BlockProcessor, BlockReport, Config, ContentFetcher, Database,
    IpfsGateway, MemoryStore, PgStore, ReconciliationEngine, RecordStore,
};

/// Event Indexer - reconciles factory events into contract records
#[derive(Parser, Debug)]
#[command(name = "event-indexer")]
#[command(about = "Applies decoded block batches to the contract record store")]
struct Args {
    /// Block batch file (JSON lines), or "-" for stdin
    #[arg(long, default_value = "-")]
    input: String,

    /// Keep waiting for new batches after reaching the end of input
    #[arg(long)]
    follow: bool,

    /// Use an in-memory store instead of PostgreSQL
    #[arg(long)]
    dry_run: bool,

    /// Attempts to replay an incomplete block before giving up
    #[arg(long, default_value = "3")]
    max_retries: u32,
}

type Input = Box<dyn AsyncBufRead + Unpin + Send>;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("=== Event Indexer ===");
    info!("Input: {}", args.input);
    info!("Mode: {}", if args.follow { "follow" } else { "single pass" });
    info!("Dry run: {}", args.dry_run);

    let config = Config::from_env()?;
    let poll = Duration::from_secs(config.poll_interval_secs);
    let fetcher = IpfsGateway::new(&config)?;
    info!("IPFS gateway: {}", config.ipfs_gateway_url);

    let input = open_input(&args.input).await?;

    let stats = if args.dry_run {
        let processor = BlockProcessor::new(ReconciliationEngine::new(MemoryStore::new(), fetcher));
        run_until_shutdown(&processor, input, &args, poll).await?
    } else {
        info!("Connecting to database...");
        let db = Database::connect(&config).await?;
        db.health_check().await?;
        db.migrate().await?;
        info!("Database connected successfully");

        let store = PgStore::new(db.pool().clone());
        if let Some(cursor) = store.load_cursor().await? {
            info!("Resuming after block {}", cursor);
        }
        let processor = BlockProcessor::new(ReconciliationEngine::new(store, fetcher));
        run_until_shutdown(&processor, input, &args, poll).await?
    };

    info!(
        "Done: {} blocks, {} skipped, {} events applied, {} dropped, {} unreadable lines",
        stats.blocks, stats.skipped, stats.applied, stats.dropped, stats.unreadable
    );
    Ok(())
}

async fn open_input(path: &str) -> Result<Input> {
    if path == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Totals over a feed run.
#[derive(Debug, Default, PartialEq, Eq)]
struct FeedStats {
    blocks: usize,
    skipped: usize,
    applied: usize,
    dropped: usize,
    unreadable: usize,
}

impl FeedStats {
    fn record(&mut self, report: &BlockReport) {
        if report.skipped {
            self.skipped += 1;
        } else {
            self.blocks += 1;
            self.applied += report.applied;
            self.dropped += report.dropped;
        }
    }
}

async fn run_until_shutdown<S: RecordStore, F: ContentFetcher>(
    processor: &BlockProcessor<S, F>,
    input: Input,
    args: &Args,
    poll: Duration,
) -> Result<FeedStats> {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, exiting...");
            Ok(FeedStats::default())
        }
        result = feed(processor, input, args, poll) => result,
    }
}

/// Apply every batch line of `input` in order.
async fn feed<S: RecordStore, F: ContentFetcher>(
    processor: &BlockProcessor<S, F>,
    mut input: Input,
    args: &Args,
    poll: Duration,
) -> Result<FeedStats> {
    let mut stats = FeedStats::default();
    let mut line = String::new();

    loop {
        let n = input.read_line(&mut line).await?;
        if n == 0 && !args.follow {
            break;
        }
        // Wait for the writer to finish the current line.
        if args.follow && !line.ends_with('\n') {
            sleep(poll).await;
            continue;
        }

        let text = std::mem::take(&mut line);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let batch: BlockBatch = match serde_json::from_str(text) {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Skipping unreadable batch line: {}", e);
                stats.unreadable += 1;
                continue;
            }
        };

        let report = process_with_retry(processor, &batch, args.max_retries, poll).await?;
        stats.record(&report);
    }

    Ok(stats)
}

/// Replay an incomplete block until it completes or retries run out.
async fn process_with_retry<S: RecordStore, F: ContentFetcher>(
    processor: &BlockProcessor<S, F>,
    batch: &BlockBatch,
    max_retries: u32,
    poll: Duration,
) -> Result<BlockReport> {
    let mut attempt = 0;
    loop {
        match processor.process(batch).await {
            Ok(report) => return Ok(report),
            Err(e @ BlockError::Incomplete { .. }) if attempt < max_retries => {
                attempt += 1;
                warn!(
                    "{} (retry {}/{} in {}s)",
                    e,
                    attempt,
                    max_retries,
                    poll.as_secs()
                );
                sleep(poll).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
