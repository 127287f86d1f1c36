//! Block-by-block application of decoded logs.
//!
//! Events inside a block are applied in log order. An event whose referenced
//! record does not exist yet is deferred to the end of the block and retried
//! while retries keep making progress. The cursor only advances once every
//! event of the block has been applied or dropped as malformed.

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::engine::ReconciliationEngine;
use crate::error::{Disposition, ReconciliationError, StoreError};
use crate::event::{BlockBatch, RawEvent};
use crate::ipfs::ContentFetcher;
use crate::store::RecordStore;

#[derive(Debug, Error)]
pub enum BlockError {
    #[error("block {block}: {pending} event(s) could not be applied, last error: {last}")]
    Incomplete {
        block: u64,
        pending: usize,
        last: ReconciliationError,
    },

    #[error("block {block}: fatal reconciliation error: {source}")]
    Fatal {
        block: u64,
        source: ReconciliationError,
    },

    #[error("cursor update failed: {0}")]
    Cursor(#[from] StoreError),
}

/// Outcome of processing one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockReport {
    pub block: u64,
    pub applied: usize,
    pub dropped: usize,
    /// Events that had to wait for a record created later in the block.
    pub deferred: usize,
    /// Block was at or below the cursor and not processed.
    pub skipped: bool,
}

/// Feeds block batches through the reconciliation engine.
pub struct BlockProcessor<S, F> {
    engine: ReconciliationEngine<S, F>,
}

impl<S: RecordStore, F: ContentFetcher> BlockProcessor<S, F> {
    pub fn new(engine: ReconciliationEngine<S, F>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &ReconciliationEngine<S, F> {
        &self.engine
    }

    /// Apply every log of `batch` and advance the cursor.
    pub async fn process(&self, batch: &BlockBatch) -> Result<BlockReport, BlockError> {
        let mut report = BlockReport {
            block: batch.number,
            ..Default::default()
        };

        if let Some(cursor) = self.engine.store().load_cursor().await? {
            if batch.number == cursor && !batch.logs.is_empty() {
                warn!(
                    "Block {} already checkpointed, skipping {} log(s)",
                    batch.number,
                    batch.logs.len()
                );
                report.skipped = true;
                return Ok(report);
            }
            if batch.number <= cursor {
                debug!("Block {} at or below cursor {}, skipping", batch.number, cursor);
                report.skipped = true;
                return Ok(report);
            }
        }

        let mut queue = batch.events();
        let mut failed: Vec<(RawEvent, ReconciliationError)> = Vec::new();
        let mut first_pass = true;

        while !queue.is_empty() {
            let attempted = queue.len();
            let mut waiting = Vec::new();

            for event in queue {
                match self.engine.apply(&event).await {
                    Ok(_) => report.applied += 1,
                    Err(e) => match e.disposition() {
                        Disposition::Drop => {
                            warn!("Dropping {} from {}: {}", event.name, event.address, e);
                            report.dropped += 1;
                        }
                        Disposition::Fatal => {
                            error!("Fatal error in block {}: {}", batch.number, e);
                            return Err(BlockError::Fatal {
                                block: batch.number,
                                source: e,
                            });
                        }
                        Disposition::Retry if e.is_reference_not_found() => {
                            debug!("Deferring {} from {}: {}", event.name, event.address, e);
                            waiting.push((event, e));
                        }
                        Disposition::Retry => failed.push((event, e)),
                    },
                }
            }

            if first_pass {
                report.deferred = waiting.len();
                first_pass = false;
            }

            if waiting.len() == attempted {
                failed.extend(waiting);
                break;
            }
            queue = waiting.into_iter().map(|(event, _)| event).collect();
        }

        if let Some((_, last)) = failed.pop() {
            for (event, e) in &failed {
                warn!("Unapplied {} from {}: {}", event.name, event.address, e);
            }
            return Err(BlockError::Incomplete {
                block: batch.number,
                pending: failed.len() + 1,
                last,
            });
        }

        self.engine.store().save_cursor(batch.number).await?;
        info!(
            "Block {}: {} applied, {} dropped, {} deferred",
            report.block, report.applied, report.dropped, report.deferred
        );
        Ok(report)
    }
}
