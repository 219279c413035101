//! Producer side of the export: walks the cursor and feeds the relay.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::elastic::{CursorToken, ScrollPage};
use crate::error::AppError;
use crate::pipeline::CursorSource;
use crate::record::Batch;
use crate::streaming::RelaySender;

/// Why the fetch driver stopped pulling pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The cursor returned an empty page.
    Exhausted,
    /// The configured record limit was reached.
    LimitReached,
    /// The writer dropped its end of the relay.
    ConsumerGone,
    /// The abort signal fired (the writer failed).
    Aborted,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Exhausted => "exhausted",
            StopReason::LimitReached => "limit reached",
            StopReason::ConsumerGone => "consumer gone",
            StopReason::Aborted => "aborted",
        }
    }
}

/// Counters kept by the fetch driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchStats {
    /// Non-empty pages received, including the first.
    pub batches: u64,
    /// Records pushed into the relay.
    pub records_fetched: u64,
    pub stop_reason: StopReason,
}

/// Result of a fetch run. The cursor is returned on every path so the caller
/// can release it.
#[derive(Debug)]
pub struct FetchReport {
    pub cursor: CursorToken,
    pub outcome: Result<FetchStats, AppError>,
}

/// Number of records from a batch of `batch_len` that may still be pushed
/// when `already_pushed` records went out under `limit`.
pub fn records_to_take(batch_len: usize, limit: Option<u64>, already_pushed: u64) -> usize {
    match limit {
        None => batch_len,
        Some(limit) => {
            let remaining = limit.saturating_sub(already_pushed);
            usize::try_from(remaining).map_or(batch_len, |r| r.min(batch_len))
        }
    }
}

/// Pushes every record of every page into the relay until the cursor is
/// exhausted or the limit is reached.
///
/// Truncation happens here, so the writer never needs to know the limit.
pub struct FetchDriver<S: CursorSource> {
    source: Arc<S>,
    relay: RelaySender,
    limit: Option<u64>,
    abort: CancellationToken,
    cursor: CursorToken,
    batches: u64,
}

impl<S: CursorSource> FetchDriver<S> {
    pub fn new(
        source: Arc<S>,
        relay: RelaySender,
        limit: Option<u64>,
        abort: CancellationToken,
        cursor: CursorToken,
    ) -> Self {
        Self {
            source,
            relay,
            limit,
            abort,
            cursor,
            batches: 0,
        }
    }

    /// Runs the driver starting from the already-opened first page.
    ///
    /// The relay is closed when this returns, whatever the exit path. On a
    /// fetch error the abort token is cancelled first, so the writer drops
    /// its partial chunk instead of flushing it.
    pub async fn run(mut self, first: Batch) -> FetchReport {
        let outcome = self.drive(first).await;

        let outcome = match outcome {
            Ok(stop_reason) => {
                info!(
                    "[FETCH] stopped ({}): {} batches, {} records loaded",
                    stop_reason.as_str(),
                    self.batches,
                    self.relay.pushed()
                );
                Ok(FetchStats {
                    batches: self.batches,
                    records_fetched: self.relay.pushed(),
                    stop_reason,
                })
            }
            Err(e) => {
                warn!(
                    "[FETCH] failed after {} batches, {} records loaded: {}",
                    self.batches,
                    self.relay.pushed(),
                    e.log_line()
                );
                self.abort.cancel();
                Err(e)
            }
        };

        self.relay.close();
        FetchReport {
            cursor: self.cursor,
            outcome,
        }
    }

    async fn drive(&mut self, first: Batch) -> Result<StopReason, AppError> {
        if first.is_empty() {
            return Ok(StopReason::Exhausted);
        }
        if let Some(reason) = self.push_batch(first).await {
            return Ok(reason);
        }

        loop {
            let page: ScrollPage = tokio::select! {
                biased;

                _ = self.abort.cancelled() => return Ok(StopReason::Aborted),
                page = self.source.next_batch(&self.cursor) => page?,
            };

            self.cursor = page.cursor;
            if page.records.is_empty() {
                return Ok(StopReason::Exhausted);
            }
            if let Some(reason) = self.push_batch(page.records).await {
                return Ok(reason);
            }
        }
    }

    /// Pushes one batch, truncated to the limit. Returns a stop reason when
    /// the driver must not fetch further.
    async fn push_batch(&mut self, batch: Batch) -> Option<StopReason> {
        self.batches += 1;
        let batch_len = batch.len();
        let take = records_to_take(batch_len, self.limit, self.relay.pushed());
        if take < batch_len {
            debug!(
                "[FETCH] truncating batch {} from {} to {} records",
                self.batches, batch_len, take
            );
        }

        for record in batch.into_iter().take(take) {
            tokio::select! {
                biased;

                _ = self.abort.cancelled() => return Some(StopReason::Aborted),
                pushed = self.relay.push(record) => {
                    if pushed.is_err() {
                        return Some(StopReason::ConsumerGone);
                    }
                }
            }
        }

        info!(
            "[FETCH] batch {}: {} records ({} loaded)",
            self.batches,
            take,
            self.relay.pushed()
        );

        match self.limit {
            Some(limit) if self.relay.pushed() >= limit => Some(StopReason::LimitReached),
            _ => None,
        }
    }
}
