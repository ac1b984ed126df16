use alloy::rpc::types::Log;
use std::time::Instant;

use super::source::{ChainSource, FetchError};
use super::types::LogQuery;

pub const DEFAULT_BATCH_SIZE: u64 = 5_000;

/// Pulls every matching log in an inclusive block range, one bounded batch at a time.
///
/// Batches are issued sequentially. When the source rejects a range as too large the
/// range is halved and both halves are retried in order; a range that is still rejected
/// at `min_batch_size` blocks is a hard [`FetchError::BatchFloor`].
pub struct LogFetcher<'a> {
    source: &'a dyn ChainSource,
    batch_size: u64,
    min_batch_size: u64,
}

/// Counters reported after a fetch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchStats {
    pub requests: u64,
    pub splits: u64,
    pub logs: u64,
}

impl<'a> LogFetcher<'a> {
    pub fn new(source: &'a dyn ChainSource, batch_size: u64, min_batch_size: u64) -> Self {
        let min_batch_size = min_batch_size.max(1);
        Self {
            source,
            batch_size: batch_size.max(min_batch_size),
            min_batch_size,
        }
    }

    /// Contiguous, non-overlapping batches covering `from_block..=to_block`.
    pub fn partition(&self, from_block: u64, to_block: u64) -> Vec<(u64, u64)> {
        let mut batches = Vec::new();
        if from_block > to_block {
            return batches;
        }
        let mut current = from_block;
        loop {
            let end = current.saturating_add(self.batch_size - 1).min(to_block);
            batches.push((current, end));
            if end == to_block {
                break;
            }
            current = end + 1;
        }
        batches
    }

    pub async fn fetch(
        &self,
        query: &LogQuery,
        from_block: u64,
        to_block: u64,
    ) -> Result<(Vec<Log>, FetchStats), FetchError> {
        let started = Instant::now();
        let mut stats = FetchStats::default();
        let mut logs = Vec::new();

        let batches = self.partition(from_block, to_block);
        let total = batches.len();
        tracing::info!(
            source = self.source.name(),
            from = from_block,
            to = to_block,
            batches = total,
            batch_size = self.batch_size,
            "Fetching logs"
        );

        for (i, (start, end)) in batches.into_iter().enumerate() {
            let batch_logs = self.fetch_batch(query, start, end, &mut stats).await?;
            tracing::info!(
                from = start,
                to = end,
                logs = batch_logs.len(),
                progress = %format!("{}/{}", i + 1, total),
                "Fetched block range"
            );
            logs.extend(batch_logs);
        }

        stats.logs = logs.len() as u64;
        tracing::info!(
            logs = stats.logs,
            requests = stats.requests,
            splits = stats.splits,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Log fetch complete"
        );
        Ok((logs, stats))
    }

    /// Fetch one batch, halving on "too many results". Work is kept on an explicit
    /// stack so the lower half is always drained before the upper half.
    async fn fetch_batch(
        &self,
        query: &LogQuery,
        from_block: u64,
        to_block: u64,
        stats: &mut FetchStats,
    ) -> Result<Vec<Log>, FetchError> {
        let mut logs = Vec::new();
        let mut pending = vec![(from_block, to_block)];

        while let Some((start, end)) = pending.pop() {
            stats.requests += 1;
            match self.source.get_logs(query, start, end).await {
                Ok(batch) => logs.extend(batch),
                Err(e) if e.is_too_many_results() => {
                    let width = (end - start).saturating_add(1);
                    if width <= self.min_batch_size {
                        return Err(FetchError::BatchFloor {
                            from: start,
                            to: end,
                            min_batch: self.min_batch_size,
                        });
                    }
                    let mid = start + width / 2 - 1;
                    tracing::warn!(
                        from = start,
                        to = end,
                        split_at = mid,
                        "Range rejected as too large, splitting"
                    );
                    stats.splits += 1;
                    pending.push((mid + 1, end));
                    pending.push((start, mid));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(logs)
    }
}
