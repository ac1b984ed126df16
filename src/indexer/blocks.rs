use alloy::rpc::types::Log;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::explorer::ExplorerClient;

use super::source::{ChainSource, FetchError};
use super::types::BlockHead;

/// Maps wall-clock time to block numbers and block numbers to timestamps for one run.
///
/// Holds the run's block→timestamp memo and the chain head seen at first use.
/// Nothing here outlives the run.
pub struct BlockClock<'a> {
    source: &'a dyn ChainSource,
    explorer: Option<&'a ExplorerClient>,
    block_time_secs: u64,
    head: Option<BlockHead>,
    timestamps: HashMap<u64, i64>,
}

/// Block at or just before `target_ts`, extrapolated back from `head` at a fixed block time.
pub fn estimate_block(head: BlockHead, target_ts: i64, block_time_secs: u64) -> u64 {
    if target_ts >= head.timestamp {
        return head.number;
    }
    let behind_secs = (head.timestamp - target_ts) as u64;
    let behind_blocks = behind_secs.div_ceil(block_time_secs.max(1));
    head.number.saturating_sub(behind_blocks)
}

impl<'a> BlockClock<'a> {
    pub fn new(
        source: &'a dyn ChainSource,
        explorer: Option<&'a ExplorerClient>,
        block_time_secs: u64,
    ) -> Self {
        Self {
            source,
            explorer,
            block_time_secs,
            head: None,
            timestamps: HashMap::new(),
        }
    }

    pub async fn head(&mut self) -> Result<BlockHead, FetchError> {
        if let Some(head) = self.head {
            return Ok(head);
        }
        let head = self.source.latest_block().await?;
        tracing::info!(block = head.number, timestamp = head.timestamp, "Chain head");
        self.timestamps.insert(head.number, head.timestamp);
        self.head = Some(head);
        Ok(head)
    }

    /// Block number for a point in time. Uses the explorer's lookup when one is
    /// configured and falls back to extrapolation from the head on any failure.
    pub async fn block_at(&mut self, at: DateTime<Utc>) -> Result<u64, FetchError> {
        let head = self.head().await?;
        let target = at.timestamp();
        if target >= head.timestamp {
            return Ok(head.number);
        }

        if let Some(explorer) = self.explorer {
            match explorer.block_by_timestamp(target).await {
                Ok(Some(block)) => return Ok(block.min(head.number)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        timestamp = target,
                        error = %e,
                        "Explorer block lookup failed, extrapolating instead"
                    );
                }
            }
        }

        let block = estimate_block(head, target, self.block_time_secs);
        tracing::debug!(timestamp = target, block, "Estimated block from head");
        Ok(block)
    }

    /// Inclusive block range for a time window. The end is clamped to the head.
    pub async fn resolve_window(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(u64, u64), FetchError> {
        let from = self.block_at(start).await?;
        let to = self.block_at(end).await?;
        tracing::info!(
            start = %start,
            end = %end,
            from_block = from,
            to_block = to,
            "Resolved time window to blocks"
        );
        Ok((from, to.max(from)))
    }

    pub async fn timestamp(&mut self, block: u64) -> Result<i64, FetchError> {
        if let Some(ts) = self.timestamps.get(&block) {
            return Ok(*ts);
        }
        let ts = self.source.block_timestamp(block).await?;
        self.timestamps.insert(block, ts);
        Ok(ts)
    }

    /// Attach block timestamps to logs whose source did not embed one.
    /// Returns how many distinct blocks had to be looked up.
    pub async fn stamp_logs(&mut self, logs: &mut [Log]) -> Result<usize, FetchError> {
        let before = self.timestamps.len();
        for log in logs.iter_mut().filter(|l| l.block_timestamp.is_none()) {
            let Some(block) = log.block_number else {
                continue;
            };
            let ts = self.timestamp(block).await?;
            log.block_timestamp = u64::try_from(ts).ok();
        }
        Ok(self.timestamps.len() - before)
    }
}
