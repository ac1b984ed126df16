use alloy::rpc::types::Log;
use async_trait::async_trait;

use super::types::{BlockHead, LogQuery};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("range {from}..={to} rejected as too large: {message}")]
    TooManyResults { from: u64, to: u64, message: String },

    #[error("provider error from {endpoint}: {message}")]
    Provider { endpoint: String, message: String },

    #[error("request to {endpoint} timed out after {secs}s")]
    Timeout { endpoint: String, secs: u64 },

    #[error("unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    #[error("all {attempts} endpoint(s) failed, last error: {last}")]
    Exhausted { attempts: usize, last: Box<FetchError> },

    #[error("range {from}..={to} still too large at the minimum batch size of {min_batch} block(s)")]
    BatchFloor { from: u64, to: u64, min_batch: u64 },

    #[error("configuration error: {0}")]
    Config(String),
}

impl FetchError {
    pub fn is_too_many_results(&self) -> bool {
        matches!(self, Self::TooManyResults { .. })
    }
}

/// Provider messages that mean "shrink the range", as opposed to "try elsewhere".
const TOO_MANY_RESULTS_MARKERS: &[&str] = &[
    "too many results",
    "too many logs",
    "exceeds maximum",
    "exceed maximum",
    "query returned more than",
    "response size exceed",
    "block range is too large",
    "range too large",
    "result window is too large",
];

pub fn looks_like_too_many_results(message: &str) -> bool {
    let message = message.to_lowercase();
    TOO_MANY_RESULTS_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Anything that can answer the three chain questions the pipeline asks.
/// Implementations own their throttling and endpoint policy.
#[async_trait]
pub trait ChainSource: Send + Sync {
    fn name(&self) -> &str;

    async fn latest_block(&self) -> Result<BlockHead, FetchError>;

    async fn block_timestamp(&self, number: u64) -> Result<i64, FetchError>;

    async fn get_logs(
        &self,
        query: &LogQuery,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, FetchError>;
}
