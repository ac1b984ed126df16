//! Etherscan-style block explorer client: block-by-timestamp lookups and a log source.

use alloy::primitives::{Address, Bytes, LogData, B256};
use alloy::rpc::types::Log;
use async_trait::async_trait;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::ExplorerConfig;
use crate::indexer::source::{looks_like_too_many_results, ChainSource, FetchError};
use crate::indexer::throttle::RateLimiter;
use crate::indexer::types::{BlockHead, LogQuery};

/// The explorer never returns more than this many logs per call; a full page
/// means the range may have been truncated.
pub const MAX_LOGS_PER_CALL: usize = 1_000;

/// A log row as the explorer's `getLogs` returns it: every numeric field is a hex
/// string and zero may be a bare `"0x"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: String,
    pub transaction_hash: String,
    #[serde(default)]
    pub log_index: Option<String>,
    #[serde(default, rename = "timeStamp")]
    pub time_stamp: Option<String>,
}

impl RawLog {
    /// Parse the hex strings into a typed log. The row's `timeStamp` becomes the
    /// log's block timestamp; an unparseable transaction hash is left unset.
    pub fn to_log(&self) -> Result<Log, String> {
        let address =
            Address::from_str(&self.address).map_err(|e| format!("address {}: {e}", self.address))?;
        let topics = self
            .topics
            .iter()
            .map(|t| B256::from_str(t).map_err(|e| format!("topic {t}: {e}")))
            .collect::<Result<Vec<_>, _>>()?;
        let data = Bytes::from_str(&self.data).map_err(|e| format!("data: {e}"))?;
        let block_number = parse_hex_u64(&self.block_number)
            .ok_or_else(|| format!("blockNumber {}", self.block_number))?;

        Ok(Log {
            inner: alloy::primitives::Log {
                address,
                data: LogData::new_unchecked(topics, data),
            },
            block_hash: None,
            block_number: Some(block_number),
            block_timestamp: self.time_stamp.as_deref().and_then(parse_hex_u64),
            transaction_hash: B256::from_str(&self.transaction_hash).ok(),
            transaction_index: None,
            log_index: Some(self.log_index.as_deref().and_then(parse_hex_u64).unwrap_or(0)),
            removed: false,
        })
    }
}

/// The two header fields read from the explorer's `eth_getBlockByNumber` proxy.
#[derive(Debug, Clone, Deserialize)]
struct BlockHeaderWire {
    number: String,
    timestamp: String,
}

impl BlockHeaderWire {
    fn into_head(self) -> Option<BlockHead> {
        Some(BlockHead {
            number: parse_hex_u64(&self.number)?,
            timestamp: parse_hex_u64(&self.timestamp)? as i64,
        })
    }
}

/// Parse a `0x`-prefixed quantity. The explorer encodes zero as a bare `"0x"`.
pub fn parse_hex_u64(value: &str) -> Option<u64> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(digits, 16).ok()
}

#[derive(Debug, Deserialize)]
struct ExplorerEnvelope {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

pub struct ExplorerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    chain_id: u64,
    timeout: Duration,
    limiter: RateLimiter,
    warned_missing_key: AtomicBool,
}

impl ExplorerClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        chain_id: u64,
        timeout: Duration,
        limiter: RateLimiter,
    ) -> eyre::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| eyre::eyre!("Failed to build explorer HTTP client: {}", e))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            chain_id,
            timeout,
            limiter,
            warned_missing_key: AtomicBool::new(false),
        })
    }

    pub fn from_config(config: &ExplorerConfig, timeout: Duration) -> eyre::Result<Self> {
        Self::new(
            &config.base_url,
            config.api_key.clone(),
            config.chain_id,
            timeout,
            RateLimiter::from_millis(config.request_interval_ms),
        )
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Tell the user how to fix a missing key, once per run.
    pub fn warn_missing_key(&self) {
        if !self.warned_missing_key.swap(true, Ordering::Relaxed) {
            tracing::error!(
                "Explorer API key is not set. Add ETHERSCAN_API_KEY to your environment or .env \
                 file (or [explorer].api_key in the config) to enable explorer lookups"
            );
        }
    }

    async fn call(&self, params: &[(&str, String)]) -> Result<ExplorerEnvelope, FetchError> {
        let Some(api_key) = self.api_key.as_deref() else {
            self.warn_missing_key();
            return Err(FetchError::Config("explorer API key is not set".to_string()));
        };

        self.limiter.acquire().await;

        let mut query: Vec<(&str, String)> = params.to_vec();
        query.push(("chainid", self.chain_id.to_string()));
        query.push(("apikey", api_key.to_string()));

        let response = self
            .http
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(FetchError::Provider {
                endpoint: self.base_url.clone(),
                message: format!("HTTP {}", response.status()),
            });
        }

        response
            .json::<ExplorerEnvelope>()
            .await
            .map_err(|e| FetchError::Decode {
                endpoint: self.base_url.clone(),
                message: e.to_string(),
            })
    }

    fn transport_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                endpoint: self.base_url.clone(),
                secs: self.timeout.as_secs(),
            }
        } else {
            FetchError::Provider {
                endpoint: self.base_url.clone(),
                message: e.to_string(),
            }
        }
    }

    /// Unwrap the `status`/`message`/`result` envelope. The application status is
    /// separate from HTTP status: `"0"` is an error unless it just means "no rows".
    fn into_result(
        &self,
        envelope: ExplorerEnvelope,
        range: Option<(u64, u64)>,
    ) -> Result<serde_json::Value, FetchError> {
        if let Some(error) = envelope.error {
            return Err(FetchError::Provider {
                endpoint: self.base_url.clone(),
                message: error.to_string(),
            });
        }

        match envelope.status.as_deref() {
            Some("0") => {
                let message = envelope.message.unwrap_or_default();
                let detail = match &envelope.result {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Array(rows) if rows.is_empty() => String::new(),
                    other => other.to_string(),
                };
                if message.contains("No records found") || detail.contains("No records found") {
                    return Ok(serde_json::Value::Array(Vec::new()));
                }
                let text = format!("{message}: {detail}");
                if let Some((from, to)) = range {
                    if looks_like_too_many_results(&text) {
                        return Err(FetchError::TooManyResults {
                            from,
                            to,
                            message: text,
                        });
                    }
                }
                Err(FetchError::Provider {
                    endpoint: self.base_url.clone(),
                    message: text,
                })
            }
            _ => Ok(envelope.result),
        }
    }

    /// Block closest before `timestamp`. `Ok(None)` when no key is configured.
    pub async fn block_by_timestamp(&self, timestamp: i64) -> Result<Option<u64>, FetchError> {
        if !self.has_api_key() {
            self.warn_missing_key();
            return Ok(None);
        }

        let envelope = self
            .call(&[
                ("module", "block".to_string()),
                ("action", "getblocknobytime".to_string()),
                ("timestamp", timestamp.to_string()),
                ("closest", "before".to_string()),
            ])
            .await?;
        let result = self.into_result(envelope, None)?;

        let block = match &result {
            serde_json::Value::String(s) => s.parse::<u64>().ok(),
            serde_json::Value::Number(n) => n.as_u64(),
            _ => None,
        };
        block.map(Some).ok_or_else(|| FetchError::Decode {
            endpoint: self.base_url.clone(),
            message: format!("getblocknobytime returned {result}"),
        })
    }

    async fn proxy_block(&self, tag: String) -> Result<Option<BlockHead>, FetchError> {
        let envelope = self
            .call(&[
                ("module", "proxy".to_string()),
                ("action", "eth_getBlockByNumber".to_string()),
                ("tag", tag),
                ("boolean", "false".to_string()),
            ])
            .await?;
        let result = self.into_result(envelope, None)?;
        if result.is_null() {
            return Ok(None);
        }
        let header: BlockHeaderWire =
            serde_json::from_value(result).map_err(|e| FetchError::Decode {
                endpoint: self.base_url.clone(),
                message: e.to_string(),
            })?;
        Ok(header.into_head())
    }

    async fn logs_for_topic(
        &self,
        query: &LogQuery,
        topic0: &B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, FetchError> {
        let mut params = vec![
            ("module", "logs".to_string()),
            ("action", "getLogs".to_string()),
            ("address", format!("0x{}", hex::encode(query.address))),
            ("fromBlock", from_block.to_string()),
            ("toBlock", to_block.to_string()),
            ("topic0", format!("0x{}", hex::encode(topic0))),
        ];
        if let Some(topic1) = &query.topic1 {
            params.push(("topic1", format!("0x{}", hex::encode(topic1))));
            params.push(("topic0_1_opr", "and".to_string()));
        }

        let envelope = self.call(&params).await?;
        let result = self.into_result(envelope, Some((from_block, to_block)))?;
        let rows: Vec<RawLog> = serde_json::from_value(result).map_err(|e| FetchError::Decode {
            endpoint: self.base_url.clone(),
            message: format!("getLogs: {e}"),
        })?;

        if rows.len() >= MAX_LOGS_PER_CALL {
            return Err(FetchError::TooManyResults {
                from: from_block,
                to: to_block,
                message: format!("explorer returned a full page of {} logs", rows.len()),
            });
        }

        let mut logs = Vec::with_capacity(rows.len());
        for row in &rows {
            match row.to_log() {
                Ok(log) => logs.push(log),
                Err(e) => tracing::warn!(
                    tx_hash = %row.transaction_hash,
                    block = %row.block_number,
                    error = %e,
                    "Skipping malformed explorer log"
                ),
            }
        }
        Ok(logs)
    }
}

#[async_trait]
impl ChainSource for ExplorerClient {
    fn name(&self) -> &str {
        "explorer"
    }

    async fn latest_block(&self) -> Result<BlockHead, FetchError> {
        self.proxy_block("latest".to_string())
            .await?
            .ok_or_else(|| FetchError::Decode {
                endpoint: self.base_url.clone(),
                message: "latest block missing".to_string(),
            })
    }

    async fn block_timestamp(&self, number: u64) -> Result<i64, FetchError> {
        self.proxy_block(format!("0x{:x}", number))
            .await?
            .map(|head| head.timestamp)
            .ok_or_else(|| FetchError::Decode {
                endpoint: self.base_url.clone(),
                message: format!("block {number} not found"),
            })
    }

    /// One call per event signature (the explorer cannot OR topic0 values), merged
    /// back into block order.
    async fn get_logs(
        &self,
        query: &LogQuery,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, FetchError> {
        if !self.has_api_key() {
            self.warn_missing_key();
            return Ok(Vec::new());
        }

        let mut logs = Vec::new();
        for topic0 in &query.topic0 {
            logs.extend(self.logs_for_topic(query, topic0, from_block, to_block).await?);
        }
        logs.sort_by_key(|l| (l.block_number.unwrap_or(0), l.log_index.unwrap_or(0)));
        Ok(logs)
    }
}
