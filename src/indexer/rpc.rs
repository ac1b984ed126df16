use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, Log};
use alloy::transports::TransportResult;
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::RpcConfig;

use super::source::{looks_like_too_many_results, ChainSource, FetchError};
use super::throttle::RateLimiter;
use super::types::{BlockHead, LogQuery};

struct RpcEndpoint {
    url: String,
    provider: DynProvider,
}

/// JSON-RPC chain source over an ordered list of endpoints.
///
/// Each call starts at the endpoint that last succeeded and walks the rest of the
/// list once. "Too many results" short-circuits the walk so the fetcher can split.
pub struct RpcSource {
    endpoints: Vec<RpcEndpoint>,
    active: AtomicUsize,
    limiter: RateLimiter,
    timeout: Duration,
}

impl RpcSource {
    pub fn new(urls: &[String], timeout: Duration, limiter: RateLimiter) -> eyre::Result<Self> {
        if urls.is_empty() {
            return Err(eyre::eyre!("At least one RPC endpoint must be configured"));
        }

        let mut endpoints = Vec::with_capacity(urls.len());
        for url in urls {
            let parsed = url
                .parse::<reqwest::Url>()
                .map_err(|e| eyre::eyre!("Invalid RPC URL '{}': {}", url, e))?;
            endpoints.push(RpcEndpoint {
                url: url.clone(),
                provider: ProviderBuilder::new().connect_http(parsed).erased(),
            });
        }

        Ok(Self {
            endpoints,
            active: AtomicUsize::new(0),
            limiter,
            timeout,
        })
    }

    pub fn from_config(config: &RpcConfig) -> eyre::Result<Self> {
        Self::new(
            &config.endpoints,
            Duration::from_secs(config.timeout_secs),
            RateLimiter::from_millis(config.request_interval_ms),
        )
    }

    pub fn active_endpoint(&self) -> &str {
        &self.endpoints[self.active.load(Ordering::Relaxed) % self.endpoints.len()].url
    }

    /// Run one provider call, rotating through endpoints on failure. `range` marks
    /// log queries, whose "too many results" errors are returned without rotating.
    async fn call<T, F, Fut>(
        &self,
        method: &'static str,
        range: Option<(u64, u64)>,
        op: F,
    ) -> Result<T, FetchError>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let count = self.endpoints.len();
        let start = self.active.load(Ordering::Relaxed);
        let mut last_error = None;

        for attempt in 0..count {
            let idx = (start + attempt) % count;
            let endpoint = &self.endpoints[idx];
            self.limiter.acquire().await;

            let error = match tokio::time::timeout(self.timeout, op(endpoint.provider.clone())).await {
                Ok(Ok(value)) => {
                    if idx != start % count {
                        self.active.store(idx, Ordering::Relaxed);
                        tracing::info!(endpoint = %endpoint.url, "Switched active RPC endpoint");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    let message = e.to_string();
                    if let Some((from, to)) = range {
                        if looks_like_too_many_results(&message) {
                            return Err(FetchError::TooManyResults { from, to, message });
                        }
                    }
                    FetchError::Provider {
                        endpoint: endpoint.url.clone(),
                        message,
                    }
                }
                Err(_) => FetchError::Timeout {
                    endpoint: endpoint.url.clone(),
                    secs: self.timeout.as_secs(),
                },
            };

            tracing::warn!(
                method,
                endpoint = %endpoint.url,
                attempt = attempt + 1,
                endpoints = count,
                error = %error,
                "RPC call failed, rotating endpoint"
            );
            last_error = Some(error);
        }

        Err(FetchError::Exhausted {
            attempts: count,
            last: Box::new(
                last_error.unwrap_or_else(|| FetchError::Config("no RPC endpoints".to_string())),
            ),
        })
    }

    async fn block_head(&self, tag: BlockNumberOrTag) -> Result<Option<BlockHead>, FetchError> {
        let block = self
            .call("eth_getBlockByNumber", None, |provider| async move {
                provider.get_block_by_number(tag).await
            })
            .await?;
        Ok(block.map(|block| BlockHead {
            number: block.header.number,
            timestamp: block.header.timestamp as i64,
        }))
    }
}

#[async_trait]
impl ChainSource for RpcSource {
    fn name(&self) -> &str {
        "rpc"
    }

    async fn latest_block(&self) -> Result<BlockHead, FetchError> {
        self.block_head(BlockNumberOrTag::Latest)
            .await?
            .ok_or_else(|| FetchError::Decode {
                endpoint: self.active_endpoint().to_string(),
                message: "latest block missing".to_string(),
            })
    }

    async fn block_timestamp(&self, number: u64) -> Result<i64, FetchError> {
        self.block_head(BlockNumberOrTag::Number(number))
            .await?
            .map(|head| head.timestamp)
            .ok_or_else(|| FetchError::Decode {
                endpoint: self.active_endpoint().to_string(),
                message: format!("block {number} not found"),
            })
    }

    async fn get_logs(
        &self,
        query: &LogQuery,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, FetchError> {
        let filter = query.to_filter(from_block, to_block);
        let filter = &filter;
        self.call("eth_getLogs", Some((from_block, to_block)), move |provider| async move {
            provider.get_logs(filter).await
        })
        .await
    }
}
