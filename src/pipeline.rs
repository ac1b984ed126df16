use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::aggregate::stake::{self, RankBy};
use crate::aggregate::withdrawals::{chronological, largest_withdrawals};
use crate::config::Config;
use crate::entity::classifier::Classifier;
use crate::entity::label_store::LabelStore;
use crate::entity::service::LabelServiceClient;
use crate::explorer::ExplorerClient;
use crate::export::{
    EventRow, QueryInfo, Snapshot, SnapshotKind, StakeRow, Summary, WithdrawalRow,
};
use crate::indexer::blocks::BlockClock;
use crate::indexer::decoder::{decode_logs, staking_shapes, topics_for, validator_topic, EventShape};
use crate::indexer::fetcher::{FetchStats, LogFetcher};
use crate::indexer::rpc::RpcSource;
use crate::indexer::source::ChainSource;
use crate::indexer::types::{EventKind, EventSource, LogQuery, StakeEvent};
use crate::staking::{StakingApiClient, ValidatorInfo};

/// The span of chain history a command looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Blocks { from: u64, to: u64 },
    /// The most recent span of wall-clock time, ending now.
    Recent(chrono::Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub window: Window,
    pub source: EventSource,
    pub validator: Option<u64>,
    /// Restrict to one event kind; `None` fetches delegations and unbondings.
    pub kind: Option<EventKind>,
    pub top: Option<usize>,
}

/// Decoded events of one run plus what is needed to describe them.
#[derive(Debug)]
pub struct Collected {
    pub events: Vec<StakeEvent>,
    pub query: QueryInfo,
    pub validator_names: HashMap<u64, String>,
    pub stats: FetchStats,
}

/// Orchestrates one command:
/// 1. Window resolution (time → blocks)
/// 2. Log fetching with adaptive batching, or the staking API
/// 3. Timestamping and decoding
/// 4. Aggregation, ranking and classification
pub struct StakePipeline {
    config: Config,
    contract: Address,
    shapes: Vec<EventShape>,
    rpc: RpcSource,
    explorer: ExplorerClient,
    staking: StakingApiClient,
    classifier: Classifier,
}

impl StakePipeline {
    /// Build every client and the label store. Nothing here touches the network.
    pub fn init(config: Config) -> eyre::Result<Self> {
        let timeout = Duration::from_secs(config.rpc.timeout_secs);

        let contract = Address::from_str(&config.logs.contract).map_err(|e| {
            eyre::eyre!("Invalid staking contract address '{}': {}", config.logs.contract, e)
        })?;

        let rpc = RpcSource::from_config(&config.rpc)?;
        let explorer = ExplorerClient::from_config(&config.explorer, timeout)?;
        let staking = StakingApiClient::from_config(&config.staking_api, timeout)?;

        let store = LabelStore::from_config(&config.classification)?;
        let service = LabelServiceClient::from_config(&config.classification, timeout);
        let classifier =
            Classifier::new(store, config.classification.default_category).with_service(service);

        tracing::info!(
            contract = %config.logs.contract,
            rpc_endpoints = config.rpc.endpoints.len(),
            explorer_key = explorer.has_api_key(),
            default_category = classifier.default_category().as_str(),
            "Pipeline initialized"
        );

        Ok(Self {
            config,
            contract,
            shapes: staking_shapes(),
            rpc,
            explorer,
            staking,
            classifier,
        })
    }

    /// Fetch and decode the events for a request, in chronological order.
    pub async fn collect(&self, request: &RunRequest, kind: SnapshotKind) -> eyre::Result<Collected> {
        match request.source {
            EventSource::Rpc => self.collect_logs(&self.rpc, request, kind).await,
            EventSource::Explorer => {
                if !self.explorer.has_api_key() {
                    self.explorer.warn_missing_key();
                    return Ok(self.empty(request, kind));
                }
                self.collect_logs(&self.explorer, request, kind).await
            }
            EventSource::StakingApi => self.collect_staking_api(request, kind).await,
        }
    }

    async fn collect_logs(
        &self,
        source: &dyn ChainSource,
        request: &RunRequest,
        kind: SnapshotKind,
    ) -> eyre::Result<Collected> {
        let mut clock =
            BlockClock::new(source, self.block_lookup(), self.config.rpc.block_time_secs);

        let (from_block, to_block, from_time, to_time) = match request.window {
            Window::Blocks { from, to } => {
                if from > to {
                    return Err(eyre::eyre!(
                        "Start block {} is after end block {}",
                        from,
                        to
                    ));
                }
                (from, to, None, None)
            }
            Window::Recent(span) => {
                let (start, end) = recent(span)?;
                let (from, to) = clock.resolve_window(start, end).await?;
                (from, to, Some(start), Some(end))
            }
        };

        let mut query = LogQuery::new(self.contract, topics_for(&self.shapes, request.kind));
        if let Some(id) = request.validator {
            query = query.with_topic1(validator_topic(id));
        }

        let fetcher = LogFetcher::new(
            source,
            self.config.logs.batch_size,
            self.config.logs.min_batch_size,
        );
        let (mut logs, stats) = fetcher.fetch(&query, from_block, to_block).await?;

        if self.config.logs.resolve_timestamps {
            let lookups = clock.stamp_logs(&mut logs).await?;
            tracing::debug!(blocks = lookups, "Resolved block timestamps");
        }

        let events = chronological(decode_logs(&logs, &self.shapes, request.source));
        let validator_names = if events.is_empty() {
            HashMap::new()
        } else {
            self.validator_names().await
        };

        Ok(Collected {
            events,
            query: QueryInfo {
                from_block: Some(from_block),
                to_block: Some(to_block),
                from_time,
                to_time,
                ..self.query_info(request, kind)
            },
            validator_names,
            stats,
        })
    }

    /// Unbonds from the staking index. It has no block numbers, so only time windows apply.
    async fn collect_staking_api(
        &self,
        request: &RunRequest,
        kind: SnapshotKind,
    ) -> eyre::Result<Collected> {
        let Window::Recent(span) = request.window else {
            return Err(eyre::eyre!(
                "The staking API is not block-indexed; use --days or --hours with --source staking-api"
            ));
        };
        if request.kind == Some(EventKind::Delegation) || kind == SnapshotKind::NetStake {
            return Err(eyre::eyre!(
                "The staking API only lists unbonds; use --source rpc or explorer for delegations"
            ));
        }
        let (start, end) = recent(span)?;

        let validators = self.staking.validators().await?;
        let selected: Vec<ValidatorInfo> = match request.validator {
            Some(id) => {
                let found: Vec<ValidatorInfo> =
                    validators.iter().filter(|v| v.id == id).cloned().collect();
                if found.is_empty() {
                    vec![ValidatorInfo { id, name: None }]
                } else {
                    found
                }
            }
            None => validators.clone(),
        };

        let events: Vec<StakeEvent> = self
            .staking
            .unbond_events(&selected)
            .await?
            .into_iter()
            .filter(|e| e.timestamp.is_some_and(|t| t >= start && t <= end))
            .collect();

        Ok(Collected {
            events: chronological(events),
            query: QueryInfo {
                from_time: Some(start),
                to_time: Some(end),
                ..self.query_info(request, kind)
            },
            validator_names: validators
                .iter()
                .map(|v| (v.id, v.display_name()))
                .collect(),
            stats: FetchStats::default(),
        })
    }

    /// The explorer's block-by-time lookup, only when it is enabled and has a key.
    fn block_lookup(&self) -> Option<&ExplorerClient> {
        (self.config.explorer.use_for_block_lookup && self.explorer.has_api_key())
            .then_some(&self.explorer)
    }

    /// Best effort: a report without validator names is still a report.
    async fn validator_names(&self) -> HashMap<u64, String> {
        match self.staking.validators().await {
            Ok(validators) => validators
                .iter()
                .map(|v| (v.id, v.display_name()))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Validator names unavailable");
                HashMap::new()
            }
        }
    }

    fn query_info(&self, request: &RunRequest, kind: SnapshotKind) -> QueryInfo {
        QueryInfo {
            kind,
            source: request.source,
            contract: self.config.logs.contract.to_lowercase(),
            from_block: None,
            to_block: None,
            from_time: None,
            to_time: None,
            top: request.top,
            validator: request.validator,
        }
    }

    fn empty(&self, request: &RunRequest, kind: SnapshotKind) -> Collected {
        Collected {
            events: Vec::new(),
            query: self.query_info(request, kind),
            validator_names: HashMap::new(),
            stats: FetchStats::default(),
        }
    }

    /// Every event in the window, oldest first.
    pub async fn events(&self, request: &RunRequest) -> eyre::Result<Snapshot<EventRow>> {
        let collected = self.collect(request, SnapshotKind::Events).await?;
        let rows: Vec<EventRow> = collected
            .events
            .iter()
            .map(|e| EventRow::new(e.clone(), collected.validator_names.get(&e.validator_id).cloned()))
            .collect();
        let summary = Summary::from_events(&collected.events, rows.len());
        Ok(Snapshot::new(collected.query, summary, rows))
    }

    /// Addresses ranked by positive net stake, classified.
    pub async fn net_stake(&mut self, request: &RunRequest) -> eyre::Result<Snapshot<StakeRow>> {
        let collected = self.collect(request, SnapshotKind::NetStake).await?;
        let stakes = stake::retain_positive(stake::aggregate(&collected.events));
        tracing::info!(
            events = collected.events.len(),
            addresses = stakes.len(),
            "Aggregated net stake"
        );

        let top = request.top.unwrap_or(usize::MAX);
        let ranked = stake::rank(stakes, RankBy::NetStake, top);

        let mut rows = Vec::with_capacity(ranked.len());
        for (i, stake) in ranked.into_iter().enumerate() {
            let classification = self.classifier.classify(&stake.address).await;
            rows.push(StakeRow::new(i + 1, stake, classification));
        }

        let summary = Summary::from_events(&collected.events, rows.len());
        Ok(Snapshot::new(collected.query, summary, rows))
    }

    /// Largest single unbondings, classified.
    pub async fn withdrawals(&mut self, request: &RunRequest) -> eyre::Result<Snapshot<WithdrawalRow>> {
        let request = RunRequest {
            kind: Some(EventKind::Unbonding),
            ..request.clone()
        };
        let collected = self.collect(&request, SnapshotKind::Withdrawals).await?;

        let top = request.top.unwrap_or(usize::MAX);
        let ranked = largest_withdrawals(&collected.events, top);

        let mut rows = Vec::with_capacity(ranked.len());
        for (i, event) in ranked.into_iter().enumerate() {
            let classification = self.classifier.classify(&event.address).await;
            let name = collected.validator_names.get(&event.validator_id).cloned();
            rows.push(WithdrawalRow::new(i + 1, event, name, classification));
        }

        let summary = Summary::from_events(&collected.events, rows.len());
        Ok(Snapshot::new(collected.query, summary, rows))
    }
}

/// `[now - span, now]`. Spans reaching past the earliest representable date are rejected.
fn recent(span: chrono::Duration) -> eyre::Result<(DateTime<Utc>, DateTime<Utc>)> {
    let end = Utc::now();
    let start = end
        .checked_sub_signed(span)
        .ok_or_else(|| eyre::eyre!("The time window of {} days reaches too far back", span.num_days()))?;
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::label_store::Category;
    use alloy::sol_types::SolEvent;
    use httpmock::prelude::*;

    const DELEGATOR: &str = "0x28c6c06298d514db089934071355e5743bf21d60";
    const OTHER: &str = "0x00000000000000000000000000000000000000ee";

    fn hex32(bytes: &[u8]) -> String {
        format!("0x{}", hex::encode(bytes))
    }

    fn log_row(topic0: &[u8], validator: u64, user: &str, tokens: u64, block: u64) -> serde_json::Value {
        let mut data = [0u8; 32];
        data[24..].copy_from_slice(&tokens.to_be_bytes());
        serde_json::json!({
            "address": "0xa59c847bd5ac0172ff4fe912c5d29e5a71a7512b",
            "topics": [
                hex32(topic0),
                hex32(validator_topic(validator).as_slice()),
                hex32(Address::from_str(user).unwrap().into_word().as_slice()),
                hex32(&data),
            ],
            "data": hex32(&data),
            "blockNumber": format!("0x{:x}", block),
            "timeStamp": "0x65a0b1c0",
            "logIndex": "0x0",
            "transactionHash": format!("0x{:064x}", block)
        })
    }

    fn config(server: &MockServer, api_key: Option<&str>) -> Config {
        let mut config = Config::default();
        config.explorer.base_url = server.url("/api");
        config.explorer.api_key = api_key.map(str::to_string);
        config.explorer.request_interval_ms = 0;
        config.staking_api.base_url = server.url("/staking");
        config.staking_api.request_interval_ms = 0;
        config
    }

    async fn mock_topic(server: &MockServer, topic0: &[u8], rows: Vec<serde_json::Value>) {
        let topic = hex32(topic0);
        server
            .mock_async(|when, then| {
                when.path("/api")
                    .query_param("module", "logs")
                    .query_param("topic0", topic.as_str());
                if rows.is_empty() {
                    then.status(200).json_body(serde_json::json!({
                        "status": "0", "message": "No records found", "result": []
                    }));
                } else {
                    then.status(200).json_body(serde_json::json!({
                        "status": "1", "message": "OK", "result": rows
                    }));
                }
            })
            .await;
    }

    fn request(source: EventSource) -> RunRequest {
        RunRequest {
            window: Window::Blocks { from: 100, to: 200 },
            source,
            validator: None,
            kind: None,
            top: Some(10),
        }
    }

    #[tokio::test]
    async fn test_explorer_without_key_is_empty() {
        let server = MockServer::start_async().await;
        let pipeline = StakePipeline::init(config(&server, None)).unwrap();

        let snapshot = pipeline.events(&request(EventSource::Explorer)).await.unwrap();
        assert!(snapshot.results.is_empty());
        assert_eq!(snapshot.summary.events, 0);
    }

    #[tokio::test]
    async fn test_net_stake_from_explorer_logs() {
        let server = MockServer::start_async().await;
        let minted = crate::indexer::decoder::ShareMinted::SIGNATURE_HASH;
        let burned = crate::indexer::decoder::ShareBurned::SIGNATURE_HASH;
        let burned_id = crate::indexer::decoder::ShareBurnedWithId::SIGNATURE_HASH;

        mock_topic(
            &server,
            minted.as_slice(),
            vec![
                log_row(minted.as_slice(), 7, DELEGATOR, 100, 110),
                log_row(minted.as_slice(), 7, DELEGATOR, 200, 120),
                log_row(minted.as_slice(), 8, DELEGATOR, 50, 130),
                log_row(minted.as_slice(), 8, OTHER, 10, 131),
            ],
        )
        .await;
        mock_topic(
            &server,
            burned.as_slice(),
            vec![
                log_row(burned.as_slice(), 7, DELEGATOR, 80, 140),
                log_row(burned.as_slice(), 8, OTHER, 10, 150),
            ],
        )
        .await;
        mock_topic(&server, burned_id.as_slice(), Vec::new()).await;

        let mut pipeline = StakePipeline::init(config(&server, Some("KEY"))).unwrap();
        let snapshot = pipeline.net_stake(&request(EventSource::Explorer)).await.unwrap();

        assert_eq!(snapshot.summary.events, 6);
        assert_eq!(snapshot.results.len(), 1);
        let row = &snapshot.results[0];
        assert_eq!(row.stake.address, DELEGATOR);
        assert_eq!(row.stake.net().to_string(), "270");
        assert_eq!(row.category, Category::Exchange);
        assert_eq!(snapshot.query.from_block, Some(100));
        assert_eq!(snapshot.query.to_block, Some(200));
    }

    #[tokio::test]
    async fn test_staking_api_rejects_block_windows() {
        let server = MockServer::start_async().await;
        let mut pipeline = StakePipeline::init(config(&server, None)).unwrap();
        assert!(pipeline
            .withdrawals(&request(EventSource::StakingApi))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_inverted_block_window_is_an_error() {
        let server = MockServer::start_async().await;
        let pipeline = StakePipeline::init(config(&server, Some("KEY"))).unwrap();
        let mut req = request(EventSource::Explorer);
        req.window = Window::Blocks { from: 10, to: 5 };
        assert!(pipeline.events(&req).await.is_err());
    }

    #[test]
    fn test_recent_window_bounds() {
        let (start, end) = recent(chrono::Duration::hours(6)).unwrap();
        assert_eq!(end - start, chrono::Duration::hours(6));

        let huge = chrono::Duration::try_days(100_000_000).unwrap();
        assert!(recent(huge).is_err());
    }

    #[tokio::test]
    async fn test_huge_day_window_is_an_error_not_a_panic() {
        let server = MockServer::start_async().await;
        let mut pipeline = StakePipeline::init(config(&server, None)).unwrap();
        let huge = Window::Recent(chrono::Duration::try_days(100_000_000).unwrap());

        let mut req = request(EventSource::StakingApi);
        req.window = huge;
        let err = pipeline.withdrawals(&req).await.unwrap_err();
        assert!(err.to_string().contains("too far back"));

        let mut req = request(EventSource::Rpc);
        req.window = huge;
        assert!(pipeline.events(&req).await.is_err());
    }

    #[tokio::test]
    async fn test_block_lookup_needs_key_and_flag() {
        let server = MockServer::start_async().await;

        let keyless = StakePipeline::init(config(&server, None)).unwrap();
        assert!(keyless.block_lookup().is_none());

        let keyed = StakePipeline::init(config(&server, Some("KEY"))).unwrap();
        assert!(keyed.block_lookup().is_some());

        let mut disabled = config(&server, Some("KEY"));
        disabled.explorer.use_for_block_lookup = false;
        let disabled = StakePipeline::init(disabled).unwrap();
        assert!(disabled.block_lookup().is_none());
    }
}
