use alloy::primitives::{Address, B256};
use alloy::rpc::types::Filter;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::units;

/// Which contract and which events to pull. `topic0` entries are OR'd; `topic1`
/// narrows to one validator when set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub address: Address,
    pub topic0: Vec<B256>,
    pub topic1: Option<B256>,
}

impl LogQuery {
    pub fn new(address: Address, topic0: Vec<B256>) -> Self {
        Self {
            address,
            topic0,
            topic1: None,
        }
    }

    /// Restrict topic1 (the validator id on staking events).
    pub fn with_topic1(mut self, topic: B256) -> Self {
        self.topic1 = Some(topic);
        self
    }

    /// Typed `eth_getLogs` filter for an inclusive block range.
    pub fn to_filter(&self, from_block: u64, to_block: u64) -> Filter {
        let filter = Filter::new()
            .address(self.address)
            .event_signature(self.topic0.clone())
            .from_block(from_block)
            .to_block(to_block);
        match self.topic1 {
            Some(topic) => filter.topic1(topic),
            None => filter,
        }
    }
}

/// Chain head snapshot used for block-time extrapolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHead {
    pub number: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Delegation,
    Unbonding,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delegation => "delegation",
            Self::Unbonding => "unbonding",
        }
    }
}

/// Where a batch of raw records came from. Each source has its own decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EventSource {
    Rpc,
    Explorer,
    StakingApi,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rpc => "rpc",
            Self::Explorer => "explorer",
            Self::StakingApi => "staking-api",
        }
    }
}

/// A single decoded delegation or unbonding. Built once by a decoder, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeEvent {
    pub kind: EventKind,
    pub validator_id: u64,
    /// Lower-case `0x` hex.
    pub address: String,
    #[serde(rename = "amountBaseUnits", serialize_with = "serialize_base_units")]
    pub amount: BigDecimal,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<String>,
    pub log_index: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub source: EventSource,
}

impl StakeEvent {
    /// Ordering key for chronological listings.
    pub fn chrono_key(&self) -> (Option<DateTime<Utc>>, u64, u64) {
        (
            self.timestamp,
            self.block_number.unwrap_or(0),
            self.log_index.unwrap_or(0),
        )
    }
}

pub fn serialize_base_units<S: Serializer>(
    amount: &BigDecimal,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&units::base_units_string(amount))
}
