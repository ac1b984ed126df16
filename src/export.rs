use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::aggregate::stake::AddressStake;
use crate::entity::classifier::{AddressClassification, ClassificationSource};
use crate::entity::label_store::Category;
use crate::indexer::types::{EventKind, EventSource, StakeEvent};
use crate::units::{format_units, TOKEN_DECIMALS};

/// Which command produced a snapshot. Decides how `results` rows are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotKind {
    Events,
    NetStake,
    Withdrawals,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Events => "events",
            Self::NetStake => "net-stake",
            Self::Withdrawals => "withdrawals",
        }
    }

    /// Field of each result row holding the human-readable amount.
    pub fn amount_field(&self) -> &'static str {
        match self {
            Self::NetStake => "netStake",
            Self::Events | Self::Withdrawals => "amount",
        }
    }
}

/// The parameters a run was invoked with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryInfo {
    pub kind: SnapshotKind,
    pub source: EventSource,
    pub contract: String,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub from_time: Option<DateTime<Utc>>,
    pub to_time: Option<DateTime<Utc>>,
    pub top: Option<usize>,
    pub validator: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub events: usize,
    pub delegations: usize,
    pub unbondings: usize,
    pub addresses: usize,
    pub results: usize,
    pub total_delegated: String,
    pub total_unbonded: String,
}

impl Summary {
    pub fn from_events(events: &[StakeEvent], results: usize) -> Self {
        let mut delegated = BigDecimal::zero();
        let mut unbonded = BigDecimal::zero();
        let mut delegations = 0;
        let mut addresses = std::collections::HashSet::new();

        for event in events {
            addresses.insert(event.address.as_str());
            match event.kind {
                EventKind::Delegation => {
                    delegations += 1;
                    delegated += &event.amount;
                }
                EventKind::Unbonding => unbonded += &event.amount,
            }
        }

        Self {
            events: events.len(),
            delegations,
            unbondings: events.len() - delegations,
            addresses: addresses.len(),
            results,
            total_delegated: format_units(&delegated, TOKEN_DECIMALS),
            total_unbonded: format_units(&unbonded, TOKEN_DECIMALS),
        }
    }
}

/// A complete, standalone export: when it was made, what was asked, and the answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot<T> {
    pub generated_at: DateTime<Utc>,
    pub query: QueryInfo,
    pub summary: Summary,
    pub results: Vec<T>,
}

impl<T> Snapshot<T> {
    pub fn new(query: QueryInfo, summary: Summary, results: Vec<T>) -> Self {
        Self {
            generated_at: Utc::now(),
            query,
            summary,
            results,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRow {
    #[serde(flatten)]
    pub event: StakeEvent,
    pub amount: String,
    pub validator_name: Option<String>,
}

impl EventRow {
    pub fn new(event: StakeEvent, validator_name: Option<String>) -> Self {
        Self {
            amount: format_units(&event.amount, TOKEN_DECIMALS),
            event,
            validator_name,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeRow {
    pub rank: usize,
    #[serde(flatten)]
    pub stake: AddressStake,
    pub net_stake: String,
    pub category: Category,
    pub label: Option<String>,
    pub classification_source: ClassificationSource,
}

impl StakeRow {
    pub fn new(rank: usize, stake: AddressStake, classification: AddressClassification) -> Self {
        Self {
            rank,
            net_stake: format_units(stake.net(), TOKEN_DECIMALS),
            stake,
            category: classification.category,
            label: classification.label,
            classification_source: classification.source,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRow {
    pub rank: usize,
    #[serde(flatten)]
    pub event: StakeEvent,
    pub amount: String,
    pub validator_name: Option<String>,
    pub category: Category,
    pub label: Option<String>,
}

impl WithdrawalRow {
    pub fn new(
        rank: usize,
        event: StakeEvent,
        validator_name: Option<String>,
        classification: AddressClassification,
    ) -> Self {
        Self {
            rank,
            amount: format_units(&event.amount, TOKEN_DECIMALS),
            event,
            validator_name,
            category: classification.category,
            label: classification.label,
        }
    }
}

/// Write a snapshot as pretty JSON, creating parent directories as needed.
pub fn write_snapshot<T: Serialize>(path: &Path, snapshot: &Snapshot<T>) -> eyre::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            eyre::eyre!("Failed to create export directory '{}': {}", parent.display(), e)
        })?;
    }

    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|e| eyre::eyre!("Failed to serialize snapshot: {}", e))?;
    std::fs::write(path, json)
        .map_err(|e| eyre::eyre!("Failed to write export '{}': {}", path.display(), e))?;

    tracing::info!(
        path = %path.display(),
        kind = snapshot.query.kind.as_str(),
        results = snapshot.results.len(),
        "Snapshot written"
    );
    Ok(())
}

/// Read any snapshot back with untyped result rows.
pub fn read_snapshot(path: &Path) -> eyre::Result<Snapshot<serde_json::Value>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("Failed to read export '{}': {}", path.display(), e))?;
    serde_json::from_str(&content)
        .map_err(|e| eyre::eyre!("Failed to parse export '{}': {}", path.display(), e))
}
