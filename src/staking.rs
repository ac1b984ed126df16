//! Staking index API: validator metadata and per-validator unbond lists.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::config::StakingApiConfig;
use crate::indexer::throttle::RateLimiter;
use crate::indexer::types::{EventKind, EventSource, StakeEvent};

#[derive(Debug, Deserialize)]
struct ApiPage<T> {
    success: bool,
    #[serde(default = "Vec::new")]
    result: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
}

impl ValidatorInfo {
    pub fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("Validator #{}", self.id),
        }
    }
}

/// One row of a validator's unbond list, exactly as the API returns it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnbondRecord {
    pub user: String,
    /// Base units as a decimal string.
    pub amount: String,
    #[serde(default)]
    pub nonce: Option<u64>,
    #[serde(default)]
    pub unbond_started_time_stamp: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UnbondDecodeError {
    #[error("user '{0}' is not a 20-byte hex address")]
    BadAddress(String),
    #[error("amount '{0}' is not a non-negative integer")]
    BadAmount(String),
}

/// Decoder for the staking API's unbond rows.
pub fn decode_unbond(
    validator_id: u64,
    record: &UnbondRecord,
) -> Result<StakeEvent, UnbondDecodeError> {
    let user = record.user.trim().to_lowercase();
    let hex_part = user.strip_prefix("0x").unwrap_or(&user);
    if hex_part.len() != 40 || hex::decode(hex_part).is_err() {
        return Err(UnbondDecodeError::BadAddress(record.user.clone()));
    }

    let amount = record.amount.trim();
    if amount.is_empty() || !amount.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UnbondDecodeError::BadAmount(record.amount.clone()));
    }
    let amount =
        BigDecimal::from_str(amount).map_err(|_| UnbondDecodeError::BadAmount(record.amount.clone()))?;

    Ok(StakeEvent {
        kind: EventKind::Unbonding,
        validator_id,
        address: format!("0x{hex_part}"),
        amount,
        block_number: None,
        transaction_hash: None,
        log_index: record.nonce,
        timestamp: record.unbond_started_time_stamp,
        source: EventSource::StakingApi,
    })
}

pub struct StakingApiClient {
    http: reqwest::Client,
    base_url: String,
    page_size: u64,
    max_pages: u64,
    limiter: RateLimiter,
}

impl StakingApiClient {
    pub fn new(
        base_url: &str,
        page_size: u64,
        max_pages: u64,
        timeout: Duration,
        limiter: RateLimiter,
    ) -> eyre::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| eyre::eyre!("Failed to build staking API client: {}", e))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size: page_size.max(1),
            max_pages: max_pages.max(1),
            limiter,
        })
    }

    pub fn from_config(config: &StakingApiConfig, timeout: Duration) -> eyre::Result<Self> {
        Self::new(
            &config.base_url,
            config.page_size,
            config.max_pages,
            timeout,
            RateLimiter::from_millis(config.request_interval_ms),
        )
    }

    async fn get_page<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        offset: u64,
    ) -> eyre::Result<Vec<T>> {
        self.limiter.acquire().await;
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(&[("limit", self.page_size), ("offset", offset)])
            .send()
            .await
            .map_err(|e| eyre::eyre!("Staking API request to {} failed: {}", url, e))?;

        if !response.status().is_success() {
            return Err(eyre::eyre!(
                "Staking API returned HTTP {} for {}",
                response.status(),
                url
            ));
        }

        let page: ApiPage<T> = response
            .json()
            .await
            .map_err(|e| eyre::eyre!("Unexpected staking API response from {}: {}", url, e))?;
        if !page.success {
            return Err(eyre::eyre!("Staking API reported failure for {}", url));
        }
        Ok(page.result)
    }

    /// Walk `limit`/`offset` pages until a short page. Reaching `max_pages` full
    /// pages is an error, since the list may be truncated.
    async fn get_all<T: serde::de::DeserializeOwned>(&self, path: &str) -> eyre::Result<Vec<T>> {
        let mut rows = Vec::new();
        for page in 0..self.max_pages {
            let batch: Vec<T> = self.get_page(path, page * self.page_size).await?;
            let len = batch.len() as u64;
            rows.extend(batch);
            if len < self.page_size {
                return Ok(rows);
            }
        }
        Err(eyre::eyre!(
            "Staking API list {} still had rows after the page cap of {} pages of {}",
            path,
            self.max_pages,
            self.page_size
        ))
    }

    pub async fn validators(&self) -> eyre::Result<Vec<ValidatorInfo>> {
        let validators: Vec<ValidatorInfo> = self.get_all("/validators").await?;
        tracing::info!(count = validators.len(), "Fetched validator list");
        Ok(validators)
    }

    pub async fn unbonds(&self, validator_id: u64) -> eyre::Result<Vec<UnbondRecord>> {
        self.get_all(&format!("/validators/{validator_id}/unbonds")).await
    }

    /// Unbond events for every listed validator. Rows that fail to decode are dropped;
    /// a validator whose list cannot be fetched fails the whole call.
    pub async fn unbond_events(
        &self,
        validators: &[ValidatorInfo],
    ) -> eyre::Result<Vec<StakeEvent>> {
        let mut events = Vec::new();
        let mut dropped = 0usize;

        for (i, validator) in validators.iter().enumerate() {
            let records = self.unbonds(validator.id).await.map_err(|e| {
                eyre::eyre!("Failed to fetch unbonds for validator {}: {}", validator.id, e)
            })?;

            for record in &records {
                match decode_unbond(validator.id, record) {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        dropped += 1;
                        tracing::warn!(validator = validator.id, error = %e, "Skipping unbond row");
                    }
                }
            }

            tracing::debug!(
                validator = validator.id,
                unbonds = records.len(),
                progress = %format!("{}/{}", i + 1, validators.len()),
                "Fetched unbonds"
            );
        }

        tracing::info!(events = events.len(), dropped, "Collected unbonds from staking API");
        Ok(events)
    }
}
