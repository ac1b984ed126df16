use std::cmp::Ordering;

use crate::indexer::types::{EventKind, StakeEvent};

/// Unbonding events ordered by amount descending, then address, then block, truncated to `top`.
/// Each row is one withdrawal, so an address can appear more than once.
pub fn largest_withdrawals(events: &[StakeEvent], top: usize) -> Vec<StakeEvent> {
    let mut withdrawals: Vec<StakeEvent> = events
        .iter()
        .filter(|e| e.kind == EventKind::Unbonding)
        .cloned()
        .collect();

    withdrawals.sort_by(|a, b| match b.amount.cmp(&a.amount) {
        Ordering::Equal => a
            .address
            .cmp(&b.address)
            .then_with(|| a.block_number.cmp(&b.block_number)),
        other => other,
    });
    withdrawals.truncate(top);
    withdrawals
}

/// Events in chronological order: timestamp when known, then block, then log index.
pub fn chronological(mut events: Vec<StakeEvent>) -> Vec<StakeEvent> {
    events.sort_by_key(|e| e.chrono_key());
    events
}
