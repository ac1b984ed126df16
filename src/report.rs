use bigdecimal::{BigDecimal, Zero};
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::export::{EventRow, QueryInfo, Snapshot, SnapshotKind, StakeRow, Summary, WithdrawalRow};
use crate::units::{format_units, TOKEN_DECIMALS};

// Console renderers. Each returns the text so callers decide where it goes; every
// summary states its counts, including zero.

pub fn render_header(query: &QueryInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {} ({}) ==", query.kind.as_str(), query.source.as_str());
    let _ = writeln!(out, "contract: {}", query.contract);
    match (query.from_block, query.to_block) {
        (Some(from), Some(to)) => {
            let _ = writeln!(out, "blocks:   {from} .. {to}");
        }
        _ => {
            let _ = writeln!(out, "blocks:   (not block-scoped)");
        }
    }
    if let (Some(from), Some(to)) = (query.from_time, query.to_time) {
        let _ = writeln!(out, "window:   {} .. {}", from.to_rfc3339(), to.to_rfc3339());
    }
    if let Some(validator) = query.validator {
        let _ = writeln!(out, "validator: {validator}");
    }
    out
}

pub fn render_summary(summary: &Summary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} events found ({} delegations, {} unbondings) across {} addresses",
        summary.events, summary.delegations, summary.unbondings, summary.addresses
    );
    let _ = writeln!(
        out,
        "total delegated: {}  total unbonded: {}",
        summary.total_delegated, summary.total_unbonded
    );
    let _ = writeln!(out, "{} result rows", summary.results);
    out
}

pub fn render_events(rows: &[EventRow]) -> String {
    let mut out = String::new();
    if rows.is_empty() {
        let _ = writeln!(out, "0 events found");
        return out;
    }
    for row in rows {
        let e = &row.event;
        let when = e
            .timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:>10}  {}  {:<10}  {:>5} {:<24}  {}  {}",
            e.block_number.map(|b| b.to_string()).unwrap_or_else(|| "-".to_string()),
            when,
            e.kind.as_str(),
            e.validator_id,
            row.validator_name.as_deref().unwrap_or(""),
            e.address,
            row.amount
        );
    }
    out
}

pub fn render_net_stake(rows: &[StakeRow]) -> String {
    let mut out = String::new();
    if rows.is_empty() {
        let _ = writeln!(out, "0 addresses with positive net stake");
        return out;
    }
    for row in rows {
        let _ = writeln!(
            out,
            "{:>4}. {}  {:>28}  {:<13} {}",
            row.rank,
            row.stake.address,
            row.net_stake,
            row.category.as_str(),
            row.label.as_deref().unwrap_or("")
        );
    }
    out.push_str(&render_category_breakdown(rows));
    out
}

/// Address count and summed net stake per category, over the given rows.
pub fn category_breakdown(rows: &[StakeRow]) -> BTreeMap<&'static str, (usize, BigDecimal)> {
    let mut breakdown: BTreeMap<&'static str, (usize, BigDecimal)> = BTreeMap::new();
    for row in rows {
        let entry = breakdown
            .entry(row.category.as_str())
            .or_insert_with(|| (0, BigDecimal::zero()));
        entry.0 += 1;
        entry.1 += row.stake.net();
    }
    breakdown
}

fn render_category_breakdown(rows: &[StakeRow]) -> String {
    let mut out = String::from("by category:\n");
    for (category, (count, net)) in category_breakdown(rows) {
        let _ = writeln!(
            out,
            "  {:<13} {:>5} addresses  {}",
            category,
            count,
            format_units(&net, TOKEN_DECIMALS)
        );
    }
    out
}

pub fn render_withdrawals(rows: &[WithdrawalRow]) -> String {
    let mut out = String::new();
    if rows.is_empty() {
        let _ = writeln!(out, "0 withdrawals found");
        return out;
    }
    for row in rows {
        let _ = writeln!(
            out,
            "{:>4}. {}  {:>28}  validator {} {}  block {}  {}",
            row.rank,
            row.event.address,
            row.amount,
            row.event.validator_id,
            row.validator_name.as_deref().unwrap_or(""),
            row.event
                .block_number
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".to_string()),
            row.category.as_str()
        );
    }
    out
}

/// Summarise a snapshot read back from disk: header, counts, first `top` rows.
pub fn render_snapshot(snapshot: &Snapshot<serde_json::Value>, top: usize) -> String {
    let mut out = render_header(&snapshot.query);
    let _ = writeln!(out, "generated: {}", snapshot.generated_at.to_rfc3339());
    out.push_str(&render_summary(&snapshot.summary));

    let kind = snapshot.query.kind;
    let amount_field = kind.amount_field();
    for (i, row) in snapshot.results.iter().take(top).enumerate() {
        let rank = row
            .get("rank")
            .and_then(|r| r.as_u64())
            .unwrap_or(i as u64 + 1);
        let address = row.get("address").and_then(|a| a.as_str()).unwrap_or("-");
        let amount = row.get(amount_field).and_then(|a| a.as_str()).unwrap_or("-");
        let extra = match kind {
            SnapshotKind::Events => row.get("kind").and_then(|k| k.as_str()),
            SnapshotKind::NetStake | SnapshotKind::Withdrawals => {
                row.get("category").and_then(|c| c.as_str())
            }
        };
        let _ = writeln!(
            out,
            "{:>4}. {}  {:>28}  {}",
            rank,
            address,
            amount,
            extra.unwrap_or("")
        );
    }
    if snapshot.results.len() > top {
        let _ = writeln!(out, "... {} more rows", snapshot.results.len() - top);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::stake::aggregate;
    use crate::entity::classifier::{AddressClassification, ClassificationSource};
    use crate::entity::label_store::Category;
    use crate::indexer::types::{EventKind, EventSource, StakeEvent};

    fn event(address: &str, amount: &str) -> StakeEvent {
        StakeEvent {
            kind: EventKind::Delegation,
            validator_id: 1,
            address: address.to_string(),
            amount: amount.parse().unwrap(),
            block_number: Some(10),
            transaction_hash: None,
            log_index: None,
            timestamp: None,
            source: EventSource::Rpc,
        }
    }

    fn row(rank: usize, address: &str, amount: &str, category: Category) -> StakeRow {
        let stake = aggregate(&[event(address, amount)]).remove(0);
        StakeRow::new(
            rank,
            stake,
            AddressClassification {
                address: address.to_string(),
                category,
                source: ClassificationSource::Default,
                label: None,
            },
        )
    }

    fn query(kind: SnapshotKind) -> QueryInfo {
        QueryInfo {
            kind,
            source: EventSource::Explorer,
            contract: "0xa59c847bd5ac0172ff4fe912c5d29e5a71a7512b".to_string(),
            from_block: Some(5),
            to_block: Some(9),
            from_time: None,
            to_time: None,
            top: None,
            validator: Some(4),
        }
    }

    #[test]
    fn test_empty_results_say_zero() {
        assert_eq!(render_events(&[]), "0 events found\n");
        assert_eq!(render_withdrawals(&[]), "0 withdrawals found\n");
        assert!(render_net_stake(&[]).starts_with("0 addresses"));
        let summary = render_summary(&Summary::from_events(&[], 0));
        assert!(summary.starts_with("0 events found (0 delegations, 0 unbondings)"));
    }

    #[test]
    fn test_category_breakdown_sums() {
        let rows = vec![
            row(1, "0xaa", "3000000000000000000", Category::Exchange),
            row(2, "0xbb", "2000000000000000000", Category::Individual),
            row(3, "0xcc", "1000000000000000000", Category::Exchange),
        ];
        let breakdown = category_breakdown(&rows);
        assert_eq!(breakdown["exchange"].0, 2);
        assert_eq!(
            breakdown["exchange"].1,
            "4000000000000000000".parse::<BigDecimal>().unwrap()
        );
        assert_eq!(breakdown["individual"].0, 1);

        let text = render_net_stake(&rows);
        assert!(text.contains("0xaa"));
        assert!(text.contains("by category:"));
    }

    #[test]
    fn test_render_snapshot_truncates() {
        let rows: Vec<serde_json::Value> = (1..=3)
            .map(|i| {
                serde_json::json!({
                    "rank": i,
                    "address": format!("0x{i:02}"),
                    "netStake": "1.5",
                    "category": "exchange",
                })
            })
            .collect();
        let snapshot = Snapshot::new(
            query(SnapshotKind::NetStake),
            Summary::from_events(&[], 3),
            rows,
        );
        let text = render_snapshot(&snapshot, 2);

        assert!(text.contains("== net-stake (explorer) =="));
        assert!(text.contains("validator: 4"));
        assert!(text.contains("0x02"));
        assert!(!text.contains("0x03"));
        assert!(text.contains("... 1 more rows"));
    }
}
