use bigdecimal::{BigDecimal, Zero};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::indexer::types::{serialize_base_units, EventKind, StakeEvent};

/// Delegated / unbonded / net for one scope (an address, or an address on one validator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeTotals {
    #[serde(rename = "totalDelegatedBaseUnits", serialize_with = "serialize_base_units")]
    pub delegated: BigDecimal,
    #[serde(rename = "totalUnbondedBaseUnits", serialize_with = "serialize_base_units")]
    pub unbonded: BigDecimal,
    #[serde(rename = "netStakeBaseUnits", serialize_with = "serialize_base_units")]
    pub net: BigDecimal,
}

impl Default for StakeTotals {
    fn default() -> Self {
        Self {
            delegated: BigDecimal::zero(),
            unbonded: BigDecimal::zero(),
            net: BigDecimal::zero(),
        }
    }
}

impl StakeTotals {
    fn add(&mut self, kind: EventKind, amount: &BigDecimal) {
        match kind {
            EventKind::Delegation => self.delegated += amount,
            EventKind::Unbonding => self.unbonded += amount,
        }
        self.net = &self.delegated - &self.unbonded;
    }

    pub fn is_positive(&self) -> bool {
        self.net > BigDecimal::zero()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressStake {
    pub address: String,
    #[serde(flatten)]
    pub totals: StakeTotals,
    pub per_validator: BTreeMap<u64, StakeTotals>,
}

impl AddressStake {
    pub fn net(&self) -> &BigDecimal {
        &self.totals.net
    }
}

/// Which quantity a ranking orders by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankBy {
    NetStake,
    Delegated,
    Unbonded,
}

impl RankBy {
    fn key<'a>(&self, stake: &'a AddressStake) -> &'a BigDecimal {
        match self {
            Self::NetStake => &stake.totals.net,
            Self::Delegated => &stake.totals.delegated,
            Self::Unbonded => &stake.totals.unbonded,
        }
    }
}

/// Sum delegations and unbondings per address and per (address, validator).
/// Every address in the input appears once; output is sorted by address.
pub fn aggregate(events: &[StakeEvent]) -> Vec<AddressStake> {
    let mut by_address: HashMap<&str, AddressStake> = HashMap::new();

    for event in events {
        let entry = by_address
            .entry(event.address.as_str())
            .or_insert_with(|| AddressStake {
                address: event.address.clone(),
                totals: StakeTotals::default(),
                per_validator: BTreeMap::new(),
            });
        entry.totals.add(event.kind, &event.amount);
        entry
            .per_validator
            .entry(event.validator_id)
            .or_default()
            .add(event.kind, &event.amount);
    }

    let mut stakes: Vec<AddressStake> = by_address.into_values().collect();
    stakes.sort_by(|a, b| a.address.cmp(&b.address));
    stakes
}

/// Drop validator entries with non-positive net stake, then drop addresses whose own
/// net stake is not positive. Address totals are left untouched.
pub fn retain_positive(stakes: Vec<AddressStake>) -> Vec<AddressStake> {
    stakes
        .into_iter()
        .filter_map(|mut stake| {
            stake.per_validator.retain(|_, totals| totals.is_positive());
            (stake.totals.is_positive() && !stake.per_validator.is_empty()).then_some(stake)
        })
        .collect()
}

/// Sort descending by `by`, ties broken by address ascending, truncated to `top`.
pub fn rank(mut stakes: Vec<AddressStake>, by: RankBy, top: usize) -> Vec<AddressStake> {
    stakes.sort_by(|a, b| match by.key(b).cmp(by.key(a)) {
        Ordering::Equal => a.address.cmp(&b.address),
        other => other,
    });
    stakes.truncate(top);
    stakes
}

/// Sum of net stake over a slice, for summaries.
pub fn total_net(stakes: &[AddressStake]) -> BigDecimal {
    stakes
        .iter()
        .fold(BigDecimal::zero(), |acc, s| acc + &s.totals.net)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::types::EventSource;

    const X: &str = "0x000000000000000000000000000000000000000a";
    const Y: &str = "0x000000000000000000000000000000000000000b";
    const Z: &str = "0x000000000000000000000000000000000000000c";
    const W: &str = "0x000000000000000000000000000000000000000d";

    fn event(kind: EventKind, validator_id: u64, address: &str, amount: i64) -> StakeEvent {
        StakeEvent {
            kind,
            validator_id,
            address: address.to_string(),
            amount: BigDecimal::from(amount),
            block_number: Some(1),
            transaction_hash: None,
            log_index: None,
            timestamp: None,
            source: EventSource::Rpc,
        }
    }

    fn delegate(v: u64, a: &str, amount: i64) -> StakeEvent {
        event(EventKind::Delegation, v, a, amount)
    }

    fn unbond(v: u64, a: &str, amount: i64) -> StakeEvent {
        event(EventKind::Unbonding, v, a, amount)
    }

    #[test]
    fn test_three_delegations_one_unbond() {
        let events = vec![
            delegate(1, X, 100),
            delegate(1, X, 200),
            delegate(2, X, 50),
            unbond(1, X, 80),
        ];
        let stakes = aggregate(&events);

        assert_eq!(stakes.len(), 1);
        assert_eq!(stakes[0].totals.net, BigDecimal::from(270));
        assert_eq!(stakes[0].totals.delegated, BigDecimal::from(350));
        assert_eq!(stakes[0].totals.unbonded, BigDecimal::from(80));
        assert_eq!(stakes[0].per_validator[&1].net, BigDecimal::from(220));
        assert_eq!(stakes[0].per_validator[&2].net, BigDecimal::from(50));
    }

    #[test]
    fn test_net_equals_delegated_minus_unbonded_everywhere() {
        let events = vec![
            delegate(1, X, 10),
            unbond(1, Y, 40),
            delegate(3, Z, 7),
            unbond(3, Z, 7),
            delegate(2, Y, 15),
            unbond(4, W, 40),
            unbond(5, W, 2),
        ];
        let stakes = aggregate(&events);
        assert_eq!(stakes.len(), 4);
        for stake in &stakes {
            assert_eq!(
                stake.totals.net,
                &stake.totals.delegated - &stake.totals.unbonded
            );
            for totals in stake.per_validator.values() {
                assert_eq!(totals.net, &totals.delegated - &totals.unbonded);
            }
        }
        let find = |address: &str| stakes.iter().find(|s| s.address == address).unwrap();

        // unbond-only
        let w = find(W);
        assert_eq!(w.totals.delegated, BigDecimal::zero());
        assert_eq!(w.totals.unbonded, BigDecimal::from(42));
        assert_eq!(w.totals.net, BigDecimal::from(-42));
        assert!(w.per_validator.values().all(|t| t.delegated.is_zero()));

        // delegation-only
        let x = find(X);
        assert_eq!(x.totals.unbonded, BigDecimal::zero());
        assert_eq!(x.totals.net, BigDecimal::from(10));

        // unbonded on one validator, delegated on another
        let y = find(Y);
        assert_eq!(y.totals.delegated, BigDecimal::from(15));
        assert_eq!(y.totals.unbonded, BigDecimal::from(40));
        assert_eq!(y.totals.net, BigDecimal::from(-25));
        assert_eq!(y.per_validator[&1].delegated, BigDecimal::zero());
        assert_eq!(y.per_validator[&2].net, BigDecimal::from(15));

        assert!(find(Z).totals.net.is_zero());
    }

    #[test]
    fn test_retain_positive_drops_exited() {
        let events = vec![
            delegate(1, X, 100),
            unbond(2, X, 30),
            delegate(1, Y, 5),
            unbond(1, Y, 5),
            unbond(1, Z, 9),
        ];
        let kept = retain_positive(aggregate(&events));

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].address, X);
        assert_eq!(kept[0].totals.net, BigDecimal::from(70));
        assert_eq!(kept[0].per_validator.keys().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_rank_breaks_ties_by_address() {
        let events = vec![
            delegate(1, Z, 50),
            delegate(1, Y, 50),
            delegate(1, X, 10),
            delegate(1, "0x00000000000000000000000000000000000000ff", 500),
        ];
        let ranked = rank(aggregate(&events), RankBy::NetStake, 3);
        let order: Vec<&str> = ranked.iter().map(|s| s.address.as_str()).collect();
        assert_eq!(
            order,
            vec!["0x00000000000000000000000000000000000000ff", Y, Z]
        );
    }

    #[test]
    fn test_rank_by_unbonded() {
        let events = vec![unbond(1, X, 3), unbond(1, Y, 9), delegate(1, Z, 100)];
        let ranked = rank(aggregate(&events), RankBy::Unbonded, 1);
        assert_eq!(ranked[0].address, Y);
    }

    #[test]
    fn test_large_sums_are_exact() {
        let big = BigDecimal::from(u64::MAX);
        let mut events = Vec::new();
        for _ in 0..1_000 {
            let mut e = delegate(1, X, 0);
            e.amount = big.clone();
            events.push(e);
        }
        let stakes = aggregate(&events);
        assert_eq!(stakes[0].totals.net, big * BigDecimal::from(1_000));
        assert_eq!(total_net(&stakes), stakes[0].totals.net);
    }
}
