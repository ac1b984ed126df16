use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use bigdecimal::BigDecimal;
use chrono::DateTime;
use std::str::FromStr;

use super::types::{EventKind, EventSource, StakeEvent};

// Staking events emitted by the validator staking info contract.
sol! {
    event ShareMinted(uint256 indexed validatorId, address indexed user, uint256 indexed amount, uint256 tokens);
    event ShareBurned(uint256 indexed validatorId, address indexed user, uint256 indexed amount, uint256 tokens);
    event ShareBurnedWithId(uint256 indexed validatorId, address indexed user, uint256 indexed amount, uint256 tokens, uint256 nonce);
}

const WORD: usize = 32;

/// Where the interesting fields of one event live: which topic holds the validator id
/// and the account, which 32-byte data slot holds the amount, how many data words the
/// event must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventShape {
    pub name: &'static str,
    pub topic0: B256,
    pub kind: EventKind,
    pub validator_topic: usize,
    pub address_topic: usize,
    pub amount_slot: usize,
    pub data_words: usize,
}

/// Delegation and unbonding events, amount taken from the `tokens` data word.
pub fn staking_shapes() -> Vec<EventShape> {
    vec![
        EventShape {
            name: "ShareMinted",
            topic0: ShareMinted::SIGNATURE_HASH,
            kind: EventKind::Delegation,
            validator_topic: 1,
            address_topic: 2,
            amount_slot: 0,
            data_words: 1,
        },
        EventShape {
            name: "ShareBurned",
            topic0: ShareBurned::SIGNATURE_HASH,
            kind: EventKind::Unbonding,
            validator_topic: 1,
            address_topic: 2,
            amount_slot: 0,
            data_words: 1,
        },
        EventShape {
            name: "ShareBurnedWithId",
            topic0: ShareBurnedWithId::SIGNATURE_HASH,
            kind: EventKind::Unbonding,
            validator_topic: 1,
            address_topic: 2,
            amount_slot: 0,
            data_words: 2,
        },
    ]
}

pub fn topics_for(shapes: &[EventShape], kind: Option<EventKind>) -> Vec<B256> {
    shapes
        .iter()
        .filter(|s| kind.map_or(true, |k| s.kind == k))
        .map(|s| s.topic0)
        .collect()
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("no topics")]
    NoTopics,
    #[error("unrecognised event signature {0}")]
    UnknownEvent(String),
    #[error("missing topic {0}")]
    MissingTopic(usize),
    #[error("topic {0} has non-zero padding for an address")]
    DirtyAddressPadding(usize),
    #[error("validator id in topic {0} does not fit in 64 bits")]
    ValidatorIdOverflow(usize),
    #[error("data has {actual} bytes, event needs {expected}")]
    ShortData { expected: usize, actual: usize },
    #[error("amount {0} is not a decimal")]
    BadAmount(String),
    #[error("log has no block number")]
    MissingBlockNumber,
}

fn topic(log: &Log, index: usize) -> Result<B256, DecodeError> {
    log.inner
        .data
        .topics()
        .get(index)
        .copied()
        .ok_or(DecodeError::MissingTopic(index))
}

/// The address held in an address-typed topic. `None` when the upper 12 bytes are
/// not zero, since such a word does not re-encode to itself.
pub fn word_to_address(word: B256) -> Option<Address> {
    if word[..12].iter().any(|b| *b != 0) {
        return None;
    }
    Some(Address::from_word(word))
}

/// Lower-case `0x` hex, the form every address takes in events and exports.
pub fn address_hex(address: &Address) -> String {
    format!("0x{}", hex::encode(address))
}

/// Topic word for a `uint256 indexed validatorId` filter.
pub fn validator_topic(validator_id: u64) -> B256 {
    let mut word = [0u8; WORD];
    word[24..].copy_from_slice(&validator_id.to_be_bytes());
    B256::from(word)
}

/// Decode a single log against a set of known shapes.
pub fn decode_log(
    log: &Log,
    shapes: &[EventShape],
    source: EventSource,
) -> Result<StakeEvent, DecodeError> {
    let topic0 = topic(log, 0).map_err(|_| DecodeError::NoTopics)?;
    let shape = shapes
        .iter()
        .find(|s| s.topic0 == topic0)
        .ok_or_else(|| DecodeError::UnknownEvent(format!("0x{}", hex::encode(topic0))))?;

    let validator_word = topic(log, shape.validator_topic)?;
    if validator_word[..24].iter().any(|b| *b != 0) {
        return Err(DecodeError::ValidatorIdOverflow(shape.validator_topic));
    }
    let mut id_bytes = [0u8; 8];
    id_bytes.copy_from_slice(&validator_word[24..]);
    let validator_id = u64::from_be_bytes(id_bytes);

    let address = word_to_address(topic(log, shape.address_topic)?)
        .ok_or(DecodeError::DirtyAddressPadding(shape.address_topic))?;

    let data = log.inner.data.data.as_ref();
    let expected = shape.data_words.max(shape.amount_slot + 1) * WORD;
    if data.len() < expected {
        return Err(DecodeError::ShortData {
            expected,
            actual: data.len(),
        });
    }
    let offset = shape.amount_slot * WORD;
    let value = U256::from_be_slice(&data[offset..offset + WORD]).to_string();
    let amount = BigDecimal::from_str(&value).map_err(|_| DecodeError::BadAmount(value))?;

    let block_number = log.block_number.ok_or(DecodeError::MissingBlockNumber)?;
    let timestamp = log
        .block_timestamp
        .and_then(|ts| i64::try_from(ts).ok())
        .and_then(|ts| DateTime::from_timestamp(ts, 0));

    Ok(StakeEvent {
        kind: shape.kind,
        validator_id,
        address: address_hex(&address),
        amount,
        block_number: Some(block_number),
        transaction_hash: log.transaction_hash.map(|h| format!("0x{}", hex::encode(h))),
        log_index: Some(log.log_index.unwrap_or(0)),
        timestamp,
        source,
    })
}

/// Decode a batch. Logs that fail to decode are logged and dropped; the rest survive.
pub fn decode_logs(logs: &[Log], shapes: &[EventShape], source: EventSource) -> Vec<StakeEvent> {
    let mut events = Vec::with_capacity(logs.len());
    let mut dropped = 0usize;

    for log in logs {
        match decode_log(log, shapes, source) {
            Ok(event) => events.push(event),
            Err(e) => {
                dropped += 1;
                tracing::warn!(
                    tx_hash = ?log.transaction_hash,
                    block = ?log.block_number,
                    error = %e,
                    "Skipping undecodable log"
                );
            }
        }
    }

    if dropped > 0 {
        tracing::info!(decoded = events.len(), dropped, "Decoded staking logs");
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, Bytes, LogData};

    const USER: Address = address!("28c6c06298d514db089934071355e5743bf21d60");
    const CONTRACT: Address = address!("a59c847bd5ac0172ff4fe912c5d29e5a71a7512b");

    fn amount_data(values: &[u128]) -> Bytes {
        let mut out = Vec::new();
        for v in values {
            out.extend_from_slice(&U256::from(*v).to_be_bytes::<32>());
        }
        out.into()
    }

    fn raw_log(topics: Vec<B256>, data: Bytes) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: CONTRACT,
                data: LogData::new_unchecked(topics, data),
            },
            block_number: Some(0x1312d00),
            transaction_hash: Some(B256::repeat_byte(0xab)),
            log_index: Some(3),
            ..Default::default()
        }
    }

    fn log(topic0: B256, validator: u64, user: Address, data: Bytes) -> Log {
        raw_log(
            vec![topic0, validator_topic(validator), user.into_word(), B256::ZERO],
            data,
        )
    }

    #[test]
    fn test_decode_delegation() {
        let raw = log(
            ShareMinted::SIGNATURE_HASH,
            137,
            USER,
            amount_data(&[1_500_000_000_000_000_000]),
        );
        let event = decode_log(&raw, &staking_shapes(), EventSource::Rpc).unwrap();

        assert_eq!(event.kind, EventKind::Delegation);
        assert_eq!(event.validator_id, 137);
        assert_eq!(event.address, "0x28c6c06298d514db089934071355e5743bf21d60");
        assert_eq!(event.amount, BigDecimal::from_str("1500000000000000000").unwrap());
        assert_eq!(event.block_number, Some(20_000_000));
        assert_eq!(event.log_index, Some(3));
        assert_eq!(
            event.transaction_hash,
            Some(format!("0x{}", "ab".repeat(32)))
        );
        assert_eq!(event.timestamp, None);
    }

    #[test]
    fn test_block_timestamp_carried_onto_event() {
        let mut raw = log(ShareMinted::SIGNATURE_HASH, 1, USER, amount_data(&[1]));
        raw.block_timestamp = Some(1_700_000_000);
        let event = decode_log(&raw, &staking_shapes(), EventSource::Explorer).unwrap();
        assert_eq!(event.timestamp, DateTime::from_timestamp(1_700_000_000, 0));
        assert_eq!(event.source, EventSource::Explorer);
    }

    #[test]
    fn test_decode_unbonding_with_id_needs_two_words() {
        let shapes = staking_shapes();
        let ok = log(ShareBurnedWithId::SIGNATURE_HASH, 7, USER, amount_data(&[80, 12]));
        let event = decode_log(&ok, &shapes, EventSource::Rpc).unwrap();
        assert_eq!(event.kind, EventKind::Unbonding);
        assert_eq!(event.amount, BigDecimal::from(80));

        let short = log(ShareBurnedWithId::SIGNATURE_HASH, 7, USER, amount_data(&[80]));
        assert_eq!(
            decode_log(&short, &shapes, EventSource::Rpc),
            Err(DecodeError::ShortData {
                expected: 64,
                actual: 32
            })
        );
    }

    #[test]
    fn test_short_data_is_dropped_not_raised() {
        let shapes = staking_shapes();
        let mut bad = log(
            ShareBurned::SIGNATURE_HASH,
            1,
            USER,
            Bytes::from(vec![0x00, 0x00, 0xff]),
        );
        bad.transaction_hash = Some(B256::repeat_byte(0xba));
        let good = log(ShareBurned::SIGNATURE_HASH, 1, USER, amount_data(&[5]));

        let events = decode_logs(&[bad, good], &shapes, EventSource::Rpc);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].amount, BigDecimal::from(5));
    }

    #[test]
    fn test_unknown_events_and_missing_fields() {
        let shapes = staking_shapes();
        let unknown = log(B256::repeat_byte(0xee), 1, USER, amount_data(&[1]));
        assert!(matches!(
            decode_log(&unknown, &shapes, EventSource::Rpc),
            Err(DecodeError::UnknownEvent(_))
        ));

        let no_topics = raw_log(vec![], amount_data(&[1]));
        assert_eq!(
            decode_log(&no_topics, &shapes, EventSource::Rpc),
            Err(DecodeError::NoTopics)
        );

        let one_topic = raw_log(vec![ShareMinted::SIGNATURE_HASH], amount_data(&[1]));
        assert_eq!(
            decode_log(&one_topic, &shapes, EventSource::Rpc),
            Err(DecodeError::MissingTopic(1))
        );

        let mut pending = log(ShareMinted::SIGNATURE_HASH, 1, USER, amount_data(&[1]));
        pending.block_number = None;
        assert_eq!(
            decode_log(&pending, &shapes, EventSource::Rpc),
            Err(DecodeError::MissingBlockNumber)
        );
    }

    #[test]
    fn test_address_word_round_trip() {
        for addr in [
            USER,
            Address::ZERO,
            Address::repeat_byte(0xff),
            address!("0000000000000000000000000000000000000001"),
        ] {
            let word = addr.into_word();
            let decoded = word_to_address(word).unwrap();
            assert_eq!(decoded, addr);
            assert_eq!(decoded.into_word(), word);
        }

        let mut dirty = USER.into_word();
        dirty.0[0] = 1;
        assert_eq!(word_to_address(dirty), None);

        let raw = raw_log(
            vec![ShareMinted::SIGNATURE_HASH, validator_topic(1), dirty],
            amount_data(&[1]),
        );
        assert_eq!(
            decode_log(&raw, &staking_shapes(), EventSource::Rpc),
            Err(DecodeError::DirtyAddressPadding(2))
        );
    }

    #[test]
    fn test_validator_id_overflow() {
        let raw = raw_log(
            vec![ShareMinted::SIGNATURE_HASH, B256::repeat_byte(0xff), USER.into_word()],
            amount_data(&[1]),
        );
        assert_eq!(
            decode_log(&raw, &staking_shapes(), EventSource::Rpc),
            Err(DecodeError::ValidatorIdOverflow(1))
        );
    }

    #[test]
    fn test_amount_beyond_u128() {
        let raw = log(
            ShareMinted::SIGNATURE_HASH,
            1,
            USER,
            Bytes::from(vec![0xff; 32]),
        );
        let event = decode_log(&raw, &staking_shapes(), EventSource::Rpc).unwrap();
        assert_eq!(event.amount, BigDecimal::from_str(&U256::MAX.to_string()).unwrap());
    }
}
