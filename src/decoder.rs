//! Lock event decoding
//!
//! The bridge contract emits `Lock(address,uint256,address,uint256,uint256)`
//! with every argument non-indexed, so the whole payload lives in `data` as
//! five ABI words:
//!
//! | word | field                  | encoding                           |
//! |------|------------------------|------------------------------------|
//! | 0    | `source_token`         | address, right-aligned in 32 bytes |
//! | 1    | `destination_chain_id` | uint256, big-endian                |
//! | 2    | `recipient_address`    | address, right-aligned in 32 bytes |
//! | 3    | `amount`               | uint256, big-endian                |
//! | 4    | `nonce`                | uint256, big-endian                |

use alloy::primitives::{keccak256, Address, B256, U256};
use thiserror::Error;

use crate::types::{ParsedLockEvent, RawLog};

/// Width of one ABI word in bytes
pub const WORD_BYTES: usize = 32;
/// Number of words in a Lock payload
pub const LOCK_WORDS: usize = 5;
/// Expected payload length in hex characters (without prefix)
pub const LOCK_DATA_HEX_LEN: usize = LOCK_WORDS * WORD_BYTES * 2;

/// Canonical event signature of the bridge's lock event
pub const LOCK_EVENT_SIGNATURE: &str = "Lock(address,uint256,address,uint256,uint256)";

/// Errors produced while decoding a lock log.
///
/// Every variant carries the block number and the raw data so the dropped
/// event can be diagnosed from the log line alone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid data length at block {block_number}: expected {expected} hex chars, got {actual} (data: {data})")]
    InvalidLength {
        block_number: u64,
        expected: usize,
        actual: usize,
        data: String,
    },

    #[error("non-hex data at block {block_number}: {reason} (data: {data})")]
    InvalidHex {
        block_number: u64,
        reason: String,
        data: String,
    },

    #[error("field {field} overflows u64 at block {block_number} (data: {data})")]
    Overflow {
        block_number: u64,
        field: &'static str,
        data: String,
    },
}

impl DecodeError {
    pub fn block_number(&self) -> u64 {
        match self {
            DecodeError::InvalidLength { block_number, .. }
            | DecodeError::InvalidHex { block_number, .. }
            | DecodeError::Overflow { block_number, .. } => *block_number,
        }
    }
}

/// Compute the lock event signature hash (topic 0)
pub fn lock_event_topic() -> B256 {
    keccak256(LOCK_EVENT_SIGNATURE.as_bytes())
}

/// Decode a raw log into a lock event.
///
/// Pure and allocation-light; safe to call from any task.
pub fn decode_lock_event(log: &RawLog) -> Result<ParsedLockEvent, DecodeError> {
    let hex_data = strip_hex_prefix(&log.data);

    if hex_data.len() != LOCK_DATA_HEX_LEN {
        return Err(DecodeError::InvalidLength {
            block_number: log.block_number,
            expected: LOCK_DATA_HEX_LEN,
            actual: hex_data.len(),
            data: log.data.clone(),
        });
    }

    let bytes = hex::decode(hex_data).map_err(|e| DecodeError::InvalidHex {
        block_number: log.block_number,
        reason: e.to_string(),
        data: log.data.clone(),
    })?;

    let word = |i: usize| &bytes[i * WORD_BYTES..(i + 1) * WORD_BYTES];
    let narrow = |i: usize, field: &'static str| -> Result<u64, DecodeError> {
        u64::try_from(U256::from_be_slice(word(i))).map_err(|_| DecodeError::Overflow {
            block_number: log.block_number,
            field,
            data: log.data.clone(),
        })
    };

    Ok(ParsedLockEvent {
        source_token: Address::from_slice(&word(0)[12..]),
        destination_chain_id: narrow(1, "destination_chain_id")?,
        recipient_address: Address::from_slice(&word(2)[12..]),
        amount: U256::from_be_slice(word(3)),
        nonce: narrow(4, "nonce")?,
        block_number: log.block_number,
    })
}

/// Encode a lock event into its `data` payload (`0x`-prefixed)
pub fn encode_lock_data(event: &ParsedLockEvent) -> String {
    let mut bytes = Vec::with_capacity(LOCK_WORDS * WORD_BYTES);
    bytes.extend_from_slice(event.source_token.into_word().as_slice());
    bytes.extend_from_slice(&U256::from(event.destination_chain_id).to_be_bytes::<32>());
    bytes.extend_from_slice(event.recipient_address.into_word().as_slice());
    bytes.extend_from_slice(&event.amount.to_be_bytes::<32>());
    bytes.extend_from_slice(&U256::from(event.nonce).to_be_bytes::<32>());
    format!("0x{}", hex::encode(bytes))
}

fn strip_hex_prefix(data: &str) -> &str {
    data.strip_prefix("0x")
        .or_else(|| data.strip_prefix("0X"))
        .unwrap_or(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample_event() -> ParsedLockEvent {
        ParsedLockEvent {
            source_token: Address::from_str("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2").unwrap(),
            destination_chain_id: 80001,
            recipient_address: Address::from_str("0x70997970C51812dc3A010C7d01b50e0d17dc79C8")
                .unwrap(),
            amount: U256::from(1000u64) * U256::from(10u64).pow(U256::from(18u64)),
            nonce: 123_456_789,
            block_number: 42,
        }
    }

    fn raw(data: String, block_number: u64) -> RawLog {
        RawLog {
            contract_address: "0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B".to_string(),
            topics: vec![format!("{:?}", lock_event_topic())],
            data,
            block_number,
        }
    }

    #[test]
    fn test_round_trip() {
        let event = sample_event();
        let data = encode_lock_data(&event);
        assert_eq!(data.len(), 2 + LOCK_DATA_HEX_LEN);

        let decoded = decode_lock_event(&raw(data, 42)).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_accepts_unprefixed_and_uppercase_prefix() {
        let event = sample_event();
        let data = encode_lock_data(&event);
        let bare = data.trim_start_matches("0x").to_string();

        assert_eq!(decode_lock_event(&raw(bare.clone(), 42)).unwrap(), event);
        assert_eq!(decode_lock_event(&raw(format!("0X{}", bare), 42)).unwrap(), event);
    }

    #[test]
    fn test_field_layout() {
        let data = encode_lock_data(&sample_event());
        let hex_data = &data[2..];
        // Address words are left-padded with 12 zero bytes
        assert_eq!(&hex_data[..24], "000000000000000000000000");
        assert_eq!(
            &hex_data[24..64],
            "c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"
        );
        // destination_chain_id = 80001 = 0x13881
        assert!(hex_data[64..128].ends_with("13881"));
    }

    #[test]
    fn test_rejects_wrong_length() {
        let data = encode_lock_data(&sample_event());

        for bad in [
            String::new(),
            "0x".to_string(),
            data[..data.len() - 2].to_string(),
            format!("{}00", data),
            format!("0x{}", "00".repeat(96)),
        ] {
            let err = decode_lock_event(&raw(bad.clone(), 7)).unwrap_err();
            assert!(
                matches!(err, DecodeError::InvalidLength { block_number: 7, .. }),
                "expected length error for {:?}, got {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn test_rejects_non_hex() {
        let data = format!("0x{}", "zz".repeat(160));
        let err = decode_lock_event(&raw(data.clone(), 9)).unwrap_err();
        match err {
            DecodeError::InvalidHex {
                block_number,
                data: d,
                ..
            } => {
                assert_eq!(block_number, 9);
                assert_eq!(d, data);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_nonce_overflow() {
        let data = encode_lock_data(&sample_event());
        // Set a high-order byte of the nonce word
        let mut hex_data = data[2..].to_string();
        hex_data.replace_range(256..258, "01");
        let err = decode_lock_event(&raw(hex_data, 11)).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Overflow {
                block_number: 11,
                field: "nonce",
                data: err_data(&err),
            }
        );
        assert_eq!(err.block_number(), 11);
    }

    #[test]
    fn test_rejects_chain_id_overflow() {
        let data = encode_lock_data(&sample_event());
        let mut hex_data = data[2..].to_string();
        hex_data.replace_range(64..66, "ff");
        let err = decode_lock_event(&raw(hex_data, 3)).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Overflow {
                field: "destination_chain_id",
                ..
            }
        ));
    }

    #[test]
    fn test_max_amount_decodes() {
        let mut event = sample_event();
        event.amount = U256::MAX;
        let decoded = decode_lock_event(&raw(encode_lock_data(&event), 42)).unwrap();
        assert_eq!(decoded.amount, U256::MAX);
    }

    #[test]
    fn test_lock_event_topic_is_keccak_of_signature() {
        assert_eq!(
            lock_event_topic(),
            keccak256(b"Lock(address,uint256,address,uint256,uint256)")
        );
    }

    fn err_data(err: &DecodeError) -> String {
        match err {
            DecodeError::InvalidLength { data, .. }
            | DecodeError::InvalidHex { data, .. }
            | DecodeError::Overflow { data, .. } => data.clone(),
        }
    }
}
