//! Common types for the lock → mint relay
//!
//! Raw source-chain logs, decoded lock events and the durable scan state.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Source-chain types
// ============================================================================

/// A log entry as returned by the source chain's log query.
///
/// `data` is the hex-encoded, non-indexed event payload (with or without a
/// `0x` prefix). The first topic is the event signature hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub contract_address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: u64,
}

/// A decoded `Lock(address,uint256,address,uint256,uint256)` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLockEvent {
    pub source_token: Address,
    pub destination_chain_id: u64,
    pub recipient_address: Address,
    pub amount: U256,
    pub nonce: u64,
    pub block_number: u64,
}

impl ParsedLockEvent {
    /// Amount formatted in whole-token units, assuming 18 decimals
    pub fn display_amount(&self) -> String {
        alloy::primitives::utils::format_units(self.amount, 18u8)
            .unwrap_or_else(|_| self.amount.to_string())
    }
}

impl fmt::Display for ParsedLockEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lock(nonce={}, block={}, recipient={}, amount={})",
            self.nonce, self.block_number, self.recipient_address, self.amount
        )
    }
}

// ============================================================================
// Durable state
// ============================================================================

/// The relay's only durable record: the last fully processed source block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanState {
    pub last_processed_block: u64,
}

impl ScanState {
    pub fn new(last_processed_block: u64) -> Self {
        Self {
            last_processed_block,
        }
    }
}

/// Inclusive block range `[from, to]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    /// Number of blocks covered by the range
    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            (self.to - self.from).saturating_add(1)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to < self.from
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}
