//! Confirmation-aware block range polling
//!
//! Blocks within `confirmations` of the head are never scanned, so a reorg no
//! deeper than the confirmation depth cannot invalidate emitted events.

use alloy::primitives::Address;
use eyre::{Result, WrapErr};
use std::sync::Arc;

use crate::chain::ChainReader;
use crate::types::{BlockRange, RawLog};

/// Result of [`next_range`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextRange {
    /// Scan this inclusive range
    Scan(BlockRange),
    /// Not enough confirmed blocks since the last scan
    NoWorkYet,
}

/// Compute the next range to scan.
///
/// `to = chain_head - confirmations`, `from = cursor + 1`. A head shallower
/// than the confirmation depth, or `from > to`, means there is nothing safe
/// to scan yet.
pub fn next_range(cursor: u64, chain_head: u64, confirmations: u64) -> NextRange {
    let Some(to) = chain_head.checked_sub(confirmations) else {
        return NextRange::NoWorkYet;
    };
    let Some(from) = cursor.checked_add(1) else {
        return NextRange::NoWorkYet;
    };

    if from > to {
        NextRange::NoWorkYet
    } else {
        NextRange::Scan(BlockRange { from, to })
    }
}

/// Outcome of one [`Poller::poll`]
#[derive(Debug, Clone)]
pub enum PollOutcome {
    NoWorkYet {
        chain_head: u64,
    },
    Fetched {
        range: BlockRange,
        chain_head: u64,
        logs: Vec<RawLog>,
    },
}

/// Fetches confirmed logs for the bridge contract
pub struct Poller {
    reader: Arc<dyn ChainReader>,
    bridge_address: Address,
    confirmations: u64,
}

impl Poller {
    pub fn new(reader: Arc<dyn ChainReader>, bridge_address: Address, confirmations: u64) -> Self {
        Self {
            reader,
            bridge_address,
            confirmations,
        }
    }

    pub fn confirmations(&self) -> u64 {
        self.confirmations
    }

    /// Query the head and, if a confirmed range is available past `cursor`,
    /// fetch its logs. Does not touch the cursor.
    pub async fn poll(&self, cursor: u64) -> Result<PollOutcome> {
        let chain_head = self
            .reader
            .latest_block_number()
            .await
            .wrap_err("Failed to fetch chain head")?;

        let range = match next_range(cursor, chain_head, self.confirmations) {
            NextRange::NoWorkYet => return Ok(PollOutcome::NoWorkYet { chain_head }),
            NextRange::Scan(range) => range,
        };

        tracing::info!(
            from_block = range.from,
            to_block = range.to,
            chain_head,
            "Scanning blocks"
        );

        let logs = self
            .reader
            .get_logs(range.from, range.to, self.bridge_address)
            .await
            .wrap_err_with(|| format!("Failed to fetch logs for blocks {}", range))?;

        Ok(PollOutcome::Fetched {
            range,
            chain_head,
            logs,
        })
    }
}
