//! Source chain readers

use alloy::primitives::Address;
use async_trait::async_trait;
use eyre::Result;

pub mod evm;
pub mod simulated;

pub use evm::EvmChainReader;
pub use simulated::SimulatedChainReader;

use crate::types::RawLog;

/// Read access to the source chain
///
/// Implementations must tolerate being called repeatedly; failures are
/// reported as errors and retried by the caller on its next poll.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current chain head
    async fn latest_block_number(&self) -> Result<u64>;

    /// Logs emitted by `contract` in the inclusive range `[from_block, to_block]`
    async fn get_logs(&self, from_block: u64, to_block: u64, contract: Address)
        -> Result<Vec<RawLog>>;
}
