//! Destination-chain mint clients

use alloy::primitives::B256;
use async_trait::async_trait;
use eyre::{eyre, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;

use crate::types::ParsedLockEvent;

/// Destination-chain mint transport.
///
/// A production client signs the mint, estimates fees, manages the
/// destination account nonce and polls for the receipt.
#[async_trait]
pub trait MintClient: Send + Sync {
    /// Sign and broadcast the mint, returning its transaction hash
    async fn submit_mint(&self, event: &ParsedLockEvent) -> Result<B256>;

    /// Wait until the mint transaction is confirmed
    async fn wait_for_confirmation(&self, tx_hash: B256, event: &ParsedLockEvent) -> Result<()>;
}

/// Stand-in mint client that models submit and confirmation latency
pub struct SimulatedMintClient {
    chain_name: String,
    submit_delay: Duration,
    confirm_delay: Duration,
    failure_rate: f64,
    rng: Mutex<StdRng>,
}

impl SimulatedMintClient {
    pub fn new(
        chain_name: &str,
        submit_delay: Duration,
        confirm_delay: Duration,
        failure_rate: f64,
    ) -> Self {
        tracing::info!(
            chain = chain_name,
            submit_delay_ms = submit_delay.as_millis() as u64,
            confirm_delay_ms = confirm_delay.as_millis() as u64,
            failure_rate,
            "Simulated mint client is ready"
        );

        Self {
            chain_name: chain_name.to_string(),
            submit_delay,
            confirm_delay,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut rng)
    }
}

#[async_trait]
impl MintClient for SimulatedMintClient {
    async fn submit_mint(&self, event: &ParsedLockEvent) -> Result<B256> {
        tokio::time::sleep(self.submit_delay).await;

        let (fail, bytes) = self.with_rng(|rng| {
            let mut bytes = [0u8; 32];
            rng.fill(&mut bytes);
            (rng.gen_bool(self.failure_rate), bytes)
        });

        if fail {
            return Err(eyre!(
                "[{}] simulated RPC timeout submitting mint for nonce {}",
                self.chain_name,
                event.nonce
            ));
        }
        Ok(B256::from(bytes))
    }

    async fn wait_for_confirmation(&self, _tx_hash: B256, _event: &ParsedLockEvent) -> Result<()> {
        tokio::time::sleep(self.confirm_delay).await;
        Ok(())
    }
}
