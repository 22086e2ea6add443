//! Simulated source chain
//!
//! Produces a slowly advancing chain head and occasional Lock logs so the
//! relay can run end-to-end without a node.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use eyre::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use super::ChainReader;
use crate::decoder::{encode_lock_data, lock_event_topic};
use crate::types::{ParsedLockEvent, RawLog};

const SIM_SOURCE_TOKEN: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";
const SIM_RECIPIENT: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
const SIM_DESTINATION_CHAIN_ID: u64 = 80001;

/// Tunables for [`SimulatedChainReader`]
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Head the chain starts at
    pub initial_head: u64,
    /// Maximum blocks the head advances per head query
    pub max_head_step: u64,
    /// Probability that a log query returns a lock event
    pub lock_probability: f64,
    pub head_latency: Duration,
    pub logs_latency: Duration,
    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_head: 0,
            max_head_step: 2,
            lock_probability: 0.5,
            head_latency: Duration::from_millis(100),
            logs_latency: Duration::from_millis(500),
            seed: None,
        }
    }
}

/// In-process stand-in for a source chain RPC node
pub struct SimulatedChainReader {
    chain_name: String,
    bridge_address: Address,
    head: AtomicU64,
    config: SimulationConfig,
    rng: Mutex<StdRng>,
}

impl SimulatedChainReader {
    pub fn new(chain_name: &str, bridge_address: Address, config: SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        info!(
            chain = chain_name,
            initial_head = config.initial_head,
            "Simulated chain reader initialized"
        );

        Self {
            chain_name: chain_name.to_string(),
            bridge_address,
            head: AtomicU64::new(config.initial_head),
            config,
            rng: Mutex::new(rng),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut rng)
    }

    fn mock_lock_log(&self, block_number: u64) -> RawLog {
        let (amount_tokens, jitter) =
            self.with_rng(|rng| (rng.gen_range(100u64..=5000), rng.gen_range(0u64..=1000)));
        let nonce = chrono::Utc::now().timestamp_millis().max(0) as u64 + jitter;

        let event = ParsedLockEvent {
            source_token: Address::from_str(SIM_SOURCE_TOKEN).unwrap_or_default(),
            destination_chain_id: SIM_DESTINATION_CHAIN_ID,
            recipient_address: Address::from_str(SIM_RECIPIENT).unwrap_or_default(),
            amount: U256::from(amount_tokens) * U256::from(10u64).pow(U256::from(18u64)),
            nonce,
            block_number,
        };

        RawLog {
            contract_address: format!("{:?}", self.bridge_address),
            topics: vec![format!("{:?}", lock_event_topic())],
            data: encode_lock_data(&event),
            block_number,
        }
    }
}

#[async_trait]
impl ChainReader for SimulatedChainReader {
    async fn latest_block_number(&self) -> Result<u64> {
        tokio::time::sleep(self.config.head_latency).await;

        let step = self.with_rng(|rng| rng.gen_range(0..=self.config.max_head_step));
        let head = self.head.fetch_add(step, Ordering::SeqCst) + step;

        debug!(chain = %self.chain_name, head, "Fetched latest block number");
        Ok(head)
    }

    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        contract: Address,
    ) -> Result<Vec<RawLog>> {
        tokio::time::sleep(self.config.logs_latency).await;

        debug!(
            chain = %self.chain_name,
            from_block,
            to_block,
            %contract,
            "Fetching logs"
        );

        if contract != self.bridge_address || from_block > to_block {
            return Ok(Vec::new());
        }

        let emit = self.with_rng(|rng| rng.gen_bool(self.config.lock_probability));
        if !emit {
            return Ok(Vec::new());
        }

        let block = self.with_rng(|rng| rng.gen_range(from_block..=to_block));
        info!(chain = %self.chain_name, block, "Simulated a new Lock event");
        Ok(vec![self.mock_lock_log(block)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode_lock_event;

    fn bridge() -> Address {
        Address::from_str("0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B").unwrap()
    }

    fn fast_config(seed: u64) -> SimulationConfig {
        SimulationConfig {
            initial_head: 1000,
            lock_probability: 1.0,
            head_latency: Duration::ZERO,
            logs_latency: Duration::ZERO,
            seed: Some(seed),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_head_never_decreases() {
        let reader = SimulatedChainReader::new("sim", bridge(), fast_config(1));
        let mut last = 1000;
        for _ in 0..50 {
            let head = reader.latest_block_number().await.unwrap();
            assert!(head >= last);
            assert!(head - last <= 2);
            last = head;
        }
    }

    #[tokio::test]
    async fn test_generated_logs_decode() {
        let reader = SimulatedChainReader::new("sim", bridge(), fast_config(7));
        let logs = reader.get_logs(10, 20, bridge()).await.unwrap();
        assert_eq!(logs.len(), 1);

        let event = decode_lock_event(&logs[0]).unwrap();
        assert!((10..=20).contains(&event.block_number));
        assert_eq!(event.destination_chain_id, SIM_DESTINATION_CHAIN_ID);
    }

    #[tokio::test]
    async fn test_other_contract_has_no_logs() {
        let reader = SimulatedChainReader::new("sim", bridge(), fast_config(3));
        let logs = reader.get_logs(10, 20, Address::ZERO).await.unwrap();
        assert!(logs.is_empty());
    }
}
