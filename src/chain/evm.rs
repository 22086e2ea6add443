//! JSON-RPC source chain reader

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{Result, WrapErr};

use super::ChainReader;
use crate::types::RawLog;

/// Source chain reader backed by a JSON-RPC HTTP endpoint
pub struct EvmChainReader {
    provider: RootProvider<Http<Client>>,
    chain_name: String,
}

impl EvmChainReader {
    /// Create a reader for the given RPC URL
    pub fn new(chain_name: &str, rpc_url: &str) -> Result<Self> {
        let url = rpc_url
            .parse()
            .wrap_err_with(|| format!("Invalid RPC URL: {}", rpc_url))?;
        let provider = ProviderBuilder::new().on_http(url);

        tracing::info!(chain = chain_name, "EVM chain reader initialized");

        Ok(Self {
            provider,
            chain_name: chain_name.to_string(),
        })
    }

    fn to_raw_log(log: &Log) -> Result<RawLog> {
        let block_number = log
            .block_number
            .ok_or_else(|| eyre::eyre!("Missing block number"))?;

        Ok(RawLog {
            contract_address: format!("{:?}", log.address()),
            topics: log.topics().iter().map(|t| format!("{:?}", t)).collect(),
            data: format!("0x{}", hex::encode(log.data().data.as_ref())),
            block_number,
        })
    }
}

#[async_trait]
impl ChainReader for EvmChainReader {
    async fn latest_block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .wrap_err_with(|| format!("[{}] Failed to get block number", self.chain_name))
    }

    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        contract: Address,
    ) -> Result<Vec<RawLog>> {
        let filter = Filter::new()
            .address(contract)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .wrap_err_with(|| format!("[{}] Failed to get logs", self.chain_name))?;

        let mut raw_logs = Vec::with_capacity(logs.len());
        for log in &logs {
            match Self::to_raw_log(log) {
                Ok(raw) => raw_logs.push(raw),
                Err(e) => {
                    // Pending logs have no block number; they will be seen again once mined
                    tracing::warn!(
                        chain = %self.chain_name,
                        tx_hash = ?log.transaction_hash,
                        error = %e,
                        "Skipping log without block context"
                    );
                }
            }
        }
        Ok(raw_logs)
    }
}
