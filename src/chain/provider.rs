//! Chain provider with multi-RPC support and automatic failover

use super::ChainRpc;
use crate::config::ChainConfig;
use crate::error::{ClientError, ClientResult};
use crate::tx::SignedTransaction;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, TransactionReceipt, H256, U256};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: &ChainConfig) -> ClientResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider: {}", url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(ClientError::Config("No valid RPC providers".to_string()));
        }

        Ok(Self {
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("RPC failover to provider {}", next);
    }

    /// Run a read query, moving to the next endpoint on failure until every
    /// endpoint has been tried once
    async fn with_failover<T, E, F, Fut>(&self, operation: &str, query: F) -> Result<T, String>
    where
        E: Display,
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut last_error = String::from("no providers");

        for _ in 0..self.http_providers.len() {
            match query(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("{} failed: {}", operation, e);
                    last_error = e.to_string();
                    self.failover();
                }
            }
        }

        Err(format!("all providers failed {}: {}", operation, last_error))
    }
}

#[async_trait]
impl ChainRpc for ChainProvider {
    async fn chain_id(&self) -> ClientResult<u64> {
        let id = self
            .with_failover("chain_id", |p| async move { p.get_chainid().await })
            .await
            .map_err(ClientError::ChainQuery)?;

        u256_to_u64(id).ok_or_else(|| ClientError::ChainQuery(format!("chain id {} out of range", id)))
    }

    async fn block_number(&self) -> ClientResult<u64> {
        self.with_failover("block_number", |p| async move { p.get_block_number().await })
            .await
            .map(|b| b.as_u64())
            .map_err(ClientError::ChainQuery)
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> ClientResult<u64> {
        let gas = self
            .with_failover("estimate_gas", |p| {
                let tx = tx.clone();
                async move { p.estimate_gas(&tx, None).await }
            })
            .await
            .map_err(ClientError::GasEstimation)?;

        u256_to_u64(gas)
            .ok_or_else(|| ClientError::GasEstimation(format!("estimate {} exceeds u64", gas)))
    }

    async fn suggest_gas_price(&self) -> ClientResult<U256> {
        self.with_failover("gas_price", |p| async move { p.get_gas_price().await })
            .await
            .map_err(ClientError::ChainQuery)
    }

    async fn pending_nonce_at(&self, account: Address) -> ClientResult<u64> {
        self.nonce_at(account, Some(BlockNumber::Pending)).await
    }

    async fn nonce_at(&self, account: Address, block: Option<BlockNumber>) -> ClientResult<u64> {
        let count = self
            .with_failover("transaction_count", |p| async move {
                p.get_transaction_count(account, block.map(Into::into)).await
            })
            .await
            .map_err(ClientError::ChainQuery)?;

        u256_to_u64(count)
            .ok_or_else(|| ClientError::ChainQuery(format!("nonce {} out of range", count)))
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> ClientResult<H256> {
        // Broadcast goes to the active endpoint only
        let pending = self
            .http()
            .send_raw_transaction(tx.raw.clone())
            .await
            .map_err(|e| ClientError::ChainQuery(format!("send transaction: {}", e)))?;

        Ok(pending.tx_hash())
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> ClientResult<Option<TransactionReceipt>> {
        self.http()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| ClientError::ChainQuery(e.to_string()))
    }
}

fn u256_to_u64(value: U256) -> Option<u64> {
    if value > U256::from(u64::MAX) {
        None
    } else {
        Some(value.as_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_config_without_valid_urls() {
        let config = ChainConfig {
            rpc_urls: vec!["not a url".to_string()],
            chain_id: None,
        };
        assert!(matches!(ChainProvider::new(&config), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_failover_rotates_providers() {
        let config = ChainConfig {
            rpc_urls: vec![
                "http://localhost:8545".to_string(),
                "http://localhost:8546".to_string(),
            ],
            chain_id: None,
        };
        let provider = ChainProvider::new(&config).unwrap();

        assert_eq!(provider.http().url().port(), Some(8545));
        provider.failover();
        assert_eq!(provider.http().url().port(), Some(8546));
        provider.failover();
        assert_eq!(provider.http().url().port(), Some(8545));
    }

    #[test]
    fn test_u256_to_u64_bounds() {
        assert_eq!(u256_to_u64(U256::from(42u64)), Some(42));
        assert_eq!(u256_to_u64(U256::from(u64::MAX)), Some(u64::MAX));
        assert_eq!(u256_to_u64(U256::from(u64::MAX) + 1), None);
    }
}
