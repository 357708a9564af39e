//! Lock-guarded nonce allocator

use super::{MemoryStorage, NonceManager, NonceSource, NonceStorage, PendingNonceSource};
use crate::chain::ChainRpc;
use crate::error::{ClientError, ClientResult};
use crate::tx::GasPriceAdvisor;

use async_trait::async_trait;
use ethers::types::{Address, U256};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Nonce allocator with one lock over every account
///
/// Local bookkeeping wins over the chain's view unless the chain is ahead,
/// because the node's pending count lags transactions we have broadcast but
/// it has not yet seen.
pub struct SimpleNonceManager {
    /// account -> next nonce, held across the chain query so allocation is atomic
    nonces: Mutex<Box<dyn NonceStorage>>,
    source: RwLock<Arc<dyn NonceSource>>,
    gas_advisor: GasPriceAdvisor,
}

impl SimpleNonceManager {
    /// Create an in-memory manager reading pending nonces from `rpc`
    pub fn new(rpc: Arc<dyn ChainRpc>) -> Self {
        Self::with_storage(rpc, Box::new(MemoryStorage::new()))
    }

    pub fn with_storage(rpc: Arc<dyn ChainRpc>, storage: Box<dyn NonceStorage>) -> Self {
        Self {
            nonces: Mutex::new(storage),
            source: RwLock::new(Arc::new(PendingNonceSource::new(rpc.clone()))),
            gas_advisor: GasPriceAdvisor::new(rpc),
        }
    }

    fn source(&self) -> Arc<dyn NonceSource> {
        self.source
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl NonceManager for SimpleNonceManager {
    async fn pending_nonce_at(&self, account: Address) -> ClientResult<u64> {
        let mut nonces = self.nonces.lock().await;

        let on_chain = self.source().nonce_at(account).await?;

        let nonce = match nonces.get(&account) {
            Some(local) if local >= on_chain => local,
            Some(local) => {
                debug!(
                    "Chain nonce {} ahead of local {} for {:?}, adopting chain value",
                    on_chain, local, account
                );
                on_chain
            }
            None => on_chain,
        };

        let next = nonce
            .checked_add(1)
            .ok_or_else(|| ClientError::Storage(format!("nonce overflow for {:?}", account)))?;
        nonces.set(account, next)?;

        crate::metrics::record_nonce_allocated();
        debug!("Allocated nonce {} for {:?}", nonce, account);
        Ok(nonce)
    }

    async fn peek_nonce(&self, account: Address) -> u64 {
        self.nonces.lock().await.get(&account).unwrap_or_default()
    }

    async fn reset_nonce(&self, account: Address) -> ClientResult<()> {
        let mut nonces = self.nonces.lock().await;

        let on_chain = self.source().nonce_at(account).await?;
        let previous = nonces.get(&account);
        nonces.set(account, on_chain)?;

        crate::metrics::record_nonce_reset();
        info!(
            "Reset nonce for {:?}: {:?} -> {}",
            account, previous, on_chain
        );
        Ok(())
    }

    async fn suggest_gas_price(&self) -> ClientResult<U256> {
        self.gas_advisor.suggest_gas_price().await
    }

    fn set_nonce_source(&self, source: Arc<dyn NonceSource>) {
        *self.source.write().unwrap_or_else(PoisonError::into_inner) = source;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainRpc;
    use crate::nonce::FileStorage;
    use crate::testing::StubNonceSource;
    use futures::future::join_all;
    use std::collections::HashSet;
    use tokio_test::{assert_err, assert_ok};

    fn manager_with(chain_nonce: u64) -> (SimpleNonceManager, Arc<StubNonceSource>) {
        let manager = SimpleNonceManager::new(Arc::new(MockChainRpc::new()));
        let source = Arc::new(StubNonceSource::new(chain_nonce));
        manager.set_nonce_source(source.clone());
        (manager, source)
    }

    #[tokio::test]
    async fn test_sequential_allocation_is_monotonic() {
        let (manager, _) = manager_with(3);
        let account = Address::repeat_byte(1);

        let mut allocated = Vec::new();
        for _ in 0..5 {
            allocated.push(manager.pending_nonce_at(account).await.unwrap());
        }

        assert_eq!(allocated, vec![3, 4, 5, 6, 7]);
        assert_eq!(manager.peek_nonce(account).await, 8);
    }

    #[tokio::test]
    async fn test_concurrent_allocation_is_contiguous() {
        let (manager, _) = manager_with(10);
        let manager = Arc::new(manager);
        let account = Address::repeat_byte(2);

        // local state ahead of the chain before the burst
        manager.pending_nonce_at(account).await.unwrap();
        manager.pending_nonce_at(account).await.unwrap();
        let start = manager.peek_nonce(account).await;
        assert_eq!(start, 12);

        let tasks = (0..50).map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.pending_nonce_at(account).await })
        });
        let nonces: Vec<u64> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        let distinct: HashSet<u64> = nonces.iter().copied().collect();
        assert_eq!(distinct.len(), 50);
        assert_eq!(*nonces.iter().min().unwrap(), start);
        assert_eq!(*nonces.iter().max().unwrap(), start + 49);
        assert_eq!(manager.peek_nonce(account).await, start + 50);
    }

    #[tokio::test]
    async fn test_accounts_are_tracked_independently() {
        let (manager, _) = manager_with(0);
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);

        assert_eq!(manager.pending_nonce_at(a).await, Ok(0));
        assert_eq!(manager.pending_nonce_at(a).await, Ok(1));
        assert_eq!(manager.pending_nonce_at(b).await, Ok(0));
        assert_eq!(manager.peek_nonce(a).await, 2);
        assert_eq!(manager.peek_nonce(b).await, 1);
    }

    #[tokio::test]
    async fn test_chain_ahead_is_adopted() {
        let (manager, source) = manager_with(1);
        let account = Address::repeat_byte(3);

        assert_eq!(manager.pending_nonce_at(account).await, Ok(1));
        assert_eq!(manager.pending_nonce_at(account).await, Ok(2));

        // transactions from elsewhere moved the chain past us
        source.set(20);
        assert_eq!(manager.pending_nonce_at(account).await, Ok(20));
        assert_eq!(manager.peek_nonce(account).await, 21);
    }

    #[tokio::test]
    async fn test_local_ahead_is_kept() {
        let (manager, _) = manager_with(5);
        let account = Address::repeat_byte(4);

        for expected in 5..9 {
            assert_eq!(manager.pending_nonce_at(account).await, Ok(expected));
        }
    }

    #[tokio::test]
    async fn test_peek_unknown_account_is_zero() {
        let (manager, _) = manager_with(42);
        assert_eq!(manager.peek_nonce(Address::repeat_byte(5)).await, 0);
    }

    #[tokio::test]
    async fn test_reset_adopts_chain_nonce() {
        let (manager, source) = manager_with(7);
        let account = Address::repeat_byte(6);

        for _ in 0..4 {
            manager.pending_nonce_at(account).await.unwrap();
        }
        assert_eq!(manager.peek_nonce(account).await, 11);

        // pending pool dropped our transactions
        source.set(8);
        assert_ok!(manager.reset_nonce(account).await);
        assert_eq!(manager.peek_nonce(account).await, 8);
        assert_eq!(manager.pending_nonce_at(account).await, Ok(8));
    }

    #[tokio::test]
    async fn test_source_failure_does_not_advance() {
        let (manager, source) = manager_with(3);
        let account = Address::repeat_byte(7);

        manager.pending_nonce_at(account).await.unwrap();
        source.fail_with("node unavailable");

        let err = assert_err!(manager.pending_nonce_at(account).await);
        assert!(matches!(err, ClientError::ChainQuery(_)));
        assert_err!(manager.reset_nonce(account).await);
        assert_eq!(manager.peek_nonce(account).await, 4);
    }

    #[tokio::test]
    async fn test_default_source_uses_pending_query() {
        let account = Address::repeat_byte(8);
        let mut rpc = MockChainRpc::new();
        rpc.expect_pending_nonce_at().returning(|_| Ok(12));

        let manager = SimpleNonceManager::new(Arc::new(rpc));
        assert_eq!(manager.pending_nonce_at(account).await, Ok(12));
    }

    #[tokio::test]
    async fn test_gas_price_goes_through_advisor() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_suggest_gas_price()
            .returning(|| Ok(U256::from(2_000_000_000u64)));

        let manager = SimpleNonceManager::new(Arc::new(rpc));
        assert_eq!(
            manager.suggest_gas_price().await,
            Ok(U256::from(3_000_000_000u64))
        );
    }

    #[tokio::test]
    async fn test_file_storage_resumes_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonces.json");
        let account = Address::repeat_byte(9);

        {
            let manager = SimpleNonceManager::with_storage(
                Arc::new(MockChainRpc::new()),
                Box::new(FileStorage::open(&path).unwrap()),
            );
            manager.set_nonce_source(Arc::new(StubNonceSource::new(0)));
            for _ in 0..3 {
                manager.pending_nonce_at(account).await.unwrap();
            }
        }

        let manager = SimpleNonceManager::with_storage(
            Arc::new(MockChainRpc::new()),
            Box::new(FileStorage::open(&path).unwrap()),
        );
        manager.set_nonce_source(Arc::new(StubNonceSource::new(0)));
        assert_eq!(manager.peek_nonce(account).await, 3);
        assert_eq!(manager.pending_nonce_at(account).await, Ok(3));
    }
}
