//! Chain-side nonce queries

use crate::chain::ChainRpc;
use crate::error::ClientResult;

use async_trait::async_trait;
use ethers::types::{Address, BlockNumber};
use std::sync::Arc;

/// Reads the nonce the chain expects next for an account
#[async_trait]
pub trait NonceSource: Send + Sync {
    async fn nonce_at(&self, account: Address) -> ClientResult<u64>;
}

/// Counts transactions in the node's pending pool
pub struct PendingNonceSource {
    rpc: Arc<dyn ChainRpc>,
}

impl PendingNonceSource {
    pub fn new(rpc: Arc<dyn ChainRpc>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl NonceSource for PendingNonceSource {
    async fn nonce_at(&self, account: Address) -> ClientResult<u64> {
        self.rpc.pending_nonce_at(account).await
    }
}

/// Counts only transactions mined in the latest block
pub struct LatestNonceSource {
    rpc: Arc<dyn ChainRpc>,
}

impl LatestNonceSource {
    pub fn new(rpc: Arc<dyn ChainRpc>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl NonceSource for LatestNonceSource {
    async fn nonce_at(&self, account: Address) -> ClientResult<u64> {
        self.rpc.nonce_at(account, Some(BlockNumber::Latest)).await
    }
}
