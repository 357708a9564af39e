//! Chain module - the node RPC boundary
//!
//! This module provides:
//! - The `ChainRpc` trait every other component talks to
//! - An HTTP provider with multi-endpoint failover
//! - Receipt polling with a confirmation-depth threshold

pub mod provider;
pub mod receipt;

pub use provider::ChainProvider;
pub use receipt::{ReceiptOutcome, ReceiptWaiter};

use crate::error::ClientResult;
use crate::tx::SignedTransaction;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, BlockNumber, TransactionReceipt, H256, U256};

/// Node queries and submission used by the client
///
/// Failures are reported as `ClientError::ChainQuery`, except gas estimation
/// which reports `ClientError::GasEstimation`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn chain_id(&self) -> ClientResult<u64>;

    async fn block_number(&self) -> ClientResult<u64>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> ClientResult<u64>;

    async fn suggest_gas_price(&self) -> ClientResult<U256>;

    /// Next nonce including transactions in the node's pending pool
    async fn pending_nonce_at(&self, account: Address) -> ClientResult<u64>;

    /// Nonce at the given block, `None` meaning latest
    async fn nonce_at(&self, account: Address, block: Option<BlockNumber>) -> ClientResult<u64>;

    async fn send_transaction(&self, tx: &SignedTransaction) -> ClientResult<H256>;

    /// `Ok(None)` while the transaction is not yet mined
    async fn transaction_receipt(&self, tx_hash: H256) -> ClientResult<Option<TransactionReceipt>>;
}
