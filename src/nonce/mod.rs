//! Nonce management for reliable transaction submission
//!
//! Handles:
//! - Local nonce tracking so concurrent builds never share a nonce
//! - Merging the chain's view when it runs ahead of local bookkeeping
//! - Resynchronisation after stuck or dropped transactions

mod manager;
mod source;
mod storage;

pub use manager::SimpleNonceManager;
pub use source::{LatestNonceSource, NonceSource, PendingNonceSource};
pub use storage::{FileStorage, MemoryStorage, NonceStorage};

use crate::error::ClientResult;

use async_trait::async_trait;
use ethers::types::{Address, U256};
use std::sync::Arc;

/// Per-account nonce allocation and gas price advice
#[async_trait]
pub trait NonceManager: Send + Sync {
    /// Allocate the next nonce for `account`
    async fn pending_nonce_at(&self, account: Address) -> ClientResult<u64>;

    /// Stored next nonce without allocating; 0 for unknown accounts
    async fn peek_nonce(&self, account: Address) -> u64;

    /// Discard local advancement and adopt the chain's nonce
    async fn reset_nonce(&self, account: Address) -> ClientResult<()>;

    async fn suggest_gas_price(&self) -> ClientResult<U256>;

    /// Swap the query used to read an account's chain nonce
    fn set_nonce_source(&self, source: Arc<dyn NonceSource>);
}
