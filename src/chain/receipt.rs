//! Receipt polling with a confirmation-depth threshold
//!
//! A transaction counts as confirmed once the chain height reaches the block
//! it was mined in plus the requested number of confirmations. Lookup
//! failures are retried until the deadline; the only outcomes surfaced to
//! callers are a confirmed receipt or a definite "not confirmed".

use super::ChainRpc;

use ethers::types::{TransactionReceipt, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

/// Result of waiting for a receipt
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptOutcome {
    Confirmed(TransactionReceipt),
    /// Deadline passed before the confirmation depth was observed
    NotConfirmed,
}

impl ReceiptOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, ReceiptOutcome::Confirmed(_))
    }

    pub fn receipt(&self) -> Option<&TransactionReceipt> {
        match self {
            ReceiptOutcome::Confirmed(receipt) => Some(receipt),
            ReceiptOutcome::NotConfirmed => None,
        }
    }

    pub fn into_receipt(self) -> Option<TransactionReceipt> {
        match self {
            ReceiptOutcome::Confirmed(receipt) => Some(receipt),
            ReceiptOutcome::NotConfirmed => None,
        }
    }
}

/// Polls the chain for a transaction's receipt
pub struct ReceiptWaiter {
    rpc: Arc<dyn ChainRpc>,
    poll_interval: Duration,
}

impl ReceiptWaiter {
    pub fn new(rpc: Arc<dyn ChainRpc>, poll_interval: Duration) -> Self {
        Self { rpc, poll_interval }
    }

    /// Wait until `tx_hash` has `confirmations` blocks on top of its own,
    /// or `max_wait` elapses
    pub async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        confirmations: u64,
        max_wait: Duration,
    ) -> ReceiptOutcome {
        if max_wait.is_zero() {
            crate::metrics::record_receipt_wait(false);
            return ReceiptOutcome::NotConfirmed;
        }

        // Dropping the poll future at the deadline cancels any in-flight query
        let outcome = match timeout(max_wait, self.poll_until_confirmed(tx_hash, confirmations)).await
        {
            Ok(receipt) => {
                info!(
                    "Transaction {:?} confirmed with {} confirmations",
                    tx_hash, confirmations
                );
                ReceiptOutcome::Confirmed(receipt)
            }
            Err(_) => {
                debug!("Timed out waiting for receipt of {:?}", tx_hash);
                ReceiptOutcome::NotConfirmed
            }
        };

        crate::metrics::record_receipt_wait(outcome.is_confirmed());
        outcome
    }

    async fn poll_until_confirmed(&self, tx_hash: H256, confirmations: u64) -> TransactionReceipt {
        loop {
            if let Some(receipt) = self.check_confirmed(tx_hash, confirmations).await {
                return receipt;
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn check_confirmed(&self, tx_hash: H256, confirmations: u64) -> Option<TransactionReceipt> {
        let receipt = match self.rpc.transaction_receipt(tx_hash).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                debug!("Receipt for {:?} not available yet", tx_hash);
                return None;
            }
            Err(e) => {
                debug!("Receipt lookup for {:?} failed, retrying: {}", tx_hash, e);
                return None;
            }
        };

        let mined_in = receipt.block_number?.as_u64();

        let height = match self.rpc.block_number().await {
            Ok(height) => height,
            Err(e) => {
                debug!("Block number query failed, retrying: {}", e);
                return None;
            }
        };

        if height >= mined_in.saturating_add(confirmations) {
            Some(receipt)
        } else {
            debug!(
                "Transaction {:?} has {} / {} confirmations",
                tx_hash,
                height.saturating_sub(mined_in),
                confirmations
            );
            None
        }
    }
}
