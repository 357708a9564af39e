//! Ordered signer registry and private-key signing

use crate::error::{ClientError, ClientResult};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Signature, H256};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// A transaction with its signature and wire encoding
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    pub tx: TypedTransaction,
    pub signature: Signature,
    /// RLP encoding submitted to the node
    pub raw: Bytes,
    pub hash: H256,
}

impl SignedTransaction {
    pub fn new(tx: TypedTransaction, signature: Signature) -> Self {
        let raw = tx.rlp_signed(&signature);
        let hash = tx.hash(&signature);
        Self {
            tx,
            signature,
            raw,
            hash,
        }
    }

    pub fn nonce(&self) -> Option<u64> {
        self.tx.nonce().map(|n| n.as_u64())
    }

    pub fn gas_limit(&self) -> Option<u64> {
        self.tx.gas().map(|g| g.as_u64())
    }
}

/// Signs transactions for the accounts it holds keys for
///
/// Returning `ClientError::NotAuthorized` declines the account and lets the
/// registry try the next signer. Any other error ends the attempt.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign(&self, account: Address, tx: &TypedTransaction) -> ClientResult<SignedTransaction>;
}

/// Adapts a plain function into a signer
pub struct FnSigner<F> {
    sign_fn: F,
}

impl<F> FnSigner<F>
where
    F: Fn(Address, &TypedTransaction) -> ClientResult<SignedTransaction> + Send + Sync,
{
    pub fn new(sign_fn: F) -> Self {
        Self { sign_fn }
    }
}

#[async_trait]
impl<F> TransactionSigner for FnSigner<F>
where
    F: Fn(Address, &TypedTransaction) -> ClientResult<SignedTransaction> + Send + Sync,
{
    async fn sign(&self, account: Address, tx: &TypedTransaction) -> ClientResult<SignedTransaction> {
        (self.sign_fn)(account, tx)
    }
}

/// Signs with a single private key under the chain's EIP-155 scheme
pub struct LocalKeySigner {
    wallet: LocalWallet,
    chain_id: u64,
}

impl LocalKeySigner {
    pub fn new(wallet: LocalWallet, chain_id: u64) -> Self {
        Self {
            wallet: wallet.with_chain_id(chain_id),
            chain_id,
        }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }
}

#[async_trait]
impl TransactionSigner for LocalKeySigner {
    async fn sign(&self, account: Address, tx: &TypedTransaction) -> ClientResult<SignedTransaction> {
        if account != self.wallet.address() {
            return Err(ClientError::NotAuthorized);
        }

        let mut tx = tx.clone();
        tx.set_chain_id(self.chain_id);
        tx.set_from(account);

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| ClientError::Signing(e.to_string()))?;

        Ok(SignedTransaction::new(tx, signature))
    }
}

/// Signers tried in registration order
#[derive(Default)]
pub struct SignerRegistry {
    signers: RwLock<Vec<Arc<dyn TransactionSigner>>>,
}

impl SignerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, signer: Arc<dyn TransactionSigner>) {
        let mut signers = self.signers.write().unwrap_or_else(PoisonError::into_inner);
        signers.push(signer);
        info!("Registered signer #{}", signers.len());
    }

    pub fn signer_count(&self) -> usize {
        self.signers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Sign with the first signer that accepts `account`
    pub async fn sign(&self, account: Address, tx: &TypedTransaction) -> ClientResult<SignedTransaction> {
        // snapshot so registration can proceed while we await
        let signers = self
            .signers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if signers.is_empty() {
            return Err(ClientError::NoSigner);
        }

        for (index, signer) in signers.iter().enumerate() {
            match signer.sign(account, tx).await {
                Ok(signed) => {
                    debug!("Signer #{} signed for {:?}", index, account);
                    return Ok(signed);
                }
                Err(ClientError::NotAuthorized) => {
                    debug!("Signer #{} declined {:?}", index, account);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ClientError::NotAuthorized)
    }
}
