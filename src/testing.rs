//! Shared fixtures for unit tests

use crate::error::{ClientError, ClientResult};
use crate::nonce::NonceSource;

use async_trait::async_trait;
use ethers::signers::LocalWallet;
use ethers::types::Address;
use std::sync::Mutex;

pub const TEST_CHAIN_ID: u64 = 31337;

/// Well-known development key (first Hardhat/Anvil account)
pub const TEST_PRIVATE_KEY: &str =
    "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub fn test_wallet() -> LocalWallet {
    TEST_PRIVATE_KEY.parse().expect("valid test key")
}

/// Chain nonce source with a settable answer
pub struct StubNonceSource {
    answer: Mutex<ClientResult<u64>>,
}

impl StubNonceSource {
    pub fn new(nonce: u64) -> Self {
        Self {
            answer: Mutex::new(Ok(nonce)),
        }
    }

    pub fn set(&self, nonce: u64) {
        *self.answer.lock().unwrap() = Ok(nonce);
    }

    pub fn fail_with(&self, message: &str) {
        *self.answer.lock().unwrap() = Err(ClientError::ChainQuery(message.to_string()));
    }
}

#[async_trait]
impl NonceSource for StubNonceSource {
    async fn nonce_at(&self, _account: Address) -> ClientResult<u64> {
        self.answer.lock().unwrap().clone()
    }
}
