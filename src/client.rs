//! Client facade owning the nonce allocator, signers and broadcast pipeline
//!
//! Every client is constructed explicitly and owns its own allocator; there
//! is no process-wide nonce state. Chain access goes through the held
//! `ChainRpc` collaborator and is only exposed through the methods below.

use crate::chain::{ChainProvider, ChainRpc, ReceiptOutcome, ReceiptWaiter};
use crate::config::{ClientConfig, NonceSourceKind, Settings};
use crate::error::{ClientError, ClientResult};
use crate::message::{Message, MessageStatus, Request};
use crate::nonce::{
    FileStorage, LatestNonceSource, NonceManager, NonceSource, NonceStorage, SimpleNonceManager,
};
use crate::tx::{
    BroadcastPipeline, LocalKeySigner, MessageTracker, ResponseStream, Scheduler, SignerRegistry,
    TransactionBuilder, TransactionSigner,
};

use ethers::signers::LocalWallet;
use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct Client {
    rpc: Arc<dyn ChainRpc>,
    nonce_manager: Arc<dyn NonceManager>,
    signers: Arc<SignerRegistry>,
    tracker: Arc<MessageTracker>,
    pipeline: BroadcastPipeline,
    receipts: ReceiptWaiter,
    config: ClientConfig,
}

impl Client {
    /// Connect to the configured endpoints and start the pipeline
    pub async fn dial(settings: &Settings) -> ClientResult<Self> {
        let rpc: Arc<dyn ChainRpc> = Arc::new(ChainProvider::new(&settings.chain)?);

        let chain_id = rpc.chain_id().await?;
        if let Some(expected) = settings.chain.chain_id {
            if expected != chain_id {
                return Err(ClientError::Config(format!(
                    "node reports chain id {}, expected {}",
                    chain_id, expected
                )));
            }
        }
        info!("Connected to chain {}", chain_id);

        let storage: Option<Box<dyn NonceStorage>> = match &settings.nonce.storage_path {
            Some(path) => {
                info!("Persisting nonces to {:?}", path);
                Some(Box::new(FileStorage::open(path)?))
            }
            None => None,
        };
        let nonce_manager = match storage {
            Some(storage) => SimpleNonceManager::with_storage(rpc.clone(), storage),
            None => SimpleNonceManager::new(rpc.clone()),
        };
        if settings.nonce.source == NonceSourceKind::Latest {
            nonce_manager.set_nonce_source(Arc::new(LatestNonceSource::new(rpc.clone())));
        }

        Ok(Self::new(rpc, Arc::new(nonce_manager), settings.client.clone()))
    }

    /// Build a client over an existing collaborator; spawns the scheduler
    /// task, so it must run inside a Tokio runtime
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        nonce_manager: Arc<dyn NonceManager>,
        config: ClientConfig,
    ) -> Self {
        let signers = Arc::new(SignerRegistry::new());
        let tracker = Arc::new(MessageTracker::new());

        let scheduler = Scheduler::new(
            TransactionBuilder::new(rpc.clone(), nonce_manager.clone()),
            signers.clone(),
            rpc.clone(),
            tracker.clone(),
        )
        .with_cleanup(config.cleanup_interval(), config.message_retention());
        let pipeline = BroadcastPipeline::spawn(scheduler, config.queue_capacity);
        let receipts = ReceiptWaiter::new(rpc.clone(), config.receipt_poll_interval());

        Self {
            rpc,
            nonce_manager,
            signers,
            tracker,
            pipeline,
            receipts,
            config,
        }
    }

    /// Client with an in-memory allocator reading pending nonces
    pub fn with_rpc(rpc: Arc<dyn ChainRpc>, config: ClientConfig) -> Self {
        let nonce_manager = Arc::new(SimpleNonceManager::new(rpc.clone()));
        Self::new(rpc, nonce_manager, config)
    }

    /// The chain collaborator this client delegates to
    pub fn rpc(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }

    pub fn nonce_manager(&self) -> &Arc<dyn NonceManager> {
        &self.nonce_manager
    }

    // Broadcast pipeline

    pub async fn schedule(&self, request: Request) -> ClientResult<()> {
        self.pipeline.schedule(request).await
    }

    /// The response stream; `None` once it has been taken
    pub fn responses(&self) -> Option<ResponseStream> {
        self.pipeline.responses()
    }

    pub fn close(&self) -> ClientResult<()> {
        self.pipeline.close()
    }

    pub async fn shutdown(&self) -> ClientResult<()> {
        self.pipeline.shutdown().await
    }

    pub fn message_status(&self, id: &H256) -> Option<MessageStatus> {
        self.tracker.status(id)
    }

    pub fn message(&self, id: &H256) -> Option<Message> {
        self.tracker.get(id)
    }

    /// Forget tracked messages idle for longer than `max_age`
    pub fn prune_messages(&self, max_age: chrono::Duration) -> usize {
        self.tracker.prune(max_age)
    }

    // Signing

    pub fn register_signer(&self, signer: Arc<dyn TransactionSigner>) {
        self.signers.register(signer);
    }

    /// Register a private key, binding it to the chain id fetched now
    pub async fn register_private_key(&self, wallet: LocalWallet) -> ClientResult<Address> {
        let chain_id = self.rpc.chain_id().await?;
        let signer = LocalKeySigner::new(wallet, chain_id);
        let address = signer.address();

        self.signers.register(Arc::new(signer));
        info!("Registered private key for {:?} on chain {}", address, chain_id);
        Ok(address)
    }

    pub async fn register_private_key_hex(&self, key: &str) -> ClientResult<Address> {
        let wallet: LocalWallet = key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| ClientError::Config(format!("invalid private key: {}", e)))?;
        self.register_private_key(wallet).await
    }

    // Nonces and gas

    pub async fn pending_nonce_at(&self, account: Address) -> ClientResult<u64> {
        self.nonce_manager.pending_nonce_at(account).await
    }

    pub async fn peek_nonce(&self, account: Address) -> u64 {
        self.nonce_manager.peek_nonce(account).await
    }

    pub async fn reset_nonce(&self, account: Address) -> ClientResult<()> {
        self.nonce_manager.reset_nonce(account).await
    }

    pub fn set_nonce_source(&self, source: Arc<dyn NonceSource>) {
        self.nonce_manager.set_nonce_source(source);
    }

    pub async fn suggest_gas_price(&self) -> ClientResult<U256> {
        self.nonce_manager.suggest_gas_price().await
    }

    // Receipts

    pub async fn wait_for_receipt(
        &self,
        tx_hash: H256,
        confirmations: u64,
        max_wait: Duration,
    ) -> ReceiptOutcome {
        self.receipts
            .wait_for_receipt(tx_hash, confirmations, max_wait)
            .await
    }

    /// Wait using the configured confirmation depth and timeout
    pub async fn wait_for_confirmation(&self, tx_hash: H256) -> ReceiptOutcome {
        self.wait_for_receipt(
            tx_hash,
            self.config.confirmations,
            self.config.receipt_timeout(),
        )
        .await
    }

    /// Wait for a broadcast message's transaction and record the outcome
    ///
    /// A confirmed transaction finalizes the message. On timeout the message
    /// stays inflight since the transaction may still be mined.
    pub async fn confirm_message(&self, id: &H256) -> ClientResult<ReceiptOutcome> {
        let tx_hash = self
            .tracker
            .get(id)
            .and_then(|m| m.tx_hash)
            .ok_or_else(|| {
                ClientError::InvalidRequest(format!("message {} was not broadcast", hex::encode(id)))
            })?;

        let outcome = self.wait_for_confirmation(tx_hash).await;
        if outcome.is_confirmed() {
            self.tracker.advance(*id, MessageStatus::Finalized);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainRpc;
    use crate::testing::{test_wallet, StubNonceSource, TEST_CHAIN_ID, TEST_PRIVATE_KEY};
    use ethers::signers::Signer;
    use ethers::types::{TransactionReceipt, U64};
    use futures::StreamExt;

    fn test_config() -> ClientConfig {
        ClientConfig {
            queue_capacity: 8,
            receipt_poll_interval_ms: 5,
            confirmations: 2,
            receipt_timeout_secs: 1,
            message_retention_secs: 3600,
            cleanup_interval_ms: 1_000,
        }
    }

    fn chain_rpc() -> MockChainRpc {
        let mut rpc = MockChainRpc::new();
        rpc.expect_chain_id().returning(|| Ok(TEST_CHAIN_ID));
        rpc.expect_pending_nonce_at().returning(|_| Ok(0));
        rpc.expect_estimate_gas().returning(|_| Ok(21_000));
        rpc.expect_suggest_gas_price().returning(|| Ok(U256::from(10)));
        rpc.expect_send_transaction().returning(|signed| Ok(signed.hash));
        rpc.expect_transaction_receipt().returning(|hash| {
            Ok(Some(TransactionReceipt {
                transaction_hash: hash,
                block_number: Some(U64::from(100)),
                ..Default::default()
            }))
        });
        rpc.expect_block_number().returning(|| Ok(102));
        rpc
    }

    #[tokio::test]
    async fn test_schedule_sign_and_confirm() {
        let client = Client::with_rpc(Arc::new(chain_rpc()), test_config());
        let from = client.register_private_key_hex(TEST_PRIVATE_KEY).await.unwrap();
        assert_eq!(from, test_wallet().address());

        let mut responses = client.responses().unwrap();
        let request = Request::new(from)
            .to(Address::repeat_byte(0x06))
            .value(1u64)
            .assign_id();
        let id = request.id();

        client.schedule(request).await.unwrap();
        client.close().unwrap();

        let response = responses.next().await.unwrap();
        assert_eq!(response.id, id);
        let signed = response.transaction().unwrap().clone();
        assert!(responses.next().await.is_none());

        assert_eq!(client.message_status(&id), Some(MessageStatus::Inflight));
        assert_eq!(client.message(&id).and_then(|m| m.nonce), Some(0));
        assert_eq!(client.peek_nonce(from).await, 1);

        let outcome = client.confirm_message(&id).await.unwrap();
        assert_eq!(
            outcome.receipt().map(|r| r.transaction_hash),
            Some(signed.hash)
        );
        assert_eq!(client.message_status(&id), Some(MessageStatus::Finalized));

        client.shutdown().await.unwrap();
        assert_eq!(client.prune_messages(chrono::Duration::seconds(-1)), 1);
    }

    #[tokio::test]
    async fn test_client_prunes_idle_messages_on_its_own() {
        let config = ClientConfig {
            message_retention_secs: 0,
            cleanup_interval_ms: 10,
            ..test_config()
        };
        let client = Client::with_rpc(Arc::new(chain_rpc()), config);
        let from = client.register_private_key_hex(TEST_PRIVATE_KEY).await.unwrap();
        let mut responses = client.responses().unwrap();

        let mut ids = Vec::new();
        for _ in 0..20 {
            let request = Request::new(from).to(Address::repeat_byte(0x06)).assign_id();
            ids.push(request.id());
            client.schedule(request).await.unwrap();
        }
        for _ in 0..20 {
            assert!(responses.next().await.unwrap().is_ok());
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(ids.iter().all(|id| client.message(id).is_none()));

        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unregistered_client_reports_no_signer() {
        let client = Client::with_rpc(Arc::new(chain_rpc()), test_config());
        let mut responses = client.responses().unwrap();

        let request = Request::new(test_wallet().address()).assign_id();
        client.schedule(request).await.unwrap();
        client.shutdown().await.unwrap();

        let response = responses.next().await.unwrap();
        assert_eq!(response.error(), Some(&ClientError::NoSigner));

        let id = response.id;
        assert!(matches!(
            client.confirm_message(&id).await,
            Err(ClientError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_nonce_operations_delegate_to_allocator() {
        let client = Client::with_rpc(Arc::new(chain_rpc()), test_config());
        let source = Arc::new(StubNonceSource::new(40));
        client.set_nonce_source(source.clone());
        let account = Address::repeat_byte(0x42);

        assert_eq!(client.pending_nonce_at(account).await, Ok(40));
        assert_eq!(client.pending_nonce_at(account).await, Ok(41));
        assert_eq!(client.peek_nonce(account).await, 42);

        source.set(40);
        client.reset_nonce(account).await.unwrap();
        assert_eq!(client.peek_nonce(account).await, 40);

        assert_eq!(client.suggest_gas_price().await, Ok(U256::from(15)));
    }

    #[tokio::test]
    async fn test_invalid_private_key_is_rejected() {
        let client = Client::with_rpc(Arc::new(MockChainRpc::new()), test_config());
        let result = client.register_private_key_hex("not-a-key").await;
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[tokio::test]
    async fn test_chain_id_failure_blocks_key_registration() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_chain_id()
            .returning(|| Err(ClientError::ChainQuery("refused".into())));
        let client = Client::with_rpc(Arc::new(rpc), test_config());

        let result = client.register_private_key(test_wallet()).await;
        assert!(matches!(result, Err(ClientError::ChainQuery(_))));
    }
}
