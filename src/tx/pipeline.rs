//! Broadcast pipeline: request queue -> scheduler -> response queue
//!
//! A single scheduler task builds, signs and submits each request in the order
//! it was dequeued. Funnelling every build through one task is what keeps
//! nonce allocation for an account free of races between uncoordinated
//! callers; independent accounts are not processed in parallel.

use super::builder::TransactionBuilder;
use super::signer::{SignedTransaction, SignerRegistry};
use super::tracker::MessageTracker;
use crate::chain::ChainRpc;
use crate::config::{DEFAULT_CLEANUP_INTERVAL_MS, DEFAULT_MESSAGE_RETENTION_SECS};
use crate::error::{ClientError, ClientResult};
use crate::message::{MessageStatus, Request, Response};

use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Owns the consume -> build -> sign -> submit -> produce cycle
pub struct Scheduler {
    builder: TransactionBuilder,
    signers: Arc<SignerRegistry>,
    rpc: Arc<dyn ChainRpc>,
    tracker: Arc<MessageTracker>,
    cleanup_interval: Duration,
    message_retention: chrono::Duration,
}

impl Scheduler {
    pub fn new(
        builder: TransactionBuilder,
        signers: Arc<SignerRegistry>,
        rpc: Arc<dyn ChainRpc>,
        tracker: Arc<MessageTracker>,
    ) -> Self {
        Self {
            builder,
            signers,
            rpc,
            tracker,
            cleanup_interval: Duration::from_millis(DEFAULT_CLEANUP_INTERVAL_MS),
            message_retention: chrono::Duration::seconds(DEFAULT_MESSAGE_RETENTION_SECS as i64),
        }
    }

    /// Prune tracked messages idle for longer than `retention`, checking
    /// every `every`
    pub fn with_cleanup(mut self, every: Duration, retention: chrono::Duration) -> Self {
        self.cleanup_interval = every.max(Duration::from_millis(1));
        self.message_retention = retention;
        self
    }

    /// Serve requests until the inbound queue is closed and drained, then
    /// close the outbound queue by dropping its sender
    pub async fn run(self, mut requests: mpsc::Receiver<Request>, responses: mpsc::Sender<Response>) {
        let mut cleanup_interval = interval(self.cleanup_interval);
        cleanup_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Broadcast scheduler started");

        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else { break };
                    let response = self.process(request).await;
                    if responses.send(response).await.is_err() {
                        warn!("Response receiver dropped, discarding response");
                    }
                }

                // Periodic cleanup
                _ = cleanup_interval.tick() => {
                    self.cleanup();
                }
            }
        }

        info!("Request queue closed, broadcast scheduler stopped");
    }

    fn cleanup(&self) {
        let pruned = self.tracker.prune(self.message_retention);
        if pruned > 0 {
            debug!("Pruned {} idle messages, {} still tracked", pruned, self.tracker.len());
        }
    }

    async fn process(&self, request: Request) -> Response {
        let id = request.id();

        if id.is_zero() {
            let error = ClientError::InvalidRequest("no message id provided".to_string());
            crate::metrics::record_response(Err(&error));
            return Response {
                id,
                result: Err(error),
            };
        }

        debug!("Start scheduling message {}", hex::encode(id));
        self.tracker.advance(id, MessageStatus::Queued);

        let started = Instant::now();
        let result = self.broadcast(&request).await;
        crate::metrics::record_broadcast_latency(started.elapsed().as_secs_f64());

        match &result {
            Ok(signed) => {
                self.tracker.inflight(id, signed.hash);
                crate::metrics::record_response(Ok(()));
                debug!(
                    "Sent message {} as {:?} from {:?} (nonce {:?})",
                    hex::encode(id),
                    signed.hash,
                    request.from,
                    signed.nonce()
                );
            }
            Err(e) => {
                self.tracker.fail(id, &e.to_string());
                crate::metrics::record_response(Err(e));
                warn!("Message {} failed: {}", hex::encode(id), e);
            }
        }

        Response { id, result }
    }

    async fn broadcast(&self, request: &Request) -> ClientResult<SignedTransaction> {
        let tx = self.builder.build(request).await?;
        if let Some(nonce) = tx.nonce() {
            self.tracker.nonce_assigned(request.id(), nonce.as_u64());
        }

        let signed = self.signers.sign(request.from, &tx).await?;
        self.rpc.send_transaction(&signed).await?;

        Ok(signed)
    }
}

/// Responses in dequeue order; ends once the pipeline has drained
pub struct ResponseStream {
    inner: mpsc::Receiver<Response>,
}

impl ResponseStream {
    pub async fn recv(&mut self) -> Option<Response> {
        self.inner.recv().await
    }
}

impl Stream for ResponseStream {
    type Item = Response;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_recv(cx)
    }
}

/// Handles to the running scheduler task and its two queues
pub struct BroadcastPipeline {
    requests: Mutex<Option<mpsc::Sender<Request>>>,
    responses: Mutex<Option<mpsc::Receiver<Response>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    tracker: Arc<MessageTracker>,
}

impl BroadcastPipeline {
    /// Spawn the scheduler; must be called within a Tokio runtime
    pub fn spawn(scheduler: Scheduler, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (request_tx, request_rx) = mpsc::channel(capacity);
        let (response_tx, response_rx) = mpsc::channel(capacity);
        let tracker = scheduler.tracker.clone();

        let handle = tokio::spawn(scheduler.run(request_rx, response_tx));

        Self {
            requests: Mutex::new(Some(request_tx)),
            responses: Mutex::new(Some(response_rx)),
            handle: Mutex::new(Some(handle)),
            tracker,
        }
    }

    /// Enqueue a request, waiting while the queue is full
    pub async fn schedule(&self, request: Request) -> ClientResult<()> {
        let sender = self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ClientError::PipelineClosed)?;

        let id = request.id();
        if !id.is_zero() {
            self.tracker.submit(id);
        }

        sender
            .send(request)
            .await
            .map_err(|_| ClientError::PipelineClosed)?;

        self.tracker.advance(id, MessageStatus::Scheduled);
        crate::metrics::record_request_scheduled();
        Ok(())
    }

    /// Take the response stream; only the first call gets it
    pub fn responses(&self) -> Option<ResponseStream> {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|inner| ResponseStream { inner })
    }

    /// Close the request queue. Requests already accepted are still served
    /// and the response stream ends after the last one.
    pub fn close(&self) -> ClientResult<()> {
        match self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            Some(_) => {
                info!("Closing broadcast request queue");
                Ok(())
            }
            None => Err(ClientError::PipelineClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Close the request queue and wait for the scheduler to drain it
    ///
    /// Responses must be consumed (or the stream dropped) for the drain to
    /// finish when more requests are pending than the response queue holds.
    pub async fn shutdown(&self) -> ClientResult<()> {
        let sender = self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_some() {
            info!("Closing broadcast request queue");
        }
        drop(sender);

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Broadcast scheduler ended abnormally: {}", e);
            }
        }
        Ok(())
    }
}
