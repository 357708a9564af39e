//! Lifecycle tracking for scheduled requests

use crate::message::{Message, MessageStatus};

use chrono::{Duration, Utc};
use dashmap::DashMap;
use ethers::types::H256;

/// Last known status of every request seen by the pipeline
#[derive(Default)]
pub struct MessageTracker {
    messages: DashMap<H256, Message>,
}

impl MessageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, id: H256) {
        self.messages.insert(id, Message::new(id));
    }

    pub fn advance(&self, id: H256, status: MessageStatus) {
        if let Some(mut message) = self.messages.get_mut(&id) {
            message.advance(status);
        }
    }

    pub fn nonce_assigned(&self, id: H256, nonce: u64) {
        if let Some(mut message) = self.messages.get_mut(&id) {
            message.nonce = Some(nonce);
            message.advance(MessageStatus::NonceAssigned);
        }
    }

    pub fn inflight(&self, id: H256, tx_hash: H256) {
        if let Some(mut message) = self.messages.get_mut(&id) {
            message.tx_hash = Some(tx_hash);
            message.advance(MessageStatus::Inflight);
        }
    }

    /// Record why the pipeline gave up; the status stays at the last phase reached
    pub fn fail(&self, id: H256, error: &str) {
        if let Some(mut message) = self.messages.get_mut(&id) {
            message.error = Some(error.to_string());
            message.updated_at = Utc::now();
        }
    }

    pub fn status(&self, id: &H256) -> Option<MessageStatus> {
        self.messages.get(id).map(|m| m.status)
    }

    pub fn get(&self, id: &H256) -> Option<Message> {
        self.messages.get(id).map(|m| m.clone())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop entries not updated within `max_age`, returning how many went
    pub fn prune(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let before = self.messages.len();
        self.messages.retain(|_, m| m.updated_at >= cutoff);
        before - self.messages.len()
    }
}
