//! Requests, responses and message lifecycle status

use crate::error::ClientError;
use crate::tx::SignedTransaction;

use chrono::{DateTime, Utc};
use ethers::types::transaction::eip2930::AccessList;
use ethers::types::{Address, Bytes, H256, U256};
use sha3::{Digest, Keccak256};
use uuid::Uuid;

/// One intended transaction
///
/// The id starts out zero and must be assigned before scheduling; the
/// pipeline answers a zero id with `ClientError::InvalidRequest`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Request {
    id: H256,
    /// Sender account
    pub from: Address,
    /// Destination, `None` is sent to the zero address
    pub to: Option<Address>,
    pub value: U256,
    /// Gas limit, 0 means estimate
    pub gas: u64,
    /// Gas limit used verbatim when estimation fails
    pub gas_on_estimation_failed: Option<u64>,
    /// Unset or zero means ask the gas price advisor
    pub gas_price: Option<U256>,
    pub data: Bytes,
    pub access_list: Option<AccessList>,
}

impl Request {
    pub fn new(from: Address) -> Self {
        Self {
            from,
            ..Default::default()
        }
    }

    pub fn id(&self) -> H256 {
        self.id
    }

    pub fn set_id(&mut self, id: H256) {
        self.id = id;
    }

    /// Assign a fresh random id
    pub fn assign_id(mut self) -> Self {
        self.id = keccak(Uuid::new_v4().as_bytes());
        self
    }

    /// Assign the id derived from a caller-side sequence number
    pub fn assign_id_with_nonce(mut self, nonce: i64) -> Self {
        self.id = id_from_nonce(nonce);
        self
    }

    pub fn to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    pub fn value<T: Into<U256>>(mut self, value: T) -> Self {
        self.value = value.into();
        self
    }

    pub fn gas(mut self, gas: u64) -> Self {
        self.gas = gas;
        self
    }

    pub fn gas_on_estimation_failed(mut self, gas: u64) -> Self {
        self.gas_on_estimation_failed = Some(gas);
        self
    }

    pub fn gas_price<T: Into<U256>>(mut self, gas_price: T) -> Self {
        self.gas_price = Some(gas_price.into());
        self
    }

    pub fn data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = data.into();
        self
    }

    pub fn access_list(mut self, access_list: AccessList) -> Self {
        self.access_list = Some(access_list);
        self
    }
}

/// keccak256 over the minimal big-endian magnitude of `nonce`
pub fn id_from_nonce(nonce: i64) -> H256 {
    let bytes = nonce.unsigned_abs().to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    keccak(&bytes[first..])
}

fn keccak(data: &[u8]) -> H256 {
    H256::from_slice(&Keccak256::digest(data))
}

/// Outcome of one scheduled request
#[derive(Debug, Clone)]
pub struct Response {
    pub id: H256,
    pub result: Result<SignedTransaction, ClientError>,
}

impl Response {
    pub fn transaction(&self) -> Option<&SignedTransaction> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ClientError> {
        self.result.as_ref().err()
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Lifecycle of a message, in the order phases are reached
///
/// The pipeline drives Submitted through Inflight. OnChain and Finalized are
/// observed by receipt polling; NonceReleased and Expired are alternate
/// terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageStatus {
    Submitted,
    Scheduled,
    Queued,
    NonceAssigned,
    /// Broadcast but not yet on chain
    Inflight,
    OnChain,
    Finalized,
    NonceReleased,
    Expired,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Finalized | MessageStatus::NonceReleased | MessageStatus::Expired
        )
    }
}

/// Tracked state of one request
#[derive(Debug, Clone)]
pub struct Message {
    pub id: H256,
    pub status: MessageStatus,
    /// Set when the pipeline gave up on the request
    pub error: Option<String>,
    pub nonce: Option<u64>,
    pub tx_hash: Option<H256>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn new(id: H256) -> Self {
        Self {
            id,
            status: MessageStatus::Submitted,
            error: None,
            nonce: None,
            tx_hash: None,
            updated_at: Utc::now(),
        }
    }

    /// Move forward to `status`; earlier phases are ignored so racing
    /// producers and the scheduler cannot move a message backwards
    pub fn advance(&mut self, status: MessageStatus) -> bool {
        if status <= self.status {
            return false;
        }
        self.status = status;
        self.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_request_has_zero_id() {
        let req = Request::new(Address::repeat_byte(1));
        assert!(req.id().is_zero());
        assert!(!req.assign_id().id().is_zero());
    }

    #[test]
    fn test_random_ids_are_unique() {
        let a = Request::default().assign_id();
        let b = Request::default().assign_id();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_nonce_ids_are_deterministic() {
        assert_eq!(id_from_nonce(7), id_from_nonce(7));
        assert_ne!(id_from_nonce(7), id_from_nonce(8));
        // zero hashes the empty byte string
        assert_eq!(id_from_nonce(0), keccak(&[]));
        assert_eq!(id_from_nonce(256), keccak(&[1, 0]));
        assert_eq!(id_from_nonce(-256), id_from_nonce(256));
    }

    #[test]
    fn test_builder_sets_fields() {
        let to = Address::repeat_byte(2);
        let req = Request::new(Address::repeat_byte(1))
            .to(to)
            .value(10u64)
            .gas_on_estimation_failed(90_000)
            .data(vec![0xdeu8, 0xad]);

        assert_eq!(req.to, Some(to));
        assert_eq!(req.value, U256::from(10));
        assert_eq!(req.gas, 0);
        assert_eq!(req.gas_on_estimation_failed, Some(90_000));
        assert!(req.gas_price.is_none());
        assert_eq!(&req.data[..], &[0xde, 0xad]);
    }

    #[test]
    fn test_message_only_moves_forward() {
        let mut msg = Message::new(H256::repeat_byte(9));
        assert!(msg.advance(MessageStatus::Queued));
        assert!(!msg.advance(MessageStatus::Scheduled));
        assert_eq!(msg.status, MessageStatus::Queued);
        assert!(msg.advance(MessageStatus::Inflight));
        assert!(!msg.status.is_terminal());
    }
}
