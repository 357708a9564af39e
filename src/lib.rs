//! EVM transaction client
//!
//! Builds, signs and broadcasts transactions for accounts registered with a
//! [`Client`]. Nonces are allocated locally per account and reconciled with
//! the chain, so many requests for the same account can be scheduled back to
//! back without waiting for inclusion. Requests flow through a bounded queue
//! into a single scheduler task, and results come back on a response stream
//! in the order requests were dequeued.

pub mod chain;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod nonce;
pub mod tx;

#[cfg(test)]
mod testing;

pub use chain::{ChainProvider, ChainRpc, ReceiptOutcome};
pub use client::Client;
pub use config::Settings;
pub use error::{ClientError, ClientResult};
pub use message::{Message, MessageStatus, Request, Response};
pub use nonce::{NonceManager, NonceSource, NonceStorage, SimpleNonceManager};
pub use tx::{ResponseStream, SignedTransaction, TransactionSigner};
