//! Transaction building, signing and broadcast scheduling

mod builder;
mod gas;
mod pipeline;
mod signer;
mod tracker;

pub use builder::TransactionBuilder;
pub use gas::{apply_gas_limit_multiplier, GasPriceAdvisor, GAS_MULTIPLIER_PERMILLE};
pub use pipeline::{BroadcastPipeline, ResponseStream, Scheduler};
pub use signer::{FnSigner, LocalKeySigner, SignedTransaction, SignerRegistry, TransactionSigner};
pub use tracker::MessageTracker;
