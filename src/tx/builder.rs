//! Assembles unsigned transactions from requests

use super::gas::apply_gas_limit_multiplier;
use crate::chain::ChainRpc;
use crate::error::{ClientError, ClientResult};
use crate::message::Request;
use crate::nonce::NonceManager;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip2930::Eip2930TransactionRequest;
use ethers::types::{Address, TransactionRequest, U256};
use std::sync::Arc;
use tracing::{debug, warn};

/// Fills in gas limit, gas price and nonce for a request
pub struct TransactionBuilder {
    rpc: Arc<dyn ChainRpc>,
    nonce_manager: Arc<dyn NonceManager>,
}

impl TransactionBuilder {
    pub fn new(rpc: Arc<dyn ChainRpc>, nonce_manager: Arc<dyn NonceManager>) -> Self {
        Self { rpc, nonce_manager }
    }

    /// Build the unsigned transaction for `request`
    ///
    /// The nonce is allocated last. A failure after allocation leaves a gap
    /// in the account's nonce sequence; `reset_nonce` recovers from it.
    pub async fn build(&self, request: &Request) -> ClientResult<TypedTransaction> {
        // No contract-creation form: a missing destination calls the zero address
        let to = request.to.unwrap_or_else(Address::zero);

        let gas = if request.gas == 0 {
            self.estimate_gas_limit(request, to).await?
        } else {
            request.gas
        };

        let gas_price = match request.gas_price {
            Some(price) if !price.is_zero() => price,
            _ => self.nonce_manager.suggest_gas_price().await?,
        };

        let nonce = self.nonce_manager.pending_nonce_at(request.from).await?;

        debug!(
            "Built transaction for {:?}: nonce {}, gas {}, gas price {}",
            request.from, nonce, gas, gas_price
        );

        Ok(assemble(request, to, Some(gas), Some(gas_price), Some(nonce)))
    }

    async fn estimate_gas_limit(&self, request: &Request, to: Address) -> ClientResult<u64> {
        let call = assemble(request, to, None, request.gas_price, None);

        match self.rpc.estimate_gas(&call).await {
            Ok(estimate) => Ok(apply_gas_limit_multiplier(estimate)),
            Err(e) => match request.gas_on_estimation_failed {
                Some(fallback) => {
                    warn!(
                        "Gas estimation failed for {:?}, using fallback limit {}: {}",
                        request.from, fallback, e
                    );
                    Ok(fallback)
                }
                None => Err(match e {
                    ClientError::GasEstimation(_) => e,
                    other => ClientError::GasEstimation(other.to_string()),
                }),
            },
        }
    }
}

/// Legacy transaction, or EIP-2930 when the request carries an access list
fn assemble(
    request: &Request,
    to: Address,
    gas: Option<u64>,
    gas_price: Option<U256>,
    nonce: Option<u64>,
) -> TypedTransaction {
    let mut tx = TransactionRequest::new()
        .from(request.from)
        .to(to)
        .value(request.value)
        .data(request.data.clone());

    if let Some(gas) = gas {
        tx = tx.gas(gas);
    }
    if let Some(gas_price) = gas_price {
        tx = tx.gas_price(gas_price);
    }
    if let Some(nonce) = nonce {
        tx = tx.nonce(nonce);
    }

    match &request.access_list {
        Some(access_list) if !access_list.0.is_empty() => {
            TypedTransaction::Eip2930(Eip2930TransactionRequest::new(tx, access_list.clone()))
        }
        _ => TypedTransaction::Legacy(tx),
    }
}
