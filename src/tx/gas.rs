//! Gas price advice and gas limit padding

use crate::chain::ChainRpc;
use crate::error::ClientResult;

use ethers::types::U256;
use std::sync::Arc;
use tracing::debug;

/// Both the gas limit and the gas price are padded by 1.5x, in permille
pub const GAS_MULTIPLIER_PERMILLE: u64 = 1500;

/// Pad an estimated gas limit: `estimate * 1500 / 1000`, truncating
pub fn apply_gas_limit_multiplier(estimate: u64) -> u64 {
    let padded = u128::from(estimate) * u128::from(GAS_MULTIPLIER_PERMILLE) / 1000;
    u64::try_from(padded).unwrap_or(u64::MAX)
}

/// Wraps the chain's gas price query with a fixed multiplier that biases
/// inclusion priority
pub struct GasPriceAdvisor {
    rpc: Arc<dyn ChainRpc>,
    multiplier_permille: u64,
}

impl GasPriceAdvisor {
    /// Create a new advisor
    pub fn new(rpc: Arc<dyn ChainRpc>) -> Self {
        Self {
            rpc,
            multiplier_permille: GAS_MULTIPLIER_PERMILLE,
        }
    }

    /// Get the padded gas price
    pub async fn suggest_gas_price(&self) -> ClientResult<U256> {
        let price = self.rpc.suggest_gas_price().await?;
        let padded = price.saturating_mul(U256::from(self.multiplier_permille)) / U256::from(1000u64);

        debug!("Gas price {} padded to {}", price, padded);
        Ok(padded)
    }
}
