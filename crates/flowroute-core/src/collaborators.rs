//! Contracts for the external collaborators the registry drives.
//!
//! The Flow Ledger performs the actual continuous value movement; the
//! Position Manager holds accrued fees the FeePuller hook sweeps. Both are
//! consumed synchronously, and any failure aborts the enclosing operation.

use crate::types::{Address, Amount, FlowRate};
use thiserror::Error;

/// Flow Ledger failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("flow {from} -> {to} already exists for asset {asset}")]
    FlowExists {
        asset: Address,
        from: Address,
        to: Address,
    },

    #[error("no flow {from} -> {to} for asset {asset}")]
    FlowNotFound {
        asset: Address,
        from: Address,
        to: Address,
    },

    #[error("operator {operator} is not authorized by {owner} for asset {asset}")]
    NotAuthorized {
        asset: Address,
        owner: Address,
        operator: Address,
    },

    #[error("insufficient funds: {holder} holds {available} of {asset}, needs {required}")]
    InsufficientFunds {
        asset: Address,
        holder: Address,
        available: Amount,
        required: Amount,
    },

    #[error("invalid flow rate {0}")]
    InvalidRate(FlowRate),

    #[error("operation not supported by ledger: {0}")]
    Unsupported(&'static str),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Streaming-transfer primitive and token balances.
///
/// `operator` is the account issuing the call. It must either be `from` or
/// have been granted permission by `from` through
/// [`FlowLedger::grant_max_permission`].
pub trait FlowLedger: Send + Sync {
    fn create_flow(
        &self,
        operator: &Address,
        asset: &Address,
        from: &Address,
        to: &Address,
        rate: FlowRate,
    ) -> Result<(), LedgerError>;

    fn update_flow(
        &self,
        operator: &Address,
        asset: &Address,
        from: &Address,
        to: &Address,
        rate: FlowRate,
    ) -> Result<(), LedgerError>;

    fn delete_flow(
        &self,
        operator: &Address,
        asset: &Address,
        from: &Address,
        to: &Address,
    ) -> Result<(), LedgerError>;

    /// Current rate from `from` to `to`; zero when no flow exists.
    fn get_rate(&self, asset: &Address, from: &Address, to: &Address)
        -> Result<FlowRate, LedgerError>;

    fn balance_of(&self, asset: &Address, holder: &Address) -> Result<Amount, LedgerError>;

    /// Authorize `operator` to originate/terminate flows and move funds on
    /// behalf of `owner` for `asset`.
    fn grant_max_permission(
        &self,
        asset: &Address,
        owner: &Address,
        operator: &Address,
    ) -> Result<(), LedgerError>;

    fn transfer(
        &self,
        operator: &Address,
        asset: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError>;

    /// Convert `amount` of the underlying asset held by `holder` into `asset`.
    fn wrap(&self, asset: &Address, holder: &Address, amount: Amount) -> Result<(), LedgerError>;

    /// Underlying-asset accessor. `Ok(None)` or `Err(Unsupported)` both mean
    /// `asset` is not a wrapper.
    fn underlying_asset(&self, asset: &Address) -> Result<Option<Address>, LedgerError>;
}

/// Position Manager failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    /// The typed call is not implemented; callers fall back to generic
    /// balance/transfer calls.
    #[error("position manager does not support {0}")]
    Unsupported(&'static str),

    #[error("insufficient fees: requested {requested}, available {available}")]
    InsufficientFees { requested: Amount, available: Amount },

    #[error("position manager failure: {0}")]
    Failure(String),
}

/// Fee-bearing position manager consumed by the FeePuller hook.
pub trait PositionManager: Send + Sync {
    fn address(&self) -> Address;

    fn fee_balance(&self, token: &Address) -> Result<Amount, PositionError>;

    /// Withdraw `amount` of accrued fees to `to`, returning what was moved.
    fn withdraw_fees(
        &self,
        token: &Address,
        amount: Amount,
        to: &Address,
    ) -> Result<Amount, PositionError>;
}
