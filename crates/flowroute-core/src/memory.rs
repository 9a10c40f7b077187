//! In-memory collaborators.
//!
//! Deterministic stand-ins for the Flow Ledger and Position Manager, suitable
//! for tests and scenario runs. Rates are stored, never accrued: balances only
//! change through `mint`, `transfer`, and `wrap`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::collaborators::{FlowLedger, LedgerError, PositionError, PositionManager};
use crate::types::{Address, Amount, FlowRate};

/// A flow-mutating call observed by [`InMemoryFlowLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    Create {
        asset: Address,
        from: Address,
        to: Address,
        rate: FlowRate,
    },
    Update {
        asset: Address,
        from: Address,
        to: Address,
        rate: FlowRate,
    },
    Delete {
        asset: Address,
        from: Address,
        to: Address,
    },
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<(Address, Address), u128>,
    flows: HashMap<(Address, Address, Address), FlowRate>,
    operators: HashSet<(Address, Address, Address)>,
    underlying: HashMap<Address, Address>,
    rejected_receivers: HashSet<Address>,
    probe_unsupported: bool,
    calls: Vec<LedgerCall>,
}

impl LedgerState {
    fn authorize(
        &self,
        operator: &Address,
        asset: &Address,
        owner: &Address,
    ) -> Result<(), LedgerError> {
        if operator == owner || self.operators.contains(&(*asset, *owner, *operator)) {
            Ok(())
        } else {
            Err(LedgerError::NotAuthorized {
                asset: *asset,
                owner: *owner,
                operator: *operator,
            })
        }
    }

    fn check_receiver(&self, to: &Address) -> Result<(), LedgerError> {
        if self.rejected_receivers.contains(to) {
            return Err(LedgerError::Unavailable(format!(
                "receiver {} rejected by ledger",
                to
            )));
        }
        Ok(())
    }

    fn debit(&mut self, asset: &Address, holder: &Address, amount: u128) -> Result<(), LedgerError> {
        let balance = self.balances.entry((*asset, *holder)).or_default();
        if *balance < amount {
            return Err(LedgerError::InsufficientFunds {
                asset: *asset,
                holder: *holder,
                available: Amount(*balance),
                required: Amount(amount),
            });
        }
        *balance -= amount;
        Ok(())
    }

    fn credit(&mut self, asset: &Address, holder: &Address, amount: u128) {
        let balance = self.balances.entry((*asset, *holder)).or_default();
        *balance = balance.saturating_add(amount);
    }
}

/// In-memory Flow Ledger.
#[derive(Default)]
pub struct InMemoryFlowLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryFlowLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Credit `amount` of `asset` to `holder` out of thin air.
    pub fn mint(&self, asset: &Address, holder: &Address, amount: Amount) {
        self.state.lock().credit(asset, holder, amount.0);
    }

    /// Declare `asset` as a wrapper around `underlying`.
    pub fn register_wrapper(&self, asset: &Address, underlying: &Address) {
        self.state.lock().underlying.insert(*asset, *underlying);
    }

    /// Make every subsequent create/update towards `receiver` fail.
    pub fn reject_receiver(&self, receiver: &Address) {
        self.state.lock().rejected_receivers.insert(*receiver);
    }

    pub fn accept_receiver(&self, receiver: &Address) {
        self.state.lock().rejected_receivers.remove(receiver);
    }

    /// Make `underlying_asset` answer `Unsupported`, as a pure token would.
    pub fn set_probe_unsupported(&self, unsupported: bool) {
        self.state.lock().probe_unsupported = unsupported;
    }

    pub fn is_operator(&self, asset: &Address, owner: &Address, operator: &Address) -> bool {
        self.state
            .lock()
            .operators
            .contains(&(*asset, *owner, *operator))
    }

    /// Number of live flows across all assets.
    pub fn flow_count(&self) -> usize {
        self.state.lock().flows.len()
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }
}

impl FlowLedger for InMemoryFlowLedger {
    fn create_flow(
        &self,
        operator: &Address,
        asset: &Address,
        from: &Address,
        to: &Address,
        rate: FlowRate,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        state.authorize(operator, asset, from)?;
        state.check_receiver(to)?;
        if !rate.is_positive() {
            return Err(LedgerError::InvalidRate(rate));
        }
        let key = (*asset, *from, *to);
        if state.flows.contains_key(&key) {
            return Err(LedgerError::FlowExists {
                asset: *asset,
                from: *from,
                to: *to,
            });
        }
        state.flows.insert(key, rate);
        state.calls.push(LedgerCall::Create {
            asset: *asset,
            from: *from,
            to: *to,
            rate,
        });
        debug!(%asset, %from, %to, %rate, "ledger flow created");
        Ok(())
    }

    fn update_flow(
        &self,
        operator: &Address,
        asset: &Address,
        from: &Address,
        to: &Address,
        rate: FlowRate,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        state.authorize(operator, asset, from)?;
        state.check_receiver(to)?;
        if !rate.is_positive() {
            return Err(LedgerError::InvalidRate(rate));
        }
        let slot = state
            .flows
            .get_mut(&(*asset, *from, *to))
            .ok_or(LedgerError::FlowNotFound {
                asset: *asset,
                from: *from,
                to: *to,
            })?;
        *slot = rate;
        state.calls.push(LedgerCall::Update {
            asset: *asset,
            from: *from,
            to: *to,
            rate,
        });
        debug!(%asset, %from, %to, %rate, "ledger flow updated");
        Ok(())
    }

    fn delete_flow(
        &self,
        operator: &Address,
        asset: &Address,
        from: &Address,
        to: &Address,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        state.authorize(operator, asset, from)?;
        if state.flows.remove(&(*asset, *from, *to)).is_none() {
            return Err(LedgerError::FlowNotFound {
                asset: *asset,
                from: *from,
                to: *to,
            });
        }
        state.calls.push(LedgerCall::Delete {
            asset: *asset,
            from: *from,
            to: *to,
        });
        debug!(%asset, %from, %to, "ledger flow deleted");
        Ok(())
    }

    fn get_rate(
        &self,
        asset: &Address,
        from: &Address,
        to: &Address,
    ) -> Result<FlowRate, LedgerError> {
        Ok(self
            .state
            .lock()
            .flows
            .get(&(*asset, *from, *to))
            .copied()
            .unwrap_or(FlowRate::ZERO))
    }

    fn balance_of(&self, asset: &Address, holder: &Address) -> Result<Amount, LedgerError> {
        Ok(Amount(
            self.state
                .lock()
                .balances
                .get(&(*asset, *holder))
                .copied()
                .unwrap_or(0),
        ))
    }

    fn grant_max_permission(
        &self,
        asset: &Address,
        owner: &Address,
        operator: &Address,
    ) -> Result<(), LedgerError> {
        self.state
            .lock()
            .operators
            .insert((*asset, *owner, *operator));
        debug!(%asset, %owner, %operator, "ledger permission granted");
        Ok(())
    }

    fn transfer(
        &self,
        operator: &Address,
        asset: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        state.authorize(operator, asset, from)?;
        state.debit(asset, from, amount.0)?;
        state.credit(asset, to, amount.0);
        Ok(())
    }

    fn wrap(&self, asset: &Address, holder: &Address, amount: Amount) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        let underlying = state
            .underlying
            .get(asset)
            .copied()
            .ok_or(LedgerError::Unsupported("wrap on a non-wrapper asset"))?;
        state.debit(&underlying, holder, amount.0)?;
        state.credit(asset, holder, amount.0);
        Ok(())
    }

    fn underlying_asset(&self, asset: &Address) -> Result<Option<Address>, LedgerError> {
        let state = self.state.lock();
        if state.probe_unsupported {
            return Err(LedgerError::Unsupported("underlying asset accessor"));
        }
        Ok(state.underlying.get(asset).copied())
    }
}

/// Position Manager whose accrued fees are plain ledger balances of its own
/// address.
///
/// With `typed = false` the typed fee calls answer `Unsupported`, forcing
/// callers onto the generic balance/transfer path.
pub struct InMemoryPositionManager {
    address: Address,
    ledger: Arc<dyn FlowLedger>,
    typed: bool,
}

impl InMemoryPositionManager {
    pub fn new(address: Address, ledger: Arc<dyn FlowLedger>) -> Self {
        Self {
            address,
            ledger,
            typed: true,
        }
    }

    pub fn without_typed_interface(mut self) -> Self {
        self.typed = false;
        self
    }
}

impl PositionManager for InMemoryPositionManager {
    fn address(&self) -> Address {
        self.address
    }

    fn fee_balance(&self, token: &Address) -> Result<Amount, PositionError> {
        if !self.typed {
            return Err(PositionError::Unsupported("fee_balance"));
        }
        self.ledger
            .balance_of(token, &self.address)
            .map_err(|e| PositionError::Failure(e.to_string()))
    }

    fn withdraw_fees(
        &self,
        token: &Address,
        amount: Amount,
        to: &Address,
    ) -> Result<Amount, PositionError> {
        if !self.typed {
            return Err(PositionError::Unsupported("withdraw_fees"));
        }
        let available = self.fee_balance(token)?;
        if available < amount {
            return Err(PositionError::InsufficientFees {
                requested: amount,
                available,
            });
        }
        self.ledger
            .transfer(&self.address, token, &self.address, to, amount)
            .map_err(|e| PositionError::Failure(e.to_string()))?;
        Ok(amount)
    }
}
