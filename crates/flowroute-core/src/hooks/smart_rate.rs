use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{HookKind, RedirectHook, RedirectRequest};
use crate::error::{FlowError, FlowResult};
use crate::registry::FlowRegistry;
use crate::types::{Address, Amount, FlowId, FlowRate};

/// Rate that drains `balance` over `duration_secs`, floored at `min_rate`.
///
/// An empty balance yields zero regardless of the floor.
pub fn compute_rate(balance: Amount, duration_secs: u64, min_rate: FlowRate) -> FlowRate {
    if balance.is_zero() || duration_secs == 0 {
        return FlowRate::ZERO;
    }
    let raw = balance.0 / u128::from(duration_secs);
    let raw = i128::try_from(raw).unwrap_or(i128::MAX);
    FlowRate(raw.max(min_rate.0))
}

/// Re-targets the flow rate to the treasury's balance on every redirect.
///
/// Never vetoes. The hook pushes the new rate with its own identity, so it
/// must be the flow's rate agent (or admin).
pub struct SmartFlowRateHook {
    address: Address,
    owner: Address,
    min_rate: FlowRate,
    durations: Mutex<HashMap<FlowId, u64>>,
}

impl SmartFlowRateHook {
    pub fn new(address: Address, owner: Address, min_rate: FlowRate) -> Self {
        Self {
            address,
            owner,
            min_rate,
            durations: Mutex::new(HashMap::new()),
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn min_rate(&self) -> FlowRate {
        self.min_rate
    }

    pub fn target_duration(&self, flow_id: FlowId) -> Option<u64> {
        self.durations.lock().get(&flow_id).copied()
    }

    /// Set how long the treasury balance should last. Hook owner or the
    /// flow's admin.
    pub fn set_target_duration(
        &self,
        caller: &Address,
        registry: &FlowRegistry,
        flow_id: FlowId,
        duration_secs: u64,
    ) -> FlowResult<()> {
        let flow = registry.get_flow(flow_id)?;
        if *caller != self.owner && !flow.is_admin(caller) {
            return Err(FlowError::denied(caller, "set target duration"));
        }
        if duration_secs == 0 {
            return Err(FlowError::invalid("target duration must be positive"));
        }
        self.durations.lock().insert(flow_id, duration_secs);
        info!(flow_id = %flow_id, duration_secs, "Target duration set");
        Ok(())
    }
}

impl RedirectHook for SmartFlowRateHook {
    fn address(&self) -> Address {
        self.address
    }

    fn kind(&self) -> HookKind {
        HookKind::SmartFlowRate
    }

    fn before_redirect(
        &self,
        registry: &mut FlowRegistry,
        request: &RedirectRequest,
    ) -> FlowResult<Option<Address>> {
        let Some(duration) = self.target_duration(request.flow_id) else {
            debug!(flow_id = %request.flow_id, "No target duration; rate left as is");
            return Ok(None);
        };

        let flow = registry.get_flow(request.flow_id)?;
        let (asset, treasury, current) = (flow.asset, flow.treasury, flow.current_rate);
        let balance = registry.flow_ledger().balance_of(&asset, &treasury)?;
        let rate = compute_rate(balance, duration, self.min_rate);

        if rate.is_zero() {
            debug!(flow_id = %request.flow_id, %treasury, "Treasury empty; no rate push");
            return Ok(None);
        }
        if rate == current {
            debug!(flow_id = %request.flow_id, %rate, "Computed rate unchanged");
            return Ok(None);
        }

        registry.set_rate(&self.address, request.flow_id, rate, &request.old_recipient)?;
        info!(flow_id = %request.flow_id, %balance, duration, old = %current, new = %rate, "Smart rate pushed");
        Ok(None)
    }
}
