use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{HookKind, RedirectHook, RedirectRequest};
use crate::collaborators::{PositionError, PositionManager};
use crate::error::{FlowError, FlowResult};
use crate::registry::FlowRegistry;
use crate::types::{Address, Amount, FlowId};

/// Where a flow's fees come from and when they are worth sweeping.
#[derive(Clone)]
pub struct FeePullConfig {
    pub position_manager: Arc<dyn PositionManager>,
    pub token: Address,
    pub threshold: Amount,
}

impl FeePullConfig {
    pub fn validate(&self) -> FlowResult<()> {
        if self.threshold.is_zero() {
            return Err(FlowError::invalid("fee threshold must be positive"));
        }
        if self.token.is_zero() {
            return Err(FlowError::invalid("fee token must not be the null address"));
        }
        Ok(())
    }
}

/// Sweeps accrued Position Manager fees into the flow's treasury whenever
/// the flow is redirected.
///
/// Prefers the manager's typed fee calls. When those answer `Unsupported`,
/// falls back to reading the manager's ledger balance and moving it with a
/// ledger transfer signed by this hook.
pub struct FeePullerHook {
    address: Address,
    owner: Address,
    configs: Mutex<HashMap<FlowId, FeePullConfig>>,
}

impl FeePullerHook {
    pub fn new(address: Address, owner: Address) -> Self {
        Self {
            address,
            owner,
            configs: Mutex::new(HashMap::new()),
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn config(&self, flow_id: FlowId) -> Option<FeePullConfig> {
        self.configs.lock().get(&flow_id).cloned()
    }

    /// Hook owner or the flow's admin.
    pub fn configure(
        &self,
        caller: &Address,
        registry: &FlowRegistry,
        flow_id: FlowId,
        config: FeePullConfig,
    ) -> FlowResult<()> {
        let flow = registry.get_flow(flow_id)?;
        if *caller != self.owner && !flow.is_admin(caller) {
            return Err(FlowError::denied(caller, "configure fee puller"));
        }
        config.validate()?;
        info!(
            flow_id = %flow_id,
            position_manager = %config.position_manager.address(),
            token = %config.token,
            threshold = %config.threshold,
            "Fee puller configured"
        );
        self.configs.lock().insert(flow_id, config);
        Ok(())
    }

    /// Both paths journal the sweep with the registry, so a redirect that
    /// fails later returns the fees to the manager.
    fn pull(
        &self,
        registry: &mut FlowRegistry,
        config: &FeePullConfig,
        treasury: &Address,
    ) -> FlowResult<Option<Amount>> {
        let manager = &config.position_manager;
        match manager.fee_balance(&config.token) {
            Ok(available) => {
                if available < config.threshold {
                    return Ok(None);
                }
                let moved = manager.withdraw_fees(&config.token, available, treasury)?;
                registry.note_transfer(&config.token, &manager.address(), treasury, moved);
                Ok(Some(moved))
            }
            Err(PositionError::Unsupported(call)) => {
                debug!(call, position_manager = %manager.address(), "Typed fee call unsupported; using ledger fallback");
                let available = registry
                    .flow_ledger()
                    .balance_of(&config.token, &manager.address())?;
                if available < config.threshold {
                    return Ok(None);
                }
                registry.transfer(
                    &self.address,
                    &config.token,
                    &manager.address(),
                    treasury,
                    available,
                )?;
                Ok(Some(available))
            }
            Err(other) => Err(other.into()),
        }
    }
}

impl RedirectHook for FeePullerHook {
    fn address(&self) -> Address {
        self.address
    }

    fn kind(&self) -> HookKind {
        HookKind::FeePuller
    }

    fn before_redirect(
        &self,
        registry: &mut FlowRegistry,
        request: &RedirectRequest,
    ) -> FlowResult<Option<Address>> {
        let Some(config) = self.config(request.flow_id) else {
            debug!(flow_id = %request.flow_id, "Fee puller not configured for flow");
            return Ok(None);
        };
        let treasury = registry.get_flow(request.flow_id)?.treasury;

        match self.pull(registry, &config, &treasury)? {
            Some(amount) => {
                info!(flow_id = %request.flow_id, %treasury, token = %config.token, %amount, "Fees pulled into treasury")
            }
            None => {
                debug!(flow_id = %request.flow_id, threshold = %config.threshold, "Fees below threshold")
            }
        }
        Ok(None)
    }
}
