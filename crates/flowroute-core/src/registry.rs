//! Flow Registry: the central state machine.
//!
//! Per flow:
//!
//! ```text
//! CREATED (inactive) --set_rate(r > 0)--> ACTIVE
//! ACTIVE --redirect--> ACTIVE (new recipient)
//! ACTIVE --set_rate(r > 0)--> ACTIVE (new rate)
//! ACTIVE --stop | set_rate(0)--> INACTIVE --set_rate(r > 0)--> ACTIVE
//! ```
//!
//! Every mutating entry point runs inside a checkpoint. Registry-local state
//! is snapshotted and each Flow Ledger call journals its inverse, so an error
//! anywhere (hook, ledger, ownership) leaves no trace of the operation.
//! `redirect` and `stop` additionally hold a non-reentrant guard because the
//! hook is arbitrary code with mutable access to the registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::collaborators::FlowLedger;
use crate::config::FlowrouteConfig;
use crate::error::{FlowError, FlowResult};
use crate::events::{FlowEvent, RecordedEvent};
use crate::hooks::{RedirectHook, RedirectRequest};
use crate::ownership::OwnershipLedger;
use crate::types::{
    Address, Amount, DescriptorAttribute, FlowDescriptor, FlowId, FlowRate, FlowRecord,
};

/// Inverse of a Flow Ledger call, replayed on rollback.
#[derive(Debug, Clone)]
enum LedgerUndo {
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
    /// Funds moved `from` -> `to`; reverted by moving them back on behalf of `to`.
    Transfer {
        asset: Address,
        from: Address,
        to: Address,
        amount: Amount,
    },
}

#[derive(Clone)]
struct RegistryState {
    flows: Vec<FlowRecord>,
    hooks: HashMap<FlowId, Arc<dyn RedirectHook>>,
    ownership: OwnershipLedger,
}

/// Hook consulted by a redirect, kept until the redirect commits.
type ConsultedHook = (Arc<dyn RedirectHook>, RedirectRequest);

struct Checkpoint {
    state: RegistryState,
    events: usize,
    journal: usize,
}

pub struct FlowRegistry {
    address: Address,
    ledger: Arc<dyn FlowLedger>,
    clock: Arc<dyn Clock>,
    config: FlowrouteConfig,
    state: RegistryState,
    events: Vec<RecordedEvent>,
    journal: Vec<LedgerUndo>,
    depth: usize,
    locked: bool,
}

impl FlowRegistry {
    pub fn new(ledger: Arc<dyn FlowLedger>, clock: Arc<dyn Clock>) -> Self {
        Self::with_config(ledger, clock, FlowrouteConfig::default())
    }

    pub fn with_config(
        ledger: Arc<dyn FlowLedger>,
        clock: Arc<dyn Clock>,
        config: FlowrouteConfig,
    ) -> Self {
        let ownership = OwnershipLedger::new(&config.ownership.name, &config.ownership.symbol);
        Self {
            address: Address::derive("flowroute.registry", config.ownership.symbol.as_bytes()),
            ledger,
            clock,
            config,
            state: RegistryState {
                flows: Vec::new(),
                hooks: HashMap::new(),
                ownership,
            },
            events: Vec::new(),
            journal: Vec::new(),
            depth: 0,
            locked: false,
        }
    }

    /// Override the registry's own account (the operator it presents to the
    /// Flow Ledger).
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = address;
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn flow_ledger(&self) -> &Arc<dyn FlowLedger> {
        &self.ledger
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn config(&self) -> &FlowrouteConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------

    /// Register a new, inactive flow funded by `caller`.
    pub fn create_flow(
        &mut self,
        caller: &Address,
        admin: &Address,
        redirect_agent: &Address,
        rate_agent: &Address,
        asset: &Address,
        metadata: Option<FlowDescriptor>,
    ) -> FlowResult<FlowId> {
        if admin.is_zero() {
            return Err(FlowError::invalid("admin must not be the null address"));
        }
        if asset.is_zero() {
            return Err(FlowError::invalid("asset must not be the null address"));
        }
        if caller.is_zero() {
            return Err(FlowError::invalid("treasury must not be the null address"));
        }

        let id = FlowId(self.state.flows.len() as u64 + 1);
        self.state.flows.push(FlowRecord {
            id,
            admin: *admin,
            redirect_agent: *redirect_agent,
            rate_agent: *rate_agent,
            treasury: *caller,
            asset: *asset,
            current_recipient: None,
            current_rate: FlowRate::ZERO,
            active: false,
            hook: None,
            metadata,
            created_at: self.clock.now(),
        });
        self.emit(FlowEvent::FlowCreated {
            flow_id: id,
            treasury: *caller,
            admin: *admin,
            redirect_agent: *redirect_agent,
            rate_agent: *rate_agent,
            asset: *asset,
        });
        info!(flow_id = %id, treasury = %caller, %admin, %asset, "Flow created");
        Ok(id)
    }

    /// Start a flow, change its rate, or stop it with `rate == 0`.
    ///
    /// `recipient` is only consulted when the flow is inactive.
    pub fn set_rate(
        &mut self,
        caller: &Address,
        flow_id: FlowId,
        rate: FlowRate,
        recipient: &Address,
    ) -> FlowResult<()> {
        self.transact(|registry| registry.apply_set_rate(caller, flow_id, rate, recipient))
    }

    /// Terminate an active flow. Admin only.
    pub fn stop(&mut self, caller: &Address, flow_id: FlowId) -> FlowResult<()> {
        self.guarded(|registry| {
            let flow = registry.flow(flow_id)?;
            if !flow.is_admin(caller) {
                return Err(FlowError::denied(caller, "stop flow"));
            }
            if !flow.active {
                return Err(FlowError::FlowInactive(flow_id));
            }
            registry.deactivate(caller, flow_id)
        })
    }

    /// Point an active flow at a new recipient, subject to the flow's hook.
    ///
    /// Returns the recipient actually in effect afterwards, which differs from
    /// `new_recipient` when the hook overrides it.
    pub fn redirect(
        &mut self,
        caller: &Address,
        flow_id: FlowId,
        new_recipient: &Address,
    ) -> FlowResult<Address> {
        let (effective, consulted) =
            self.guarded(|registry| registry.apply_redirect(caller, flow_id, new_recipient))?;
        if let Some((hook, request)) = consulted {
            hook.after_redirect(self, &request, &effective);
        }
        Ok(effective)
    }

    pub fn set_hook(
        &mut self,
        caller: &Address,
        flow_id: FlowId,
        hook: Option<Arc<dyn RedirectHook>>,
    ) -> FlowResult<()> {
        let old = self.admin_record(caller, flow_id, "set hook")?.hook;
        let new = hook.as_ref().map(|h| h.address());
        match hook {
            Some(hook) => {
                self.state.hooks.insert(flow_id, hook);
            }
            None => {
                self.state.hooks.remove(&flow_id);
            }
        }
        self.record_mut(flow_id)?.hook = new;
        self.emit(FlowEvent::HookChanged { flow_id, old, new });
        info!(flow_id = %flow_id, old = ?old, new = ?new, "Hook changed");
        Ok(())
    }

    pub fn set_redirect_agent(
        &mut self,
        caller: &Address,
        flow_id: FlowId,
        agent: &Address,
    ) -> FlowResult<()> {
        let old = self.admin_record(caller, flow_id, "set redirect agent")?.redirect_agent;
        self.record_mut(flow_id)?.redirect_agent = *agent;
        self.emit(FlowEvent::RedirectAgentChanged {
            flow_id,
            old,
            new: *agent,
        });
        info!(flow_id = %flow_id, %old, new = %agent, "Redirect agent changed");
        Ok(())
    }

    pub fn set_rate_agent(
        &mut self,
        caller: &Address,
        flow_id: FlowId,
        agent: &Address,
    ) -> FlowResult<()> {
        let old = self.admin_record(caller, flow_id, "set rate agent")?.rate_agent;
        self.record_mut(flow_id)?.rate_agent = *agent;
        self.emit(FlowEvent::RateAgentChanged {
            flow_id,
            old,
            new: *agent,
        });
        info!(flow_id = %flow_id, %old, new = %agent, "Rate agent changed");
        Ok(())
    }

    pub fn transfer_admin(
        &mut self,
        caller: &Address,
        flow_id: FlowId,
        new_admin: &Address,
    ) -> FlowResult<()> {
        if new_admin.is_zero() {
            return Err(FlowError::invalid("admin must not be the null address"));
        }
        let old = self.admin_record(caller, flow_id, "transfer admin")?.admin;
        self.record_mut(flow_id)?.admin = *new_admin;
        self.emit(FlowEvent::AdminTransferred {
            flow_id,
            old,
            new: *new_admin,
        });
        info!(flow_id = %flow_id, %old, new = %new_admin, "Admin transferred");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    pub fn get_flow(&self, flow_id: FlowId) -> FlowResult<&FlowRecord> {
        self.flow(flow_id)
    }

    pub fn get_admin(&self, flow_id: FlowId) -> FlowResult<Address> {
        Ok(self.flow(flow_id)?.admin)
    }

    pub fn get_current_recipient(&self, flow_id: FlowId) -> FlowResult<Option<Address>> {
        Ok(self.flow(flow_id)?.active_recipient())
    }

    /// Live rate from the Flow Ledger. The cached `current_rate` on the
    /// record may lag after updates made outside the registry.
    pub fn get_current_rate(&self, flow_id: FlowId) -> FlowResult<FlowRate> {
        let flow = self.flow(flow_id)?;
        match flow.active_recipient() {
            Some(recipient) => Ok(self
                .ledger
                .get_rate(&flow.asset, &flow.treasury, &recipient)?),
            None => Ok(FlowRate::ZERO),
        }
    }

    pub fn get_hook(&self, flow_id: FlowId) -> FlowResult<Option<Address>> {
        Ok(self.flow(flow_id)?.hook)
    }

    pub fn is_active(&self, flow_id: FlowId) -> bool {
        self.flow(flow_id).map(|f| f.active).unwrap_or(false)
    }

    pub fn owner_of(&self, flow_id: FlowId) -> FlowResult<Address> {
        self.flow(flow_id)?;
        self.state.ownership.owner_of(flow_id)
    }

    pub fn balance_of(&self, owner: &Address) -> u64 {
        self.state.ownership.balance_of(owner)
    }

    pub fn ownership(&self) -> &OwnershipLedger {
        &self.state.ownership
    }

    pub fn flow_count(&self) -> usize {
        self.state.flows.len()
    }

    pub fn flows(&self) -> &[FlowRecord] {
        &self.state.flows
    }

    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    /// Metadata supplied at creation, or a default descriptor derived from
    /// the flow's current state.
    pub fn descriptor(&self, flow_id: FlowId) -> FlowResult<FlowDescriptor> {
        let flow = self.flow(flow_id)?;
        if let Some(metadata) = &flow.metadata {
            return Ok(metadata.clone());
        }

        let mut attributes = vec![
            DescriptorAttribute::new("asset", flow.asset),
            DescriptorAttribute::new("treasury", flow.treasury),
            DescriptorAttribute::new(
                "status",
                if flow.active { "active" } else { "inactive" },
            ),
            DescriptorAttribute::new("rate", flow.current_rate.0),
        ];
        if let Some(recipient) = flow.active_recipient() {
            attributes.push(DescriptorAttribute::new("recipient", recipient));
        }

        Ok(FlowDescriptor {
            name: format!("{} #{}", self.config.ownership.name, flow_id),
            description: self.config.descriptor.default_description.clone(),
            image: self.config.descriptor.default_image.clone(),
            attributes,
        })
    }

    pub fn descriptor_json(&self, flow_id: FlowId) -> FlowResult<String> {
        let descriptor = self.descriptor(flow_id)?;
        serde_json::to_string(&descriptor)
            .map_err(|e| FlowError::invalid(format!("descriptor serialization: {}", e)))
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn apply_set_rate(
        &mut self,
        caller: &Address,
        flow_id: FlowId,
        rate: FlowRate,
        recipient: &Address,
    ) -> FlowResult<()> {
        let flow = self.flow(flow_id)?.clone();
        if !flow.can_set_rate(caller) {
            return Err(FlowError::denied(caller, "set flow rate"));
        }

        let Some(current) = flow.active_recipient() else {
            if !rate.is_positive() {
                return Err(FlowError::invalid(format!(
                    "rate must be positive to start flow {}, got {}",
                    flow_id, rate
                )));
            }
            if recipient.is_zero() {
                return Err(FlowError::invalid("recipient must not be the null address"));
            }

            self.ledger_create(&flow.asset, &flow.treasury, recipient, rate)?;
            let record = self.record_mut(flow_id)?;
            record.active = true;
            record.current_recipient = Some(*recipient);
            record.current_rate = rate;
            self.state.ownership.mint(flow_id, *recipient)?;
            self.emit(FlowEvent::Transfer {
                flow_id,
                from: Address::ZERO,
                to: *recipient,
            });
            self.emit(FlowEvent::FlowActivated {
                flow_id,
                recipient: *recipient,
                rate,
                by: *caller,
            });
            info!(flow_id = %flow_id, %recipient, %rate, by = %caller, "Flow activated");
            return Ok(());
        };

        if rate.is_zero() {
            return self.deactivate(caller, flow_id);
        }
        if !rate.is_positive() {
            return Err(FlowError::invalid(format!(
                "rate must not be negative, got {}",
                rate
            )));
        }

        self.ledger_update(&flow.asset, &flow.treasury, &current, rate)?;
        self.record_mut(flow_id)?.current_rate = rate;
        self.emit(FlowEvent::FlowRateUpdated {
            flow_id,
            old_rate: flow.current_rate,
            new_rate: rate,
            by: *caller,
        });
        info!(flow_id = %flow_id, old = %flow.current_rate, new = %rate, by = %caller, "Flow rate updated");
        Ok(())
    }

    fn apply_redirect(
        &mut self,
        caller: &Address,
        flow_id: FlowId,
        new_recipient: &Address,
    ) -> FlowResult<(Address, Option<ConsultedHook>)> {
        let flow = self.flow(flow_id)?;
        if !flow.can_redirect(caller) {
            return Err(FlowError::denied(caller, "redirect flow"));
        }
        let Some(old) = flow.active_recipient() else {
            return Err(FlowError::FlowInactive(flow_id));
        };
        if new_recipient.is_zero() {
            return Err(FlowError::invalid("recipient must not be the null address"));
        }

        let request = RedirectRequest {
            flow_id,
            old_recipient: old,
            new_recipient: *new_recipient,
            caller: *caller,
        };
        let hook = self.state.hooks.get(&flow_id).cloned();
        let effective = match &hook {
            Some(hook) => {
                debug!(flow_id = %flow_id, hook = %hook.address(), kind = ?hook.kind(), "Invoking redirect hook");
                match hook.before_redirect(self, &request)? {
                    Some(forced) => {
                        debug!(flow_id = %flow_id, requested = %new_recipient, forced = %forced, "Hook overrode recipient");
                        forced
                    }
                    None => *new_recipient,
                }
            }
            None => *new_recipient,
        };
        let consulted = hook.map(|hook| (hook, request));
        if effective.is_zero() {
            return Err(FlowError::invalid("hook resolved recipient to the null address"));
        }

        // The hook may have changed the rate or stopped the flow; read again.
        let flow = self.flow(flow_id)?.clone();
        let Some(old) = flow.active_recipient() else {
            return Err(FlowError::FlowInactive(flow_id));
        };
        if effective == old {
            debug!(flow_id = %flow_id, recipient = %old, "Redirect to current recipient is a no-op");
            return Ok((old, consulted));
        }

        self.ledger_delete(&flow.asset, &flow.treasury, &old)?;
        self.ledger_create(&flow.asset, &flow.treasury, &effective, flow.current_rate)?;

        self.record_mut(flow_id)?.current_recipient = Some(effective);
        self.state.ownership.transfer(flow_id, &old, effective)?;
        self.emit(FlowEvent::Transfer {
            flow_id,
            from: old,
            to: effective,
        });
        self.emit(FlowEvent::FlowRedirected {
            flow_id,
            from: old,
            to: effective,
            requested: *new_recipient,
            by: *caller,
        });
        info!(flow_id = %flow_id, from = %old, to = %effective, by = %caller, "Flow redirected");
        Ok((effective, consulted))
    }

    fn deactivate(&mut self, caller: &Address, flow_id: FlowId) -> FlowResult<()> {
        let flow = self.flow(flow_id)?.clone();
        let Some(recipient) = flow.active_recipient() else {
            return Err(FlowError::FlowInactive(flow_id));
        };

        self.ledger_delete(&flow.asset, &flow.treasury, &recipient)?;
        let record = self.record_mut(flow_id)?;
        record.active = false;
        record.current_recipient = None;
        record.current_rate = FlowRate::ZERO;
        self.state.ownership.burn(flow_id)?;
        self.emit(FlowEvent::Transfer {
            flow_id,
            from: recipient,
            to: Address::ZERO,
        });
        self.emit(FlowEvent::FlowStopped {
            flow_id,
            recipient,
            by: *caller,
        });
        info!(flow_id = %flow_id, %recipient, by = %caller, "Flow stopped");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Checkpointing
    // ------------------------------------------------------------------

    fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> FlowResult<T>) -> FlowResult<T> {
        if self.locked {
            warn!("Rejected reentrant registry call");
            return Err(FlowError::Reentrancy);
        }
        self.locked = true;
        let result = self.transact(op);
        self.locked = false;
        result
    }

    fn transact<T>(&mut self, op: impl FnOnce(&mut Self) -> FlowResult<T>) -> FlowResult<T> {
        let checkpoint = Checkpoint {
            state: self.state.clone(),
            events: self.events.len(),
            journal: self.journal.len(),
        };
        self.depth += 1;
        let result = op(self);
        self.depth -= 1;

        match result {
            Ok(value) => {
                if self.depth == 0 {
                    self.journal.clear();
                }
                Ok(value)
            }
            Err(err) => {
                warn!(error = %err, undo = self.journal.len() - checkpoint.journal, "Rolling back registry operation");
                self.rollback(checkpoint);
                Err(err)
            }
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        while self.journal.len() > checkpoint.journal {
            let Some(undo) = self.journal.pop() else {
                break;
            };
            let outcome = match &undo {
                LedgerUndo::Create {
                    asset,
                    from,
                    to,
                    rate,
                } => self.ledger.create_flow(&self.address, asset, from, to, *rate),
                LedgerUndo::Update {
                    asset,
                    from,
                    to,
                    rate,
                } => self.ledger.update_flow(&self.address, asset, from, to, *rate),
                LedgerUndo::Delete { asset, from, to } => {
                    self.ledger.delete_flow(&self.address, asset, from, to)
                }
                LedgerUndo::Transfer {
                    asset,
                    from,
                    to,
                    amount,
                } => self.ledger.transfer(to, asset, to, from, *amount),
            };
            if let Err(err) = outcome {
                error!(error = %err, undo = ?undo, "Flow ledger compensation failed");
            }
        }
        self.state = checkpoint.state;
        self.events.truncate(checkpoint.events);
    }

    fn ledger_create(
        &mut self,
        asset: &Address,
        from: &Address,
        to: &Address,
        rate: FlowRate,
    ) -> FlowResult<()> {
        self.ledger.create_flow(&self.address, asset, from, to, rate)?;
        self.journal.push(LedgerUndo::Delete {
            asset: *asset,
            from: *from,
            to: *to,
        });
        Ok(())
    }

    fn ledger_update(
        &mut self,
        asset: &Address,
        from: &Address,
        to: &Address,
        rate: FlowRate,
    ) -> FlowResult<()> {
        let previous = self.ledger.get_rate(asset, from, to)?;
        self.ledger.update_flow(&self.address, asset, from, to, rate)?;
        self.journal.push(LedgerUndo::Update {
            asset: *asset,
            from: *from,
            to: *to,
            rate: previous,
        });
        Ok(())
    }

    fn ledger_delete(&mut self, asset: &Address, from: &Address, to: &Address) -> FlowResult<()> {
        let previous = self.ledger.get_rate(asset, from, to)?;
        self.ledger.delete_flow(&self.address, asset, from, to)?;
        self.journal.push(LedgerUndo::Create {
            asset: *asset,
            from: *from,
            to: *to,
            rate: previous,
        });
        Ok(())
    }

    /// Move funds on the Flow Ledger as `operator`. Inside an operation the
    /// transfer is reverted if the operation fails.
    pub fn transfer(
        &mut self,
        operator: &Address,
        asset: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> FlowResult<()> {
        self.ledger.transfer(operator, asset, from, to, amount)?;
        self.note_transfer(asset, from, to, amount);
        Ok(())
    }

    /// Record a transfer a collaborator already performed on the Flow Ledger
    /// so that a failing operation moves the funds back.
    pub fn note_transfer(&mut self, asset: &Address, from: &Address, to: &Address, amount: Amount) {
        if self.depth == 0 || amount.is_zero() {
            return;
        }
        self.journal.push(LedgerUndo::Transfer {
            asset: *asset,
            from: *from,
            to: *to,
            amount,
        });
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn flow(&self, flow_id: FlowId) -> FlowResult<&FlowRecord> {
        flow_id
            .0
            .checked_sub(1)
            .and_then(|index| self.state.flows.get(index as usize))
            .ok_or(FlowError::FlowNotFound(flow_id))
    }

    fn record_mut(&mut self, flow_id: FlowId) -> FlowResult<&mut FlowRecord> {
        flow_id
            .0
            .checked_sub(1)
            .and_then(|index| self.state.flows.get_mut(index as usize))
            .ok_or(FlowError::FlowNotFound(flow_id))
    }

    fn admin_record(
        &self,
        caller: &Address,
        flow_id: FlowId,
        action: &'static str,
    ) -> FlowResult<&FlowRecord> {
        let flow = self.flow(flow_id)?;
        if !flow.is_admin(caller) {
            return Err(FlowError::denied(caller, action));
        }
        Ok(flow)
    }

    fn emit(&mut self, event: FlowEvent) {
        let sequence = self.events.len() as u64;
        self.events.push(RecordedEvent {
            sequence,
            timestamp: self.clock.now(),
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::{InMemoryFlowLedger, LedgerCall};
    use crate::types::Amount;

    struct Fixture {
        ledger: Arc<InMemoryFlowLedger>,
        registry: FlowRegistry,
        treasury: Address,
        asset: Address,
        admin: Address,
        redirector: Address,
        rater: Address,
    }

    fn fixture() -> Fixture {
        let ledger = InMemoryFlowLedger::shared();
        let registry = FlowRegistry::new(ledger.clone(), Arc::new(ManualClock::new(0)));
        let treasury = Address::labeled("treasury");
        let asset = Address::labeled("usdcx");
        ledger
            .grant_max_permission(&asset, &treasury, &registry.address())
            .unwrap();
        ledger.mint(&asset, &treasury, Amount(1_000_000));
        Fixture {
            ledger,
            registry,
            treasury,
            asset,
            admin: Address::labeled("admin"),
            redirector: Address::labeled("redirector"),
            rater: Address::labeled("rater"),
        }
    }

    fn create(f: &mut Fixture) -> FlowId {
        f.registry
            .create_flow(&f.treasury, &f.admin, &f.redirector, &f.rater, &f.asset, None)
            .unwrap()
    }

    #[test]
    fn create_rejects_null_admin_and_asset() {
        let mut f = fixture();
        let err = f
            .registry
            .create_flow(&f.treasury, &Address::ZERO, &f.redirector, &f.rater, &f.asset, None)
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidArgument(_)));
        let err = f
            .registry
            .create_flow(&f.treasury, &f.admin, &f.redirector, &f.rater, &Address::ZERO, None)
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidArgument(_)));
        assert_eq!(f.registry.flow_count(), 0);
    }

    #[test]
    fn new_flow_is_inactive_with_caller_as_treasury() {
        let mut f = fixture();
        let id = create(&mut f);
        assert_eq!(id, FlowId(1));
        let flow = f.registry.get_flow(id).unwrap();
        assert_eq!(flow.treasury, f.treasury);
        assert!(!flow.active);
        assert_eq!(flow.current_recipient, None);
        assert!(matches!(
            f.registry.owner_of(id),
            Err(FlowError::FlowInactive(_))
        ));
    }

    #[test]
    fn set_rate_update_uses_single_update_call() {
        let mut f = fixture();
        let id = create(&mut f);
        let x = Address::labeled("x");
        f.registry.set_rate(&f.rater, id, FlowRate(100), &x).unwrap();
        f.ledger.clear_calls();

        f.registry
            .set_rate(&f.rater, id, FlowRate(250), &Address::ZERO)
            .unwrap();
        assert_eq!(
            f.ledger.calls(),
            vec![LedgerCall::Update {
                asset: f.asset,
                from: f.treasury,
                to: x,
                rate: FlowRate(250)
            }]
        );
        assert_eq!(f.registry.get_current_rate(id).unwrap(), FlowRate(250));
        assert_eq!(f.registry.get_flow(id).unwrap().current_rate, FlowRate(250));
    }

    #[test]
    fn negative_rate_on_active_flow_is_invalid() {
        let mut f = fixture();
        let id = create(&mut f);
        f.registry
            .set_rate(&f.rater, id, FlowRate(10), &Address::labeled("x"))
            .unwrap();
        let err = f
            .registry
            .set_rate(&f.rater, id, FlowRate(-1), &Address::ZERO)
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidArgument(_)));
        assert_eq!(f.registry.get_current_rate(id).unwrap(), FlowRate(10));
    }

    #[test]
    fn redirect_issues_delete_then_create() {
        let mut f = fixture();
        let id = create(&mut f);
        let (x, y) = (Address::labeled("x"), Address::labeled("y"));
        f.registry.set_rate(&f.rater, id, FlowRate(100), &x).unwrap();
        f.ledger.clear_calls();

        f.registry.redirect(&f.redirector, id, &y).unwrap();
        assert_eq!(
            f.ledger.calls(),
            vec![
                LedgerCall::Delete {
                    asset: f.asset,
                    from: f.treasury,
                    to: x
                },
                LedgerCall::Create {
                    asset: f.asset,
                    from: f.treasury,
                    to: y,
                    rate: FlowRate(100)
                },
            ]
        );
    }

    #[test]
    fn redirect_to_current_recipient_is_noop() {
        let mut f = fixture();
        let id = create(&mut f);
        let x = Address::labeled("x");
        f.registry.set_rate(&f.rater, id, FlowRate(100), &x).unwrap();
        f.ledger.clear_calls();
        let events_before = f.registry.events().len();

        assert_eq!(f.registry.redirect(&f.admin, id, &x).unwrap(), x);
        assert!(f.ledger.calls().is_empty());
        assert_eq!(f.registry.events().len(), events_before);
    }

    #[test]
    fn failed_create_during_redirect_restores_everything() {
        let mut f = fixture();
        let id = create(&mut f);
        let (x, y) = (Address::labeled("x"), Address::labeled("y"));
        f.registry.set_rate(&f.rater, id, FlowRate(100), &x).unwrap();
        f.ledger.reject_receiver(&y);
        let events_before = f.registry.events().to_vec();

        let err = f.registry.redirect(&f.redirector, id, &y).unwrap_err();
        assert!(matches!(err, FlowError::Ledger(_)));

        assert_eq!(f.registry.owner_of(id).unwrap(), x);
        assert_eq!(f.registry.balance_of(&x), 1);
        assert_eq!(f.registry.balance_of(&y), 0);
        assert_eq!(f.ledger.get_rate(&f.asset, &f.treasury, &x).unwrap(), FlowRate(100));
        assert_eq!(f.ledger.get_rate(&f.asset, &f.treasury, &y).unwrap(), FlowRate::ZERO);
        assert_eq!(f.registry.events(), events_before.as_slice());
        assert!(f.registry.journal.is_empty());
    }

    #[test]
    fn admin_setters_require_admin_and_emit_old_new() {
        let mut f = fixture();
        let id = create(&mut f);
        let newcomer = Address::labeled("newcomer");

        let err = f
            .registry
            .set_redirect_agent(&f.redirector, id, &newcomer)
            .unwrap_err();
        assert!(matches!(err, FlowError::PermissionDenied { .. }));

        f.registry.set_redirect_agent(&f.admin, id, &newcomer).unwrap();
        f.registry.set_rate_agent(&f.admin, id, &newcomer).unwrap();
        f.registry.transfer_admin(&f.admin, id, &newcomer).unwrap();

        let flow = f.registry.get_flow(id).unwrap();
        assert_eq!(flow.redirect_agent, newcomer);
        assert_eq!(flow.rate_agent, newcomer);
        assert_eq!(flow.admin, newcomer);
        assert_eq!(flow.treasury, f.treasury);

        let last = &f.registry.events().last().unwrap().event;
        assert_eq!(
            last,
            &FlowEvent::AdminTransferred {
                flow_id: id,
                old: f.admin,
                new: newcomer
            }
        );
        // The old admin lost all authority.
        assert!(f.registry.set_rate_agent(&f.admin, id, &f.admin).is_err());
    }

    #[test]
    fn transfer_admin_to_null_is_invalid() {
        let mut f = fixture();
        let id = create(&mut f);
        assert!(matches!(
            f.registry.transfer_admin(&f.admin, id, &Address::ZERO),
            Err(FlowError::InvalidArgument(_))
        ));
    }

    #[test]
    fn default_descriptor_reflects_state() {
        let mut f = fixture();
        let id = create(&mut f);
        let descriptor = f.registry.descriptor(id).unwrap();
        assert_eq!(descriptor.name, "Redirectable Flow #1");
        assert!(descriptor
            .attributes
            .iter()
            .any(|a| a.trait_type == "status" && a.value == "inactive"));

        let json = f.registry.descriptor_json(id).unwrap();
        assert!(json.contains("Redirectable Flow #1"));
        assert!(matches!(
            f.registry.descriptor(FlowId(9)),
            Err(FlowError::FlowNotFound(_))
        ));
    }

    #[test]
    fn supplied_metadata_wins_over_default() {
        let mut f = fixture();
        let metadata = FlowDescriptor {
            name: "Payroll".into(),
            description: "Monthly payroll stream".into(),
            image: Some("ipfs://payroll".into()),
            attributes: vec![DescriptorAttribute::new("team", "core")],
        };
        let id = f
            .registry
            .create_flow(
                &f.treasury,
                &f.admin,
                &f.redirector,
                &f.rater,
                &f.asset,
                Some(metadata.clone()),
            )
            .unwrap();
        assert_eq!(f.registry.descriptor(id).unwrap(), metadata);
    }

    #[test]
    fn unknown_flow_id_zero_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.registry.get_flow(FlowId(0)),
            Err(FlowError::FlowNotFound(_))
        ));
        assert!(!f.registry.is_active(FlowId(0)));
    }
}
