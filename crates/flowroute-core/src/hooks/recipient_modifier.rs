use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use super::{HookKind, RedirectHook, RedirectRequest};
use crate::error::{FlowError, FlowResult, HookRejection};
use crate::registry::FlowRegistry;
use crate::types::{Address, FlowId};

/// Per-flow recipient policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecipientRule {
    /// Every redirect lands here when set.
    pub forced: Option<Address>,
    /// When non-empty, only these recipients are accepted as requested.
    pub allow_list: BTreeSet<Address>,
    /// Destination for requests outside the allow-list.
    pub fallback: Option<Address>,
}

impl RecipientRule {
    /// Resolve the recipient override for `requested`.
    pub fn resolve(&self, requested: &Address) -> Result<Option<Address>, HookRejection> {
        if let Some(forced) = self.forced {
            return Ok(Some(forced));
        }
        if self.allow_list.is_empty() || self.allow_list.contains(requested) {
            return Ok(None);
        }
        match self.fallback {
            Some(fallback) => Ok(Some(fallback)),
            None => Err(HookRejection::NotAllowListed(*requested)),
        }
    }
}

/// Overrides or restricts redirect targets according to owner-set rules.
pub struct RecipientModifierHook {
    address: Address,
    owner: Address,
    rules: Mutex<HashMap<FlowId, RecipientRule>>,
}

impl RecipientModifierHook {
    pub fn new(address: Address, owner: Address) -> Self {
        Self {
            address,
            owner,
            rules: Mutex::new(HashMap::new()),
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn rule(&self, flow_id: FlowId) -> RecipientRule {
        self.rules.lock().get(&flow_id).cloned().unwrap_or_default()
    }

    pub fn set_forced_recipient(
        &self,
        caller: &Address,
        flow_id: FlowId,
        forced: Option<Address>,
    ) -> FlowResult<()> {
        self.require_owner(caller, "set forced recipient")?;
        non_null(forced)?;
        self.rules.lock().entry(flow_id).or_default().forced = forced;
        info!(flow_id = %flow_id, forced = ?forced, "Forced recipient set");
        Ok(())
    }

    pub fn set_fallback(
        &self,
        caller: &Address,
        flow_id: FlowId,
        fallback: Option<Address>,
    ) -> FlowResult<()> {
        self.require_owner(caller, "set fallback recipient")?;
        non_null(fallback)?;
        self.rules.lock().entry(flow_id).or_default().fallback = fallback;
        info!(flow_id = %flow_id, fallback = ?fallback, "Fallback recipient set");
        Ok(())
    }

    pub fn allow(&self, caller: &Address, flow_id: FlowId, recipient: &Address) -> FlowResult<()> {
        self.require_owner(caller, "allow recipient")?;
        non_null(Some(*recipient))?;
        self.rules
            .lock()
            .entry(flow_id)
            .or_default()
            .allow_list
            .insert(*recipient);
        info!(flow_id = %flow_id, %recipient, "Recipient allow-listed");
        Ok(())
    }

    pub fn disallow(
        &self,
        caller: &Address,
        flow_id: FlowId,
        recipient: &Address,
    ) -> FlowResult<()> {
        self.require_owner(caller, "disallow recipient")?;
        if let Some(rule) = self.rules.lock().get_mut(&flow_id) {
            rule.allow_list.remove(recipient);
        }
        info!(flow_id = %flow_id, %recipient, "Recipient removed from allow-list");
        Ok(())
    }

    fn require_owner(&self, caller: &Address, action: &'static str) -> FlowResult<()> {
        if *caller != self.owner {
            return Err(FlowError::denied(caller, action));
        }
        Ok(())
    }
}

fn non_null(addr: Option<Address>) -> FlowResult<()> {
    match addr {
        Some(a) if a.is_zero() => Err(FlowError::invalid("recipient must not be the null address")),
        _ => Ok(()),
    }
}

impl RedirectHook for RecipientModifierHook {
    fn address(&self) -> Address {
        self.address
    }

    fn kind(&self) -> HookKind {
        HookKind::RecipientModifier
    }

    fn before_redirect(
        &self,
        _registry: &mut FlowRegistry,
        request: &RedirectRequest,
    ) -> FlowResult<Option<Address>> {
        let resolved = self
            .rule(request.flow_id)
            .resolve(&request.new_recipient)
            .map_err(|reason| FlowError::rejected(self.address, reason))?;
        debug!(flow_id = %request.flow_id, requested = %request.new_recipient, resolved = ?resolved, "Recipient rule applied");
        Ok(resolved)
    }
}
