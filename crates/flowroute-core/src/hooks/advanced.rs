use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::{HookKind, RedirectHook, RedirectRequest, RedirectThrottle};
use crate::error::{FlowError, FlowResult, HookRejection};
use crate::registry::FlowRegistry;
use crate::types::Address;

/// Blocklist plus a built-in redirect throttle.
///
/// The blocklist applies to both the requested recipient and the caller,
/// across every flow the hook is attached to.
pub struct AdvancedHook {
    address: Address,
    owner: Address,
    blocked: Mutex<HashSet<Address>>,
    throttle: RedirectThrottle,
}

impl AdvancedHook {
    pub fn new(address: Address, owner: Address, interval_secs: u64) -> Self {
        Self {
            address,
            owner,
            blocked: Mutex::new(HashSet::new()),
            throttle: RedirectThrottle::new(interval_secs),
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn is_blocked(&self, who: &Address) -> bool {
        self.blocked.lock().contains(who)
    }

    pub fn block(&self, caller: &Address, who: &Address) -> FlowResult<()> {
        self.require_owner(caller, "block address")?;
        self.blocked.lock().insert(*who);
        info!(hook = %self.address, address = %who, "Address blocked");
        Ok(())
    }

    pub fn unblock(&self, caller: &Address, who: &Address) -> FlowResult<()> {
        self.require_owner(caller, "unblock address")?;
        self.blocked.lock().remove(who);
        info!(hook = %self.address, address = %who, "Address unblocked");
        Ok(())
    }

    fn require_owner(&self, caller: &Address, action: &'static str) -> FlowResult<()> {
        if *caller != self.owner {
            return Err(FlowError::denied(caller, action));
        }
        Ok(())
    }

    fn screen(&self, request: &RedirectRequest) -> Result<(), HookRejection> {
        let blocked = self.blocked.lock();
        if blocked.contains(&request.new_recipient) {
            return Err(HookRejection::Blocklisted(request.new_recipient));
        }
        if blocked.contains(&request.caller) {
            return Err(HookRejection::BlocklistedCaller(request.caller));
        }
        Ok(())
    }
}

impl RedirectHook for AdvancedHook {
    fn address(&self) -> Address {
        self.address
    }

    fn kind(&self) -> HookKind {
        HookKind::Advanced
    }

    fn before_redirect(
        &self,
        registry: &mut FlowRegistry,
        request: &RedirectRequest,
    ) -> FlowResult<Option<Address>> {
        let now = registry.now();
        self.screen(request)
            .and_then(|()| self.throttle.check(request.flow_id, now))
            .map_err(|reason| {
                warn!(flow_id = %request.flow_id, caller = %request.caller, %reason, "Redirect rejected");
                FlowError::rejected(self.address, reason)
            })?;
        Ok(None)
    }

    fn after_redirect(
        &self,
        registry: &FlowRegistry,
        request: &RedirectRequest,
        _recipient: &Address,
    ) {
        self.throttle.record(request.flow_id, registry.now());
    }
}
