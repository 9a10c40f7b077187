use tracing::{debug, warn};

use super::{HookKind, RedirectHook, RedirectRequest, RedirectThrottle};
use crate::error::{FlowError, FlowResult};
use crate::registry::FlowRegistry;
use crate::types::{Address, FlowId};

/// Rejects redirects of the same flow closer together than a fixed interval.
pub struct RateLimitHook {
    address: Address,
    throttle: RedirectThrottle,
}

impl RateLimitHook {
    pub fn new(address: Address, interval_secs: u64) -> Self {
        Self {
            address,
            throttle: RedirectThrottle::new(interval_secs),
        }
    }

    pub fn interval_secs(&self) -> u64 {
        self.throttle.interval_secs()
    }

    pub fn last_redirect(&self, flow_id: FlowId) -> Option<u64> {
        self.throttle.last_redirect(flow_id)
    }
}

impl RedirectHook for RateLimitHook {
    fn address(&self) -> Address {
        self.address
    }

    fn kind(&self) -> HookKind {
        HookKind::RateLimit
    }

    fn before_redirect(
        &self,
        registry: &mut FlowRegistry,
        request: &RedirectRequest,
    ) -> FlowResult<Option<Address>> {
        let now = registry.now();
        self.throttle.check(request.flow_id, now).map_err(|reason| {
            warn!(flow_id = %request.flow_id, now, %reason, "Redirect rate limited");
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
        let now = registry.now();
        self.throttle.record(request.flow_id, now);
        debug!(flow_id = %request.flow_id, now, "Rate limit window opened");
    }
}
