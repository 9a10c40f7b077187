//! Redirect hooks.
//!
//! A hook is consulted before every redirect of the flow it is attached to.
//! It may veto the redirect by returning an error, leave the requested
//! recipient untouched (`Ok(None)`), or force a different recipient
//! (`Ok(Some(addr))`). Hooks receive the registry mutably and may call back
//! into its public entry points; re-entering `redirect` or `stop` fails.
//!
//! Hook-private bookkeeping that must only reflect completed redirects (a
//! throttle window, for instance) is written in
//! [`RedirectHook::after_redirect`], which runs once the redirect has
//! committed.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{FlowResult, HookRejection};
use crate::registry::FlowRegistry;
use crate::types::{Address, FlowId};

mod advanced;
mod fee_puller;
mod rate_limit;
mod recipient_modifier;
mod smart_rate;

pub use advanced::AdvancedHook;
pub use fee_puller::{FeePullConfig, FeePullerHook};
pub use rate_limit::RateLimitHook;
pub use recipient_modifier::{RecipientModifierHook, RecipientRule};
pub use smart_rate::{compute_rate, SmartFlowRateHook};

/// Arguments handed to [`RedirectHook::before_redirect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectRequest {
    pub flow_id: FlowId,
    pub old_recipient: Address,
    pub new_recipient: Address,
    pub caller: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    RateLimit,
    SmartFlowRate,
    FeePuller,
    Advanced,
    RecipientModifier,
    Custom,
}

/// Pluggable pre-redirect capability.
pub trait RedirectHook: Send + Sync {
    fn address(&self) -> Address;

    fn kind(&self) -> HookKind {
        HookKind::Custom
    }

    fn before_redirect(
        &self,
        registry: &mut FlowRegistry,
        request: &RedirectRequest,
    ) -> FlowResult<Option<Address>>;

    /// Runs after a redirect this hook admitted has committed. `recipient`
    /// is the recipient in effect afterwards.
    fn after_redirect(
        &self,
        _registry: &FlowRegistry,
        _request: &RedirectRequest,
        _recipient: &Address,
    ) {
    }
}

/// Per-flow minimum spacing between redirects.
#[derive(Debug)]
pub struct RedirectThrottle {
    interval_secs: u64,
    last: Mutex<HashMap<FlowId, u64>>,
}

impl RedirectThrottle {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval_secs,
            last: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    pub fn last_redirect(&self, flow_id: FlowId) -> Option<u64> {
        self.last.lock().get(&flow_id).copied()
    }

    /// Reject a redirect at `now` if the previous one was less than one
    /// interval ago. Nothing is recorded.
    pub fn check(&self, flow_id: FlowId, now: u64) -> Result<(), HookRejection> {
        if let Some(previous) = self.last.lock().get(&flow_id) {
            let retry_at = previous.saturating_add(self.interval_secs);
            if now < retry_at {
                return Err(HookRejection::RateLimited { retry_at });
            }
        }
        Ok(())
    }

    /// Open a new window for `flow_id` starting at `now`.
    pub fn record(&self, flow_id: FlowId, now: u64) {
        self.last.lock().insert(flow_id, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_spacing() {
        let throttle = RedirectThrottle::new(3600);
        assert!(throttle.check(FlowId(1), 0).is_ok());
        // Checking alone opens no window.
        assert_eq!(throttle.last_redirect(FlowId(1)), None);
        throttle.record(FlowId(1), 0);

        assert_eq!(
            throttle.check(FlowId(1), 1800),
            Err(HookRejection::RateLimited { retry_at: 3600 })
        );
        assert_eq!(throttle.last_redirect(FlowId(1)), Some(0));
        assert!(throttle.check(FlowId(1), 3600).is_ok());
        // Flows are throttled independently.
        assert!(throttle.check(FlowId(2), 1).is_ok());
    }
}
