#![allow(dead_code)]

use std::sync::Arc;

use flowroute_core::{
    Address, Amount, FlowId, FlowLedger, FlowRegistry, FlowrouteConfig, InMemoryFlowLedger,
    ManualClock,
};

pub fn addr(label: &str) -> Address {
    Address::labeled(label)
}

/// Registry over an in-memory ledger with a funded treasury that has
/// authorized the registry.
pub struct Harness {
    pub ledger: Arc<InMemoryFlowLedger>,
    pub clock: Arc<ManualClock>,
    pub registry: FlowRegistry,
    pub treasury: Address,
    pub asset: Address,
    pub admin: Address,
    pub redirector: Address,
    pub rater: Address,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(FlowrouteConfig::default())
    }

    pub fn with_config(config: FlowrouteConfig) -> Self {
        let ledger = InMemoryFlowLedger::shared();
        let clock = Arc::new(ManualClock::new(0));
        let registry = FlowRegistry::with_config(ledger.clone(), clock.clone(), config);
        let treasury = addr("treasury");
        let asset = addr("usdcx");
        ledger
            .grant_max_permission(&asset, &treasury, &registry.address())
            .unwrap();
        ledger.mint(&asset, &treasury, Amount(1_000_000));
        Self {
            ledger,
            clock,
            registry,
            treasury,
            asset,
            admin: addr("A"),
            redirector: addr("R"),
            rater: addr("F"),
        }
    }

    pub fn create_flow(&mut self) -> FlowId {
        self.registry
            .create_flow(
                &self.treasury,
                &self.admin,
                &self.redirector,
                &self.rater,
                &self.asset,
                None,
            )
            .unwrap()
    }

    /// Create a flow and start it towards `recipient` at `rate`.
    pub fn active_flow(&mut self, recipient: &Address, rate: i128) -> FlowId {
        let id = self.create_flow();
        self.registry
            .set_rate(&self.rater, id, flowroute_core::FlowRate(rate), recipient)
            .unwrap();
        id
    }
}
