//! One-call deployment of escrow-funded flows with preset hooks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collaborators::{FlowLedger, LedgerError};
use crate::config::HookSettings;
use crate::error::{FlowError, FlowResult};
use crate::escrow::{CreateFlowParams, Escrow, EscrowBlueprint, EscrowKind};
use crate::hooks::{FeePullConfig, FeePullerHook, RateLimitHook, RedirectHook, SmartFlowRateHook};
use crate::registry::FlowRegistry;
use crate::types::{Address, FlowDescriptor, FlowId, FlowRate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    RateLimited,
    SmartFlowRate,
    FeePuller,
    Custom,
}

impl Preset {
    pub fn label(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::SmartFlowRate => "smart_flow_rate",
            Self::FeePuller => "fee_puller",
            Self::Custom => "custom",
        }
    }
}

/// Who administers a preset flow.
#[derive(Debug, Clone, Default)]
pub struct FlowRoles {
    pub admin: Address,
    pub redirect_agent: Address,
    pub rate_agent: Address,
    pub metadata: Option<FlowDescriptor>,
}

impl FlowRoles {
    pub fn new(admin: Address, redirect_agent: Address, rate_agent: Address) -> Self {
        Self {
            admin,
            redirect_agent,
            rate_agent,
            metadata: None,
        }
    }
}

/// Result of a preset creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub preset: Preset,
    pub escrow: Address,
    pub escrow_kind: EscrowKind,
    pub flow_id: FlowId,
    pub hook: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FactoryEvent {
    EscrowDeployed {
        label: String,
        escrow: Address,
        kind: EscrowKind,
        owner: Address,
        flow_id: FlowId,
        asset: Address,
        hook: Option<Address>,
    },
}

pub struct FlowFactory {
    address: Address,
    ledger: Arc<dyn FlowLedger>,
    pure: EscrowBlueprint,
    wrapper: EscrowBlueprint,
    rate_limit: Arc<RateLimitHook>,
    smart_rate: Arc<SmartFlowRateHook>,
    fee_puller: Arc<FeePullerHook>,
    escrows: Vec<Escrow>,
    events: Vec<FactoryEvent>,
    nonce: u64,
}

impl FlowFactory {
    pub fn new(ledger: Arc<dyn FlowLedger>, settings: &HookSettings) -> Self {
        Self::with_address(ledger, settings, Address::derive("flowroute.factory", b"default"))
    }

    /// Deploys the singleton hooks, owned by the factory itself.
    pub fn with_address(
        ledger: Arc<dyn FlowLedger>,
        settings: &HookSettings,
        address: Address,
    ) -> Self {
        let seed = address.as_bytes();
        let rate_limit = Arc::new(RateLimitHook::new(
            Address::derive("flowroute.hook.rate_limit", seed),
            settings.rate_limit_interval_secs,
        ));
        let smart_rate = Arc::new(SmartFlowRateHook::new(
            Address::derive("flowroute.hook.smart_flow_rate", seed),
            address,
            FlowRate(i128::from(settings.min_flow_rate)),
        ));
        let fee_puller = Arc::new(FeePullerHook::new(
            Address::derive("flowroute.hook.fee_puller", seed),
            address,
        ));
        info!(
            factory = %address,
            rate_limit = %rate_limit.address(),
            smart_rate = %smart_rate.address(),
            fee_puller = %fee_puller.address(),
            "Factory deployed"
        );

        Self {
            address,
            pure: EscrowBlueprint::pure(ledger.clone()),
            wrapper: EscrowBlueprint::wrapper(ledger.clone()),
            ledger,
            rate_limit,
            smart_rate,
            fee_puller,
            escrows: Vec::new(),
            events: Vec::new(),
            nonce: 0,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn rate_limit_hook(&self) -> Arc<RateLimitHook> {
        self.rate_limit.clone()
    }

    pub fn smart_rate_hook(&self) -> Arc<SmartFlowRateHook> {
        self.smart_rate.clone()
    }

    pub fn fee_puller_hook(&self) -> Arc<FeePullerHook> {
        self.fee_puller.clone()
    }

    pub fn blueprint(&self, kind: EscrowKind) -> &EscrowBlueprint {
        match kind {
            EscrowKind::Pure => &self.pure,
            EscrowKind::Wrapper => &self.wrapper,
        }
    }

    pub fn escrow(&self, address: &Address) -> Option<&Escrow> {
        self.escrows.iter().find(|e| e.address() == *address)
    }

    pub fn escrow_mut(&mut self, address: &Address) -> Option<&mut Escrow> {
        self.escrows.iter_mut().find(|e| e.address() == *address)
    }

    pub fn escrows(&self) -> &[Escrow] {
        &self.escrows
    }

    pub fn events(&self) -> &[FactoryEvent] {
        &self.events
    }

    /// Flow guarded by the shared RateLimit hook.
    pub fn create_rate_limited(
        &mut self,
        caller: &Address,
        registry: &mut FlowRegistry,
        asset: &Address,
        roles: FlowRoles,
    ) -> FlowResult<Deployment> {
        let hook: Arc<dyn RedirectHook> = self.rate_limit.clone();
        self.deploy(caller, registry, asset, Preset::RateLimited, roles, Some(hook))
    }

    /// Flow whose rate tracks `treasury balance / target_duration_secs`.
    /// The hook becomes the flow's rate agent.
    pub fn create_smart_flow_rate(
        &mut self,
        caller: &Address,
        registry: &mut FlowRegistry,
        asset: &Address,
        mut roles: FlowRoles,
        target_duration_secs: u64,
    ) -> FlowResult<Deployment> {
        if target_duration_secs == 0 {
            return Err(FlowError::invalid("target duration must be positive"));
        }
        roles.rate_agent = self.smart_rate.address();
        let hook: Arc<dyn RedirectHook> = self.smart_rate.clone();
        let deployment =
            self.deploy(caller, registry, asset, Preset::SmartFlowRate, roles, Some(hook))?;
        self.smart_rate.set_target_duration(
            &self.address,
            registry,
            deployment.flow_id,
            target_duration_secs,
        )?;
        Ok(deployment)
    }

    /// Flow that sweeps Position Manager fees into its treasury on redirect.
    pub fn create_fee_puller(
        &mut self,
        caller: &Address,
        registry: &mut FlowRegistry,
        asset: &Address,
        roles: FlowRoles,
        config: FeePullConfig,
    ) -> FlowResult<Deployment> {
        config.validate()?;
        let hook: Arc<dyn RedirectHook> = self.fee_puller.clone();
        let deployment =
            self.deploy(caller, registry, asset, Preset::FeePuller, roles, Some(hook))?;
        self.fee_puller
            .configure(&self.address, registry, deployment.flow_id, config)?;
        Ok(deployment)
    }

    /// Flow with a caller-supplied hook, or none.
    pub fn create_custom(
        &mut self,
        caller: &Address,
        registry: &mut FlowRegistry,
        asset: &Address,
        roles: FlowRoles,
        hook: Option<Arc<dyn RedirectHook>>,
    ) -> FlowResult<Deployment> {
        self.deploy(caller, registry, asset, Preset::Custom, roles, hook)
    }

    /// Wrapper iff the asset reports an underlying asset.
    pub fn detect_kind(&self, asset: &Address) -> FlowResult<(EscrowKind, Option<Address>)> {
        match self.ledger.underlying_asset(asset) {
            Ok(Some(underlying)) if !underlying.is_zero() => {
                Ok((EscrowKind::Wrapper, Some(underlying)))
            }
            Ok(_) | Err(LedgerError::Unsupported(_)) => Ok((EscrowKind::Pure, None)),
            Err(err) => Err(err.into()),
        }
    }

    fn deploy(
        &mut self,
        caller: &Address,
        registry: &mut FlowRegistry,
        asset: &Address,
        preset: Preset,
        roles: FlowRoles,
        hook: Option<Arc<dyn RedirectHook>>,
    ) -> FlowResult<Deployment> {
        if caller.is_zero() {
            return Err(FlowError::invalid("escrow owner must not be the null address"));
        }
        if asset.is_zero() {
            return Err(FlowError::invalid("asset must not be the null address"));
        }
        if roles.admin.is_zero() {
            return Err(FlowError::invalid("admin must not be the null address"));
        }

        let (kind, underlying) = self.detect_kind(asset)?;
        debug!(%asset, ?kind, underlying = ?underlying, "Asset probed");

        let mut seed = self.address.as_bytes().to_vec();
        seed.extend_from_slice(&self.nonce.to_be_bytes());
        let escrow_address = Address::derive("flowroute.escrow", &seed);

        let mut escrow = self
            .blueprint(kind)
            .instantiate(escrow_address, Some(self.address));
        escrow.initialize(
            &self.address,
            caller,
            &registry.address(),
            asset,
            underlying.as_ref(),
        )?;

        let hook_address = hook.as_ref().map(|h| h.address());
        let params = CreateFlowParams {
            admin: roles.admin,
            redirect_agent: roles.redirect_agent,
            rate_agent: roles.rate_agent,
            metadata: roles.metadata,
            hook,
        };
        let flow_id = escrow.create_flow(&self.address, registry, params)?;

        self.nonce += 1;
        self.escrows.push(escrow);
        self.events.push(FactoryEvent::EscrowDeployed {
            label: preset.label().to_string(),
            escrow: escrow_address,
            kind,
            owner: *caller,
            flow_id,
            asset: *asset,
            hook: hook_address,
        });
        info!(
            preset = preset.label(),
            escrow = %escrow_address,
            ?kind,
            owner = %caller,
            flow_id = %flow_id,
            "Escrow deployed"
        );

        Ok(Deployment {
            preset,
            escrow: escrow_address,
            escrow_kind: kind,
            flow_id,
            hook: hook_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::InMemoryFlowLedger;

    #[test]
    fn singletons_are_owned_by_factory() {
        let factory = FlowFactory::new(InMemoryFlowLedger::shared(), &HookSettings::default());
        assert_eq!(factory.smart_rate_hook().owner(), factory.address());
        assert_eq!(factory.fee_puller_hook().owner(), factory.address());
        assert_eq!(factory.rate_limit_hook().interval_secs(), 3600);
        assert_ne!(factory.rate_limit_hook().address(), factory.smart_rate_hook().address());
    }

    #[test]
    fn probe_unsupported_means_pure() {
        let ledger = InMemoryFlowLedger::shared();
        ledger.register_wrapper(&Address::labeled("usdcx"), &Address::labeled("usdc"));
        let factory = FlowFactory::new(ledger.clone(), &HookSettings::default());
        assert_eq!(
            factory.detect_kind(&Address::labeled("usdcx")).unwrap(),
            (EscrowKind::Wrapper, Some(Address::labeled("usdc")))
        );
        ledger.set_probe_unsupported(true);
        assert_eq!(
            factory.detect_kind(&Address::labeled("usdcx")).unwrap(),
            (EscrowKind::Pure, None)
        );
    }

    #[test]
    fn invalid_parameters_deploy_nothing() {
        let ledger = InMemoryFlowLedger::shared();
        let mut registry = FlowRegistry::new(ledger.clone(), Arc::new(ManualClock::new(0)));
        let mut factory = FlowFactory::new(ledger, &HookSettings::default());
        let owner = Address::labeled("owner");

        let err = factory
            .create_smart_flow_rate(
                &owner,
                &mut registry,
                &Address::labeled("usdcx"),
                FlowRoles::new(owner, Address::ZERO, Address::ZERO),
                0,
            )
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidArgument(_)));

        let err = factory
            .create_rate_limited(
                &owner,
                &mut registry,
                &Address::labeled("usdcx"),
                FlowRoles::default(),
            )
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidArgument(_)));

        assert!(factory.escrows().is_empty());
        assert!(factory.events().is_empty());
        assert_eq!(registry.flow_count(), 0);
    }
}
