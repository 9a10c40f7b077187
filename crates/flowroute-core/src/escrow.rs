//! Treasury escrows.
//!
//! An escrow holds the funds a flow streams from and authorizes the registry
//! to originate and terminate flows on its behalf. Escrows are stamped out
//! from an [`EscrowBlueprint`] uninitialized and then initialized exactly
//! once.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collaborators::FlowLedger;
use crate::error::{FlowError, FlowResult};
use crate::hooks::RedirectHook;
use crate::registry::FlowRegistry;
use crate::types::{Address, Amount, FlowDescriptor, FlowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowKind {
    /// Holds the streamable asset directly.
    Pure,
    /// Holds an underlying asset and can convert it into the streamable one.
    Wrapper,
}

/// Template for uninitialized escrows of one kind.
#[derive(Clone)]
pub struct EscrowBlueprint {
    kind: EscrowKind,
    ledger: Arc<dyn FlowLedger>,
}

impl EscrowBlueprint {
    pub fn pure(ledger: Arc<dyn FlowLedger>) -> Self {
        Self {
            kind: EscrowKind::Pure,
            ledger,
        }
    }

    pub fn wrapper(ledger: Arc<dyn FlowLedger>) -> Self {
        Self {
            kind: EscrowKind::Wrapper,
            ledger,
        }
    }

    pub fn kind(&self) -> EscrowKind {
        self.kind
    }

    /// Stamp out a fresh, uninitialized escrow at `address`.
    ///
    /// With `factory` set, only that account may initialize it.
    pub fn instantiate(&self, address: Address, factory: Option<Address>) -> Escrow {
        debug!(%address, kind = ?self.kind, factory = ?factory, "Escrow instantiated");
        Escrow {
            address,
            kind: self.kind,
            factory,
            ledger: self.ledger.clone(),
            setup: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EscrowSetup {
    owner: Address,
    registry: Address,
    asset: Address,
    underlying: Option<Address>,
}

/// Serializable view of an escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub address: Address,
    pub kind: EscrowKind,
    pub factory: Option<Address>,
    pub initialized: bool,
    pub owner: Option<Address>,
    pub registry: Option<Address>,
    pub asset: Option<Address>,
    pub underlying: Option<Address>,
}

/// Arguments for [`Escrow::create_flow`].
#[derive(Clone)]
pub struct CreateFlowParams {
    pub admin: Address,
    pub redirect_agent: Address,
    pub rate_agent: Address,
    pub metadata: Option<FlowDescriptor>,
    pub hook: Option<Arc<dyn RedirectHook>>,
}

impl CreateFlowParams {
    pub fn new(admin: Address) -> Self {
        Self {
            admin,
            redirect_agent: Address::ZERO,
            rate_agent: Address::ZERO,
            metadata: None,
            hook: None,
        }
    }

    pub fn redirect_agent(mut self, agent: Address) -> Self {
        self.redirect_agent = agent;
        self
    }

    pub fn rate_agent(mut self, agent: Address) -> Self {
        self.rate_agent = agent;
        self
    }

    pub fn metadata(mut self, metadata: FlowDescriptor) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn RedirectHook>) -> Self {
        self.hook = Some(hook);
        self
    }
}

pub struct Escrow {
    address: Address,
    kind: EscrowKind,
    factory: Option<Address>,
    ledger: Arc<dyn FlowLedger>,
    setup: Option<EscrowSetup>,
}

impl Escrow {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn kind(&self) -> EscrowKind {
        self.kind
    }

    pub fn factory(&self) -> Option<Address> {
        self.factory
    }

    pub fn is_initialized(&self) -> bool {
        self.setup.is_some()
    }

    pub fn owner(&self) -> Option<Address> {
        self.setup.map(|s| s.owner)
    }

    pub fn registry(&self) -> Option<Address> {
        self.setup.map(|s| s.registry)
    }

    pub fn asset(&self) -> Option<Address> {
        self.setup.map(|s| s.asset)
    }

    pub fn underlying(&self) -> Option<Address> {
        self.setup.and_then(|s| s.underlying)
    }

    pub fn record(&self) -> EscrowRecord {
        EscrowRecord {
            address: self.address,
            kind: self.kind,
            factory: self.factory,
            initialized: self.is_initialized(),
            owner: self.owner(),
            registry: self.registry(),
            asset: self.asset(),
            underlying: self.underlying(),
        }
    }

    /// One-shot setup. Grants the registry maximal flow permissions over
    /// this escrow's `asset`.
    pub fn initialize(
        &mut self,
        caller: &Address,
        owner: &Address,
        registry: &Address,
        asset: &Address,
        underlying: Option<&Address>,
    ) -> FlowResult<()> {
        if self.setup.is_some() {
            return Err(FlowError::AlreadyInitialized {
                instance: self.address,
            });
        }
        if let Some(factory) = self.factory {
            if *caller != factory {
                return Err(FlowError::denied(caller, "initialize escrow"));
            }
        }
        if owner.is_zero() {
            return Err(FlowError::invalid("escrow owner must not be the null address"));
        }
        if registry.is_zero() || asset.is_zero() {
            return Err(FlowError::invalid(
                "escrow registry and asset must not be the null address",
            ));
        }
        let underlying = match (self.kind, underlying) {
            (EscrowKind::Pure, None) => None,
            (EscrowKind::Pure, Some(_)) => {
                return Err(FlowError::invalid("pure escrow takes no underlying asset"))
            }
            (EscrowKind::Wrapper, Some(u)) if !u.is_zero() => Some(*u),
            (EscrowKind::Wrapper, _) => {
                return Err(FlowError::invalid("wrapper escrow requires an underlying asset"))
            }
        };

        self.ledger
            .grant_max_permission(asset, &self.address, registry)?;
        self.setup = Some(EscrowSetup {
            owner: *owner,
            registry: *registry,
            asset: *asset,
            underlying,
        });
        info!(escrow = %self.address, kind = ?self.kind, %owner, %registry, %asset, "Escrow initialized");
        Ok(())
    }

    /// Create a flow funded by this escrow. Owner or factory only.
    ///
    /// With a hook requested, the escrow holds admin long enough to attach
    /// it, then hands admin to `params.admin`.
    pub fn create_flow(
        &self,
        caller: &Address,
        registry: &mut FlowRegistry,
        params: CreateFlowParams,
    ) -> FlowResult<FlowId> {
        let setup = self.setup()?;
        if *caller != setup.owner && Some(*caller) != self.factory {
            return Err(FlowError::denied(caller, "create flow from escrow"));
        }
        if registry.address() != setup.registry {
            return Err(FlowError::invalid(format!(
                "escrow is bound to registry {}, got {}",
                setup.registry,
                registry.address()
            )));
        }
        if params.admin.is_zero() {
            return Err(FlowError::invalid("admin must not be the null address"));
        }

        let Some(hook) = params.hook else {
            return registry.create_flow(
                &self.address,
                &params.admin,
                &params.redirect_agent,
                &params.rate_agent,
                &setup.asset,
                params.metadata,
            );
        };

        let flow_id = registry.create_flow(
            &self.address,
            &self.address,
            &params.redirect_agent,
            &params.rate_agent,
            &setup.asset,
            params.metadata,
        )?;
        registry.set_hook(&self.address, flow_id, Some(hook))?;
        registry.transfer_admin(&self.address, flow_id, &params.admin)?;
        Ok(flow_id)
    }

    /// Sweep the whole `token` balance to the owner.
    pub fn withdraw_all(&self, caller: &Address, token: &Address) -> FlowResult<Amount> {
        let setup = self.setup()?;
        if *caller != setup.owner {
            return Err(FlowError::denied(caller, "withdraw from escrow"));
        }
        let balance = self.ledger.balance_of(token, &self.address)?;
        if balance.is_zero() {
            return Err(FlowError::InsufficientBalance {
                holder: self.address,
                asset: *token,
            });
        }
        self.ledger
            .transfer(&self.address, token, &self.address, &setup.owner, balance)?;
        info!(escrow = %self.address, %token, amount = %balance, owner = %setup.owner, "Escrow withdrawn");
        Ok(balance)
    }

    /// Convert the entire underlying balance into the streamable asset.
    pub fn wrap_all(&self) -> FlowResult<Amount> {
        if self.kind == EscrowKind::Pure {
            return Err(FlowError::Unsupported("wrap_all on a pure escrow"));
        }
        let setup = self.setup()?;
        let Some(underlying) = setup.underlying else {
            return Err(FlowError::NotInitialized {
                instance: self.address,
            });
        };
        let balance = self.ledger.balance_of(&underlying, &self.address)?;
        if balance.is_zero() {
            return Err(FlowError::InsufficientBalance {
                holder: self.address,
                asset: underlying,
            });
        }
        self.ledger.wrap(&setup.asset, &self.address, balance)?;
        info!(escrow = %self.address, %underlying, asset = %setup.asset, amount = %balance, "Escrow balance wrapped");
        Ok(balance)
    }

    fn setup(&self) -> FlowResult<EscrowSetup> {
        self.setup.ok_or(FlowError::NotInitialized {
            instance: self.address,
        })
    }
}
