//! JSON scenario format and its runner.
//!
//! A scenario is a list of steps executed against an in-memory Flow Ledger,
//! a fresh registry and a factory. Parties are written either as 0x-prefixed
//! hex addresses or as labels (`"alice"`), which map to stable derived
//! addresses. `"registry"` and `"factory"` name the deployed instances, and
//! `"escrow:N"` names the treasury funding flow `N`.

use std::sync::Arc;

use flowroute_core::{
    Address, AdvancedHook, Amount, ErrorKind, EscrowRecord, FactoryEvent,
    FeePullConfig, FlowDescriptor, FlowError, FlowFactory, FlowId, FlowLedger, FlowRate,
    FlowRecord, FlowRegistry, FlowRoles, FlowrouteConfig, InMemoryFlowLedger,
    InMemoryPositionManager, ManualClock, Preset, RateLimitHook, RecipientModifierHook,
    RecordedEvent, RedirectHook,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub start_time: u64,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,
    /// The step must fail with this kind; the run continues.
    #[serde(default)]
    pub expect_error: Option<ErrorKind>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Mint {
        asset: String,
        holder: String,
        amount: u64,
    },
    RegisterWrapper {
        asset: String,
        underlying: String,
    },
    Grant {
        asset: String,
        owner: String,
        operator: String,
    },
    Advance {
        secs: u64,
    },
    SetTime {
        at: u64,
    },
    CreateFlow {
        caller: String,
        admin: String,
        #[serde(default)]
        redirect_agent: Option<String>,
        #[serde(default)]
        rate_agent: Option<String>,
        asset: String,
        #[serde(default)]
        metadata: Option<FlowDescriptor>,
    },
    Deploy {
        preset: Preset,
        owner: String,
        asset: String,
        admin: String,
        #[serde(default)]
        redirect_agent: Option<String>,
        #[serde(default)]
        rate_agent: Option<String>,
        #[serde(default)]
        target_duration_secs: Option<u64>,
        #[serde(default)]
        fees: Option<FeeSpec>,
        #[serde(default)]
        hook: Option<HookSpec>,
    },
    SetHook {
        caller: String,
        flow: u64,
        #[serde(default)]
        hook: Option<HookSpec>,
    },
    SetRate {
        caller: String,
        flow: u64,
        rate: i64,
        #[serde(default)]
        recipient: Option<String>,
    },
    Redirect {
        caller: String,
        flow: u64,
        to: String,
    },
    Stop {
        caller: String,
        flow: u64,
    },
    SetRedirectAgent {
        caller: String,
        flow: u64,
        to: String,
    },
    SetRateAgent {
        caller: String,
        flow: u64,
        to: String,
    },
    TransferAdmin {
        caller: String,
        flow: u64,
        to: String,
    },
    /// Sweep `token` out of the escrow funding `flow`.
    Withdraw {
        caller: String,
        flow: u64,
        token: String,
    },
    WrapAll {
        flow: u64,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mint { .. } => "mint",
            Self::RegisterWrapper { .. } => "register_wrapper",
            Self::Grant { .. } => "grant",
            Self::Advance { .. } => "advance",
            Self::SetTime { .. } => "set_time",
            Self::CreateFlow { .. } => "create_flow",
            Self::Deploy { .. } => "deploy",
            Self::SetHook { .. } => "set_hook",
            Self::SetRate { .. } => "set_rate",
            Self::Redirect { .. } => "redirect",
            Self::Stop { .. } => "stop",
            Self::SetRedirectAgent { .. } => "set_redirect_agent",
            Self::SetRateAgent { .. } => "set_rate_agent",
            Self::TransferAdmin { .. } => "transfer_admin",
            Self::Withdraw { .. } => "withdraw",
            Self::WrapAll { .. } => "wrap_all",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeSpec {
    pub position_manager: String,
    pub token: String,
    pub threshold: u64,
    #[serde(default = "default_true")]
    pub typed: bool,
}

fn default_true() -> bool {
    true
}

/// Hooks a scenario can construct on the fly.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HookSpec {
    RateLimit {
        #[serde(default)]
        interval_secs: Option<u64>,
    },
    Advanced {
        owner: String,
        #[serde(default)]
        interval_secs: Option<u64>,
        #[serde(default)]
        blocked: Vec<String>,
    },
    RecipientModifier {
        owner: String,
        #[serde(default)]
        forced: Option<String>,
        #[serde(default)]
        allow: Vec<String>,
        #[serde(default)]
        fallback: Option<String>,
    },
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("step {index} ({action}) failed: {source}")]
    StepFailed {
        index: usize,
        action: &'static str,
        #[source]
        source: FlowError,
    },

    #[error("step {index} ({action}) succeeded but {expected:?} was expected")]
    UnexpectedSuccess {
        index: usize,
        action: &'static str,
        expected: ErrorKind,
    },

    #[error("step {index} ({action}) failed with {actual:?}, expected {expected:?}: {source}")]
    WrongError {
        index: usize,
        action: &'static str,
        expected: ErrorKind,
        actual: ErrorKind,
        #[source]
        source: FlowError,
    },

    #[error("invalid party '{0}': {1}")]
    InvalidParty(String, String),

    #[error("hook setup failed: {0}")]
    HookSetup(#[source] FlowError),
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub action: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub registry: Address,
    pub factory: Address,
    pub now: u64,
    pub steps: Vec<StepOutcome>,
    pub flows: Vec<FlowRecord>,
    pub events: Vec<RecordedEvent>,
    pub escrows: Vec<EscrowRecord>,
    pub factory_events: Vec<FactoryEvent>,
}

pub struct Simulation {
    config: FlowrouteConfig,
    ledger: Arc<InMemoryFlowLedger>,
    clock: Arc<ManualClock>,
    registry: FlowRegistry,
    factory: FlowFactory,
    hook_nonce: u64,
}

impl Simulation {
    pub fn new(config: FlowrouteConfig, start_time: u64) -> Self {
        let ledger = InMemoryFlowLedger::shared();
        let clock = Arc::new(ManualClock::new(start_time));
        let registry = FlowRegistry::with_config(ledger.clone(), clock.clone(), config.clone());
        let factory = FlowFactory::new(ledger.clone(), &config.hooks);
        Self {
            config,
            ledger,
            clock,
            registry,
            factory,
            hook_nonce: 0,
        }
    }

    pub fn run(config: FlowrouteConfig, scenario: Scenario) -> Result<Report, ScenarioError> {
        let mut sim = Self::new(config, scenario.start_time);
        let mut outcomes = Vec::with_capacity(scenario.steps.len());

        for (index, step) in scenario.steps.into_iter().enumerate() {
            let action = step.action.name();
            debug!(index, action, "Running step");
            let result = sim.apply(&step.action)?;

            let outcome = match (result, step.expect_error) {
                (Ok(value), None) => StepOutcome {
                    index,
                    action,
                    ok: true,
                    error: None,
                    result: value,
                },
                (Ok(_), Some(expected)) => {
                    return Err(ScenarioError::UnexpectedSuccess {
                        index,
                        action,
                        expected,
                    })
                }
                (Err(source), None) => {
                    return Err(ScenarioError::StepFailed {
                        index,
                        action,
                        source,
                    })
                }
                (Err(source), Some(expected)) if source.kind() == expected => {
                    info!(index, action, error = %source, "Step failed as expected");
                    StepOutcome {
                        index,
                        action,
                        ok: false,
                        error: Some(source.to_string()),
                        result: None,
                    }
                }
                (Err(source), Some(expected)) => {
                    warn!(index, action, error = %source, "Step failed with an unexpected error kind");
                    return Err(ScenarioError::WrongError {
                        index,
                        action,
                        expected,
                        actual: source.kind(),
                        source,
                    });
                }
            };
            outcomes.push(outcome);
        }

        Ok(sim.report(outcomes))
    }

    pub fn report(&self, steps: Vec<StepOutcome>) -> Report {
        Report {
            registry: self.registry.address(),
            factory: self.factory.address(),
            now: self.registry.now(),
            steps,
            flows: self.registry.flows().to_vec(),
            events: self.registry.events().to_vec(),
            escrows: self.factory.escrows().iter().map(|e| e.record()).collect(),
            factory_events: self.factory.events().to_vec(),
        }
    }

    /// Resolve a party name. Party errors abort the run; protocol errors are
    /// returned in the inner result so they can be matched against
    /// `expect_error`.
    pub fn party(&self, name: &str) -> Result<Address, ScenarioError> {
        match name {
            "registry" => Ok(self.registry.address()),
            "factory" => Ok(self.factory.address()),
            "null" | "zero" => Ok(Address::ZERO),
            _ if name.starts_with("escrow:") => {
                let invalid = |reason: String| ScenarioError::InvalidParty(name.to_string(), reason);
                let id: u64 = name["escrow:".len()..]
                    .parse()
                    .map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?;
                self.registry
                    .get_flow(FlowId(id))
                    .map(|flow| flow.treasury)
                    .map_err(|e| invalid(e.to_string()))
            }
            _ if name.starts_with("0x") || name.starts_with("0X") => name
                .parse()
                .map_err(|e: flowroute_core::types::AddressParseError| {
                    ScenarioError::InvalidParty(name.to_string(), e.to_string())
                }),
            _ if name.trim().is_empty() => Err(ScenarioError::InvalidParty(
                name.to_string(),
                "empty label".to_string(),
            )),
            _ => Ok(Address::labeled(name)),
        }
    }

    fn optional_party(&self, name: &Option<String>) -> Result<Address, ScenarioError> {
        match name {
            Some(name) => self.party(name),
            None => Ok(Address::ZERO),
        }
    }

    fn apply(
        &mut self,
        action: &Action,
    ) -> Result<Result<Option<serde_json::Value>, FlowError>, ScenarioError> {
        let outcome = match action {
            Action::Mint {
                asset,
                holder,
                amount,
            } => {
                self.ledger
                    .mint(&self.party(asset)?, &self.party(holder)?, Amount(u128::from(*amount)));
                Ok(None)
            }
            Action::RegisterWrapper { asset, underlying } => {
                self.ledger
                    .register_wrapper(&self.party(asset)?, &self.party(underlying)?);
                Ok(None)
            }
            Action::Grant {
                asset,
                owner,
                operator,
            } => self
                .ledger
                .grant_max_permission(
                    &self.party(asset)?,
                    &self.party(owner)?,
                    &self.party(operator)?,
                )
                .map(|()| None)
                .map_err(FlowError::from),
            Action::Advance { secs } => {
                self.clock.advance(*secs);
                Ok(Some(serde_json::json!({ "now": self.registry.now() })))
            }
            Action::SetTime { at } => {
                self.clock.set(*at);
                Ok(None)
            }
            Action::CreateFlow {
                caller,
                admin,
                redirect_agent,
                rate_agent,
                asset,
                metadata,
            } => {
                let (caller, admin, asset) =
                    (self.party(caller)?, self.party(admin)?, self.party(asset)?);
                let (redirect_agent, rate_agent) = (
                    self.optional_party(redirect_agent)?,
                    self.optional_party(rate_agent)?,
                );
                self.registry
                    .create_flow(
                        &caller,
                        &admin,
                        &redirect_agent,
                        &rate_agent,
                        &asset,
                        metadata.clone(),
                    )
                    .map(|id| Some(serde_json::json!({ "flow_id": id })))
            }
            Action::Deploy {
                preset,
                owner,
                asset,
                admin,
                redirect_agent,
                rate_agent,
                target_duration_secs,
                fees,
                hook,
            } => {
                let (owner, asset) = (self.party(owner)?, self.party(asset)?);
                let roles = FlowRoles::new(
                    self.party(admin)?,
                    self.optional_party(redirect_agent)?,
                    self.optional_party(rate_agent)?,
                );
                self.deploy(*preset, &owner, &asset, roles, *target_duration_secs, fees, hook)?
            }
            Action::SetHook { caller, flow, hook } => {
                let caller = self.party(caller)?;
                let built = match hook {
                    Some(spec) => Some(self.build_hook(spec)?),
                    None => None,
                };
                let id = FlowId(*flow);
                let address = built.as_ref().map(|b| b.hook.address());
                built
                    .as_ref()
                    .map_or(Ok(()), |b| b.install(id))
                    .and_then(|()| {
                        self.registry
                            .set_hook(&caller, id, built.map(|b| b.hook))
                    })
                    .map(|()| Some(serde_json::json!({ "hook": address })))
            }
            Action::SetRate {
                caller,
                flow,
                rate,
                recipient,
            } => {
                let (caller, recipient) = (self.party(caller)?, self.optional_party(recipient)?);
                self.registry
                    .set_rate(&caller, FlowId(*flow), FlowRate(i128::from(*rate)), &recipient)
                    .map(|()| None)
            }
            Action::Redirect { caller, flow, to } => {
                let (caller, to) = (self.party(caller)?, self.party(to)?);
                self.registry
                    .redirect(&caller, FlowId(*flow), &to)
                    .map(|effective| Some(serde_json::json!({ "recipient": effective })))
            }
            Action::Stop { caller, flow } => {
                let caller = self.party(caller)?;
                self.registry.stop(&caller, FlowId(*flow)).map(|()| None)
            }
            Action::SetRedirectAgent { caller, flow, to } => {
                let (caller, to) = (self.party(caller)?, self.party(to)?);
                self.registry
                    .set_redirect_agent(&caller, FlowId(*flow), &to)
                    .map(|()| None)
            }
            Action::SetRateAgent { caller, flow, to } => {
                let (caller, to) = (self.party(caller)?, self.party(to)?);
                self.registry
                    .set_rate_agent(&caller, FlowId(*flow), &to)
                    .map(|()| None)
            }
            Action::TransferAdmin { caller, flow, to } => {
                let (caller, to) = (self.party(caller)?, self.party(to)?);
                self.registry
                    .transfer_admin(&caller, FlowId(*flow), &to)
                    .map(|()| None)
            }
            Action::Withdraw {
                caller,
                flow,
                token,
            } => {
                let (caller, token) = (self.party(caller)?, self.party(token)?);
                self.escrow_call(*flow, |escrow| escrow.withdraw_all(&caller, &token))
            }
            Action::WrapAll { flow } => self.escrow_call(*flow, |escrow| escrow.wrap_all()),
        };
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn deploy(
        &mut self,
        preset: Preset,
        owner: &Address,
        asset: &Address,
        roles: FlowRoles,
        target_duration_secs: Option<u64>,
        fees: &Option<FeeSpec>,
        hook: &Option<HookSpec>,
    ) -> Result<Result<Option<serde_json::Value>, FlowError>, ScenarioError> {
        let deployment = match preset {
            Preset::RateLimited => {
                self.factory
                    .create_rate_limited(owner, &mut self.registry, asset, roles)
            }
            Preset::SmartFlowRate => self.factory.create_smart_flow_rate(
                owner,
                &mut self.registry,
                asset,
                roles,
                target_duration_secs.unwrap_or(0),
            ),
            Preset::FeePuller => {
                let Some(fees) = fees else {
                    return Ok(Err(FlowError::invalid(
                        "fee_puller preset requires a fees section",
                    )));
                };
                let pm_address = self.party(&fees.position_manager)?;
                let mut manager = InMemoryPositionManager::new(pm_address, self.ledger.clone());
                if !fees.typed {
                    manager = manager.without_typed_interface();
                }
                let config = FeePullConfig {
                    position_manager: Arc::new(manager),
                    token: self.party(&fees.token)?,
                    threshold: Amount(u128::from(fees.threshold)),
                };
                self.factory
                    .create_fee_puller(owner, &mut self.registry, asset, roles, config)
            }
            Preset::Custom => {
                let built = match hook {
                    Some(spec) => Some(self.build_hook(spec)?),
                    None => None,
                };
                let hook = built.as_ref().map(|b| b.hook.clone());
                self.factory
                    .create_custom(owner, &mut self.registry, asset, roles, hook)
                    .and_then(|deployment| {
                        if let Some(built) = &built {
                            built.install(deployment.flow_id)?;
                        }
                        Ok(deployment)
                    })
            }
        };
        Ok(deployment.map(|d| serde_json::to_value(d).ok()))
    }

    fn build_hook(&mut self, spec: &HookSpec) -> Result<BuiltHook, ScenarioError> {
        self.hook_nonce += 1;
        let address = Address::derive("flowroute.scenario.hook", &self.hook_nonce.to_be_bytes());
        let built = match spec {
            HookSpec::RateLimit { interval_secs } => BuiltHook::plain(Arc::new(RateLimitHook::new(
                address,
                interval_secs.unwrap_or(self.config.hooks.rate_limit_interval_secs),
            ))),
            HookSpec::Advanced {
                owner,
                interval_secs,
                blocked,
            } => {
                let owner = self.party(owner)?;
                let hook = AdvancedHook::new(
                    address,
                    owner,
                    interval_secs.unwrap_or(self.config.hooks.advanced_rate_limit_interval_secs),
                );
                for name in blocked {
                    hook.block(&owner, &self.party(name)?)
                        .map_err(ScenarioError::HookSetup)?;
                }
                BuiltHook::plain(Arc::new(hook))
            }
            HookSpec::RecipientModifier {
                owner,
                forced,
                allow,
                fallback,
            } => {
                let rules = ModifierRules {
                    owner: self.party(owner)?,
                    forced: forced.as_deref().map(|n| self.party(n)).transpose()?,
                    fallback: fallback.as_deref().map(|n| self.party(n)).transpose()?,
                    allow: allow
                        .iter()
                        .map(|n| self.party(n))
                        .collect::<Result<_, _>>()?,
                };
                let hook = Arc::new(RecipientModifierHook::new(address, rules.owner));
                BuiltHook {
                    hook: hook.clone(),
                    modifier: Some((hook, rules)),
                }
            }
        };
        Ok(built)
    }

    fn escrow_call(
        &self,
        flow: u64,
        call: impl FnOnce(&flowroute_core::Escrow) -> Result<Amount, FlowError>,
    ) -> Result<Option<serde_json::Value>, FlowError> {
        let treasury = self.registry.get_flow(FlowId(flow))?.treasury;
        let escrow = self.factory.escrow(&treasury).ok_or_else(|| {
            FlowError::invalid(format!("flow {} is not funded by a factory escrow", flow))
        })?;
        call(escrow).map(|amount| Some(serde_json::json!({ "amount": amount.to_string() })))
    }
}

struct ModifierRules {
    owner: Address,
    forced: Option<Address>,
    fallback: Option<Address>,
    allow: Vec<Address>,
}

/// A scenario hook plus the per-flow rules it needs once attached.
struct BuiltHook {
    hook: Arc<dyn RedirectHook>,
    modifier: Option<(Arc<RecipientModifierHook>, ModifierRules)>,
}

impl BuiltHook {
    fn plain(hook: Arc<dyn RedirectHook>) -> Self {
        Self {
            hook,
            modifier: None,
        }
    }

    fn install(&self, flow_id: FlowId) -> Result<(), FlowError> {
        let Some((hook, rules)) = &self.modifier else {
            return Ok(());
        };
        if rules.forced.is_some() {
            hook.set_forced_recipient(&rules.owner, flow_id, rules.forced)?;
        }
        if rules.fallback.is_some() {
            hook.set_fallback(&rules.owner, flow_id, rules.fallback)?;
        }
        for who in &rules.allow {
            hook.allow(&rules.owner, flow_id, who)?;
        }
        Ok(())
    }
}
