//! flowroute-core: redirectable rate-based flows.
//!
//! A [`FlowRegistry`] keeps one record per flow (treasury, asset, roles,
//! current recipient and rate) and drives an external [`FlowLedger`] that
//! does the actual streaming. Redirects can be vetoed or rewritten by a
//! [`RedirectHook`]. Each active flow is mirrored in a non-transferable
//! [`OwnershipLedger`]. Treasuries live in [`Escrow`]s, which a
//! [`FlowFactory`] deploys together with preset hooks.
//!
//! All operations are synchronous. A registry call either commits fully or
//! leaves registry state, ownership, the event log and the Flow Ledger as
//! they were.

#![deny(unsafe_code)]

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod escrow;
pub mod events;
pub mod factory;
pub mod hooks;
pub mod memory;
pub mod ownership;
pub mod registry;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{FlowLedger, LedgerError, PositionError, PositionManager};
pub use config::{ConfigError, FlowrouteConfig, HookSettings};
pub use error::{ErrorKind, FlowError, FlowResult, HookRejection};
pub use escrow::{CreateFlowParams, Escrow, EscrowBlueprint, EscrowKind, EscrowRecord};
pub use events::{FlowEvent, RecordedEvent};
pub use factory::{Deployment, FactoryEvent, FlowFactory, FlowRoles, Preset};
pub use hooks::{
    AdvancedHook, FeePullConfig, FeePullerHook, HookKind, RateLimitHook, RecipientModifierHook,
    RedirectHook, RedirectRequest, SmartFlowRateHook,
};
pub use memory::{InMemoryFlowLedger, InMemoryPositionManager, LedgerCall};
pub use ownership::OwnershipLedger;
pub use registry::FlowRegistry;
pub use types::{Address, Amount, FlowDescriptor, FlowId, FlowRate, FlowRecord};
