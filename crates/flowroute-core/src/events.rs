use serde::{Deserialize, Serialize};

use crate::types::{Address, FlowId, FlowRate};

/// State transitions emitted by the registry.
///
/// `Transfer` mirrors the ownership ledger: `from` is the null address on
/// mint and `to` is the null address on burn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    FlowCreated {
        flow_id: FlowId,
        treasury: Address,
        admin: Address,
        redirect_agent: Address,
        rate_agent: Address,
        asset: Address,
    },
    FlowActivated {
        flow_id: FlowId,
        recipient: Address,
        rate: FlowRate,
        by: Address,
    },
    FlowRateUpdated {
        flow_id: FlowId,
        old_rate: FlowRate,
        new_rate: FlowRate,
        by: Address,
    },
    FlowRedirected {
        flow_id: FlowId,
        from: Address,
        to: Address,
        requested: Address,
        by: Address,
    },
    FlowStopped {
        flow_id: FlowId,
        recipient: Address,
        by: Address,
    },
    HookChanged {
        flow_id: FlowId,
        old: Option<Address>,
        new: Option<Address>,
    },
    RedirectAgentChanged {
        flow_id: FlowId,
        old: Address,
        new: Address,
    },
    RateAgentChanged {
        flow_id: FlowId,
        old: Address,
        new: Address,
    },
    AdminTransferred {
        flow_id: FlowId,
        old: Address,
        new: Address,
    },
    Transfer {
        flow_id: FlowId,
        from: Address,
        to: Address,
    },
}

impl FlowEvent {
    pub fn flow_id(&self) -> FlowId {
        match self {
            Self::FlowCreated { flow_id, .. }
            | Self::FlowActivated { flow_id, .. }
            | Self::FlowRateUpdated { flow_id, .. }
            | Self::FlowRedirected { flow_id, .. }
            | Self::FlowStopped { flow_id, .. }
            | Self::HookChanged { flow_id, .. }
            | Self::RedirectAgentChanged { flow_id, .. }
            | Self::RateAgentChanged { flow_id, .. }
            | Self::AdminTransferred { flow_id, .. }
            | Self::Transfer { flow_id, .. } => *flow_id,
        }
    }
}

/// An event with its position in the log and the clock reading when it was
/// committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub sequence: u64,
    pub timestamp: u64,
    pub event: FlowEvent,
}
