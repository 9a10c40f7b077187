use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collaborators::{LedgerError, PositionError};
use crate::types::{Address, FlowId};

/// Why a hook refused a redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookRejection {
    /// Redirected too recently; next redirect allowed at `retry_at` (seconds).
    RateLimited { retry_at: u64 },
    /// Requested recipient is on the hook's blocklist.
    Blocklisted(Address),
    /// The caller issuing the redirect is on the hook's blocklist.
    BlocklistedCaller(Address),
    /// Requested recipient is not allow-listed and no fallback is configured.
    NotAllowListed(Address),
    Custom(String),
}

impl fmt::Display for HookRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited { retry_at } => write!(f, "rate limited until {}", retry_at),
            Self::Blocklisted(addr) => write!(f, "recipient {} is blocklisted", addr),
            Self::BlocklistedCaller(addr) => write!(f, "caller {} is blocklisted", addr),
            Self::NotAllowListed(addr) => write!(f, "recipient {} is not allow-listed", addr),
            Self::Custom(reason) => f.write_str(reason),
        }
    }
}

/// Registry, hook, escrow, and factory errors.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("permission denied: {caller} may not {action}")]
    PermissionDenied {
        caller: Address,
        action: &'static str,
    },

    #[error("flow {0} not found")]
    FlowNotFound(FlowId),

    #[error("flow {0} is not active")]
    FlowInactive(FlowId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("instance {instance} is already initialized")]
    AlreadyInitialized { instance: Address },

    #[error("instance {instance} is not initialized")]
    NotInitialized { instance: Address },

    #[error("insufficient balance: {holder} holds no {asset}")]
    InsufficientBalance { holder: Address, asset: Address },

    #[error("flow ledger call failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("position manager call failed: {0}")]
    PositionManager(#[from] PositionError),

    #[error("hook {hook} rejected redirect: {reason}")]
    HookRejected {
        hook: Address,
        reason: HookRejection,
    },

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("reentrant call rejected")]
    Reentrancy,
}

/// Coarse error taxonomy shared by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PermissionDenied,
    NotFound,
    InvalidArgument,
    AlreadyInitialized,
    InsufficientBalance,
    ExternalCollaboratorFailure,
    Unsupported,
    Reentrancy,
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::FlowNotFound(_) | Self::FlowInactive(_) => ErrorKind::NotFound,
            Self::InvalidArgument(_) | Self::NotInitialized { .. } => ErrorKind::InvalidArgument,
            Self::AlreadyInitialized { .. } => ErrorKind::AlreadyInitialized,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::Ledger(_) | Self::PositionManager(_) | Self::HookRejected { .. } => {
                ErrorKind::ExternalCollaboratorFailure
            }
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Reentrancy => ErrorKind::Reentrancy,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn denied(caller: &Address, action: &'static str) -> Self {
        Self::PermissionDenied {
            caller: *caller,
            action,
        }
    }

    pub fn rejected(hook: Address, reason: HookRejection) -> Self {
        Self::HookRejected { hook, reason }
    }

    /// The hook rejection reason, if this error is one.
    pub fn rejection(&self) -> Option<&HookRejection> {
        match self {
            Self::HookRejected { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

pub type FlowResult<T> = Result<T, FlowError>;
