use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 20-byte account identifier.
///
/// `Address::ZERO` is the null address: it is never a valid admin, asset,
/// recipient, or escrow owner.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Deterministically derive an address from a domain tag and a seed.
    ///
    /// Used for instances the system deploys itself (registry, hooks,
    /// escrows) so repeated runs produce the same identifiers.
    pub fn derive(domain: &str, seed: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(domain.as_bytes());
        hasher.update(&[0u8]);
        hasher.update(seed);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest.as_bytes()[..20]);
        Self(bytes)
    }

    /// Address for a human-readable label ("alice", "usdcx", ...).
    pub fn labeled(label: &str) -> Self {
        Self::derive("flowroute.label", label.as_bytes())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressParseError {
    #[error("address must be 40 hex characters (optionally 0x-prefixed), got {0} characters")]
    Length(usize),
    #[error("invalid hex digit '{0}' in address")]
    InvalidDigit(char),
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.len() != 40 {
            return Err(AddressParseError::Length(digits.len()));
        }

        let mut bytes = [0u8; 20];
        hex::decode_to_slice(digits, &mut bytes).map_err(|e| match e {
            hex::FromHexError::InvalidHexCharacter { c, .. } => AddressParseError::InvalidDigit(c),
            _ => AddressParseError::Length(digits.len()),
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Sequential flow handle. The first flow is `FlowId(1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(pub u64);

impl FlowId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-second flow rate in minor units.
///
/// Signed so that negative requests can be rejected explicitly rather than
/// wrapping.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FlowRate(pub i128);

impl FlowRate {
    pub const ZERO: FlowRate = FlowRate(0);

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FlowRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/s", self.0)
    }
}

/// Token amount in minor units.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One `trait_type`/`value` pair of a flow descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorAttribute {
    pub trait_type: String,
    pub value: String,
}

impl DescriptorAttribute {
    pub fn new(trait_type: impl Into<String>, value: impl ToString) -> Self {
        Self {
            trait_type: trait_type.into(),
            value: value.to_string(),
        }
    }
}

/// Read-only per-flow metadata served by the descriptor endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub attributes: Vec<DescriptorAttribute>,
}

/// Registry record for one flow.
///
/// `treasury` and `asset` never change after creation. `active` holds exactly
/// when `current_recipient` is set and `current_rate` is positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub id: FlowId,
    pub admin: Address,
    pub redirect_agent: Address,
    pub rate_agent: Address,
    pub treasury: Address,
    pub asset: Address,
    pub current_recipient: Option<Address>,
    /// Cached rate; may lag the Flow Ledger after external updates.
    pub current_rate: FlowRate,
    pub active: bool,
    pub hook: Option<Address>,
    pub metadata: Option<FlowDescriptor>,
    pub created_at: u64,
}

impl FlowRecord {
    pub fn is_admin(&self, who: &Address) -> bool {
        self.admin == *who
    }

    /// Rate agent or admin.
    pub fn can_set_rate(&self, who: &Address) -> bool {
        self.is_admin(who) || (!self.rate_agent.is_zero() && self.rate_agent == *who)
    }

    /// Redirect agent or admin.
    pub fn can_redirect(&self, who: &Address) -> bool {
        self.is_admin(who) || (!self.redirect_agent.is_zero() && self.redirect_agent == *who)
    }

    pub fn active_recipient(&self) -> Option<Address> {
        if self.active {
            self.current_recipient
        } else {
            None
        }
    }
}
