use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult};
use crate::types::{Address, FlowId};

/// Non-transferable record of who currently receives each active flow.
///
/// Exposes asset-ownership-like reads (`owner_of`, `balance_of`, `name`,
/// `symbol`). Every externally reachable mutation fails with `Unsupported`;
/// records only change through the registry's mint/transfer/burn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipLedger {
    name: String,
    symbol: String,
    owners: BTreeMap<FlowId, Address>,
    balances: HashMap<Address, u64>,
}

impl OwnershipLedger {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            owners: BTreeMap::new(),
            balances: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn owner_of(&self, flow_id: FlowId) -> FlowResult<Address> {
        self.owners
            .get(&flow_id)
            .copied()
            .ok_or(FlowError::FlowInactive(flow_id))
    }

    pub fn balance_of(&self, owner: &Address) -> u64 {
        self.balances.get(owner).copied().unwrap_or(0)
    }

    pub fn total_active(&self) -> usize {
        self.owners.len()
    }

    pub fn get_approved(&self, _flow_id: FlowId) -> Option<Address> {
        None
    }

    pub fn is_approved_for_all(&self, _owner: &Address, _operator: &Address) -> bool {
        false
    }

    pub fn approve(&self, _to: &Address, _flow_id: FlowId) -> FlowResult<()> {
        Err(FlowError::Unsupported("approve"))
    }

    pub fn set_approval_for_all(&self, _operator: &Address, _approved: bool) -> FlowResult<()> {
        Err(FlowError::Unsupported("set_approval_for_all"))
    }

    pub fn transfer_from(&self, _from: &Address, _to: &Address, _flow_id: FlowId) -> FlowResult<()> {
        Err(FlowError::Unsupported("transfer_from"))
    }

    pub fn safe_transfer_from(
        &self,
        _from: &Address,
        _to: &Address,
        _flow_id: FlowId,
        _data: &[u8],
    ) -> FlowResult<()> {
        Err(FlowError::Unsupported("safe_transfer_from"))
    }

    pub(crate) fn mint(&mut self, flow_id: FlowId, to: Address) -> FlowResult<()> {
        if to.is_zero() {
            return Err(FlowError::invalid("cannot mint to the null address"));
        }
        if self.owners.contains_key(&flow_id) {
            return Err(FlowError::invalid(format!(
                "ownership of flow {} already minted",
                flow_id
            )));
        }
        self.owners.insert(flow_id, to);
        *self.balances.entry(to).or_default() += 1;
        Ok(())
    }

    pub(crate) fn transfer(&mut self, flow_id: FlowId, from: &Address, to: Address) -> FlowResult<()> {
        if to.is_zero() {
            return Err(FlowError::invalid("cannot transfer to the null address"));
        }
        match self.owners.get(&flow_id) {
            Some(owner) if owner == from => {}
            Some(_) => {
                return Err(FlowError::invalid(format!(
                    "flow {} is not owned by {}",
                    flow_id, from
                )))
            }
            None => return Err(FlowError::FlowInactive(flow_id)),
        }
        self.decrement(from);
        self.owners.insert(flow_id, to);
        *self.balances.entry(to).or_default() += 1;
        Ok(())
    }

    pub(crate) fn burn(&mut self, flow_id: FlowId) -> FlowResult<Address> {
        let owner = self
            .owners
            .remove(&flow_id)
            .ok_or(FlowError::FlowInactive(flow_id))?;
        self.decrement(&owner);
        Ok(owner)
    }

    fn decrement(&mut self, owner: &Address) {
        if let Some(count) = self.balances.get_mut(owner) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.balances.remove(owner);
            }
        }
    }
}
