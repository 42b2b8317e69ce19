use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{Address, Amount, LedgerState, PriceSchedule, PropertyId, PropertyState};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub ledger_id: Address,
    pub height: u64,
    pub next_property_id: PropertyId,
    pub prices: PriceSchedule,
    pub pooled_funds: Amount,
    pub properties: BTreeMap<PropertyId, PropertyState>,
    pub event_count: u64,
    #[serde(with = "crate::audit::serde_hash")]
    pub state_root: [u8; 32],
}

impl LedgerSnapshot {
    pub fn capture(state: &LedgerState) -> Self {
        Self {
            ledger_id: state.ledger_id.clone(),
            height: state.height,
            next_property_id: state.next_property_id,
            prices: state.prices,
            pooled_funds: state.pooled_funds,
            properties: state.properties.clone(),
            event_count: state.events.len() as u64,
            state_root: compute_state_root(state),
        }
    }

    pub fn state_root_hex(&self) -> String {
        hex::encode(self.state_root)
    }
}

/// Merkle root over prices, pooled funds, property supplies and every holder
/// balance. Depends only on the balances, never on insertion order.
pub fn compute_state_root(state: &LedgerState) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();

    let mut hasher = Sha256::new();
    hasher.update(b"ledger");
    hasher.update(state.ledger_id.as_bytes());
    hasher.update(state.next_property_id.to_le_bytes());
    hasher.update(state.prices.buy_price().to_le_bytes());
    hasher.update(state.prices.sell_price().to_le_bytes());
    hasher.update(state.pooled_funds.to_le_bytes());
    leaves.push(hasher.finalize().into());

    for (property_id, property) in &state.properties {
        let mut hasher = Sha256::new();
        hasher.update(b"property");
        hasher.update(property_id.to_le_bytes());
        hasher.update(property.total_fractions.to_le_bytes());
        hasher.update(property.reserve.to_le_bytes());
        leaves.push(hasher.finalize().into());

        for (holder, amount) in &property.holders {
            let mut hasher = Sha256::new();
            hasher.update(b"holder");
            hasher.update(property_id.to_le_bytes());
            hasher.update((holder.len() as u64).to_le_bytes());
            hasher.update(holder.as_bytes());
            hasher.update(amount.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"fractions-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
