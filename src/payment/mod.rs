use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ledger::{Address, Amount};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("recipient {0} rejected the transfer")]
    Rejected(Address),
    #[error("balance of {0} would overflow")]
    Overflow(Address),
}

/// Outbound side of the payment rail.
///
/// A transfer either fully succeeds or fails without moving anything; it is
/// never retried by the ledger.
pub trait PaymentRail {
    fn transfer(&mut self, to: &Address, amount: Amount) -> Result<(), TransferError>;
}

/// Rail that credits recipients in an in-process book.
///
/// Recipients marked with [`SimulatedRail::reject`] refuse every transfer,
/// which models an external account that cannot receive funds.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimulatedRail {
    received: BTreeMap<Address, Amount>,
    #[serde(default)]
    rejecting: BTreeSet<Address>,
}

impl SimulatedRail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&mut self, recipient: impl Into<Address>) {
        self.rejecting.insert(recipient.into());
    }

    pub fn accept(&mut self, recipient: &Address) {
        self.rejecting.remove(recipient);
    }

    pub fn received_by(&self, recipient: &str) -> Amount {
        self.received.get(recipient).copied().unwrap_or_default()
    }
}

impl PaymentRail for SimulatedRail {
    fn transfer(&mut self, to: &Address, amount: Amount) -> Result<(), TransferError> {
        if self.rejecting.contains(to) {
            return Err(TransferError::Rejected(to.clone()));
        }
        let balance = self.received.entry(to.clone()).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| TransferError::Overflow(to.clone()))?;
        Ok(())
    }
}
