use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::ledger::{Address, PropertyId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("registry entry {0} was already issued")]
    AlreadyIssued(PropertyId),
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Non-fungible registry: one owner per identifier.
pub trait TokenRegistry {
    fn issue(&mut self, id: PropertyId, owner: &Address) -> Result<(), RegistryError>;
    fn owner_of(&self, id: PropertyId) -> Option<Address>;
}

/// Registry kept in memory; serializable so the CLI can persist it.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InMemoryRegistry {
    owners: BTreeMap<PropertyId, Address>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

impl TokenRegistry for InMemoryRegistry {
    fn issue(&mut self, id: PropertyId, owner: &Address) -> Result<(), RegistryError> {
        if self.owners.contains_key(&id) {
            return Err(RegistryError::AlreadyIssued(id));
        }
        self.owners.insert(id, owner.clone());
        Ok(())
    }

    fn owner_of(&self, id: PropertyId) -> Option<Address> {
        self.owners.get(&id).cloned()
    }
}

/// Adapter that issues every property entry to the ledger's own identity and
/// refuses to issue an id twice.
#[derive(Clone, Debug)]
pub struct PropertyRegistry<R> {
    inner: R,
    owner: Address,
}

impl<R: TokenRegistry> PropertyRegistry<R> {
    pub fn new(inner: R, owner: Address) -> Self {
        Self { inner, owner }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn register(&mut self, property_id: PropertyId) -> Result<(), LedgerError> {
        if self.inner.owner_of(property_id).is_some() {
            return Err(LedgerError::PropertyAlreadyExists { property_id });
        }
        match self.inner.issue(property_id, &self.owner) {
            Ok(()) => Ok(()),
            Err(RegistryError::AlreadyIssued(id)) => {
                Err(LedgerError::PropertyAlreadyExists { property_id: id })
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn owner_of_registry_entry(&self, property_id: PropertyId) -> Result<Address, LedgerError> {
        self.inner
            .owner_of(property_id)
            .ok_or(LedgerError::PropertyDoesNotExist { property_id })
    }
}
