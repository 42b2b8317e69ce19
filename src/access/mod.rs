use serde::{Deserialize, Serialize};

use crate::ledger::Address;

/// Capability check for privileged ledger operations.
pub trait AdminGuard {
    fn is_admin(&self, caller: &Address) -> bool;

    /// Identity that receives withdrawn funds.
    fn admin(&self) -> &Address;
}

/// Guard that recognises exactly one administrator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SingleAdmin {
    admin: Address,
}

impl SingleAdmin {
    pub fn new(admin: impl Into<Address>) -> Self {
        Self {
            admin: admin.into(),
        }
    }
}

impl AdminGuard for SingleAdmin {
    fn is_admin(&self, caller: &Address) -> bool {
        *caller == self.admin
    }

    fn admin(&self) -> &Address {
        &self.admin
    }
}
