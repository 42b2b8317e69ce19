//! Fixed-price fractional ownership ledger.
//!
//! Every property is a single registry entry owned by the ledger and split into
//! a fixed supply of fungible fractions. Investors buy fractions out of the
//! ledger's reserve pool at the current buy price and sell them back at the
//! sell price; the payments form one pooled balance that funds payouts and can
//! be withdrawn by the administrator.
//!
//! * [`ledger`] — the balance store and its mint/buy/sell/price/withdraw
//!   state machine.
//! * [`registry`] — the token registry seam and the adapter that issues
//!   property entries.
//! * [`access`] — the admin guard seam.
//! * [`payment`] — the payment rail seam used for payouts and withdrawals.
//! * [`audit`] — signed attestations over ledger snapshots.
//! * [`units`] — conversion between decimal amounts and minimal units.
//! * [`config`] — TOML configuration for the `fractions` binary.
//! * [`store`] — the JSON state file the binary persists between runs.

pub mod access;
pub mod audit;
pub mod config;
pub mod ledger;
pub mod payment;
pub mod registry;
pub mod store;
pub mod units;

mod error;

pub use error::{LedgerError, StateError};
pub use ledger::{
    Address, Amount, FractionalLedger, Fractions, LedgerEvent, LedgerSnapshot, LedgerState,
    PriceSchedule, PropertyId, SharedLedger,
};
