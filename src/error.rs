use thiserror::Error;

use crate::ledger::{Address, Amount, Fractions, PropertyId};

/// Every way a ledger operation can be rejected.
///
/// A returned error always means the ledger, the registry and the payment rail
/// were left exactly as they were before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("property {property_id} does not exist")]
    PropertyDoesNotExist { property_id: PropertyId },

    /// Raised only if id allocation ever hands out an id that is already taken.
    #[error("property {property_id} already exists")]
    PropertyAlreadyExists { property_id: PropertyId },

    #[error("caller {caller} is not authorized")]
    Unauthorized { caller: Address },

    #[error("a property must be minted with at least one fraction")]
    ZeroFractions,

    #[error("insufficient payment: required {required}, supplied {supplied}")]
    InsufficientPayment { required: Amount, supplied: Amount },

    #[error("not enough fractions available: requested {requested}, available {available}")]
    NotEnoughFractionsAvailable {
        requested: Fractions,
        available: Fractions,
    },

    #[error("insufficient fractions: requested {requested}, held {held}")]
    InsufficientFractions { requested: Fractions, held: Fractions },

    #[error("contract lacks funds: payout {payout}, pooled {pooled}")]
    ContractLacksFunds { payout: Amount, pooled: Amount },

    #[error("buy price {buy_price} is below sell price {sell_price}")]
    BuyPriceBelowSellPrice { buy_price: Amount, sell_price: Amount },

    #[error("withdrawal of {amount} to {to} failed: {reason}")]
    WithdrawFailed {
        to: Address,
        amount: Amount,
        reason: String,
    },

    #[error("transfer of {amount} to {to} failed: {reason}")]
    TransferFailed {
        to: Address,
        amount: Amount,
        reason: String,
    },

    #[error("arithmetic overflow in {0}")]
    ArithmeticOverflow(&'static str),

    #[error("registry error: {0}")]
    Registry(#[from] crate::registry::RegistryError),
}

/// Inconsistencies found when resuming a ledger from persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("property {property_id} has no fractions")]
    ZeroSupply { property_id: PropertyId },

    #[error("property {property_id} accounts for {accounted} of {total_fractions} fractions")]
    SupplyMismatch {
        property_id: PropertyId,
        total_fractions: Fractions,
        accounted: u128,
    },

    #[error("property {property_id} lists the reserve identity as a holder")]
    ReserveHeldAsBalance { property_id: PropertyId },

    #[error("property {property_id} lies outside the allocated ids 0..{next_property_id}")]
    UnallocatedId {
        property_id: PropertyId,
        next_property_id: PropertyId,
    },

    #[error("next property id is {next_property_id} but {properties} properties exist")]
    IdGap {
        next_property_id: PropertyId,
        properties: usize,
    },

    #[error("property {property_id} has no registry entry")]
    MissingRegistryEntry { property_id: PropertyId },

    #[error("registry entry {property_id} is owned by {owner}, not the ledger")]
    ForeignRegistryEntry { property_id: PropertyId, owner: Address },

    #[error("height {height} does not match {events} recorded events")]
    HeightMismatch { height: u64, events: usize },
}
