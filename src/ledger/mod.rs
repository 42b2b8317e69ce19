use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::access::AdminGuard;
use crate::error::{LedgerError, StateError};
use crate::payment::PaymentRail;
use crate::registry::{PropertyRegistry, TokenRegistry};
use crate::units::UNIT;

mod shared;
mod snapshot;

pub use shared::SharedLedger;
pub use snapshot::LedgerSnapshot;

pub type Address = String;
pub type PropertyId = u64;
pub type Amount = u64;
pub type Fractions = u64;

pub const DEFAULT_BUY_PRICE: Amount = UNIT / 10;
pub const DEFAULT_SELL_PRICE: Amount = UNIT / 20;

/// Global buy/sell price pair, always with `buy_price >= sell_price`.
///
/// Deserialization goes through [`PriceSchedule::new`], so a persisted pair
/// with the prices inverted is refused.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "RawPriceSchedule")]
pub struct PriceSchedule {
    buy_price: Amount,
    sell_price: Amount,
}

#[derive(Deserialize)]
struct RawPriceSchedule {
    buy_price: Amount,
    sell_price: Amount,
}

impl TryFrom<RawPriceSchedule> for PriceSchedule {
    type Error = LedgerError;

    fn try_from(raw: RawPriceSchedule) -> Result<Self, Self::Error> {
        Self::new(raw.buy_price, raw.sell_price)
    }
}

impl PriceSchedule {
    pub fn new(buy_price: Amount, sell_price: Amount) -> Result<Self, LedgerError> {
        if buy_price < sell_price {
            return Err(LedgerError::BuyPriceBelowSellPrice {
                buy_price,
                sell_price,
            });
        }
        Ok(Self {
            buy_price,
            sell_price,
        })
    }

    pub fn buy_price(&self) -> Amount {
        self.buy_price
    }

    pub fn sell_price(&self) -> Amount {
        self.sell_price
    }

    pub fn cost_to_buy(&self, amount: Fractions) -> Result<Amount, LedgerError> {
        amount
            .checked_mul(self.buy_price)
            .ok_or(LedgerError::ArithmeticOverflow("cost to buy"))
    }

    pub fn payout_for_sell(&self, amount: Fractions) -> Result<Amount, LedgerError> {
        amount
            .checked_mul(self.sell_price)
            .ok_or(LedgerError::ArithmeticOverflow("payout for sell"))
    }
}

impl Default for PriceSchedule {
    fn default() -> Self {
        Self {
            buy_price: DEFAULT_BUY_PRICE,
            sell_price: DEFAULT_SELL_PRICE,
        }
    }
}

/// Supply and holder balances of one minted property.
///
/// `reserve + sum(holders) == total_fractions` holds after every operation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropertyState {
    pub total_fractions: Fractions,
    pub reserve: Fractions,
    pub holders: BTreeMap<Address, Fractions>,
}

impl PropertyState {
    fn minted(total_fractions: Fractions) -> Self {
        Self {
            total_fractions,
            reserve: total_fractions,
            holders: BTreeMap::new(),
        }
    }

    pub fn held_by(&self, holder: &str) -> Fractions {
        self.holders.get(holder).copied().unwrap_or_default()
    }

    pub fn circulating(&self) -> Fractions {
        self.holders.values().sum()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    PropertyMinted {
        property_id: PropertyId,
        total_fractions: Fractions,
    },
    FractionsBought {
        property_id: PropertyId,
        buyer: Address,
        amount: Fractions,
        payment: Amount,
    },
    FractionsSold {
        property_id: PropertyId,
        seller: Address,
        amount: Fractions,
        payout: Amount,
    },
    PricesUpdated {
        buy_price: Amount,
        sell_price: Amount,
    },
    FundsWithdrawn {
        to: Address,
        amount: Amount,
    },
}

/// Everything the ledger owns. Serializable so it can be persisted between
/// runs of the CLI.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerState {
    pub ledger_id: Address,
    pub next_property_id: PropertyId,
    pub properties: BTreeMap<PropertyId, PropertyState>,
    pub prices: PriceSchedule,
    pub pooled_funds: Amount,
    pub height: u64,
    pub events: Vec<LedgerEvent>,
}

impl LedgerState {
    pub fn new(ledger_id: impl Into<Address>, prices: PriceSchedule) -> Self {
        Self {
            ledger_id: ledger_id.into(),
            next_property_id: 0,
            properties: BTreeMap::new(),
            prices,
            pooled_funds: 0,
            height: 0,
            events: Vec::new(),
        }
    }

    pub fn property(&self, property_id: PropertyId) -> Result<&PropertyState, LedgerError> {
        self.properties
            .get(&property_id)
            .ok_or(LedgerError::PropertyDoesNotExist { property_id })
    }

    /// Check the invariants the ledger maintains, against `registry` as well.
    ///
    /// Used before resuming from persisted state: every property must conserve
    /// its supply, ids must be exactly `0..next_property_id`, and each id must
    /// be issued in the registry to the ledger's identity.
    pub fn validate(&self, registry: &impl TokenRegistry) -> Result<(), StateError> {
        for (&property_id, property) in &self.properties {
            if property_id >= self.next_property_id {
                return Err(StateError::UnallocatedId {
                    property_id,
                    next_property_id: self.next_property_id,
                });
            }
            if property.total_fractions == 0 {
                return Err(StateError::ZeroSupply { property_id });
            }
            if property.holders.contains_key(&self.ledger_id) {
                return Err(StateError::ReserveHeldAsBalance { property_id });
            }
            let accounted = property
                .holders
                .values()
                .fold(u128::from(property.reserve), |sum, &held| {
                    sum + u128::from(held)
                });
            if accounted != u128::from(property.total_fractions) {
                return Err(StateError::SupplyMismatch {
                    property_id,
                    total_fractions: property.total_fractions,
                    accounted,
                });
            }
            match registry.owner_of(property_id) {
                None => return Err(StateError::MissingRegistryEntry { property_id }),
                Some(owner) if owner != self.ledger_id => {
                    return Err(StateError::ForeignRegistryEntry { property_id, owner })
                }
                Some(_) => {}
            }
        }
        // every key is below next_property_id, so equal counts mean no gaps
        if self.properties.len() as u64 != self.next_property_id {
            return Err(StateError::IdGap {
                next_property_id: self.next_property_id,
                properties: self.properties.len(),
            });
        }
        if self.events.len() as u64 != self.height {
            return Err(StateError::HeightMismatch {
                height: self.height,
                events: self.events.len(),
            });
        }
        Ok(())
    }

    fn commit(&mut self, event: LedgerEvent) {
        self.height += 1;
        self.events.push(event);
    }
}

/// The fractional ledger together with its external collaborators.
pub struct FractionalLedger<R, G, P> {
    state: LedgerState,
    registry: PropertyRegistry<R>,
    guard: G,
    rail: P,
}

impl<R, G, P> FractionalLedger<R, G, P>
where
    R: TokenRegistry,
    G: AdminGuard,
    P: PaymentRail,
{
    pub fn new(
        ledger_id: impl Into<Address>,
        prices: PriceSchedule,
        registry: R,
        guard: G,
        rail: P,
    ) -> Self {
        Self::from_state(LedgerState::new(ledger_id, prices), registry, guard, rail)
    }

    /// Resume from previously persisted state.
    pub fn from_state(state: LedgerState, registry: R, guard: G, rail: P) -> Self {
        let registry = PropertyRegistry::new(registry, state.ledger_id.clone());
        Self {
            state,
            registry,
            guard,
            rail,
        }
    }

    pub fn into_parts(self) -> (LedgerState, R, G, P) {
        (self.state, self.registry.into_inner(), self.guard, self.rail)
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn registry(&self) -> &R {
        self.registry.inner()
    }

    pub fn guard(&self) -> &G {
        &self.guard
    }

    pub fn rail(&self) -> &P {
        &self.rail
    }

    pub fn rail_mut(&mut self) -> &mut P {
        &mut self.rail
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot::capture(&self.state)
    }

    //---------------------------------------------------------------- admin

    pub fn mint_property(
        &mut self,
        caller: &Address,
        total_fractions: Fractions,
    ) -> Result<PropertyId, LedgerError> {
        self.try_mint(caller, total_fractions)
            .map_err(|err| rejected("mint_property", caller, err))
    }

    fn try_mint(
        &mut self,
        caller: &Address,
        total_fractions: Fractions,
    ) -> Result<PropertyId, LedgerError> {
        self.require_admin(caller)?;
        if total_fractions == 0 {
            return Err(LedgerError::ZeroFractions);
        }
        let property_id = self.state.next_property_id;
        if self.state.properties.contains_key(&property_id) {
            return Err(LedgerError::PropertyAlreadyExists { property_id });
        }
        let next_id = property_id
            .checked_add(1)
            .ok_or(LedgerError::ArithmeticOverflow("property id"))?;

        self.registry.register(property_id)?;

        self.state.next_property_id = next_id;
        self.state
            .properties
            .insert(property_id, PropertyState::minted(total_fractions));
        self.state.commit(LedgerEvent::PropertyMinted {
            property_id,
            total_fractions,
        });
        info!(property_id, total_fractions, "property minted");
        Ok(property_id)
    }

    pub fn set_prices(
        &mut self,
        caller: &Address,
        buy_price: Amount,
        sell_price: Amount,
    ) -> Result<(), LedgerError> {
        self.try_set_prices(caller, buy_price, sell_price)
            .map_err(|err| rejected("set_prices", caller, err))
    }

    fn try_set_prices(
        &mut self,
        caller: &Address,
        buy_price: Amount,
        sell_price: Amount,
    ) -> Result<(), LedgerError> {
        self.require_admin(caller)?;
        self.state.prices = PriceSchedule::new(buy_price, sell_price)?;
        self.state.commit(LedgerEvent::PricesUpdated {
            buy_price,
            sell_price,
        });
        info!(buy_price, sell_price, "prices updated");
        Ok(())
    }

    /// Send the whole pooled balance to the admin. Returns the amount sent.
    pub fn withdraw(&mut self, caller: &Address) -> Result<Amount, LedgerError> {
        self.try_withdraw(caller)
            .map_err(|err| rejected("withdraw", caller, err))
    }

    fn try_withdraw(&mut self, caller: &Address) -> Result<Amount, LedgerError> {
        self.require_admin(caller)?;
        let to = self.guard.admin().clone();
        let amount = self.state.pooled_funds;
        if let Err(err) = self.rail.transfer(&to, amount) {
            warn!(%to, amount, %err, "withdrawal transfer failed");
            return Err(LedgerError::WithdrawFailed {
                to,
                amount,
                reason: err.to_string(),
            });
        }
        self.state.pooled_funds = 0;
        self.state.commit(LedgerEvent::FundsWithdrawn {
            to: to.clone(),
            amount,
        });
        info!(%to, amount, "funds withdrawn");
        Ok(amount)
    }

    //------------------------------------------------------------- investor

    /// Buy `amount` fractions out of the reserve pool.
    ///
    /// The whole `payment_supplied` is kept in the pool, including anything
    /// above `amount * buy_price`; no change is given.
    pub fn buy_fraction(
        &mut self,
        caller: &Address,
        property_id: PropertyId,
        amount: Fractions,
        payment_supplied: Amount,
    ) -> Result<(), LedgerError> {
        self.try_buy(caller, property_id, amount, payment_supplied)
            .map_err(|err| rejected("buy_fraction", caller, err))
    }

    fn try_buy(
        &mut self,
        caller: &Address,
        property_id: PropertyId,
        amount: Fractions,
        payment_supplied: Amount,
    ) -> Result<(), LedgerError> {
        let available = self.state.property(property_id)?.reserve;
        self.require_investor(caller)?;
        let required = self.state.prices.cost_to_buy(amount)?;
        if payment_supplied < required {
            return Err(LedgerError::InsufficientPayment {
                required,
                supplied: payment_supplied,
            });
        }
        if available < amount {
            return Err(LedgerError::NotEnoughFractionsAvailable {
                requested: amount,
                available,
            });
        }
        let pooled = self
            .state
            .pooled_funds
            .checked_add(payment_supplied)
            .ok_or(LedgerError::ArithmeticOverflow("pooled funds"))?;

        let property = self
            .state
            .properties
            .get_mut(&property_id)
            .ok_or(LedgerError::PropertyDoesNotExist { property_id })?;
        property.reserve -= amount;
        if amount > 0 {
            *property.holders.entry(caller.clone()).or_default() += amount;
        }
        self.state.pooled_funds = pooled;
        self.state.commit(LedgerEvent::FractionsBought {
            property_id,
            buyer: caller.clone(),
            amount,
            payment: payment_supplied,
        });
        info!(property_id, buyer = %caller, amount, payment = payment_supplied, "fractions bought");
        Ok(())
    }

    /// Sell `amount` fractions back to the reserve pool. Returns the payout.
    ///
    /// Nothing changes unless the payout transfer succeeds.
    pub fn sell_fraction(
        &mut self,
        caller: &Address,
        property_id: PropertyId,
        amount: Fractions,
    ) -> Result<Amount, LedgerError> {
        self.try_sell(caller, property_id, amount)
            .map_err(|err| rejected("sell_fraction", caller, err))
    }

    fn try_sell(
        &mut self,
        caller: &Address,
        property_id: PropertyId,
        amount: Fractions,
    ) -> Result<Amount, LedgerError> {
        let held = self.state.property(property_id)?.held_by(caller);
        self.require_investor(caller)?;
        if held < amount {
            return Err(LedgerError::InsufficientFractions {
                requested: amount,
                held,
            });
        }
        let payout = self.state.prices.payout_for_sell(amount)?;
        let pooled = self.state.pooled_funds;
        if pooled < payout {
            return Err(LedgerError::ContractLacksFunds { payout, pooled });
        }

        if let Err(err) = self.rail.transfer(caller, payout) {
            warn!(property_id, seller = %caller, payout, %err, "payout transfer failed");
            return Err(LedgerError::TransferFailed {
                to: caller.clone(),
                amount: payout,
                reason: err.to_string(),
            });
        }

        let property = self
            .state
            .properties
            .get_mut(&property_id)
            .ok_or(LedgerError::PropertyDoesNotExist { property_id })?;
        let remaining = held - amount;
        if remaining == 0 {
            property.holders.remove(caller);
        } else {
            property.holders.insert(caller.clone(), remaining);
        }
        property.reserve += amount;
        self.state.pooled_funds = pooled - payout;
        self.state.commit(LedgerEvent::FractionsSold {
            property_id,
            seller: caller.clone(),
            amount,
            payout,
        });
        info!(property_id, seller = %caller, amount, payout, "fractions sold");
        Ok(payout)
    }

    //---------------------------------------------------------------- reads

    pub fn next_property_id(&self) -> PropertyId {
        self.state.next_property_id
    }

    pub fn total_fractions(&self, property_id: PropertyId) -> Result<Fractions, LedgerError> {
        Ok(self.state.property(property_id)?.total_fractions)
    }

    /// Balance of `holder`; the ledger's own identity holds the reserve pool.
    pub fn balance_of(
        &self,
        property_id: PropertyId,
        holder: &str,
    ) -> Result<Fractions, LedgerError> {
        let property = self.state.property(property_id)?;
        if holder == self.state.ledger_id {
            return Ok(property.reserve);
        }
        Ok(property.held_by(holder))
    }

    pub fn available_fractions(&self, property_id: PropertyId) -> Result<Fractions, LedgerError> {
        Ok(self.state.property(property_id)?.reserve)
    }

    pub fn owner_of_registry_entry(&self, property_id: PropertyId) -> Result<Address, LedgerError> {
        self.state.property(property_id)?;
        self.registry.owner_of_registry_entry(property_id)
    }

    pub fn cost_to_buy(&self, amount: Fractions) -> Result<Amount, LedgerError> {
        self.state.prices.cost_to_buy(amount)
    }

    pub fn payout_for_sell(&self, amount: Fractions) -> Result<Amount, LedgerError> {
        self.state.prices.payout_for_sell(amount)
    }

    pub fn prices(&self) -> PriceSchedule {
        self.state.prices
    }

    pub fn buy_price(&self) -> Amount {
        self.state.prices.buy_price()
    }

    pub fn sell_price(&self) -> Amount {
        self.state.prices.sell_price()
    }

    pub fn pooled_funds(&self) -> Amount {
        self.state.pooled_funds
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.state.events
    }

    //--------------------------------------------------------------- guards

    fn require_admin(&self, caller: &Address) -> Result<(), LedgerError> {
        if !self.guard.is_admin(caller) {
            return Err(LedgerError::Unauthorized {
                caller: caller.clone(),
            });
        }
        Ok(())
    }

    // The reserve pool is addressed by the ledger's identity; it cannot trade
    // with itself.
    fn require_investor(&self, caller: &Address) -> Result<(), LedgerError> {
        if *caller == self.state.ledger_id {
            return Err(LedgerError::Unauthorized {
                caller: caller.clone(),
            });
        }
        Ok(())
    }
}

fn rejected(operation: &'static str, caller: &Address, err: LedgerError) -> LedgerError {
    debug!(operation, %caller, %err, "ledger operation rejected");
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::SingleAdmin;
    use crate::payment::SimulatedRail;
    use crate::registry::{InMemoryRegistry, RegistryError};

    type TestLedger = FractionalLedger<InMemoryRegistry, SingleAdmin, SimulatedRail>;

    const BUY: Amount = UNIT / 10;
    const SELL: Amount = UNIT / 20;

    fn admin() -> Address {
        "admin".into()
    }

    fn alice() -> Address {
        "alice".into()
    }

    fn ledger() -> TestLedger {
        FractionalLedger::new(
            "ledger",
            PriceSchedule::default(),
            InMemoryRegistry::new(),
            SingleAdmin::new("admin"),
            SimulatedRail::new(),
        )
    }

    fn assert_conserved(ledger: &TestLedger, property_id: PropertyId) {
        let property = ledger.state().property(property_id).unwrap();
        assert_eq!(
            property.reserve + property.circulating(),
            property.total_fractions
        );
    }

    #[test]
    fn default_prices_keep_spread() {
        let prices = PriceSchedule::default();
        assert_eq!(prices.buy_price(), BUY);
        assert_eq!(prices.sell_price(), SELL);
        assert!(PriceSchedule::new(1, 2).is_err());
        assert!(PriceSchedule::new(2, 2).is_ok());
    }

    #[test]
    fn mint_assigns_sequential_ids_and_fills_reserve() {
        let mut ledger = ledger();
        assert_eq!(ledger.mint_property(&admin(), 100).unwrap(), 0);
        assert_eq!(ledger.mint_property(&admin(), 5).unwrap(), 1);
        assert_eq!(ledger.next_property_id(), 2);
        assert_eq!(ledger.available_fractions(0).unwrap(), 100);
        assert_eq!(ledger.total_fractions(0).unwrap(), 100);
        assert_eq!(ledger.balance_of(0, "ledger").unwrap(), 100);
        assert_eq!(ledger.owner_of_registry_entry(1).unwrap(), "ledger");
        assert_eq!(
            ledger.events()[0],
            LedgerEvent::PropertyMinted {
                property_id: 0,
                total_fractions: 100
            }
        );
    }

    #[test]
    fn zero_supply_is_rejected() {
        let mut ledger = ledger();
        assert_eq!(
            ledger.mint_property(&admin(), 0).unwrap_err(),
            LedgerError::ZeroFractions
        );
        assert_eq!(ledger.next_property_id(), 0);
        assert!(ledger.registry().is_empty());
    }

    #[test]
    fn id_collision_in_registry_surfaces_as_already_exists() {
        let mut registry = InMemoryRegistry::new();
        registry.issue(0, &"someone-else".into()).unwrap();
        let mut ledger = FractionalLedger::new(
            "ledger",
            PriceSchedule::default(),
            registry,
            SingleAdmin::new("admin"),
            SimulatedRail::new(),
        );
        assert_eq!(
            ledger.mint_property(&admin(), 10).unwrap_err(),
            LedgerError::PropertyAlreadyExists { property_id: 0 }
        );
        assert_eq!(ledger.next_property_id(), 0);
        assert!(ledger.events().is_empty());
    }

    /// Registry that is reachable for reads but refuses to issue anything.
    struct OfflineRegistry;

    impl TokenRegistry for OfflineRegistry {
        fn issue(&mut self, _id: PropertyId, _owner: &Address) -> Result<(), RegistryError> {
            Err(RegistryError::Unavailable("registry offline".into()))
        }

        fn owner_of(&self, _id: PropertyId) -> Option<Address> {
            None
        }
    }

    #[test]
    fn registry_outage_aborts_mint() {
        let mut ledger = FractionalLedger::new(
            "ledger",
            PriceSchedule::default(),
            OfflineRegistry,
            SingleAdmin::new("admin"),
            SimulatedRail::new(),
        );
        let before = ledger.state().clone();
        assert_eq!(
            ledger.mint_property(&admin(), 10).unwrap_err(),
            LedgerError::Registry(RegistryError::Unavailable("registry offline".into()))
        );
        assert_eq!(ledger.next_property_id(), 0);
        assert!(ledger.state().properties.is_empty());
        assert!(ledger.events().is_empty());
        assert_eq!(ledger.state(), &before);
    }

    #[test]
    fn buy_moves_fractions_and_keeps_full_payment() {
        let mut ledger = ledger();
        ledger.mint_property(&admin(), 100).unwrap();
        ledger.buy_fraction(&alice(), 0, 10, UNIT).unwrap();
        assert_eq!(ledger.balance_of(0, "alice").unwrap(), 10);
        assert_eq!(ledger.available_fractions(0).unwrap(), 90);
        assert_eq!(ledger.pooled_funds(), UNIT);

        // overpayment is retained
        ledger.buy_fraction(&alice(), 0, 1, UNIT).unwrap();
        assert_eq!(ledger.pooled_funds(), 2 * UNIT);
        assert_conserved(&ledger, 0);
    }

    #[test]
    fn buy_rejections_leave_state_untouched() {
        let mut ledger = ledger();
        ledger.mint_property(&admin(), 100).unwrap();
        let before = ledger.state().clone();

        assert_eq!(
            ledger.buy_fraction(&alice(), 0, 10, UNIT / 2).unwrap_err(),
            LedgerError::InsufficientPayment {
                required: UNIT,
                supplied: UNIT / 2
            }
        );
        assert_eq!(
            ledger.buy_fraction(&alice(), 0, 101, Amount::MAX).unwrap_err(),
            LedgerError::NotEnoughFractionsAvailable {
                requested: 101,
                available: 100
            }
        );
        assert_eq!(
            ledger.buy_fraction(&alice(), 9, 1, UNIT).unwrap_err(),
            LedgerError::PropertyDoesNotExist { property_id: 9 }
        );
        assert_eq!(
            ledger.buy_fraction(&alice(), 0, Fractions::MAX, Amount::MAX).unwrap_err(),
            LedgerError::ArithmeticOverflow("cost to buy")
        );
        assert!(matches!(
            ledger.buy_fraction(&"ledger".into(), 0, 1, UNIT),
            Err(LedgerError::Unauthorized { .. })
        ));
        assert_eq!(ledger.state(), &before);
    }

    #[test]
    fn pooled_funds_overflow_is_rejected() {
        let mut ledger = ledger();
        ledger.mint_property(&admin(), 100).unwrap();
        ledger.buy_fraction(&alice(), 0, 1, Amount::MAX).unwrap();
        assert_eq!(
            ledger.buy_fraction(&alice(), 0, 1, BUY).unwrap_err(),
            LedgerError::ArithmeticOverflow("pooled funds")
        );
        assert_eq!(ledger.balance_of(0, "alice").unwrap(), 1);
    }

    #[test]
    fn sell_requires_pooled_funds() {
        let mut ledger = ledger();
        ledger.mint_property(&admin(), 100).unwrap();
        ledger.buy_fraction(&alice(), 0, 10, UNIT).unwrap();
        // drain the pool down to 0.4
        ledger.withdraw(&admin()).unwrap();
        ledger.buy_fraction(&"bob".into(), 0, 4, 4 * UNIT / 10).unwrap();
        assert_eq!(ledger.pooled_funds(), 4 * UNIT / 10);

        assert_eq!(
            ledger.sell_fraction(&alice(), 0, 10).unwrap_err(),
            LedgerError::ContractLacksFunds {
                payout: UNIT / 2,
                pooled: 4 * UNIT / 10
            }
        );
        assert_eq!(ledger.balance_of(0, "alice").unwrap(), 10);

        ledger.buy_fraction(&"bob".into(), 0, 1, UNIT / 10).unwrap();
        assert_eq!(ledger.sell_fraction(&alice(), 0, 10).unwrap(), UNIT / 2);
        assert_eq!(
            ledger.events().last(),
            Some(&LedgerEvent::FractionsSold {
                property_id: 0,
                seller: alice(),
                amount: 10,
                payout: UNIT / 2
            })
        );
        assert_eq!(ledger.balance_of(0, "alice").unwrap(), 0);
        assert_eq!(ledger.available_fractions(0).unwrap(), 95);
        assert_eq!(ledger.rail().received_by("alice"), UNIT / 2);
        assert!(!ledger.state().property(0).unwrap().holders.contains_key("alice"));
        assert_conserved(&ledger, 0);
    }

    #[test]
    fn selling_more_than_held_fails() {
        let mut ledger = ledger();
        ledger.mint_property(&admin(), 100).unwrap();
        ledger.buy_fraction(&alice(), 0, 3, UNIT).unwrap();
        assert_eq!(
            ledger.sell_fraction(&alice(), 0, 4).unwrap_err(),
            LedgerError::InsufficientFractions {
                requested: 4,
                held: 3
            }
        );
        assert_eq!(
            ledger.sell_fraction(&"bob".into(), 0, 1).unwrap_err(),
            LedgerError::InsufficientFractions {
                requested: 1,
                held: 0
            }
        );
    }

    #[test]
    fn failed_payout_rolls_back_everything() {
        let mut ledger = ledger();
        ledger.mint_property(&admin(), 100).unwrap();
        ledger.buy_fraction(&alice(), 0, 10, UNIT).unwrap();
        ledger.rail_mut().reject("alice");
        let before = ledger.state().clone();

        let err = ledger.sell_fraction(&alice(), 0, 10).unwrap_err();
        assert!(matches!(err, LedgerError::TransferFailed { amount, .. } if amount == UNIT / 2));
        assert_eq!(ledger.state(), &before);
        assert_eq!(ledger.rail().received_by("alice"), 0);
        assert_eq!(ledger.events().len(), 2);
        assert!(!ledger
            .events()
            .iter()
            .any(|event| matches!(event, LedgerEvent::FractionsSold { .. })));
    }

    #[test]
    fn round_trip_costs_the_spread() {
        let mut ledger = ledger();
        ledger.mint_property(&admin(), 100).unwrap();
        let cost = ledger.cost_to_buy(7).unwrap();
        ledger.buy_fraction(&alice(), 0, 7, cost).unwrap();
        ledger.sell_fraction(&alice(), 0, 7).unwrap();
        assert_eq!(ledger.balance_of(0, "alice").unwrap(), 0);
        assert_eq!(ledger.pooled_funds(), 7 * (BUY - SELL));
    }

    #[test]
    fn set_prices_enforces_ordering() {
        let mut ledger = ledger();
        ledger.set_prices(&admin(), 30, 20).unwrap();
        assert_eq!((ledger.buy_price(), ledger.sell_price()), (30, 20));
        assert_eq!(
            ledger.events(),
            &[LedgerEvent::PricesUpdated {
                buy_price: 30,
                sell_price: 20
            }]
        );
        assert_eq!(
            ledger.set_prices(&admin(), 10, 20).unwrap_err(),
            LedgerError::BuyPriceBelowSellPrice {
                buy_price: 10,
                sell_price: 20
            }
        );
        assert_eq!((ledger.buy_price(), ledger.sell_price()), (30, 20));
        assert_eq!(ledger.events().len(), 1);
        assert_eq!(ledger.cost_to_buy(3).unwrap(), 90);
        assert_eq!(ledger.payout_for_sell(3).unwrap(), 60);
    }

    #[test]
    fn privileged_operations_reject_non_admin() {
        let mut ledger = ledger();
        ledger.mint_property(&admin(), 100).unwrap();
        ledger.buy_fraction(&alice(), 0, 10, UNIT).unwrap();
        let before = ledger.state().clone();
        let unauthorized = LedgerError::Unauthorized { caller: alice() };

        assert_eq!(ledger.mint_property(&alice(), 10).unwrap_err(), unauthorized);
        assert_eq!(ledger.set_prices(&alice(), 5, 1).unwrap_err(), unauthorized);
        assert_eq!(ledger.withdraw(&alice()).unwrap_err(), unauthorized);
        assert_eq!(ledger.state(), &before);
        assert!(ledger.registry().owner_of(1).is_none());
    }

    #[test]
    fn withdraw_sends_everything_or_nothing() {
        let mut ledger = ledger();
        ledger.mint_property(&admin(), 100).unwrap();
        ledger.buy_fraction(&alice(), 0, 10, 3 * UNIT).unwrap();

        ledger.rail_mut().reject("admin");
        assert!(matches!(
            ledger.withdraw(&admin()).unwrap_err(),
            LedgerError::WithdrawFailed { amount, .. } if amount == 3 * UNIT
        ));
        assert_eq!(ledger.pooled_funds(), 3 * UNIT);

        ledger.rail_mut().accept(&admin());
        assert_eq!(ledger.withdraw(&admin()).unwrap(), 3 * UNIT);
        assert_eq!(ledger.pooled_funds(), 0);
        assert_eq!(ledger.rail().received_by("admin"), 3 * UNIT);
        assert_eq!(
            ledger.events().last(),
            Some(&LedgerEvent::FundsWithdrawn {
                to: admin(),
                amount: 3 * UNIT
            })
        );
    }

    #[test]
    fn reads_on_missing_property_fail() {
        let ledger = ledger();
        let missing = LedgerError::PropertyDoesNotExist { property_id: 0 };
        assert_eq!(ledger.total_fractions(0).unwrap_err(), missing);
        assert_eq!(ledger.available_fractions(0).unwrap_err(), missing);
        assert_eq!(ledger.balance_of(0, "alice").unwrap_err(), missing);
        assert_eq!(ledger.owner_of_registry_entry(0).unwrap_err(), missing);
    }

    #[test]
    fn events_are_recorded_only_on_commit() {
        let mut ledger = ledger();
        ledger.mint_property(&admin(), 10).unwrap();
        let _ = ledger.buy_fraction(&alice(), 0, 11, UNIT * 10);
        let _ = ledger.sell_fraction(&alice(), 0, 1);
        ledger.buy_fraction(&alice(), 0, 2, UNIT).unwrap();
        assert_eq!(ledger.events().len(), 2);
        assert_eq!(ledger.state().height, 2);
        assert_eq!(
            ledger.events()[1],
            LedgerEvent::FractionsBought {
                property_id: 0,
                buyer: alice(),
                amount: 2,
                payment: UNIT
            }
        );
    }

    #[test]
    fn state_survives_json_round_trip() {
        let mut ledger = ledger();
        ledger.mint_property(&admin(), 10).unwrap();
        ledger.buy_fraction(&alice(), 0, 2, UNIT).unwrap();
        let (state, registry, guard, rail) = ledger.into_parts();
        let json = serde_json::to_string(&state).unwrap();
        let restored: LedgerState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);

        let mut resumed = FractionalLedger::from_state(restored, registry, guard, rail);
        assert_eq!(resumed.mint_property(&admin(), 3).unwrap(), 1);
        assert_eq!(resumed.balance_of(0, "alice").unwrap(), 2);
    }

    #[test]
    fn inverted_prices_do_not_deserialize() {
        let err = serde_json::from_str::<PriceSchedule>(r#"{"buy_price":1,"sell_price":50}"#)
            .unwrap_err();
        assert!(err.to_string().contains("below sell price"));

        let prices: PriceSchedule =
            serde_json::from_str(r#"{"buy_price":50,"sell_price":1}"#).unwrap();
        assert_eq!((prices.buy_price(), prices.sell_price()), (50, 1));
    }

    fn traded() -> TestLedger {
        let mut ledger = ledger();
        ledger.mint_property(&admin(), 10).unwrap();
        ledger.mint_property(&admin(), 4).unwrap();
        ledger.buy_fraction(&alice(), 0, 3, UNIT).unwrap();
        ledger
    }

    #[test]
    fn consistent_state_validates() {
        let ledger = traded();
        assert_eq!(ledger.state().validate(ledger.registry()), Ok(()));
        let empty = self::ledger();
        assert_eq!(empty.state().validate(empty.registry()), Ok(()));
    }

    #[test]
    fn validate_catches_broken_supply() {
        let ledger = traded();
        let registry = ledger.registry();

        let mut state = ledger.state().clone();
        state.properties.get_mut(&0).unwrap().reserve = 1000;
        assert_eq!(
            state.validate(registry),
            Err(StateError::SupplyMismatch {
                property_id: 0,
                total_fractions: 10,
                accounted: 1003
            })
        );

        let mut state = ledger.state().clone();
        state.properties.get_mut(&1).unwrap().holders.insert("ledger".into(), 0);
        assert_eq!(
            state.validate(registry),
            Err(StateError::ReserveHeldAsBalance { property_id: 1 })
        );

        let mut state = ledger.state().clone();
        let property = state.properties.get_mut(&1).unwrap();
        property.total_fractions = 0;
        property.reserve = 0;
        assert_eq!(
            state.validate(registry),
            Err(StateError::ZeroSupply { property_id: 1 })
        );
    }

    #[test]
    fn validate_catches_id_and_registry_drift() {
        let ledger = traded();
        let registry = ledger.registry();

        let mut state = ledger.state().clone();
        state.next_property_id = 3;
        assert_eq!(
            state.validate(registry),
            Err(StateError::IdGap {
                next_property_id: 3,
                properties: 2
            })
        );

        let mut state = ledger.state().clone();
        state.next_property_id = 1;
        assert_eq!(
            state.validate(registry),
            Err(StateError::UnallocatedId {
                property_id: 1,
                next_property_id: 1
            })
        );

        assert_eq!(
            ledger.state().validate(&InMemoryRegistry::new()),
            Err(StateError::MissingRegistryEntry { property_id: 0 })
        );

        let mut foreign = InMemoryRegistry::new();
        foreign.issue(0, &"ledger".into()).unwrap();
        foreign.issue(1, &"mallory".into()).unwrap();
        assert_eq!(
            ledger.state().validate(&foreign),
            Err(StateError::ForeignRegistryEntry {
                property_id: 1,
                owner: "mallory".into()
            })
        );

        let mut state = ledger.state().clone();
        state.events.pop();
        assert_eq!(
            state.validate(registry),
            Err(StateError::HeightMismatch {
                height: 3,
                events: 2
            })
        );
    }
}
