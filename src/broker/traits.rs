//! Broker-agnostic trait for the operations the allocation core consumes.
//!
//! Implement this trait to plug in a different gateway. The engine only ever
//! talks to `dyn Broker`, so live trading, the REST bridge and the in-memory
//! mock are interchangeable.

use crate::broker::types::{
    AccountValue, Holding, Instrument, OpenOrder, OrderTicket, PlacedOrder,
};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Operations the allocation and reconciliation core needs from a broker.
///
/// Every method is a network suspension point; implementations are expected
/// to bound each call with a timeout and a single retry.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Resolve an instrument to its unique broker contract id.
    ///
    /// Returns the qualified instrument (with `contract_id` set and the
    /// broker's local symbol filled in).
    async fn qualify_instrument(&self, instrument: &Instrument) -> anyhow::Result<Instrument>;

    /// All orders currently accepted but not fully filled.
    async fn open_orders(&self) -> anyhow::Result<Vec<OpenOrder>>;

    /// Authoritative current positions, used by reconciliation.
    async fn portfolio_positions(&self) -> anyhow::Result<Vec<Holding>>;

    /// Submit an order. Fire-and-acknowledge: resolves once the broker has
    /// accepted the order, not once it fills.
    async fn place_order(&self, ticket: &OrderTicket) -> anyhow::Result<PlacedOrder>;

    /// Cancel a resting order by id.
    async fn cancel_order(&self, order_id: i64) -> anyhow::Result<()>;

    /// Tagged account value (e.g., `NetLiquidation`) in the given currency.
    async fn account_value(&self, tag: &str, currency: &str) -> anyhow::Result<Decimal>;

    /// All tagged account values for the configured account.
    async fn account_values(&self) -> anyhow::Result<Vec<AccountValue>>;

    /// Last traded (or mark) price for a qualified instrument. Used by
    /// strategy sizing and FX conversion, not by the netting core.
    async fn market_price(&self, instrument: &Instrument) -> anyhow::Result<Decimal>;
}
