//! In-memory broker for paper wiring and engine tests.
//!
//! State is seeded by the caller (positions, open orders, account values,
//! prices) and every submission is recorded, so tests can assert both what
//! was placed and what was never placed (dry-run purity).

use crate::broker::traits::Broker;
use crate::broker::types::{
    AccountValue, Holding, Instrument, OpenOrder, OrderStatus, OrderTicket, PlacedOrder,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct MockBrokerState {
    positions: Vec<Holding>,
    open_orders: Vec<OpenOrder>,
    account_values: Vec<AccountValue>,
    /// Prices keyed by symbol.
    prices: HashMap<String, Decimal>,
    /// Pre-qualified instruments keyed by composite identity.
    qualified: HashMap<String, Instrument>,
    /// Symbols for which qualification or submission should fail.
    failing_symbols: HashSet<String>,
    placed: Vec<OrderTicket>,
    cancelled: Vec<i64>,
}

/// Scriptable broker double.
pub struct MockBroker {
    state: RwLock<MockBrokerState>,
    next_order_id: AtomicI64,
    next_contract_id: AtomicI64,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MockBrokerState::default()),
            next_order_id: AtomicI64::new(1),
            next_contract_id: AtomicI64::new(9_000_000),
        }
    }

    pub async fn seed_position(&self, holding: Holding) {
        self.state.write().await.positions.push(holding);
    }

    pub async fn seed_open_order(&self, order: OpenOrder) {
        self.state.write().await.open_orders.push(order);
    }

    pub async fn seed_account_value(&self, tag: &str, currency: &str, value: Decimal) {
        self.state.write().await.account_values.push(AccountValue {
            tag: tag.to_string(),
            currency: currency.to_string(),
            value,
        });
    }

    pub async fn seed_price(&self, symbol: &str, price: Decimal) {
        self.state
            .write()
            .await
            .prices
            .insert(symbol.to_string(), price);
    }

    /// Register a qualified instrument so `qualify_instrument` resolves it
    /// to a stable contract id instead of fabricating one.
    pub async fn seed_qualified(&self, instrument: Instrument) {
        self.state
            .write()
            .await
            .qualified
            .insert(instrument.composite(), instrument);
    }

    /// Make qualification and submission fail for a symbol.
    pub async fn fail_symbol(&self, symbol: &str) {
        self.state
            .write()
            .await
            .failing_symbols
            .insert(symbol.to_string());
    }

    /// Tickets submitted so far (empty after a dry run).
    pub async fn placed_tickets(&self) -> Vec<OrderTicket> {
        self.state.read().await.placed.clone()
    }

    pub async fn cancelled_order_ids(&self) -> Vec<i64> {
        self.state.read().await.cancelled.clone()
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn qualify_instrument(&self, instrument: &Instrument) -> Result<Instrument> {
        let mut state = self.state.write().await;
        if state.failing_symbols.contains(&instrument.symbol) {
            return Err(anyhow!("no security definition for {}", instrument.symbol));
        }
        if instrument.contract_id.is_some() {
            return Ok(instrument.clone());
        }
        if let Some(known) = state.qualified.get(&instrument.composite()) {
            return Ok(known.clone());
        }

        let mut qualified = instrument.clone();
        qualified.contract_id = Some(self.next_contract_id.fetch_add(1, Ordering::SeqCst));
        qualified.local_symbol = Some(instrument.symbol.clone());
        state
            .qualified
            .insert(qualified.composite(), qualified.clone());
        Ok(qualified)
    }

    async fn open_orders(&self) -> Result<Vec<OpenOrder>> {
        Ok(self.state.read().await.open_orders.clone())
    }

    async fn portfolio_positions(&self) -> Result<Vec<Holding>> {
        Ok(self.state.read().await.positions.clone())
    }

    async fn place_order(&self, ticket: &OrderTicket) -> Result<PlacedOrder> {
        let mut state = self.state.write().await;
        if state.failing_symbols.contains(&ticket.instrument.symbol) {
            return Err(anyhow!("order rejected for {}", ticket.instrument.symbol));
        }

        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        state.placed.push(ticket.clone());
        // The order rests as in-flight quantity until something fills it.
        state.open_orders.push(OpenOrder {
            instrument: ticket.instrument.clone(),
            order_id,
            action: ticket.action,
            remaining_quantity: ticket.quantity,
            status: OrderStatus::Submitted,
            limit_price: ticket.limit_price,
        });

        debug!(
            symbol = %ticket.instrument.symbol,
            action = %ticket.action,
            quantity = ticket.quantity,
            order_id,
            "Mock order accepted"
        );

        Ok(PlacedOrder {
            order_id,
            instrument: ticket.instrument.clone(),
            action: ticket.action,
            quantity: ticket.quantity,
            status: OrderStatus::Submitted,
            limit_price: ticket.limit_price,
        })
    }

    async fn cancel_order(&self, order_id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        let before = state.open_orders.len();
        state.open_orders.retain(|o| o.order_id != order_id);
        if state.open_orders.len() == before {
            return Err(anyhow!("unknown order id {order_id}"));
        }
        state.cancelled.push(order_id);
        Ok(())
    }

    async fn account_value(&self, tag: &str, currency: &str) -> Result<Decimal> {
        self.state
            .read()
            .await
            .account_values
            .iter()
            .find(|v| v.tag == tag && v.currency == currency)
            .map(|v| v.value)
            .ok_or_else(|| anyhow!("account value {tag} ({currency}) not seeded"))
    }

    async fn account_values(&self) -> Result<Vec<AccountValue>> {
        Ok(self.state.read().await.account_values.clone())
    }

    async fn market_price(&self, instrument: &Instrument) -> Result<Decimal> {
        self.state
            .read()
            .await
            .prices
            .get(&instrument.symbol)
            .copied()
            .ok_or_else(|| anyhow!("no price seeded for {}", instrument.symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::types::{OrderAction, OrderKind, TimeInForce};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_qualification_is_stable_per_composite() {
        let broker = MockBroker::new();
        let spy = Instrument::stock("SPY", "ARCA", "USD");

        let first = broker.qualify_instrument(&spy).await.unwrap();
        let second = broker.qualify_instrument(&spy).await.unwrap();
        assert_eq!(first.contract_id, second.contract_id);
        assert!(first.contract_id.is_some());
    }

    #[tokio::test]
    async fn test_placed_order_becomes_in_flight() {
        let broker = MockBroker::new();
        let mut spy = Instrument::stock("SPY", "ARCA", "USD");
        spy.contract_id = Some(756733);

        let placed = broker
            .place_order(&OrderTicket {
                instrument: spy,
                action: OrderAction::Buy,
                quantity: 8,
                kind: OrderKind::Market,
                limit_price: None,
                tif: TimeInForce::Gtc,
            })
            .await
            .unwrap();

        let open = broker.open_orders().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].order_id, placed.order_id);
        assert_eq!(open[0].signed_remaining(), 8);

        broker.cancel_order(placed.order_id).await.unwrap();
        assert!(broker.open_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let broker = MockBroker::new();
        broker.fail_symbol("VIXY").await;
        broker.seed_price("SPY", dec!(430)).await;

        let vixy = Instrument::stock("VIXY", "BATS", "USD");
        assert!(broker.qualify_instrument(&vixy).await.is_err());

        let spy = Instrument::stock("SPY", "ARCA", "USD");
        assert_eq!(broker.market_price(&spy).await.unwrap(), dec!(430));
    }
}
