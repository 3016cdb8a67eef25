//! Reconciliation: rebuild the stored portfolio view from broker truth.
//!
//! Pure read-and-store. Positions, open orders and account values are
//! fetched from the broker and written wholesale over the previous
//! snapshot; nothing is ever traded or cancelled from here.

use crate::broker::Broker;
use crate::config::Config;
use crate::store::{PortfolioSnapshot, Store};
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Rebuilds the consolidated portfolio snapshot.
pub struct Reconciler<'a> {
    broker: &'a dyn Broker,
    store: &'a dyn Store,
    config: &'a Config,
}

impl<'a> Reconciler<'a> {
    pub fn new(broker: &'a dyn Broker, store: &'a dyn Store, config: &'a Config) -> Self {
        Self {
            broker,
            store,
            config,
        }
    }

    /// Fetch broker truth and overwrite the stored snapshot.
    pub async fn run(&self) -> Result<PortfolioSnapshot> {
        info!("Starting portfolio reconciliation against the broker gateway");

        let (holdings, open_orders, account_values) = tokio::try_join!(
            self.broker.portfolio_positions(),
            self.broker.open_orders(),
            self.broker.account_values(),
        )?;

        let base = self.config.allocation.base_currency.as_str();
        let extract = |tag: &str| {
            account_values
                .iter()
                .find(|v| v.tag == tag && v.currency == base)
                .map(|v| v.value)
                .unwrap_or_else(|| {
                    warn!(tag, currency = base, "Account value not reported - defaulting to 0");
                    Decimal::ZERO
                })
        };

        let snapshot = PortfolioSnapshot {
            updated_at: Utc::now(),
            net_liquidation: extract("NetLiquidation"),
            available_funds: extract("AvailableFunds"),
            holdings,
            open_orders,
        };

        self.store.put_portfolio_snapshot(&snapshot).await?;

        info!(
            holdings = snapshot.holdings.len(),
            open_orders = snapshot.open_orders.len(),
            net_liquidation = %snapshot.net_liquidation,
            "Reconciliation complete"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Holding, Instrument, MockBroker};
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    fn spy(quantity: i64) -> Holding {
        let mut inst = Instrument::stock("SPY", "ARCA", "USD");
        inst.contract_id = Some(1001);
        Holding {
            instrument: inst,
            quantity,
            average_cost: Some(dec!(400)),
        }
    }

    #[tokio::test]
    async fn test_snapshot_overwrites_stale_view() {
        let broker = MockBroker::new();
        let store = MemoryStore::new();
        let config = Config::default();

        broker.seed_position(spy(10)).await;
        broker
            .seed_account_value("NetLiquidation", "USD", dec!(100000))
            .await;
        broker
            .seed_account_value("AvailableFunds", "USD", dec!(40000))
            .await;

        let reconciler = Reconciler::new(&broker, &store, &config);
        reconciler.run().await.unwrap();

        let first = store.portfolio_snapshot().await.unwrap().unwrap();
        assert_eq!(first.holdings.len(), 1);
        assert_eq!(first.holdings[0].quantity, 10);
        assert_eq!(first.net_liquidation, dec!(100000));

        // The broker position drifts; the next pass replaces the view.
        broker.seed_position(spy(7)).await;
        reconciler.run().await.unwrap();

        let second = store.portfolio_snapshot().await.unwrap().unwrap();
        assert_eq!(second.holdings.len(), 2);
        assert_eq!(
            second.holdings.iter().map(|h| h.quantity).sum::<i64>(),
            17
        );
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn test_missing_account_values_default_to_zero() {
        let broker = MockBroker::new();
        let store = MemoryStore::new();
        let config = Config::default();

        let reconciler = Reconciler::new(&broker, &store, &config);
        let snapshot = reconciler.run().await.unwrap();
        assert_eq!(snapshot.net_liquidation, Decimal::ZERO);
        assert_eq!(snapshot.available_funds, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_reconcile_never_trades() {
        let broker = MockBroker::new();
        let store = MemoryStore::new();
        let config = Config::default();
        broker.seed_position(spy(10)).await;

        Reconciler::new(&broker, &store, &config).run().await.unwrap();

        assert!(broker.placed_tickets().await.is_empty());
        assert!(broker.cancelled_order_ids().await.is_empty());
    }
}
