//! Order execution for a computed plan.
//!
//! Dry-run mode records what would have been sent without touching the
//! broker. Live mode qualifies unresolved instruments, submits the whole
//! batch concurrently (fire-and-acknowledge, no waiting on fills) and
//! isolates per-entry failures so one rejection never blocks the rest.

use crate::broker::{
    Broker, Instrument, InstrumentCatalog, InstrumentKey, OpenOrder, OrderKind, OrderTicket,
    TimeInForce,
};
use crate::config::BrokerConfig;
use crate::store::{OrderOutcome, OrderPlanEntry};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info, warn};

/// Options for one execution batch.
#[derive(Debug, Default)]
pub struct ExecutionOptions {
    pub dry_run: bool,
    /// Entries whose instrument key appears here are submitted as limit
    /// orders at the given price; everything else goes out at market.
    pub limit_prices: HashMap<InstrumentKey, Decimal>,
}

/// Submits (or simulates) the order plan against the broker.
pub struct OrderExecutor<'a> {
    broker: &'a dyn Broker,
    grace: Duration,
}

impl<'a> OrderExecutor<'a> {
    pub fn new(broker: &'a dyn Broker, config: &BrokerConfig) -> Self {
        Self {
            broker,
            grace: Duration::from_millis(config.order_grace_ms),
        }
    }

    /// Execute the plan. Returns one outcome per entry, in plan order.
    pub async fn execute(
        &self,
        plan: &[OrderPlanEntry],
        options: &ExecutionOptions,
        catalog: &mut InstrumentCatalog,
    ) -> Vec<OrderOutcome> {
        if options.dry_run {
            info!(entries = plan.len(), "Dry run - simulating order plan");
            return plan
                .iter()
                .map(|entry| OrderOutcome {
                    instrument: entry.instrument.clone(),
                    action: entry.action,
                    quantity: entry.quantity,
                    simulated: true,
                    order_id: None,
                    status: None,
                    error: None,
                })
                .collect();
        }

        // Qualification first: instruments without a broker id cannot be
        // submitted. Failures surface as per-entry outcomes.
        let mut prepared: Vec<Result<Instrument, String>> = Vec::with_capacity(plan.len());
        for entry in plan {
            prepared.push(self.resolve_instrument(&entry.instrument, catalog).await);
        }

        let submissions = plan.iter().zip(prepared).map(|(entry, resolved)| async move {
            let instrument = match resolved {
                Ok(instrument) => instrument,
                Err(e) => {
                    return OrderOutcome {
                        instrument: entry.instrument.clone(),
                        action: entry.action,
                        quantity: entry.quantity,
                        simulated: false,
                        order_id: None,
                        status: None,
                        error: Some(e),
                    }
                }
            };

            let limit_price = options.limit_prices.get(&instrument.key()).copied();
            let ticket = OrderTicket {
                instrument: instrument.clone(),
                action: entry.action,
                quantity: entry.quantity,
                kind: if limit_price.is_some() {
                    OrderKind::Limit
                } else {
                    OrderKind::Market
                },
                limit_price,
                tif: TimeInForce::Gtc,
            };

            match self.broker.place_order(&ticket).await {
                Ok(placed) => {
                    info!(
                        instrument = %instrument.display_name(),
                        action = %entry.action,
                        quantity = entry.quantity,
                        order_id = placed.order_id,
                        status = ?placed.status,
                        "Order acknowledged"
                    );
                    OrderOutcome {
                        instrument,
                        action: entry.action,
                        quantity: entry.quantity,
                        simulated: false,
                        order_id: Some(placed.order_id),
                        status: Some(placed.status),
                        error: None,
                    }
                }
                Err(e) => {
                    error!(
                        instrument = %instrument.display_name(),
                        action = %entry.action,
                        quantity = entry.quantity,
                        error = %e,
                        "Order submission failed"
                    );
                    OrderOutcome {
                        instrument,
                        action: entry.action,
                        quantity: entry.quantity,
                        simulated: false,
                        order_id: None,
                        status: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        });

        let outcomes = join_all(submissions).await;

        // Short settle delay so broker-side state has propagated before the
        // caller reads anything back. Not a fill wait.
        if !outcomes.is_empty() && !self.grace.is_zero() {
            tokio::time::sleep(self.grace).await;
        }

        outcomes
    }

    /// Cancel resting orders whose action opposes the plan's direction for
    /// the same instrument. Returns the cancelled order ids; failures are
    /// logged and skipped.
    pub async fn cancel_conflicting(
        &self,
        open_orders: &[OpenOrder],
        plan: &[OrderPlanEntry],
        catalog: &InstrumentCatalog,
    ) -> Vec<i64> {
        let planned: HashMap<InstrumentKey, _> = plan
            .iter()
            .map(|entry| (catalog.resolve(&entry.instrument), entry.action))
            .collect();

        let mut cancelled = Vec::new();
        for order in open_orders {
            let key = catalog.resolve(&order.instrument);
            let Some(&planned_action) = planned.get(&key) else {
                continue;
            };
            if planned_action == order.action || order.signed_remaining() == 0 {
                continue;
            }

            warn!(
                order_id = order.order_id,
                instrument = %order.instrument.display_name(),
                resting = %order.action,
                planned = %planned_action,
                "Cancelling conflicting resting order"
            );
            match self.broker.cancel_order(order.order_id).await {
                Ok(()) => cancelled.push(order.order_id),
                Err(e) => warn!(order_id = order.order_id, error = %e, "Cancel failed"),
            }
        }
        cancelled
    }

    async fn resolve_instrument(
        &self,
        instrument: &Instrument,
        catalog: &mut InstrumentCatalog,
    ) -> Result<Instrument, String> {
        if instrument.contract_id.is_some() {
            return Ok(instrument.clone());
        }
        if let Some(id) = catalog.contract_id(instrument) {
            let mut known = instrument.clone();
            known.contract_id = Some(id);
            return Ok(known);
        }

        match self.broker.qualify_instrument(instrument).await {
            Ok(qualified) => {
                catalog.learn(&qualified);
                Ok(qualified)
            }
            Err(e) => {
                error!(
                    symbol = %instrument.symbol,
                    error = %e,
                    "Qualification failed - entry skipped"
                );
                Err(format!("qualification failed: {e}"))
            }
        }
    }
}
