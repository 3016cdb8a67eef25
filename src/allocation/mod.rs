//! The allocation engine: one run from intents to ledger.
//!
//! A run is a short-lived async task graph: read the portfolio baseline,
//! aggregate strategy intents, net against holdings and in-flight orders,
//! execute (or simulate) the plan, and append exactly one execution record.
//! Re-running before earlier orders fill is safe because resting quantity is
//! netted out of every new plan.

pub mod aggregator;
pub mod executor;
pub mod ledger;
pub mod netting;

pub use aggregator::{Aggregation, IntentAggregator};
pub use executor::{ExecutionOptions, OrderExecutor};
pub use ledger::ExecutionLedger;

use crate::broker::{Broker, InstrumentCatalog};
use crate::config::Config;
use crate::error::AllocationError;
use crate::store::{Decision, ExecutionRecord, RunContext, RunStatus, Store};
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Parameters of one allocation run.
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub dry_run: bool,
    /// Restrict aggregation to these strategies; `None` means every enabled
    /// registered strategy.
    pub strategies: Option<Vec<String>>,
    /// Free-form trigger tag recorded for audit (e.g., "manual", "cron").
    pub trigger: String,
}

impl Default for AllocationRequest {
    fn default() -> Self {
        Self {
            dry_run: false,
            strategies: None,
            trigger: "manual".to_string(),
        }
    }
}

/// Runs allocations against injected broker, store and config.
pub struct AllocationEngine<'a> {
    broker: &'a dyn Broker,
    store: &'a dyn Store,
    config: &'a Config,
}

impl<'a> AllocationEngine<'a> {
    pub fn new(broker: &'a dyn Broker, store: &'a dyn Store, config: &'a Config) -> Self {
        Self {
            broker,
            store,
            config,
        }
    }

    /// Execute one allocation run.
    ///
    /// `Ok` means the run completed and its record is written (individual
    /// order failures live inside the record). `Err` means the run was
    /// fatally stopped - kill switch, zero exposure or a missing portfolio
    /// baseline - after writing an aborted/error record for audit.
    pub async fn run(&self, request: &AllocationRequest) -> Result<ExecutionRecord> {
        let ledger = ExecutionLedger::new(self.store);

        if !self.config.allocation.trading_enabled {
            warn!("Kill switch engaged - aborting allocation");
            let record = ledger::abort_record(
                &request.trigger,
                request.dry_run,
                "trading disabled by kill switch",
            );
            ledger.append(&record).await?;
            return Err(AllocationError::TradingDisabled.into());
        }

        if self.config.exposure.overall == Decimal::ZERO {
            info!("Aborting allocation as overall exposure is 0");
            let record =
                ledger::abort_record(&request.trigger, request.dry_run, "overall exposure is 0");
            ledger.append(&record).await?;
            return Err(AllocationError::ZeroExposure.into());
        }

        let now = Utc::now();
        let Some(snapshot) = self.store.portfolio_snapshot().await? else {
            let record = ledger::error_record(
                &request.trigger,
                request.dry_run,
                "portfolio snapshot missing - cannot allocate without a baseline",
            );
            ledger.append(&record).await?;
            return Err(AllocationError::MissingPortfolio.into());
        };

        let portfolio_stale = snapshot.is_stale(now, self.config.fresh_window());
        if portfolio_stale {
            warn!(
                updated_at = %snapshot.updated_at,
                "Portfolio snapshot is older than the freshness window - proceeding on stale data"
            );
        }

        // The catalog learns every broker-confirmed id up front so that
        // unqualified intent instruments net against qualified holdings.
        let mut catalog = InstrumentCatalog::new();
        for holding in &snapshot.holdings {
            catalog.learn(&holding.instrument);
        }
        for order in &snapshot.open_orders {
            catalog.learn(&order.instrument);
        }

        let aggregator = IntentAggregator::new(self.store, self.config);
        let aggregation = aggregator
            .aggregate(request.strategies.as_deref(), now, &catalog)
            .await?;

        let liquidate = self.config.allocation.liquidate_untargeted;
        let mut open_orders = snapshot.open_orders.clone();
        let mut plan = netting::compute_plan(
            &aggregation.targets,
            &snapshot.holdings,
            &open_orders,
            &catalog,
            liquidate,
        );

        let executor = OrderExecutor::new(self.broker, &self.config.broker);

        // Optionally clear resting orders that fight the new plan, then
        // re-net so their in-flight quantity no longer counts.
        if self.config.allocation.cancel_conflicting_orders && !request.dry_run && !plan.is_empty()
        {
            let cancelled = executor
                .cancel_conflicting(&open_orders, &plan, &catalog)
                .await;
            if !cancelled.is_empty() {
                open_orders.retain(|o| !cancelled.contains(&o.order_id));
                plan = netting::compute_plan(
                    &aggregation.targets,
                    &snapshot.holdings,
                    &open_orders,
                    &catalog,
                    liquidate,
                );
            }
        }

        let final_targets =
            netting::final_targets(&aggregation.targets, &snapshot.holdings, &catalog, liquidate);

        info!(
            entries = plan.len(),
            dry_run = request.dry_run,
            "Order plan computed"
        );

        let outcomes = executor
            .execute(
                &plan,
                &ExecutionOptions {
                    dry_run: request.dry_run,
                    ..Default::default()
                },
                &mut catalog,
            )
            .await;

        let record = ExecutionRecord {
            executed_at: now,
            trigger: request.trigger.clone(),
            status: RunStatus::Success,
            summary: ledger::summarize(&plan, &outcomes),
            dry_run: request.dry_run,
            context: RunContext {
                portfolio_snapshot_ref: Some(format!(
                    "positions/{}/latest_portfolio",
                    self.config.store.trading_mode
                )),
                portfolio_updated_at: Some(snapshot.updated_at),
                portfolio_stale,
                strategy_snapshots: aggregation.snapshots,
                missing_strategies: aggregation.missing,
                stale_strategies: aggregation.stale,
            },
            decision: Decision {
                aggregated_target: aggregation.targets.values().cloned().collect(),
                final_target: final_targets.values().cloned().collect(),
                diff: plan,
            },
            orders: outcomes,
        };

        ledger.append(&record).await?;
        Ok(record)
    }
}
