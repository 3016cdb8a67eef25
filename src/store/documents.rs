//! Persisted document schemas and allocation data model.
//!
//! Everything in this module is JSON-serializable; the store keeps whole
//! documents, never partial rows, so a snapshot or execution record can be
//! read back byte-for-byte as it was decided.

use crate::broker::{Holding, Instrument, OpenOrder, OrderAction, OrderStatus};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Consolidated live-account snapshot, overwritten wholesale by each
/// reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub updated_at: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    pub net_liquidation: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub available_funds: Decimal,
    pub holdings: Vec<Holding>,
    pub open_orders: Vec<OpenOrder>,
}

impl PortfolioSnapshot {
    /// Whether the snapshot is older than the freshness window.
    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.updated_at > window
    }
}

/// Registration document for one strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub id: String,
    pub enabled: bool,
}

/// Outcome of a strategy's most recent signal generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    Success,
    Error,
}

/// One desired end-state position published by a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetPosition {
    #[serde(rename = "contract")]
    pub instrument: Instrument,
    /// Desired absolute signed position, not a delta.
    pub quantity: i64,
}

/// A strategy's declared desired end-state, published independently of the
/// allocator that consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyIntent {
    pub strategy_id: String,
    pub status: IntentStatus,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub target_positions: Vec<TargetPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StrategyIntent {
    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.updated_at > window
    }

    /// Usable for aggregation: successful and fresh.
    pub fn is_usable(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.status == IntentStatus::Success && !self.is_stale(now, window)
    }
}

/// `(strategyId, quantity)` provenance inside an aggregated target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub strategy_id: String,
    pub quantity: i64,
}

/// Per-instrument sum of all contributing strategies' target quantities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedTarget {
    #[serde(rename = "contract")]
    pub instrument: Instrument,
    pub quantity: i64,
    pub contributors: Vec<Contribution>,
}

/// One instrument's computed trade instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlanEntry {
    #[serde(rename = "contract")]
    pub instrument: Instrument,
    pub desired_quantity: i64,
    pub current_quantity: i64,
    pub in_flight_quantity: i64,
    /// `desired - (current + in_flight)`; never zero for an emitted entry.
    pub delta: i64,
    pub action: OrderAction,
    /// `abs(delta)`.
    pub quantity: i64,
}

/// Per-entry result of the execution adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderOutcome {
    #[serde(rename = "contract")]
    pub instrument: Instrument,
    pub action: OrderAction,
    pub quantity: i64,
    pub simulated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal status of one allocation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Aborted,
    Error,
}

/// Per-strategy state observed at aggregation time, recorded even for
/// strategies that did not contribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySnapshot {
    pub strategy_id: String,
    pub enabled: bool,
    pub contributed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<IntentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Inputs the decision was made against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_snapshot_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub portfolio_stale: bool,
    #[serde(default)]
    pub strategy_snapshots: Vec<StrategySnapshot>,
    #[serde(default)]
    pub missing_strategies: Vec<String>,
    #[serde(default)]
    pub stale_strategies: Vec<String>,
}

/// The decision trail: raw aggregation, post-policy targets, order plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Decision {
    /// Raw per-instrument strategy sums.
    #[serde(default)]
    pub aggregated_target: Vec<AggregatedTarget>,
    /// Post-policy key-space union, implicit liquidation zeros included.
    #[serde(default)]
    pub final_target: Vec<AggregatedTarget>,
    /// The order plan.
    #[serde(default)]
    pub diff: Vec<OrderPlanEntry>,
}

/// One audit document per allocation run; append-only, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub executed_at: DateTime<Utc>,
    pub trigger: String,
    pub status: RunStatus,
    pub summary: String,
    pub dry_run: bool,
    #[serde(default)]
    pub context: RunContext,
    #[serde(default)]
    pub decision: Decision,
    #[serde(default)]
    pub orders: Vec<OrderOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_snapshot_staleness() {
        let now = Utc::now();
        let snapshot = PortfolioSnapshot {
            updated_at: now - Duration::minutes(200),
            net_liquidation: dec!(100000),
            available_funds: dec!(25000),
            holdings: vec![],
            open_orders: vec![],
        };
        assert!(snapshot.is_stale(now, Duration::minutes(180)));
        assert!(!snapshot.is_stale(now, Duration::minutes(240)));
    }

    #[test]
    fn test_intent_usability() {
        let now = Utc::now();
        let mut intent = StrategyIntent {
            strategy_id: "spymacdvixy".to_string(),
            status: IntentStatus::Success,
            updated_at: now - Duration::minutes(10),
            target_positions: vec![],
            error: None,
        };
        assert!(intent.is_usable(now, Duration::minutes(180)));

        intent.updated_at = now - Duration::minutes(200);
        assert!(!intent.is_usable(now, Duration::minutes(180)));

        intent.updated_at = now;
        intent.status = IntentStatus::Error;
        assert!(!intent.is_usable(now, Duration::minutes(180)));
    }

    #[test]
    fn test_execution_record_round_trip() {
        let record = ExecutionRecord {
            executed_at: Utc::now(),
            trigger: "manual".to_string(),
            status: RunStatus::Success,
            summary: "1 order planned".to_string(),
            dry_run: true,
            context: RunContext::default(),
            decision: Decision::default(),
            orders: vec![OrderOutcome {
                instrument: Instrument::stock("SPY", "ARCA", "USD"),
                action: OrderAction::Buy,
                quantity: 8,
                simulated: true,
                order_id: None,
                status: None,
                error: None,
            }],
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: ExecutionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, RunStatus::Success);
        assert!(back.orders[0].simulated);
        assert_eq!(back.orders[0].quantity, 8);
    }
}
