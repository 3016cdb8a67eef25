//! Append-only execution ledger.
//!
//! One record per allocation run, written as the final step and never
//! mutated afterwards. The record carries everything needed to reconstruct
//! the decision without re-querying upstream state.

use crate::store::{
    Decision, ExecutionRecord, OrderOutcome, OrderPlanEntry, RunContext, RunStatus, Store,
};
use anyhow::Result;
use chrono::Utc;
use tracing::info;

/// Writes execution records to the store.
pub struct ExecutionLedger<'a> {
    store: &'a dyn Store,
}

impl<'a> ExecutionLedger<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Append one record; returns its document ref.
    pub async fn append(&self, record: &ExecutionRecord) -> Result<String> {
        let doc_ref = self.store.append_execution(record).await?;
        info!(
            doc_ref = %doc_ref,
            status = ?record.status,
            orders = record.orders.len(),
            dry_run = record.dry_run,
            "Execution record written"
        );
        Ok(doc_ref)
    }
}

/// Record for a run that stopped before any broker interaction.
pub fn abort_record(trigger: &str, dry_run: bool, reason: &str) -> ExecutionRecord {
    ExecutionRecord {
        executed_at: Utc::now(),
        trigger: trigger.to_string(),
        status: RunStatus::Aborted,
        summary: format!("aborted, no action taken: {reason}"),
        dry_run,
        context: RunContext::default(),
        decision: Decision::default(),
        orders: vec![],
    }
}

/// Record for a run that failed before a plan could be computed.
pub fn error_record(trigger: &str, dry_run: bool, reason: &str) -> ExecutionRecord {
    ExecutionRecord {
        executed_at: Utc::now(),
        trigger: trigger.to_string(),
        status: RunStatus::Error,
        summary: reason.to_string(),
        dry_run,
        context: RunContext::default(),
        decision: Decision::default(),
        orders: vec![],
    }
}

/// Human-readable one-liner for a completed run.
pub fn summarize(plan: &[OrderPlanEntry], outcomes: &[OrderOutcome]) -> String {
    if plan.is_empty() {
        return "no orders required".to_string();
    }
    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    let detail: Vec<String> = plan
        .iter()
        .map(|e| {
            format!(
                "{} {} {}",
                e.action,
                e.quantity,
                e.instrument.display_name()
            )
        })
        .collect();
    if failed == 0 {
        format!("{} order(s): {}", plan.len(), detail.join(", "))
    } else {
        format!(
            "{} order(s), {} failed: {}",
            plan.len(),
            failed,
            detail.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Instrument, OrderAction};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_each_run_appends_a_new_document() {
        let store = MemoryStore::new();
        let ledger = ExecutionLedger::new(&store);

        let first = ledger
            .append(&abort_record("manual", true, "kill switch"))
            .await
            .unwrap();
        let second = ledger
            .append(&abort_record("manual", true, "kill switch"))
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(store.execution_count().await, 2);
    }

    #[test]
    fn test_abort_record_shape() {
        let record = abort_record("scheduler", false, "overall exposure is zero");
        assert_eq!(record.status, RunStatus::Aborted);
        assert!(record.orders.is_empty());
        assert!(record.summary.contains("no action taken"));
    }

    #[test]
    fn test_summary_counts_failures() {
        let entry = OrderPlanEntry {
            instrument: Instrument::stock("SPY", "ARCA", "USD"),
            desired_quantity: 20,
            current_quantity: 10,
            in_flight_quantity: 2,
            delta: 8,
            action: OrderAction::Buy,
            quantity: 8,
        };
        let outcome = OrderOutcome {
            instrument: entry.instrument.clone(),
            action: entry.action,
            quantity: entry.quantity,
            simulated: false,
            order_id: None,
            status: None,
            error: Some("rejected".to_string()),
        };

        let summary = summarize(&[entry], &[outcome]);
        assert!(summary.contains("1 failed"));
        assert!(summary.contains("BUY 8 SPY"));
    }
}
