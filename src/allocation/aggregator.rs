//! Aggregation of per-strategy target intents.
//!
//! Reads every candidate strategy's latest intent, filters by enablement,
//! status and freshness, and sums target quantities per instrument while
//! keeping per-strategy provenance. One strategy's failure never aborts
//! aggregation of the others.

use crate::broker::{InstrumentCatalog, InstrumentKey};
use crate::config::Config;
use crate::store::{
    AggregatedTarget, Contribution, Store, StrategyIntent, StrategySnapshot,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Result of one aggregation pass.
#[derive(Debug, Default)]
pub struct Aggregation {
    /// Per-strategy state at aggregation time, contributors and not.
    pub snapshots: Vec<StrategySnapshot>,
    /// Strategies excluded for staleness or a failed intent status.
    pub stale: Vec<String>,
    /// Strategies with no readable intent document.
    pub missing: Vec<String>,
    /// Per-instrument sums, deterministically keyed.
    pub targets: BTreeMap<InstrumentKey, AggregatedTarget>,
}

/// Reads and sums strategy intents.
pub struct IntentAggregator<'a> {
    store: &'a dyn Store,
    config: &'a Config,
}

impl<'a> IntentAggregator<'a> {
    pub fn new(store: &'a dyn Store, config: &'a Config) -> Self {
        Self { store, config }
    }

    /// Aggregate intents for the allow-listed strategies, or for every
    /// enabled registered strategy when no allow-list is given.
    pub async fn aggregate(
        &self,
        allow_list: Option<&[String]>,
        now: DateTime<Utc>,
        catalog: &InstrumentCatalog,
    ) -> Result<Aggregation> {
        let configs = self.store.strategy_configs().await?;
        let enabled_of = |id: &str| configs.iter().find(|c| c.id == id).map(|c| c.enabled);

        // An allow-list overrides the enabled flag; without one, disabled
        // strategies are skipped up front.
        let candidates: Vec<String> = match allow_list {
            Some(ids) => ids.to_vec(),
            None => configs
                .iter()
                .filter(|c| c.enabled)
                .map(|c| c.id.clone())
                .collect(),
        };

        let window = self.config.fresh_window();
        let mut outcome = Aggregation::default();

        let fetches = candidates.iter().map(|id| self.store.latest_intent(id));
        let results = join_all(fetches).await;

        for (strategy_id, fetched) in candidates.iter().zip(results) {
            let enabled = enabled_of(strategy_id).unwrap_or(false);
            let mut snapshot = StrategySnapshot {
                strategy_id: strategy_id.clone(),
                enabled,
                contributed: false,
                status: None,
                updated_at: None,
                intent_ref: Some(format!("strategies/{strategy_id}/intent/latest")),
                error: None,
            };

            // An explicit exposure weight of zero disables the strategy even
            // when its registration says enabled.
            if self.config.exposure.strategies.get(strategy_id.as_str())
                == Some(&Decimal::ZERO)
            {
                info!(strategy = %strategy_id, "Exposure weight is 0 - skipping");
                outcome.snapshots.push(snapshot);
                continue;
            }

            match fetched {
                Err(e) => {
                    warn!(strategy = %strategy_id, error = %e, "Intent fetch failed - treating as missing");
                    snapshot.error = Some(e.to_string());
                    outcome.missing.push(strategy_id.clone());
                }
                Ok(None) => {
                    warn!(strategy = %strategy_id, "No intent document");
                    outcome.missing.push(strategy_id.clone());
                }
                Ok(Some(intent)) => {
                    snapshot.status = Some(intent.status);
                    snapshot.updated_at = Some(intent.updated_at);
                    snapshot.error = intent.error.clone();

                    if !intent.is_usable(now, window) {
                        warn!(
                            strategy = %strategy_id,
                            status = ?intent.status,
                            updated_at = %intent.updated_at,
                            "Intent stale or unsuccessful - excluded from aggregation"
                        );
                        outcome.stale.push(strategy_id.clone());
                    } else {
                        Self::contribute(&mut outcome.targets, &intent, catalog);
                        snapshot.contributed = true;
                    }
                }
            }

            outcome.snapshots.push(snapshot);
        }

        info!(
            strategies = outcome.snapshots.len(),
            contributing = outcome.snapshots.iter().filter(|s| s.contributed).count(),
            stale = outcome.stale.len(),
            missing = outcome.missing.len(),
            instruments = outcome.targets.len(),
            "Aggregation complete"
        );
        Ok(outcome)
    }

    fn contribute(
        targets: &mut BTreeMap<InstrumentKey, AggregatedTarget>,
        intent: &StrategyIntent,
        catalog: &InstrumentCatalog,
    ) {
        for position in &intent.target_positions {
            let key = catalog.resolve(&position.instrument);
            let entry = targets.entry(key).or_insert_with(|| AggregatedTarget {
                instrument: position.instrument.clone(),
                quantity: 0,
                contributors: vec![],
            });
            entry.quantity += position.quantity;
            entry.contributors.push(Contribution {
                strategy_id: intent.strategy_id.clone(),
                quantity: position.quantity,
            });
            // Upgrade to the qualified instrument when a later contributor
            // carries the broker id.
            if entry.instrument.contract_id.is_none()
                && position.instrument.contract_id.is_some()
            {
                entry.instrument = position.instrument.clone();
            }
        }
    }
}
