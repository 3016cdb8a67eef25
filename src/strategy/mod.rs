//! Strategy plumbing: signal contract, registry and intent publication.
//!
//! Signal algorithms live behind the [`SignalStrategy`] trait; this module
//! only turns their weighted signals into integer target positions and
//! publishes them as intent documents for the allocator to consume. The
//! registry is populated by explicit registration calls at startup, so the
//! available strategy set is auditable at build time.

use crate::broker::{Broker, Instrument, SecurityType};
use crate::config::Config;
use crate::store::{IntentStatus, Store, StrategyConfig, StrategyIntent, TargetPosition};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A strategy's desired allocation for one instrument: portfolio weight
/// plus the reference price the weight was computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalPoint {
    /// Fraction of the strategy's exposure, signed (negative = short).
    pub weight: Decimal,
    /// Reference price in the instrument's currency.
    pub price: Decimal,
}

/// Produces weighted signals for a fixed strategy identifier.
#[async_trait]
pub trait SignalStrategy: Send + Sync {
    fn id(&self) -> &str;

    /// Generate the desired allocation. Implementations may pull market or
    /// historical data through the broker.
    async fn signals(&self, broker: &dyn Broker) -> Result<Vec<(Instrument, SignalPoint)>>;
}

/// Explicit, statically-populated strategy registry.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Arc<dyn SignalStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, strategy: Arc<dyn SignalStrategy>) {
        let id = strategy.id().to_string();
        if self.strategies.insert(id.clone(), strategy).is_some() {
            warn!(strategy = %id, "Strategy re-registered - previous entry replaced");
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn SignalStrategy>> {
        self.strategies.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.strategies.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

/// Convert a weighted signal into an integer position.
///
/// `exposure * weight / (price * multiplier * fx_rate)`, truncated toward
/// zero so dollar allocations never over-commit capital. A non-positive
/// price, multiplier or FX rate short-circuits to 0 with a warning.
pub fn signal_quantity(
    exposure: Decimal,
    point: &SignalPoint,
    multiplier: Decimal,
    fx_rate: Decimal,
) -> i64 {
    if point.weight == Decimal::ZERO {
        return 0;
    }
    if point.price <= Decimal::ZERO || multiplier <= Decimal::ZERO || fx_rate <= Decimal::ZERO {
        warn!(
            price = %point.price,
            %multiplier,
            fx = %fx_rate,
            "Cannot size signal without a positive price - target forced to 0"
        );
        return 0;
    }

    let contracts = exposure * point.weight / (point.price * multiplier * fx_rate);
    contracts.trunc().to_i64().unwrap_or_else(|| {
        warn!(%contracts, "Sized quantity out of range - target forced to 0");
        0
    })
}

/// FX rate converting one unit of `currency` into `base_currency`.
pub async fn fx_rate(broker: &dyn Broker, currency: &str, base_currency: &str) -> Result<Decimal> {
    if currency == base_currency {
        return Ok(Decimal::ONE);
    }

    let pair = Instrument {
        contract_id: None,
        symbol: format!("{currency}{base_currency}"),
        security_type: SecurityType::Forex,
        exchange: "IDEALPRO".to_string(),
        currency: base_currency.to_string(),
        local_symbol: None,
        multiplier: None,
    };
    let qualified = broker
        .qualify_instrument(&pair)
        .await
        .with_context(|| format!("Failed to qualify FX pair {currency}{base_currency}"))?;
    broker
        .market_price(&qualified)
        .await
        .with_context(|| format!("No FX rate for {currency}{base_currency}"))
}

/// Runs strategies and publishes their intents.
pub struct IntentPublisher<'a> {
    broker: &'a dyn Broker,
    store: &'a dyn Store,
    config: &'a Config,
}

impl<'a> IntentPublisher<'a> {
    pub fn new(broker: &'a dyn Broker, store: &'a dyn Store, config: &'a Config) -> Self {
        Self {
            broker,
            store,
            config,
        }
    }

    /// Run one strategy and publish its intent. A strategy failure is
    /// published as an error intent, not swallowed, so the allocator can
    /// report it.
    pub async fn publish(&self, strategy: &dyn SignalStrategy) -> Result<StrategyIntent> {
        let strategy_id = strategy.id().to_string();
        self.ensure_registered(&strategy_id).await?;

        let intent = match self.build_targets(strategy).await {
            Ok(target_positions) => {
                info!(
                    strategy = %strategy_id,
                    targets = target_positions.len(),
                    "Publishing intent"
                );
                StrategyIntent {
                    strategy_id,
                    status: IntentStatus::Success,
                    updated_at: Utc::now(),
                    target_positions,
                    error: None,
                }
            }
            Err(e) => {
                error!(strategy = %strategy_id, error = %e, "Strategy failed - publishing error intent");
                StrategyIntent {
                    strategy_id,
                    status: IntentStatus::Error,
                    updated_at: Utc::now(),
                    target_positions: vec![],
                    error: Some(e.to_string()),
                }
            }
        };

        self.store.put_intent(&intent).await?;
        Ok(intent)
    }

    /// Run every requested (or registered) strategy. Unknown ids are logged
    /// and skipped; one strategy's failure never stops the rest.
    pub async fn publish_all(
        &self,
        registry: &StrategyRegistry,
        allow_list: Option<&[String]>,
    ) -> Vec<StrategyIntent> {
        let ids = match allow_list {
            Some(ids) => ids.to_vec(),
            None => registry.ids(),
        };

        let mut published = Vec::new();
        for id in ids {
            let Some(strategy) = registry.get(&id) else {
                error!(strategy = %id, "No registered strategy with this id");
                continue;
            };
            match self.publish(strategy.as_ref()).await {
                Ok(intent) => published.push(intent),
                Err(e) => error!(strategy = %id, error = %e, "Intent publication failed"),
            }
        }
        published
    }

    async fn build_targets(&self, strategy: &dyn SignalStrategy) -> Result<Vec<TargetPosition>> {
        let base = self.config.allocation.base_currency.as_str();
        let net_liquidation = self.broker.account_value("NetLiquidation", base).await?;
        let weight = self.config.strategy_exposure(strategy.id());
        let exposure = net_liquidation * self.config.exposure.overall * weight;

        if exposure == Decimal::ZERO {
            warn!(
                strategy = %strategy.id(),
                "Strategy exposure is 0 - publishing all-zero targets"
            );
        }

        let signals = strategy.signals(self.broker).await?;
        let mut targets = Vec::with_capacity(signals.len());
        for (instrument, point) in signals {
            let qualified = if instrument.contract_id.is_some() {
                instrument
            } else {
                self.broker.qualify_instrument(&instrument).await?
            };
            let fx = fx_rate(self.broker, &qualified.currency, base).await?;
            let quantity =
                signal_quantity(exposure, &point, qualified.effective_multiplier(), fx);
            targets.push(TargetPosition {
                instrument: qualified,
                quantity,
            });
        }
        Ok(targets)
    }

    async fn ensure_registered(&self, strategy_id: &str) -> Result<()> {
        let known = self.store.strategy_configs().await?;
        if known.iter().any(|c| c.id == strategy_id) {
            return Ok(());
        }
        self.store
            .upsert_strategy_config(&StrategyConfig {
                id: strategy_id.to_string(),
                enabled: true,
            })
            .await
    }
}

/// Fixed-weight strategy: a constant desired allocation across a basket.
///
/// Useful for paper wiring and as the simplest possible reference
/// implementation of the signal contract; prices come from the broker at
/// publication time.
pub struct ConstantWeightStrategy {
    id: String,
    basket: Vec<(Instrument, Decimal)>,
}

impl ConstantWeightStrategy {
    pub fn new(id: &str, basket: Vec<(Instrument, Decimal)>) -> Self {
        Self {
            id: id.to_string(),
            basket,
        }
    }
}

#[async_trait]
impl SignalStrategy for ConstantWeightStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    async fn signals(&self, broker: &dyn Broker) -> Result<Vec<(Instrument, SignalPoint)>> {
        let mut signals = Vec::with_capacity(self.basket.len());
        for (instrument, weight) in &self.basket {
            let qualified = if instrument.contract_id.is_some() {
                instrument.clone()
            } else {
                broker.qualify_instrument(instrument).await?
            };
            let price = broker.market_price(&qualified).await?;
            signals.push((
                qualified,
                SignalPoint {
                    weight: *weight,
                    price,
                },
            ));
        }
        Ok(signals)
    }
}
