//! In-memory store for tests and throwaway runs.

use crate::store::{
    ExecutionRecord, PortfolioSnapshot, Store, StrategyConfig, StrategyIntent,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryStoreState {
    snapshot: Option<PortfolioSnapshot>,
    strategies: BTreeMap<String, StrategyConfig>,
    intents: BTreeMap<String, StrategyIntent>,
    executions: Vec<ExecutionRecord>,
    /// Strategy ids whose intent reads should fail (error-path tests).
    failing_intents: Vec<String>,
}

/// Volatile store with the same semantics as `SqliteStore`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryStoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `latest_intent` fail for a strategy id.
    pub async fn fail_intent(&self, strategy_id: &str) {
        self.state
            .write()
            .await
            .failing_intents
            .push(strategy_id.to_string());
    }

    /// Number of execution records appended so far.
    pub async fn execution_count(&self) -> usize {
        self.state.read().await.executions.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn portfolio_snapshot(&self) -> Result<Option<PortfolioSnapshot>> {
        Ok(self.state.read().await.snapshot.clone())
    }

    async fn put_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()> {
        self.state.write().await.snapshot = Some(snapshot.clone());
        Ok(())
    }

    async fn strategy_configs(&self) -> Result<Vec<StrategyConfig>> {
        Ok(self.state.read().await.strategies.values().cloned().collect())
    }

    async fn upsert_strategy_config(&self, config: &StrategyConfig) -> Result<()> {
        self.state
            .write()
            .await
            .strategies
            .insert(config.id.clone(), config.clone());
        Ok(())
    }

    async fn latest_intent(&self, strategy_id: &str) -> Result<Option<StrategyIntent>> {
        let state = self.state.read().await;
        if state.failing_intents.iter().any(|s| s == strategy_id) {
            return Err(anyhow!("intent document for {strategy_id} is unreadable"));
        }
        Ok(state.intents.get(strategy_id).cloned())
    }

    async fn put_intent(&self, intent: &StrategyIntent) -> Result<()> {
        self.state
            .write()
            .await
            .intents
            .insert(intent.strategy_id.clone(), intent.clone());
        Ok(())
    }

    async fn append_execution(&self, record: &ExecutionRecord) -> Result<String> {
        let mut state = self.state.write().await;
        state.executions.push(record.clone());
        Ok(format!("executions/{}", state.executions.len()))
    }

    async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        Ok(self
            .state
            .read()
            .await
            .executions
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}
