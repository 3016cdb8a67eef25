//! Document store abstraction.
//!
//! The engine reads strategy intents and the portfolio snapshot through the
//! [`Store`] trait and appends execution records to it. `SqliteStore` is the
//! durable implementation; `MemoryStore` backs tests and throwaway runs.

mod documents;
pub mod memory;
mod sqlite;

pub use documents::*;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

/// Typed document operations the core consumes.
#[async_trait]
pub trait Store: Send + Sync {
    /// Latest consolidated portfolio snapshot, if one was ever reconciled.
    async fn portfolio_snapshot(&self) -> anyhow::Result<Option<PortfolioSnapshot>>;

    /// Overwrite the portfolio snapshot wholesale.
    async fn put_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot) -> anyhow::Result<()>;

    /// All registered strategies.
    async fn strategy_configs(&self) -> anyhow::Result<Vec<StrategyConfig>>;

    /// Register or update a strategy's config document.
    async fn upsert_strategy_config(&self, config: &StrategyConfig) -> anyhow::Result<()>;

    /// A strategy's most recent intent document.
    async fn latest_intent(&self, strategy_id: &str) -> anyhow::Result<Option<StrategyIntent>>;

    /// Publish (overwrite) a strategy's latest intent.
    async fn put_intent(&self, intent: &StrategyIntent) -> anyhow::Result<()>;

    /// Append one execution record; returns its document ref. Records are
    /// never updated or deleted.
    async fn append_execution(&self, record: &ExecutionRecord) -> anyhow::Result<String>;

    /// Most recent execution records, newest first.
    async fn recent_executions(&self, limit: usize) -> anyhow::Result<Vec<ExecutionRecord>>;
}
