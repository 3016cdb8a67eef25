//! SQLite-backed document store.
//!
//! Documents are persisted as JSON payloads, one table per collection. The
//! executions table only ever receives inserts; there is no update or
//! delete path for it anywhere in this module.

use crate::store::{
    ExecutionRecord, PortfolioSnapshot, Store, StrategyConfig, StrategyIntent,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Durable store, namespaced by trading mode so paper and live state never
/// mix in one table row.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    mode: String,
}

impl SqliteStore {
    /// Open (or create) the database and initialize the schema.
    pub fn new<P: AsRef<Path>>(db_path: P, mode: &str) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::init_schema(&conn)?;

        info!(mode, "Document store initialized at {:?}", db_path.as_ref());
        Ok(Self {
            conn: Mutex::new(conn),
            mode: mode.to_string(),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- Latest consolidated portfolio snapshot (one row per trading mode)
            CREATE TABLE IF NOT EXISTS portfolio_snapshot (
                mode TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Strategy registrations
            CREATE TABLE IF NOT EXISTS strategies (
                id TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL
            );

            -- Latest intent per strategy
            CREATE TABLE IF NOT EXISTS intents (
                strategy_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Execution ledger (append-only)
            CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mode TEXT NOT NULL,
                executed_at TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_executions_mode_time
                ON executions(mode, executed_at);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Document ref of the snapshot this store serves.
    pub fn snapshot_ref(&self) -> String {
        format!("positions/{}/latest_portfolio", self.mode)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn portfolio_snapshot(&self) -> Result<Option<PortfolioSnapshot>> {
        let conn = self.conn.lock().await;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM portfolio_snapshot WHERE mode = ?1",
                params![self.mode],
                |row| row.get(0),
            )
            .optional()?;

        payload
            .map(|p| serde_json::from_str(&p).context("Failed to parse portfolio snapshot"))
            .transpose()
    }

    async fn put_portfolio_snapshot(&self, snapshot: &PortfolioSnapshot) -> Result<()> {
        let payload =
            serde_json::to_string(snapshot).context("Failed to serialize portfolio snapshot")?;
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO portfolio_snapshot (mode, payload, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(mode) DO UPDATE SET payload = ?2, updated_at = ?3
            "#,
            params![self.mode, payload, snapshot.updated_at.to_rfc3339()],
        )?;

        debug!(
            holdings = snapshot.holdings.len(),
            open_orders = snapshot.open_orders.len(),
            "Portfolio snapshot written"
        );
        Ok(())
    }

    async fn strategy_configs(&self) -> Result<Vec<StrategyConfig>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT id, enabled FROM strategies ORDER BY id")?;
        let configs = stmt
            .query_map([], |row| {
                Ok(StrategyConfig {
                    id: row.get(0)?,
                    enabled: row.get::<_, i64>(1)? != 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(configs)
    }

    async fn upsert_strategy_config(&self, config: &StrategyConfig) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO strategies (id, enabled) VALUES (?1, ?2)
            ON CONFLICT(id) DO UPDATE SET enabled = ?2
            "#,
            params![config.id, config.enabled as i64],
        )?;
        Ok(())
    }

    async fn latest_intent(&self, strategy_id: &str) -> Result<Option<StrategyIntent>> {
        let conn = self.conn.lock().await;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM intents WHERE strategy_id = ?1",
                params![strategy_id],
                |row| row.get(0),
            )
            .optional()?;

        payload
            .map(|p| {
                serde_json::from_str(&p)
                    .with_context(|| format!("Failed to parse intent for {strategy_id}"))
            })
            .transpose()
    }

    async fn put_intent(&self, intent: &StrategyIntent) -> Result<()> {
        let payload = serde_json::to_string(intent).context("Failed to serialize intent")?;
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO intents (strategy_id, payload, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(strategy_id) DO UPDATE SET payload = ?2, updated_at = ?3
            "#,
            params![
                intent.strategy_id,
                payload,
                intent.updated_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    async fn append_execution(&self, record: &ExecutionRecord) -> Result<String> {
        let payload =
            serde_json::to_string(record).context("Failed to serialize execution record")?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO executions (mode, executed_at, payload) VALUES (?1, ?2, ?3)",
            params![self.mode, record.executed_at.to_rfc3339(), payload],
        )?;
        let id = conn.last_insert_rowid();

        debug!(id, status = ?record.status, "Execution record appended");
        Ok(format!("executions/{id}"))
    }

    async fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT payload FROM executions
            WHERE mode = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )?;

        let records = stmt
            .query_map(params![self.mode, limit as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|p| serde_json::from_str(&p).context("Failed to parse execution record"))
            .collect::<Result<Vec<_>>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Instrument;
    use crate::store::{Decision, IntentStatus, RunContext, RunStatus, TargetPosition};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn test_store() -> SqliteStore {
        SqliteStore::new(":memory:", "paper").unwrap()
    }

    fn test_record(summary: &str) -> ExecutionRecord {
        ExecutionRecord {
            executed_at: Utc::now(),
            trigger: "test".to_string(),
            status: RunStatus::Success,
            summary: summary.to_string(),
            dry_run: true,
            context: RunContext::default(),
            decision: Decision::default(),
            orders: vec![],
        }
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_overwrites() {
        let store = test_store();
        assert!(store.portfolio_snapshot().await.unwrap().is_none());

        let mut snapshot = PortfolioSnapshot {
            updated_at: Utc::now(),
            net_liquidation: dec!(100000),
            available_funds: dec!(40000),
            holdings: vec![],
            open_orders: vec![],
        };
        store.put_portfolio_snapshot(&snapshot).await.unwrap();

        snapshot.net_liquidation = dec!(101000);
        store.put_portfolio_snapshot(&snapshot).await.unwrap();

        let loaded = store.portfolio_snapshot().await.unwrap().unwrap();
        assert_eq!(loaded.net_liquidation, dec!(101000));
    }

    #[tokio::test]
    async fn test_intent_round_trip() {
        let store = test_store();
        let intent = StrategyIntent {
            strategy_id: "spymacdvixy".to_string(),
            status: IntentStatus::Success,
            updated_at: Utc::now(),
            target_positions: vec![TargetPosition {
                instrument: Instrument::stock("SPY", "ARCA", "USD"),
                quantity: 20,
            }],
            error: None,
        };
        store.put_intent(&intent).await.unwrap();

        let loaded = store.latest_intent("spymacdvixy").await.unwrap().unwrap();
        assert_eq!(loaded.target_positions.len(), 1);
        assert_eq!(loaded.target_positions[0].quantity, 20);

        assert!(store.latest_intent("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_executions_append_only_newest_first() {
        let store = test_store();
        let first_ref = store.append_execution(&test_record("first")).await.unwrap();
        let second_ref = store.append_execution(&test_record("second")).await.unwrap();
        assert_ne!(first_ref, second_ref);

        let records = store.recent_executions(10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].summary, "second");
        assert_eq!(records[1].summary, "first");

        let limited = store.recent_executions(1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].summary, "second");
    }

    #[tokio::test]
    async fn test_strategy_config_upsert() {
        let store = test_store();
        store
            .upsert_strategy_config(&StrategyConfig {
                id: "spymacdvixy".to_string(),
                enabled: true,
            })
            .await
            .unwrap();
        store
            .upsert_strategy_config(&StrategyConfig {
                id: "spymacdvixy".to_string(),
                enabled: false,
            })
            .await
            .unwrap();

        let configs = store.strategy_configs().await.unwrap();
        assert_eq!(configs.len(), 1);
        assert!(!configs[0].enabled);
    }
}
