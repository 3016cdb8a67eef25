//! Portfolio Commander - Main Entry Point
//!
//! Operator CLI around the allocation engine: publish intents, reconcile
//! the portfolio snapshot, run allocations (dry or live) and inspect the
//! execution ledger.

use anyhow::Result;
use clap::{Parser, Subcommand};
use portfolio_commander::allocation::{AllocationEngine, AllocationRequest};
use portfolio_commander::broker::{
    AccountValue, Broker, GatewayBroker, Holding, Instrument, MockBroker, OpenOrder, OrderAction,
    OrderStatus,
};
use portfolio_commander::config::Config;
use portfolio_commander::reconcile::Reconciler;
use portfolio_commander::store::{SqliteStore, Store};
use portfolio_commander::strategy::{ConstantWeightStrategy, IntentPublisher, StrategyRegistry};
use rust_decimal_macros::dec;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Portfolio Commander CLI
#[derive(Parser)]
#[command(name = "portfolio-commander")]
#[command(version, about = "Multi-strategy portfolio allocation against a brokerage gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use the in-memory mock broker instead of the gateway
    #[arg(long, global = true)]
    mock: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute and place (or simulate) the order plan for current intents
    Allocate {
        /// Compute and record the plan without contacting the broker
        #[arg(long)]
        dry_run: bool,

        /// Comma-separated strategy ids (default: all enabled)
        #[arg(long, value_delimiter = ',')]
        strategies: Option<Vec<String>>,

        /// Trigger tag recorded in the execution ledger
        #[arg(long, default_value = "manual")]
        trigger: String,
    },

    /// Overwrite the stored portfolio snapshot with broker truth
    Reconcile,

    /// Run registered strategies and publish their intents
    Publish {
        /// Comma-separated strategy ids (default: all registered)
        #[arg(long, value_delimiter = ',')]
        strategies: Option<Vec<String>>,
    },

    /// Full pipeline: publish intents, reconcile, then allocate
    Run {
        /// Simulate the allocation step
        #[arg(long)]
        dry_run: bool,

        /// Comma-separated strategy ids (default: all registered)
        #[arg(long, value_delimiter = ',')]
        strategies: Option<Vec<String>>,
    },

    /// Print live positions, open orders and account values
    Summary,

    /// Print recent execution records from the ledger
    History {
        /// Number of records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    let mut config = Config::load()?;
    config.validate()?;
    if cli.mock {
        apply_mock_defaults(&mut config);
    }
    log_config(&config);

    let store = open_store(&config)?;
    let broker = build_broker(&config, cli.mock).await?;

    match cli.command {
        Commands::Allocate {
            dry_run,
            strategies,
            trigger,
        } => {
            let engine = AllocationEngine::new(broker.as_ref(), &store, &config);
            let record = engine
                .run(&AllocationRequest {
                    dry_run,
                    strategies,
                    trigger,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::Reconcile => {
            let reconciler = Reconciler::new(broker.as_ref(), &store, &config);
            let snapshot = reconciler.run().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }

        Commands::Publish { strategies } => {
            let registry = build_registry(cli.mock);
            if registry.is_empty() {
                warn!("No strategies registered - nothing to publish");
            }
            let publisher = IntentPublisher::new(broker.as_ref(), &store, &config);
            let published = publisher
                .publish_all(&registry, strategies.as_deref())
                .await;
            println!("{}", serde_json::to_string_pretty(&published)?);
        }

        Commands::Run {
            dry_run,
            strategies,
        } => {
            // Pipeline stages are isolated: a publish or reconcile failure
            // is logged and the allocation still runs on stored state.
            let registry = build_registry(cli.mock);
            let publisher = IntentPublisher::new(broker.as_ref(), &store, &config);
            let published = publisher
                .publish_all(&registry, strategies.as_deref())
                .await;
            info!(published = published.len(), "Intent publication stage done");

            let reconciler = Reconciler::new(broker.as_ref(), &store, &config);
            if let Err(e) = reconciler.run().await {
                warn!(error = %e, "Reconcile stage failed - allocating against stored snapshot");
            }

            let engine = AllocationEngine::new(broker.as_ref(), &store, &config);
            let record = engine
                .run(&AllocationRequest {
                    dry_run,
                    strategies,
                    trigger: "pipeline".to_string(),
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }

        Commands::Summary => {
            let summary = account_summary(broker.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Commands::History { limit } => {
            let records = store.recent_executions(limit).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
    }

    Ok(())
}

/// Read-only account overview assembled from concurrent broker reads.
#[derive(Debug, Serialize)]
struct AccountSummary {
    account_values: Vec<AccountValue>,
    portfolio: Vec<Holding>,
    open_orders: Vec<OpenOrder>,
}

async fn account_summary(broker: &dyn Broker) -> Result<AccountSummary> {
    let (account_values, portfolio, open_orders) = tokio::try_join!(
        broker.account_values(),
        broker.portfolio_positions(),
        broker.open_orders(),
    )?;
    Ok(AccountSummary {
        account_values,
        portfolio,
        open_orders,
    })
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    if let Some(parent) = Path::new(&config.store.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    SqliteStore::new(&config.store.db_path, &config.store.trading_mode)
}

async fn build_broker(config: &Config, mock: bool) -> Result<Box<dyn Broker>> {
    if !mock {
        return Ok(Box::new(GatewayBroker::new(&config.broker)?));
    }

    let broker = MockBroker::new();
    seed_mock_broker(&broker).await;
    Ok(Box::new(broker))
}

/// Demo world for `--mock`: a funded account holding 10 SPY with a resting
/// BUY for 2 more, so a dry allocation shows real netting.
async fn seed_mock_broker(broker: &MockBroker) {
    let mut spy = Instrument::stock("SPY", "ARCA", "USD");
    spy.contract_id = Some(756733);
    spy.local_symbol = Some("SPY".to_string());
    let mut vixy = Instrument::stock("VIXY", "BATS", "USD");
    vixy.contract_id = Some(2002);
    vixy.local_symbol = Some("VIXY".to_string());

    broker.seed_qualified(spy.clone()).await;
    broker.seed_qualified(vixy.clone()).await;
    broker.seed_price("SPY", dec!(430.17)).await;
    broker.seed_price("VIXY", dec!(14.25)).await;
    broker
        .seed_account_value("NetLiquidation", "USD", dec!(100000))
        .await;
    broker
        .seed_account_value("AvailableFunds", "USD", dec!(40000))
        .await;
    broker
        .seed_position(Holding {
            instrument: spy.clone(),
            quantity: 10,
            average_cost: Some(dec!(401.50)),
        })
        .await;
    broker
        .seed_open_order(OpenOrder {
            instrument: spy,
            order_id: 1,
            action: OrderAction::Buy,
            remaining_quantity: 2,
            status: OrderStatus::Submitted,
            limit_price: Some(dec!(425.00)),
        })
        .await;
}

fn build_registry(mock: bool) -> StrategyRegistry {
    let mut registry = StrategyRegistry::new();
    if mock {
        registry.register(Arc::new(ConstantWeightStrategy::new(
            "demo_basket",
            vec![
                (Instrument::stock("SPY", "ARCA", "USD"), dec!(0.9)),
                (Instrument::stock("VIXY", "BATS", "USD"), dec!(0.1)),
            ],
        )));
    }
    registry
}

fn apply_mock_defaults(config: &mut Config) {
    config
        .exposure
        .strategies
        .entry("demo_basket".to_string())
        .or_insert(dec!(1.0));
    if config.store.db_path == "data/commander.db" {
        config.store.db_path = "data/commander-mock.db".to_string();
    }
}

/// Initialize logging with file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", "commander.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the program duration.
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("portfolio_commander=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stderr.and(file_writer))
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log effective configuration on startup.
fn log_config(config: &Config) {
    info!("Configuration:");
    info!("   Trading Mode: {}", config.store.trading_mode);
    info!("   Overall Exposure: {}", config.exposure.overall);
    info!("   Freshness Window: {} min", config.allocation.fresh_minutes);
    info!("   Trading Enabled: {}", config.allocation.trading_enabled);
    info!(
        "   Liquidate Untargeted: {}",
        config.allocation.liquidate_untargeted
    );
    info!("   Gateway: {}", config.broker.base_url);
    info!("   Store: {}", config.store.db_path);
}
