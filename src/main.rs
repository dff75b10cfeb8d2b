use anyhow::Context;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use spotbot::config::{load_credentials, Settings};
use spotbot::db::PostgresRecordStore;
use spotbot::exchange::{BinanceClient, ExchangeGateway, PaperExchange};
use spotbot::execution::{
    BalanceMonitor, BotRunner, ConcurrentDispatcher, NewBot, OrderLifecycleEngine, RunExit,
    TokioClock,
};
use spotbot::persistence::RecordStore;
use spotbot::signal::SignalRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Limit-order spot trading bot
#[derive(Parser, Debug)]
#[command(name = "spotbot")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to ./spotbot.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Two-line credentials file: API key, then secret
    #[arg(long, global = true)]
    credentials: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a bot trading the given symbols
    CreateBot {
        #[arg(long)]
        name: String,
        /// Signal evaluator key (ma_crossover, bollinger_bounce)
        #[arg(long)]
        strategy: String,
        /// Kline interval, e.g. 5m, 1h
        #[arg(long)]
        interval: String,
        /// Fraction of the free quote balance per entry, (0, 1]
        #[arg(long)]
        allocation: Decimal,
        /// Exit price multiplier, > 1 (1.012 sells 1.2% above entry)
        #[arg(long)]
        profit_target: Decimal,
        /// Comma separated symbols, e.g. ETHUSDT,BTCUSDT
        #[arg(long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,
        /// Trade for real instead of paper trading
        #[arg(long)]
        live: bool,
    },
    /// List bots and their pairs
    Bots,
    /// Run all bots until Ctrl+C
    Run,
}

// ============================================================================
// Entry point
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    match cli.command {
        Commands::CreateBot {
            name,
            strategy,
            interval,
            allocation,
            profit_target,
            symbols,
            live,
        } => {
            let runner = build_runner(&settings, cli.credentials.as_deref()).await?;
            let bot = runner
                .create_bot(NewBot {
                    name,
                    strategy,
                    interval,
                    trade_allocation: allocation,
                    profit_target,
                    symbols,
                    simulation: !live,
                })
                .await
                .context("Bot creation rejected")?;
            println!("{}", bot.id);
        }
        Commands::Bots => list_bots(&settings).await?,
        Commands::Run => run(&settings, cli.credentials.as_deref()).await?,
    }

    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

async fn run(settings: &Settings, credentials: Option<&std::path::Path>) -> anyhow::Result<()> {
    tracing::info!("🚀 spotbot starting");
    let runner = build_runner(settings, credentials).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("⚠️  Received Ctrl+C, finishing the current round...");
            let _ = shutdown_tx.send(true);
        }
    });

    match runner.run(shutdown_rx).await? {
        RunExit::Shutdown => {
            tracing::info!("👋 Stopped");
            Ok(())
        }
        RunExit::BalanceExhausted { attempts } => {
            anyhow::bail!("Halting: balances unavailable after {} attempts", attempts)
        }
    }
}

async fn list_bots(settings: &Settings) -> anyhow::Result<()> {
    let store = PostgresRecordStore::connect(settings.database_url()?).await?;

    for bot in store.all_bots().await? {
        println!(
            "{}  {}  {} {}  alloc={} target={}  {}",
            bot.id,
            bot.name,
            bot.strategy,
            bot.interval,
            bot.trade_allocation,
            bot.profit_target,
            if bot.simulation { "paper" } else { "live" }
        );
        for pair in store.pairs_of_bot(&bot.id).await? {
            println!(
                "    {:<12} {:<8} P/L x{}",
                pair.symbol,
                if pair.is_active { "idle" } else { "in trade" },
                pair.profit_loss.round_dp(6)
            );
        }
    }
    Ok(())
}

// ============================================================================
// Wiring
// ============================================================================

async fn build_runner(
    settings: &Settings,
    credentials: Option<&std::path::Path>,
) -> anyhow::Result<BotRunner> {
    let credentials = load_credentials(credentials)?;
    let store: Arc<dyn RecordStore> =
        Arc::new(PostgresRecordStore::connect(settings.database_url()?).await?);

    let live: Arc<dyn ExchangeGateway> =
        Arc::new(BinanceClient::new(credentials, settings.client_config()?)?);
    let paper: Arc<dyn ExchangeGateway> = Arc::new(PaperExchange::new(live.clone()));

    let live_engine = OrderLifecycleEngine::new(
        live.clone(),
        store.clone(),
        settings.entry_discount,
        settings.kline_limit,
    )?;
    let paper_engine = OrderLifecycleEngine::new(
        paper,
        store.clone(),
        settings.entry_discount,
        settings.kline_limit,
    )?;

    let balances = BalanceMonitor::new(live, settings.balance_retry(), Arc::new(TokioClock));
    let dispatcher = ConcurrentDispatcher::new(settings.workers, settings.task_timeout());

    Ok(BotRunner::new(
        store,
        SignalRegistry::with_defaults(),
        live_engine,
        paper_engine,
        balances,
        dispatcher,
        settings.poll_interval(),
    ))
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("spotbot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
