// src/main.rs
use anyhow::Context;
use candle_sniper::config::AppConfig;
use candle_sniper::connectors::{BinanceClient, ExchangeClient, PaperExchange};
use candle_sniper::core::{EngineSettings, PositionMachine, RecoveryKind, RiskPolicy, TradingEngine};
use candle_sniper::storage::{JsonFileStore, StateStore};
use candle_sniper::{notify, strategies, tui, web};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "candle_sniper", version, about = "Single-pair candle pattern spot bot")]
struct Cli {
    /// Settings file (toml/yaml/json). Defaults to ./Settings.* if present.
    #[arg(long)]
    config: Option<String>,

    /// Delete the saved position state before starting.
    #[arg(long)]
    reset_state: bool,

    /// No terminal UI; log to stdout as well as the log file.
    #[arg(long)]
    headless: bool,
}

fn setup_logging(config: &AppConfig, to_stdout: bool) -> WorkerGuard {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "candle_sniper.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // The TUI owns the terminal, so stdout logging is headless-only.
    let stdout_layer = to_stdout.then(|| fmt::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(stdout_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    config.validate()?;
    let _log_guard = setup_logging(&config, cli.headless);

    info!(
        symbol = %config.symbol,
        timeframe = %config.timeframe,
        dry_run = config.dry_run,
        strategy = ?config.strategy.kind,
        "🚀 Candle Sniper starting"
    );

    // 1. State
    let store = Arc::new(JsonFileStore::new(&config.state_file));
    if cli.reset_state {
        match store.load().await {
            Ok(Some(record)) if record.position.is_open() => {
                warn!(revision = record.revision, "discarding an OPEN position record on operator request");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "discarding an unreadable state file on operator request"),
        }
        store.reset().await.context("failed to reset state")?;
        info!(path = %store.path().display(), "state reset");
    }
    let (machine, recovery) = PositionMachine::recover(store.clone(), &config.symbol, config.dry_run).await?;
    if recovery == RecoveryKind::Restored && machine.position().is_open() {
        info!("Resuming exit checks for the stored position; no re-entry");
    }

    // 2. Components
    let binance = BinanceClient::new(config.api_key.clone(), config.secret_key.clone());
    let exchange: Arc<dyn ExchangeClient> = if config.dry_run {
        Arc::new(PaperExchange::new(binance))
    } else {
        Arc::new(binance)
    };
    let risk = RiskPolicy::new(config.stop_loss_pct, config.take_profit_pct, config.symbol_tick_size)
        .with_sell_signal_min_profit(config.sell_signal_min_profit_pct);
    let strategy = strategies::from_config(&config.strategy);
    let settings = EngineSettings::from_config(&config);
    settings.check_window(&strategy)?;
    let (notifier, notifier_task) = notify::spawn(notify::from_config(&config.telegram), 32);

    let mut engine = TradingEngine::new(
        settings,
        strategy,
        risk,
        exchange,
        machine,
        notifier,
    );
    let snapshots = engine.subscribe();

    // 3. Shutdown plumbing
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, finishing the current iteration");
            signal_tx.send_replace(true);
        }
    });

    if let Some(addr) = config.dashboard_addr.clone() {
        let (snapshots, shutdown) = (snapshots.clone(), shutdown_rx.clone());
        tokio::spawn(async move {
            if let Err(e) = web::serve(&addr, snapshots, shutdown).await {
                error!("Dashboard stopped: {:#}", e);
            }
        });
    }

    // 4. Run
    let engine_shutdown = shutdown_rx.clone();
    let engine_task = tokio::spawn(async move { engine.run(engine_shutdown).await });

    if !cli.headless {
        let ui_shutdown = shutdown_tx.clone();
        let ui_result = tokio::task::spawn_blocking(move || tui::run(snapshots, ui_shutdown))
            .await
            .context("terminal UI panicked")?;
        if let Err(e) = ui_result {
            error!("Terminal UI failed: {:#}", e);
        }
        shutdown_tx.send_replace(true);
    }

    let result = engine_task.await.context("engine task panicked")?;

    // Engine (and with it the last notifier handle) is gone; let queued messages out.
    if tokio::time::timeout(Duration::from_secs(5), notifier_task).await.is_err() {
        warn!("Pending notifications dropped on exit");
    }

    match result {
        Ok(()) => {
            info!("Candle Sniper stopped");
            Ok(())
        }
        Err(e) => {
            error!(error_kind = e.kind(), "Candle Sniper halted: {}", e);
            Err(e.into())
        }
    }
}
