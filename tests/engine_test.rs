// tests/engine_test.rs
//
// Control loop scenarios against a scripted exchange and an in-memory store.

use async_trait::async_trait;
use candle_sniper::connectors::{ExchangeClient, ExchangeError};
use candle_sniper::core::{
    EngineSettings, Levels, OpenPosition, PositionMachine, RiskPolicy, TickOutcome, TradingEngine,
    Transition,
};
use candle_sniper::notify::{self, Notification, Notifier, NotifierHandle};
use candle_sniper::storage::{MemoryStore, StateRecord};
use candle_sniper::strategies::ReversalStrategy;
use candle_sniper::types::{BotStatus, Candle, EventKind, ExitReason, Fill, Side};
use candle_sniper::BotError;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const SYMBOL: &str = "XLMUSDT";

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Price and candles are set by the test; `None` makes the call fail.
/// Orders fill in full at the current price unless `fail_orders` is set.
#[derive(Default)]
struct ScriptedExchange {
    price: Mutex<Option<Decimal>>,
    candles: Mutex<Option<Vec<Candle>>>,
    fail_orders: AtomicBool,
    orders: Mutex<Vec<(Side, Decimal)>>,
}

impl ScriptedExchange {
    fn set_price(&self, price: Option<Decimal>) {
        *self.price.lock().unwrap() = price;
    }

    fn set_candles(&self, candles: Option<Vec<Candle>>) {
        *self.candles.lock().unwrap() = candles;
    }

    fn fail_orders(&self, fail: bool) {
        self.fail_orders.store(fail, Ordering::SeqCst);
    }

    fn orders(&self) -> Vec<(Side, Decimal)> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeClient for ScriptedExchange {
    async fn get_recent_candles(
        &self,
        _symbol: &str,
        _timeframe: &str,
        _count: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.candles
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ExchangeError::Decode("klines unavailable".into()))
    }

    async fn get_current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.price
            .lock()
            .unwrap()
            .ok_or_else(|| ExchangeError::NoPrice(symbol.to_string()))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<Fill, ExchangeError> {
        self.orders.lock().unwrap().push((side, quantity));
        if self.fail_orders.load(Ordering::SeqCst) {
            return Err(ExchangeError::Api {
                code: -2010,
                msg: "Account has insufficient balance".into(),
            });
        }
        let price = self
            .price
            .lock()
            .unwrap()
            .ok_or_else(|| ExchangeError::NoPrice(symbol.to_string()))?;
        Ok(Fill {
            price,
            quantity,
            order_id: Some(format!("order-{}", self.orders.lock().unwrap().len())),
        })
    }
}

#[derive(Default)]
struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn kinds(&self) -> Vec<EventKind> {
        self.seen.lock().unwrap().iter().map(|n| n.kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn candles(rows: &[(Decimal, Decimal, Decimal, Decimal)]) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    rows.iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| Candle {
            timestamp: start + ChronoDuration::minutes(5 * i as i64),
            open,
            high,
            low,
            close,
            volume: dec!(1000),
        })
        .collect()
}

/// Two red candles, then a green one covering most of their range.
fn buy_window() -> Vec<Candle> {
    candles(&[
        (dec!(0.1000), dec!(0.1002), dec!(0.0978), dec!(0.0980)),
        (dec!(0.0980), dec!(0.0981), dec!(0.0958), dec!(0.0960)),
        (dec!(0.0960), dec!(0.0992), dec!(0.0959), dec!(0.0990)),
    ])
}

/// Two green candles, then a red one covering most of their range.
fn sell_window() -> Vec<Candle> {
    candles(&[
        (dec!(0.0940), dec!(0.0961), dec!(0.0939), dec!(0.0960)),
        (dec!(0.0960), dec!(0.0982), dec!(0.0959), dec!(0.0980)),
        (dec!(0.0980), dec!(0.0981), dec!(0.0948), dec!(0.0950)),
    ])
}

/// Two red candles and a weak bounce.
fn quiet_window() -> Vec<Candle> {
    candles(&[
        (dec!(0.1000), dec!(0.1002), dec!(0.0978), dec!(0.0980)),
        (dec!(0.0980), dec!(0.0981), dec!(0.0958), dec!(0.0960)),
        (dec!(0.0960), dec!(0.0965), dec!(0.0959), dec!(0.0962)),
    ])
}

fn settings() -> EngineSettings {
    EngineSettings {
        symbol: SYMBOL.to_string(),
        timeframe: "5m".to_string(),
        candle_window: 3,
        order_size_usdt: dec!(10),
        min_notional: dec!(5.5),
        step_size: dec!(1),
        poll_interval: Duration::from_millis(10),
    }
}

fn risk() -> RiskPolicy {
    RiskPolicy::new(dec!(1.5), dec!(3), dec!(0.0001))
}

/// Revision 5, OPEN 50 @ 0.095 with SL 0.0936 / TP 0.0979.
fn stored_open_record() -> StateRecord {
    let open = OpenPosition::new(
        dec!(0.095),
        dec!(50),
        Levels {
            stop_loss: dec!(0.0936),
            take_profit: dec!(0.0979),
        },
        Utc.with_ymd_and_hms(2024, 3, 1, 11, 55, 0).unwrap(),
        Some("777".into()),
    )
    .unwrap();
    let mut record = StateRecord::initial(SYMBOL, true);
    record.revision = 5;
    record.updated_at = Utc.with_ymd_and_hms(2024, 3, 1, 11, 55, 1).unwrap();
    record.position = record.position.opened(open).unwrap();
    record
}

struct Harness {
    engine: TradingEngine<ReversalStrategy>,
    exchange: Arc<ScriptedExchange>,
    store: Arc<MemoryStore>,
    notifications: Arc<RecordingNotifier>,
    notifier_task: JoinHandle<()>,
}

impl Harness {
    async fn new(store: MemoryStore, risk: RiskPolicy, settings: EngineSettings) -> Self {
        let store = Arc::new(store);
        let exchange = Arc::new(ScriptedExchange::default());
        let notifications = Arc::new(RecordingNotifier::default());
        let (handle, notifier_task) = notify::spawn(notifications.clone(), 64);

        let (machine, _) = PositionMachine::recover(store.clone(), SYMBOL, true)
            .await
            .unwrap();
        let engine = TradingEngine::new(
            settings,
            ReversalStrategy::default(),
            risk,
            exchange.clone(),
            machine,
            handle,
        );

        Self {
            engine,
            exchange,
            store,
            notifications,
            notifier_task,
        }
    }

    async fn fresh() -> Self {
        Self::new(MemoryStore::default(), risk(), settings()).await
    }

    async fn resumed() -> Self {
        Self::new(MemoryStore::with_record(stored_open_record()), risk(), settings()).await
    }

    /// Drops the engine (and its notifier handle) and waits for delivery.
    async fn finish(self) -> Arc<RecordingNotifier> {
        drop(self.engine);
        self.notifier_task.await.unwrap();
        self.notifications
    }
}

fn expect_closed(outcome: TickOutcome) -> (ExitReason, Decimal, u64) {
    match outcome {
        TickOutcome::Transition(Transition::Closed {
            reason,
            exit_price,
            revision,
            ..
        }) => (reason, exit_price, revision),
        other => panic!("expected a close, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_buy_signal_opens_and_persists() {
    let mut h = Harness::fresh().await;
    h.exchange.set_price(Some(dec!(0.095)));
    h.exchange.set_candles(Some(buy_window()));

    let outcome = h.engine.tick().await.unwrap();
    match outcome {
        TickOutcome::Transition(Transition::Opened { position, revision }) => {
            assert_eq!(revision, 1);
            assert_eq!(position.entry_price, dec!(0.095));
            assert_eq!(position.quantity, dec!(105));
            assert_eq!(position.stop_loss_price, dec!(0.0936));
            assert_eq!(position.take_profit_price, dec!(0.0979));
        }
        other => panic!("expected an entry, got {:?}", other),
    }

    let stored = h.store.snapshot().unwrap();
    assert_eq!(stored.revision, 1);
    assert_eq!(&stored, h.engine.machine().record());
    assert_eq!(h.exchange.orders(), vec![(Side::Buy, dec!(105))]);

    // Already OPEN: another BUY window does not re-enter.
    let again = h.engine.tick().await.unwrap();
    assert_eq!(again, TickOutcome::Hold);
    assert_eq!(h.exchange.orders().len(), 1);

    let notes = h.finish().await;
    assert!(notes.kinds().contains(&EventKind::Entered));
}

#[tokio::test]
async fn test_no_signal_is_an_observation_tick() {
    let mut h = Harness::fresh().await;
    h.exchange.set_price(Some(dec!(0.095)));
    h.exchange.set_candles(Some(quiet_window()));

    assert_eq!(h.engine.tick().await.unwrap(), TickOutcome::Hold);
    assert!(h.exchange.orders().is_empty());
    assert_eq!(h.engine.machine().revision(), 0);
}

#[tokio::test]
async fn test_entry_below_min_notional_is_skipped() {
    let mut small = settings();
    small.order_size_usdt = dec!(5);
    let mut h = Harness::new(MemoryStore::default(), risk(), small).await;
    h.exchange.set_price(Some(dec!(0.095)));
    h.exchange.set_candles(Some(buy_window()));

    assert_eq!(h.engine.tick().await.unwrap(), TickOutcome::EntrySkipped);
    assert!(h.exchange.orders().is_empty());
    assert!(h
        .engine
        .events()
        .any(|e| e.kind == EventKind::EntrySkipped));
}

#[tokio::test]
async fn test_entry_order_failure_stays_flat_and_notifies() {
    let mut h = Harness::fresh().await;
    h.exchange.set_price(Some(dec!(0.095)));
    h.exchange.set_candles(Some(buy_window()));
    h.exchange.fail_orders(true);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown_tx.send_replace(true);
    });
    h.engine.run(shutdown_rx).await.unwrap();
    stopper.await.unwrap();

    assert!(!h.engine.machine().position().is_open());
    assert_eq!(h.engine.machine().revision(), 0);
    // Only the initial FLAT record was ever written.
    assert_eq!(h.store.save_count(), 1);
    assert!(!h.store.snapshot().unwrap().position.is_open());
    assert!(h.exchange.orders().len() >= 2, "entry is retried on later polls");

    let notes = h.finish().await;
    let kinds = notes.kinds();
    assert!(kinds.contains(&EventKind::OrderFailed));
    assert!(!kinds.contains(&EventKind::Entered));
}

// ---------------------------------------------------------------------------
// Recovery and exits
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_crash_recovery_resumes_open_position() {
    let mut h = Harness::resumed().await;
    assert_eq!(h.engine.machine().record(), &stored_open_record());

    // Between the levels with a BUY pattern on the chart: no re-entry.
    h.exchange.set_price(Some(dec!(0.0950)));
    h.exchange.set_candles(Some(buy_window()));
    assert_eq!(h.engine.tick().await.unwrap(), TickOutcome::Hold);
    assert!(h.exchange.orders().is_empty());
    assert_eq!(h.engine.machine().revision(), 5);

    // Stored SL still applies.
    h.exchange.set_price(Some(dec!(0.0935)));
    let (reason, exit_price, revision) = expect_closed(h.engine.tick().await.unwrap());
    assert_eq!(reason, ExitReason::StopLoss);
    assert_eq!(exit_price, dec!(0.0935));
    assert_eq!(revision, 6);
    assert_eq!(h.exchange.orders(), vec![(Side::Sell, dec!(50))]);

    let stored = h.store.snapshot().unwrap();
    assert!(!stored.position.is_open());
    assert_eq!(stored.stats.closed_trades, 1);
    assert_eq!(stored.stats.realized_pnl, dec!(-0.075));
}

#[tokio::test]
async fn test_take_profit_exit() {
    let mut h = Harness::resumed().await;
    h.exchange.set_price(Some(dec!(0.0980)));
    h.exchange.set_candles(Some(quiet_window()));

    let (reason, _, revision) = expect_closed(h.engine.tick().await.unwrap());
    assert_eq!(reason, ExitReason::TakeProfit);
    assert_eq!(revision, 6);
    assert_eq!(h.engine.machine().stats().winning_trades, 1);
}

#[tokio::test]
async fn test_stop_loss_runs_even_when_candles_fail() {
    let mut h = Harness::resumed().await;
    h.exchange.set_price(Some(dec!(0.0930)));
    h.exchange.set_candles(None);

    let (reason, _, _) = expect_closed(h.engine.tick().await.unwrap());
    assert_eq!(reason, ExitReason::StopLoss);
}

#[tokio::test]
async fn test_gap_across_both_levels_exits_as_stop_loss() {
    let mut h = Harness::resumed().await;
    h.exchange.set_candles(Some(quiet_window()));

    // Above TP, but the exit order bounces.
    h.exchange.set_price(Some(dec!(0.0985)));
    h.exchange.fail_orders(true);
    let err = h.engine.tick().await.unwrap_err();
    assert!(matches!(err, BotError::OrderExecution(_)));
    assert!(h.engine.machine().position().is_open());

    // Next observation is below SL: the range covers both levels.
    h.exchange.set_price(Some(dec!(0.0930)));
    h.exchange.fail_orders(false);
    let (reason, _, _) = expect_closed(h.engine.tick().await.unwrap());
    assert_eq!(reason, ExitReason::StopLoss);
}

#[tokio::test]
async fn test_exit_order_failure_stays_open_then_retries() {
    let mut h = Harness::resumed().await;
    h.exchange.set_price(Some(dec!(0.0930)));
    h.exchange.set_candles(Some(quiet_window()));
    h.exchange.fail_orders(true);

    let err = h.engine.tick().await.unwrap_err();
    assert!(matches!(err, BotError::OrderExecution(_)));
    assert!(!err.is_fatal());
    assert!(h.engine.machine().position().is_open());
    assert_eq!(h.store.snapshot().unwrap(), stored_open_record());

    h.exchange.fail_orders(false);
    let (reason, _, revision) = expect_closed(h.engine.tick().await.unwrap());
    assert_eq!(reason, ExitReason::StopLoss);
    assert_eq!(revision, 6);
    assert_eq!(h.exchange.orders().len(), 2);
}

#[tokio::test]
async fn test_sell_signal_exit_and_profit_filter() {
    let mut h = Harness::resumed().await;
    h.exchange.set_price(Some(dec!(0.0950)));
    h.exchange.set_candles(Some(sell_window()));
    let (reason, _, _) = expect_closed(h.engine.tick().await.unwrap());
    assert_eq!(reason, ExitReason::SellSignal);

    let filtered = risk().with_sell_signal_min_profit(Some(dec!(0.5)));
    let mut h = Harness::new(MemoryStore::with_record(stored_open_record()), filtered, settings()).await;
    h.exchange.set_price(Some(dec!(0.0950)));
    h.exchange.set_candles(Some(sell_window()));
    assert_eq!(h.engine.tick().await.unwrap(), TickOutcome::Hold);
    assert!(h.exchange.orders().is_empty());
}

// ---------------------------------------------------------------------------
// Failures and lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fetch_failures_are_recoverable() {
    let mut h = Harness::fresh().await;

    h.exchange.set_price(None);
    let err = h.engine.tick().await.unwrap_err();
    assert!(matches!(err, BotError::ExchangeRequest(_)));
    assert!(!err.is_fatal());

    h.exchange.set_price(Some(dec!(0.095)));
    h.exchange.set_candles(None);
    let err = h.engine.tick().await.unwrap_err();
    assert!(matches!(err, BotError::ExchangeRequest(_)));

    h.exchange.set_candles(Some(buy_window()[..2].to_vec()));
    let err = h.engine.tick().await.unwrap_err();
    assert!(matches!(err, BotError::Validation(_)));
    assert!(!err.is_fatal());

    h.exchange.set_candles(Some(buy_window()));
    assert!(matches!(
        h.engine.tick().await.unwrap(),
        TickOutcome::Transition(Transition::Opened { .. })
    ));
}

#[tokio::test]
async fn test_loop_keeps_running_through_fetch_failures() {
    let mut h = Harness::fresh().await;
    h.exchange.set_price(None);
    let snapshots = h.engine.subscribe();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown_tx.send_replace(true);
    });
    h.engine.run(shutdown_rx).await.unwrap();
    stopper.await.unwrap();

    let last = snapshots.borrow().clone();
    assert_eq!(last.status, BotStatus::Stopped);
    assert!(last.iteration >= 2);
    assert!(last
        .recent_events
        .iter()
        .any(|e| e.kind == EventKind::FetchFailed));
}

#[tokio::test]
async fn test_persistence_failure_halts_without_trade_notification() {
    let mut h = Harness::fresh().await;
    h.exchange.set_price(Some(dec!(0.095)));
    h.exchange.set_candles(Some(buy_window()));
    h.store.set_failing(true);

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let err = tokio::time::timeout(Duration::from_secs(5), h.engine.run(shutdown_rx))
        .await
        .expect("halts on its own")
        .unwrap_err();

    assert!(matches!(err, BotError::Persistence(_)));
    assert_eq!(h.engine.status(), &BotStatus::Halted);
    assert!(!h.engine.machine().position().is_open());
    assert_eq!(h.engine.machine().revision(), 0);

    let notes = h.finish().await;
    let kinds = notes.kinds();
    assert!(kinds.contains(&EventKind::Halted));
    assert!(!kinds.contains(&EventKind::Entered));
}

#[tokio::test]
async fn test_shutdown_before_first_iteration() {
    let mut h = Harness::resumed().await;
    let snapshots = h.engine.subscribe();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    shutdown_tx.send_replace(true);
    h.engine.run(shutdown_rx).await.unwrap();

    assert_eq!(h.engine.status(), &BotStatus::Stopped);
    assert!(h.exchange.orders().is_empty());
    let last = snapshots.borrow().clone();
    assert_eq!(last.status, BotStatus::Stopped);
    assert_eq!(last.iteration, 0);
    assert!(last.position.is_open());

    let notes = h.finish().await;
    assert_eq!(notes.kinds(), vec![EventKind::Resumed, EventKind::Shutdown]);
}

#[tokio::test]
async fn test_disabled_notifier_is_accepted() {
    let store = Arc::new(MemoryStore::default());
    let (machine, _) = PositionMachine::recover(store, SYMBOL, true).await.unwrap();
    let exchange = Arc::new(ScriptedExchange::default());
    exchange.set_price(Some(dec!(0.095)));
    exchange.set_candles(Some(buy_window()));

    let mut engine = TradingEngine::new(
        settings(),
        ReversalStrategy::default(),
        risk(),
        exchange.clone(),
        machine,
        NotifierHandle::disabled(),
    );
    assert!(matches!(
        engine.tick().await.unwrap(),
        TickOutcome::Transition(Transition::Opened { .. })
    ));
}

#[test]
fn test_candle_window_must_cover_strategy() {
    let strategy = ReversalStrategy::default();
    assert!(settings().check_window(&strategy).is_ok());

    let short = EngineSettings {
        candle_window: 2,
        ..settings()
    };
    assert!(matches!(short.check_window(&strategy), Err(BotError::Config(_))));
}
