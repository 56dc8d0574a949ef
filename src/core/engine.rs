// src/core/engine.rs
use crate::config::AppConfig;
use crate::connectors::traits::ExchangeClient;
use crate::core::risk::{PriceTick, RiskPolicy};
use crate::core::state_machine::{PositionMachine, Transition};
use crate::error::BotError;
use crate::notify::NotifierHandle;
use crate::strategies::traits::SignalSource;
use crate::types::{BotStatus, EngineEvent, EngineSnapshot, EventKind, ExitReason, Signal};
use crate::utils::precision::normalize_quantity;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const MAX_EVENTS: usize = 50;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub symbol: String,
    pub timeframe: String,
    pub candle_window: usize,
    pub order_size_usdt: Decimal,
    pub min_notional: Decimal,
    pub step_size: Decimal,
    pub poll_interval: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            symbol: config.symbol.clone(),
            timeframe: config.timeframe.clone(),
            candle_window: config.candle_window,
            order_size_usdt: config.order_size_usdt,
            min_notional: config.min_notional,
            step_size: config.symbol_step_size,
            poll_interval: config.poll_interval(),
        }
    }

    /// The fetched window must be long enough for the selected signal source.
    pub fn check_window<S: SignalSource + ?Sized>(&self, strategy: &S) -> Result<(), BotError> {
        if self.candle_window < strategy.min_candles() {
            return Err(BotError::Config(format!(
                "candle_window {} is shorter than the {} candles {} needs",
                self.candle_window,
                strategy.min_candles(),
                strategy.name()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing to do this iteration.
    Hold,
    /// BUY signal, but the order would be below the exchange minimums.
    EntrySkipped,
    Transition(Transition),
}

pub struct TradingEngine<S> {
    settings: EngineSettings,
    strategy: S,
    risk: RiskPolicy,
    exchange: Arc<dyn ExchangeClient>,
    machine: PositionMachine,
    notifier: NotifierHandle,
    snapshots: watch::Sender<EngineSnapshot>,
    last_price: Option<Decimal>,
    last_signal: Option<Signal>,
    events: VecDeque<EngineEvent>,
    status: BotStatus,
    iteration: u64,
}

impl<S> TradingEngine<S>
where
    S: SignalSource,
{
    pub fn new(
        settings: EngineSettings,
        strategy: S,
        risk: RiskPolicy,
        exchange: Arc<dyn ExchangeClient>,
        machine: PositionMachine,
        notifier: NotifierHandle,
    ) -> Self {
        let machine = machine.with_lot_step(settings.step_size);
        let (snapshots, _) = watch::channel(EngineSnapshot::starting(
            machine.position().clone(),
            &settings.timeframe,
        ));
        let engine = Self {
            settings,
            strategy,
            risk,
            exchange,
            machine,
            notifier,
            snapshots,
            last_price: None,
            last_signal: None,
            events: VecDeque::with_capacity(MAX_EVENTS),
            status: BotStatus::Starting,
            iteration: 0,
        };
        engine.publish();
        engine
    }

    /// Read-only view for dashboards. Updated after every iteration.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn machine(&self) -> &PositionMachine {
        &self.machine
    }

    pub fn status(&self) -> &BotStatus {
        &self.status
    }

    pub fn events(&self) -> impl Iterator<Item = &EngineEvent> {
        self.events.iter()
    }

    /// Polls until `shutdown` flips to true or a fatal error occurs.
    ///
    /// Shutdown is only observed while waiting for the next tick, so an
    /// iteration that has started (including an order and its commit)
    /// always runs to completion.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), BotError> {
        self.status = BotStatus::Running;
        self.announce_start();
        self.publish();

        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.tick().await {
                Ok(outcome) => debug!(iteration = self.iteration, ?outcome, "iteration done"),
                Err(e) if e.is_fatal() => {
                    self.halt(&e);
                    self.publish();
                    return Err(e);
                }
                Err(e) => self.record_failure(&e),
            }
            self.publish();
        }

        self.status = BotStatus::Stopped;
        let message = format!("{} engine stopped", self.settings.symbol);
        info!(revision = self.machine.revision(), "{}", message);
        self.record_event(EventKind::Shutdown, message.clone());
        self.notifier.notify(EventKind::Shutdown, message);
        self.publish();
        Ok(())
    }

    /// One poll: price, exit checks while OPEN, signal, transition.
    pub async fn tick(&mut self) -> Result<TickOutcome, BotError> {
        self.iteration += 1;

        let price = self
            .exchange
            .get_current_price(&self.settings.symbol)
            .await
            .map_err(|e| BotError::ExchangeRequest(format!("price: {}", e)))?;
        let tick = PriceTick::spanning(self.last_price, price);
        self.last_price = Some(price);

        if let Some(open) = self.machine.position().open_position().cloned() {
            if let Some(reason) = self.risk.check_exit(&tick, &open) {
                info!(%price, low = %tick.low, high = %tick.high, %reason, "exit level reached");
                return self.close(reason).await;
            }

            if self.evaluate().await? == Signal::Sell {
                if self.risk.allows_signal_exit(price, &open) {
                    return self.close(ExitReason::SellSignal).await;
                }
                debug!(%price, entry = %open.entry_price, "SELL signal ignored below minimum profit");
            }
            return Ok(TickOutcome::Hold);
        }

        if self.evaluate().await? != Signal::Buy {
            return Ok(TickOutcome::Hold);
        }
        self.open(price).await
    }

    async fn evaluate(&mut self) -> Result<Signal, BotError> {
        let candles = self
            .exchange
            .get_recent_candles(
                &self.settings.symbol,
                &self.settings.timeframe,
                self.settings.candle_window,
            )
            .await
            .map_err(|e| BotError::ExchangeRequest(format!("candles: {}", e)))?;

        let signal = self.strategy.evaluate(&candles)?;
        self.last_signal = Some(signal);
        debug!(strategy = self.strategy.name(), ?signal, candles = candles.len(), "signal evaluated");
        Ok(signal)
    }

    async fn open(&mut self, price: Decimal) -> Result<TickOutcome, BotError> {
        let quantity = normalize_quantity(self.settings.order_size_usdt / price, self.settings.step_size);
        let notional = quantity * price;

        if quantity.is_zero() || notional < self.settings.min_notional {
            let message = format!(
                "BUY skipped: {} {} is worth {:.4} USDT, minimum is {}",
                quantity, self.settings.symbol, notional, self.settings.min_notional
            );
            warn!("{}", message);
            self.record_event(EventKind::EntrySkipped, message);
            return Ok(TickOutcome::EntrySkipped);
        }

        info!(%price, %quantity, %notional, "BUY signal, entering");
        let transition = self
            .machine
            .enter(self.exchange.as_ref(), quantity, price, &self.risk)
            .await?;
        self.after_transition(&transition);
        Ok(TickOutcome::Transition(transition))
    }

    async fn close(&mut self, reason: ExitReason) -> Result<TickOutcome, BotError> {
        let transition = self.machine.exit(self.exchange.as_ref(), reason).await?;
        self.after_transition(&transition);
        Ok(TickOutcome::Transition(transition))
    }

    /// Runs only after the new record is durable.
    fn after_transition(&mut self, transition: &Transition) {
        let mode = self.mode_tag();
        let symbol = self.settings.symbol.clone();

        match transition {
            Transition::Opened { position, revision } => {
                // Exit ranges start at the fill, not at the pre-order quote.
                self.last_price = Some(position.entry_price);
                let message = format!(
                    "🟢 BUY {} {} @ {} | SL {} | TP {}{}",
                    position.quantity,
                    symbol,
                    position.entry_price,
                    position.stop_loss_price,
                    position.take_profit_price,
                    mode
                );
                info!(revision, entry = %position.entry_price, sl = %position.stop_loss_price,
                    tp = %position.take_profit_price, "position opened");
                self.record_event(EventKind::Entered, message.clone());
                self.notifier.notify(EventKind::Entered, message);
            }
            Transition::Closed {
                position,
                exit_price,
                reason,
                pnl,
                revision,
            } => {
                let message = format!(
                    "🔴 SELL {} {} @ {} ({}) | PnL {} USDT ({:.2}%){}",
                    position.quantity,
                    symbol,
                    exit_price,
                    reason,
                    pnl.round_dp(6),
                    position.return_pct(*exit_price),
                    mode
                );
                info!(revision, exit = %exit_price, %pnl, %reason, "position closed");
                self.record_event(EventKind::Exited, message.clone());
                self.notifier.notify(EventKind::Exited, message);
            }
        }
    }

    fn announce_start(&mut self) {
        let symbol = self.settings.symbol.clone();
        let mode = self.mode_tag();
        let (kind, message) = match self.machine.position().open_position() {
            Some(open) => (
                EventKind::Resumed,
                format!(
                    "♻️ {} resumed OPEN: {} @ {} | SL {} | TP {}{}",
                    symbol, open.quantity, open.entry_price, open.stop_loss_price, open.take_profit_price, mode
                ),
            ),
            None => (
                EventKind::Startup,
                format!(
                    "🚀 {} started FLAT on {} with {}{}",
                    symbol,
                    self.settings.timeframe,
                    self.strategy.name(),
                    mode
                ),
            ),
        };
        info!(revision = self.machine.revision(), "{}", message);
        self.record_event(kind, message.clone());
        self.notifier.notify(kind, message);
    }

    fn record_failure(&mut self, err: &BotError) {
        let kind = match err {
            BotError::Validation(_) => EventKind::InvalidCandles,
            BotError::OrderExecution(_) => EventKind::OrderFailed,
            _ => EventKind::FetchFailed,
        };
        warn!(error_kind = err.kind(), error = %err, "iteration failed, retrying next poll");
        let message = err.to_string();
        if kind == EventKind::OrderFailed {
            self.notifier
                .notify(kind, format!("⚠️ {} {}", self.settings.symbol, message));
        }
        self.record_event(kind, message);
    }

    fn halt(&mut self, err: &BotError) {
        self.status = BotStatus::Halted;
        error!(error_kind = err.kind(), error = %err, revision = self.machine.revision(), "engine halted");
        let message = format!("⛔ {} halted: {}", self.settings.symbol, err);
        self.record_event(EventKind::Halted, message.clone());
        self.notifier.notify(EventKind::Halted, message);
    }

    fn record_event(&mut self, kind: EventKind, message: String) {
        if self.events.len() == MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(EngineEvent {
            at: Utc::now(),
            kind,
            message,
        });
    }

    fn mode_tag(&self) -> &'static str {
        if self.machine.position().dry_run {
            " [DRY RUN]"
        } else {
            ""
        }
    }

    fn snapshot(&self) -> EngineSnapshot {
        let position = self.machine.position().clone();
        let stats = self.machine.stats();
        let (unrealized_pnl, unrealized_pnl_pct) = match (position.open_position(), self.last_price) {
            (Some(open), Some(price)) => (
                Some(open.unrealized_pnl(price)),
                Some(open.return_pct(price).round_dp(2)),
            ),
            _ => (None, None),
        };

        EngineSnapshot {
            symbol: self.settings.symbol.clone(),
            timeframe: self.settings.timeframe.clone(),
            dry_run: position.dry_run,
            status: self.status.clone(),
            revision: self.machine.revision(),
            position,
            last_price: self.last_price,
            unrealized_pnl,
            unrealized_pnl_pct,
            last_signal: self.last_signal,
            realized_pnl: stats.realized_pnl,
            closed_trades: stats.closed_trades,
            iteration: self.iteration,
            updated_at: Utc::now(),
            recent_events: self.events.iter().cloned().collect(),
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }
}
