// src/types.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::position::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// A closed OHLCV candle. `timestamp` is the candle open time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Close at or below open. Flat candles count as both up and down.
    pub fn is_down(&self) -> bool {
        self.close <= self.open
    }

    pub fn is_up(&self) -> bool {
        self.close >= self.open
    }

    pub fn body(&self) -> Decimal {
        (self.close - self.open).abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    Buy,
    Sell,
    None,
}

/// Result of a filled (or simulated) market order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub price: Decimal,
    pub quantity: Decimal,
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    SellSignal,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExitReason::StopLoss => "Stop Loss",
            ExitReason::TakeProfit => "Take Profit",
            ExitReason::SellSignal => "Sell Signal",
        };
        f.write_str(label)
    }
}

// --- Dashboard / notifier view of the engine ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BotStatus {
    Starting,
    Running,
    Halted,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Startup,
    Resumed,
    Entered,
    Exited,
    EntrySkipped,
    OrderFailed,
    FetchFailed,
    InvalidCandles,
    Halted,
    Shutdown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Startup => "startup",
            EventKind::Resumed => "resumed",
            EventKind::Entered => "entered",
            EventKind::Exited => "exited",
            EventKind::EntrySkipped => "entry_skipped",
            EventKind::OrderFailed => "order_failed",
            EventKind::FetchFailed => "fetch_failed",
            EventKind::InvalidCandles => "invalid_candles",
            EventKind::Halted => "halted",
            EventKind::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub at: DateTime<Utc>,
    pub kind: EventKind,
    pub message: String,
}

/// Read-only picture of the engine pushed after every iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub symbol: String,
    pub timeframe: String,
    pub dry_run: bool,
    pub status: BotStatus,
    pub revision: u64,
    pub position: Position,
    pub last_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub unrealized_pnl_pct: Option<Decimal>,
    pub last_signal: Option<Signal>,
    pub realized_pnl: Decimal,
    pub closed_trades: u64,
    pub iteration: u64,
    pub updated_at: DateTime<Utc>,
    pub recent_events: Vec<EngineEvent>,
}

impl EngineSnapshot {
    pub fn starting(position: Position, timeframe: &str) -> Self {
        Self {
            symbol: position.symbol.clone(),
            timeframe: timeframe.to_string(),
            dry_run: position.dry_run,
            status: BotStatus::Starting,
            revision: 0,
            position,
            last_price: None,
            unrealized_pnl: None,
            unrealized_pnl_pct: None,
            last_signal: None,
            realized_pnl: Decimal::ZERO,
            closed_trades: 0,
            iteration: 0,
            updated_at: Utc::now(),
            recent_events: Vec::new(),
        }
    }
}
