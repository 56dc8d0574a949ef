// src/error.rs
use thiserror::Error;

/// Rejections of a candle window before any pattern is evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("need at least {required} candles, got {actual}")]
    InsufficientCandles { required: usize, actual: usize },

    #[error("candle timestamps are not strictly increasing at index {index}")]
    NonMonotonicTimestamps { index: usize },

    #[error("malformed candle at index {index}: {reason}")]
    MalformedCandle { index: usize, reason: String },
}

/// Engine-level error taxonomy. `Persistence`, `Invariant` and `Config` halt the bot.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("invalid candle window: {0}")]
    Validation(#[from] ValidationError),

    #[error("exchange request failed: {0}")]
    ExchangeRequest(String),

    #[error("order execution failed: {0}")]
    OrderExecution(String),

    #[error("state persistence failed: {0}")]
    Persistence(String),

    #[error("position invariant violated: {0}")]
    Invariant(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BotError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BotError::Persistence(_) | BotError::Invariant(_) | BotError::Config(_)
        )
    }

    /// Stable tag for log fields and the dashboard event log.
    pub fn kind(&self) -> &'static str {
        match self {
            BotError::Validation(_) => "validation",
            BotError::ExchangeRequest(_) => "exchange_request",
            BotError::OrderExecution(_) => "order_execution",
            BotError::Persistence(_) => "persistence",
            BotError::Invariant(_) => "invariant",
            BotError::Config(_) => "config",
        }
    }
}
