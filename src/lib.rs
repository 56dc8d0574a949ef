//! Single-pair spot trading bot: candle signals, a crash-recoverable
//! position state machine and fixed-percentage stop-loss / take-profit.

pub mod config;
pub mod connectors;
pub mod core;
pub mod error;
pub mod notify;
pub mod storage;
pub mod strategies;
pub mod tui;
pub mod types;
pub mod utils;
pub mod web;

pub use config::AppConfig;
pub use error::{BotError, ValidationError};
