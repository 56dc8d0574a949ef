// src/config.rs

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::BotError;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Reversal,
    Trend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    pub reversal_body_ratio: Decimal,
    pub min_trend_body_pct: Decimal,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
    pub symbol: String,
    pub timeframe: String,
    pub order_size_usdt: Decimal,
    pub min_notional: Decimal,
    pub symbol_step_size: Decimal,
    pub symbol_tick_size: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub sell_signal_min_profit_pct: Option<Decimal>,
    pub poll_interval_secs: u64,
    pub candle_window: usize,
    pub dry_run: bool,
    pub log_level: String,
    pub log_dir: PathBuf,
    pub state_file: PathBuf,
    pub dashboard_addr: Option<String>,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

impl AppConfig {
    /// Defaults, then `Settings.*` (or `path`), then `APP__*` variables.
    ///
    /// Call `dotenvy::dotenv()` first so `.env` values are visible here.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => File::with_name(p).required(true),
            None => File::with_name("Settings").required(false),
        };

        let builder = Self::defaults(Config::builder())?
            .add_source(file)
            .add_source(Environment::with_prefix("APP").separator("__"))
            .set_override_option("api_key", std::env::var("BINANCE_API_KEY").ok())?
            .set_override_option("secret_key", std::env::var("BINANCE_SECRET_KEY").ok())?
            .set_override_option("telegram.bot_token", std::env::var("TELEGRAM_BOT_TOKEN").ok())?
            .set_override_option("telegram.chat_id", std::env::var("TELEGRAM_CHAT_ID").ok())?;

        builder.build()?.try_deserialize()
    }

    fn defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            .set_default("symbol", "XLMUSDT")?
            .set_default("timeframe", "5m")?
            .set_default("order_size_usdt", "10")?
            .set_default("min_notional", "5.5")?
            .set_default("symbol_step_size", "1")?
            .set_default("symbol_tick_size", "0.0001")?
            .set_default("stop_loss_pct", "1.5")?
            .set_default("take_profit_pct", "3.0")?
            .set_default("poll_interval_secs", 10)?
            .set_default("candle_window", 3)?
            .set_default("dry_run", true)?
            .set_default("log_level", "info")?
            .set_default("log_dir", "logs")?
            .set_default("state_file", "trading_state.json")?
            .set_default("strategy.kind", "reversal")?
            .set_default("strategy.reversal_body_ratio", "0.5")?
            .set_default("strategy.min_trend_body_pct", "0")
    }

    /// Rejects values the engine cannot trade with.
    pub fn validate(&self) -> Result<(), BotError> {
        let fail = |msg: String| -> Result<(), BotError> { Err(BotError::Config(msg)) };

        if self.symbol.trim().is_empty() {
            return fail("symbol must not be empty".into());
        }
        if self.stop_loss_pct <= Decimal::ZERO || self.stop_loss_pct >= Decimal::ONE_HUNDRED {
            return fail(format!(
                "stop_loss_pct must be in (0, 100), got {}",
                self.stop_loss_pct
            ));
        }
        if self.take_profit_pct <= Decimal::ZERO {
            return fail(format!(
                "take_profit_pct must be positive, got {}",
                self.take_profit_pct
            ));
        }
        if self.order_size_usdt <= Decimal::ZERO {
            return fail("order_size_usdt must be positive".into());
        }
        if self.symbol_step_size.is_sign_negative() || self.symbol_tick_size.is_sign_negative() {
            return fail("step and tick sizes must not be negative".into());
        }
        if self.poll_interval_secs == 0 {
            return fail("poll_interval_secs must be at least 1".into());
        }
        if self.candle_window < 3 {
            return fail(format!(
                "candle_window must be at least 3, got {}",
                self.candle_window
            ));
        }
        if !self.dry_run && (self.api_key.is_empty() || self.secret_key.is_empty()) {
            return fail("live trading requires BINANCE_API_KEY and BINANCE_SECRET_KEY".into());
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
