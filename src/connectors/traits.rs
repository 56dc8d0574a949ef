// src/connectors/traits.rs
use crate::types::{Candle, Fill, Side};
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange api error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("order {order_id} not filled (status {status})")]
    Rejected { order_id: String, status: String },

    #[error("no price available for {0}")]
    NoPrice(String),

    #[error("request signing failed: {0}")]
    Signing(String),
}

/// Market data and order placement for one spot venue.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Most recent CLOSED candles, oldest first. May return fewer than `count`.
    async fn get_recent_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    async fn get_current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// Returns only once the order is fully filled.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<Fill, ExchangeError>;
}
