// src/connectors/paper.rs
use crate::connectors::traits::{ExchangeClient, ExchangeError};
use crate::types::{Candle, Fill, Side};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Mutex;
use tracing::info;

/// Dry-run decorator: real market data, simulated fills.
///
/// Market orders fill in full at the last price `inner` reported, so the
/// engine never sends anything to the venue while `dry_run` is on.
pub struct PaperExchange<E> {
    inner: E,
    last_price: Mutex<Option<Decimal>>,
}

impl<E: ExchangeClient> PaperExchange<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            last_price: Mutex::new(None),
        }
    }

    fn remember(&self, price: Decimal) {
        if let Ok(mut last) = self.last_price.lock() {
            *last = Some(price);
        }
    }

    fn last_seen(&self) -> Option<Decimal> {
        self.last_price.lock().ok().and_then(|last| *last)
    }
}

#[async_trait]
impl<E: ExchangeClient> ExchangeClient for PaperExchange<E> {
    async fn get_recent_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.inner.get_recent_candles(symbol, timeframe, count).await
    }

    async fn get_current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let price = self.inner.get_current_price(symbol).await?;
        self.remember(price);
        Ok(price)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<Fill, ExchangeError> {
        let price = match self.last_seen() {
            Some(price) => price,
            None => {
                let price = self.inner.get_current_price(symbol).await?;
                self.remember(price);
                price
            }
        };

        info!(symbol, side = side.as_str(), %quantity, %price, "paper fill");
        Ok(Fill {
            price,
            quantity,
            order_id: None,
        })
    }
}
