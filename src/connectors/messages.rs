// src/connectors/messages.rs
//! Wire shapes of the Binance spot REST API.
use rust_decimal::Decimal;
use serde::de::IgnoredAny;
use serde::Deserialize;

/// One row of `/api/v3/klines`. Binance sends it as a positional array:
/// `[open_time, open, high, low, close, volume, close_time, ...]`.
#[derive(Debug, Deserialize)]
pub struct RawKline(
    pub i64,     // open time (ms)
    pub Decimal, // open
    pub Decimal, // high
    pub Decimal, // low
    pub Decimal, // close
    pub Decimal, // volume
    pub i64,     // close time (ms)
    pub IgnoredAny,
    pub IgnoredAny,
    pub IgnoredAny,
    pub IgnoredAny,
    pub IgnoredAny,
);

impl RawKline {
    pub fn open_time_ms(&self) -> i64 {
        self.0
    }

    pub fn close_time_ms(&self) -> i64 {
        self.6
    }
}

#[derive(Debug, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: Decimal,
}

/// `POST /api/v3/order` with `newOrderRespType=FULL`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: u64,
    #[serde(default)]
    pub client_order_id: String,
    pub status: String,
    pub executed_qty: Decimal,
    pub cummulative_quote_qty: Decimal,
    #[serde(default)]
    pub fills: Vec<FillLeg>,
}

/// One trade of a FULL order response. The commission is charged in
/// `commission_asset`, which for a BUY is usually the base asset.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillLeg {
    pub commission: Decimal,
    pub commission_asset: String,
}

/// Body of any non-2xx answer.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}
