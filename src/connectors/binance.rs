// src/connectors/binance.rs
use crate::connectors::messages::{ApiErrorBody, OrderResponse, RawKline, TickerPrice};
use crate::connectors::traits::{ExchangeClient, ExchangeError};
use crate::types::{Candle, Fill, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const RECV_WINDOW_MS: &str = "5000";

pub struct BinanceClient {
    api_key: String,
    secret_key: String,
    http_client: Client,
    base_rest_url: String,
}

impl BinanceClient {
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self::with_base_url(api_key, secret_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: String, secret_key: String, base_url: &str) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            api_key,
            secret_key,
            http_client,
            base_rest_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn sign_and_build_query(&self, mut params: Vec<(&str, String)>) -> Result<String, ExchangeError> {
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let query_string =
            serde_urlencoded::to_string(&params).map_err(|e| ExchangeError::Signing(e.to_string()))?;

        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;
        mac.update(query_string.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{}&signature={}", query_string, signature))
    }

    async fn get_public<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.base_rest_url, endpoint);
        let response = self.http_client.get(&url).query(params).send().await?;
        Self::decode(response).await
    }

    async fn send_signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T, ExchangeError> {
        let full_query = self.sign_and_build_query(params)?;
        let url = format!("{}{}?{}", self.base_rest_url, endpoint, full_query);

        let response = self
            .http_client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ExchangeError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(api) => ExchangeError::Api {
                    code: api.code,
                    msg: api.msg,
                },
                Err(_) => ExchangeError::Decode(format!("http {}: {}", status, body)),
            });
        }

        serde_json::from_str(&body).map_err(|e| ExchangeError::Decode(e.to_string()))
    }
}

fn kline_to_candle(row: &RawKline) -> Result<Candle, ExchangeError> {
    let timestamp = DateTime::<Utc>::from_timestamp_millis(row.open_time_ms())
        .ok_or_else(|| ExchangeError::Decode(format!("bad kline open time {}", row.open_time_ms())))?;
    Ok(Candle {
        timestamp,
        open: row.1,
        high: row.2,
        low: row.3,
        close: row.4,
        volume: row.5,
    })
}

/// Commission charged in the base asset of `symbol`. Binance takes the
/// BUY fee out of the asset received unless it is paid in BNB.
fn base_asset_commission(resp: &OrderResponse) -> Decimal {
    resp.fills
        .iter()
        .filter(|leg| {
            resp.symbol
                .strip_prefix(leg.commission_asset.as_str())
                .is_some_and(|quote| !quote.is_empty())
        })
        .map(|leg| leg.commission)
        .sum()
}

/// Average fill price of a FULL order response; rejects anything not FILLED.
///
/// For a BUY the returned quantity is what actually landed in the wallet:
/// `executedQty` minus any commission taken in the base asset.
fn fill_from_response(resp: OrderResponse, side: Side) -> Result<Fill, ExchangeError> {
    if resp.status != "FILLED" {
        return Err(ExchangeError::Rejected {
            order_id: resp.order_id.to_string(),
            status: resp.status,
        });
    }
    if resp.executed_qty <= Decimal::ZERO {
        return Err(ExchangeError::Decode(format!(
            "order {} reported FILLED with executedQty {}",
            resp.order_id, resp.executed_qty
        )));
    }

    let quantity = match side {
        Side::Buy => resp.executed_qty - base_asset_commission(&resp),
        Side::Sell => resp.executed_qty,
    };
    if quantity <= Decimal::ZERO {
        return Err(ExchangeError::Decode(format!(
            "order {} commission exceeds executedQty {}",
            resp.order_id, resp.executed_qty
        )));
    }

    Ok(Fill {
        price: (resp.cummulative_quote_qty / resp.executed_qty).normalize(),
        quantity: quantity.normalize(),
        order_id: Some(resp.order_id.to_string()),
    })
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn get_recent_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        count: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        // One extra row: the newest kline is usually still forming.
        let rows: Vec<RawKline> = self
            .get_public(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", timeframe.to_string()),
                    ("limit", (count + 1).to_string()),
                ],
            )
            .await?;

        let now_ms = Utc::now().timestamp_millis();
        let mut candles = rows
            .iter()
            .filter(|row| row.close_time_ms() < now_ms)
            .map(kline_to_candle)
            .collect::<Result<Vec<_>, _>>()?;

        if candles.len() > count {
            let excess = candles.len() - count;
            candles.drain(..excess);
        }
        debug!(symbol, timeframe, received = rows.len(), closed = candles.len(), "klines fetched");
        Ok(candles)
    }

    async fn get_current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let ticker: TickerPrice = self
            .get_public("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;

        if ticker.symbol != symbol || ticker.price <= Decimal::ZERO {
            return Err(ExchangeError::NoPrice(symbol.to_string()));
        }
        Ok(ticker.price)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<Fill, ExchangeError> {
        let client_order_id = format!("cs-{}", uuid::Uuid::new_v4().simple());
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.normalize().to_string()),
            ("newClientOrderId", client_order_id.clone()),
            ("newOrderRespType", "FULL".to_string()),
        ];

        info!(
            symbol,
            side = side.as_str(),
            %quantity,
            client_order_id = %client_order_id,
            "sending market order"
        );

        let resp: OrderResponse = self
            .send_signed_request(Method::POST, "/api/v3/order", params)
            .await?;

        let (venue_symbol, venue_client_id, executed) =
            (resp.symbol.clone(), resp.client_order_id.clone(), resp.executed_qty);
        if venue_symbol != symbol {
            warn!(symbol, venue_symbol = %venue_symbol, "order response names another symbol");
        }

        match fill_from_response(resp, side) {
            Ok(fill) => {
                info!(
                    symbol,
                    client_order_id = %venue_client_id,
                    price = %fill.price,
                    executed = %executed,
                    net_quantity = %fill.quantity,
                    "order filled"
                );
                Ok(fill)
            }
            Err(e) => {
                warn!(symbol, client_order_id = %venue_client_id, error = %e, "order not filled");
                Err(e)
            }
        }
    }
}
