use async_trait::async_trait;
use chrono::Utc;
use governor::{Quota, RateLimiter};
use reqwest::{Client, Method, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ExchangeError;
use crate::exchange::filters::SymbolFilterSet;
use crate::exchange::order_request::OrderRequest;
use crate::exchange::responses::{
    parse_klines, AccountInfo, ApiErrorBody, AveragePrice, ExchangeInfoResponse, OrderBook,
    OrderReport, Ticker24h,
};
use crate::exchange::signing::{Credentials, QueryParams, RecvWindow, RequestSigner};
use crate::exchange::ExchangeGateway;
use crate::models::{Candle, KlineInterval};

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_KLINES_PER_REQUEST: usize = 1000;
const API_KEY_HEADER: &str = "X-MBX-APIKEY";

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub recv_window: RecvWindow,
    pub timeout: Duration,
    pub requests_per_minute: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            recv_window: RecvWindow::default(),
            timeout: Duration::from_secs(10),
            requests_per_minute: 1200,
        }
    }
}

/// Spot REST client with request signing and rate limiting
///
/// Cloneable; all clones share the rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    recv_window: RecvWindow,
    rate_limiter: Arc<BinanceRateLimiter>,
}

impl BinanceClient {
    pub fn new(credentials: Credentials, config: ClientConfig) -> Result<Self, ExchangeError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        let rpm = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
            recv_window: config.recv_window,
            rate_limiter,
        })
    }

    /// Unsigned market-data request
    async fn public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &QueryParams,
    ) -> Result<T, ExchangeError> {
        let url = if params.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, params.to_query_string())
        };
        self.send(self.client.get(url), path, params).await
    }

    /// Signed request. The query string is built once and sent verbatim so
    /// the transmitted parameters are exactly the signed ones.
    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &QueryParams,
    ) -> Result<T, ExchangeError> {
        let timestamp = Utc::now().timestamp_millis();
        let query = RequestSigner::new(&self.credentials).sign_params(
            params,
            self.recv_window,
            timestamp,
        );
        let url = format!("{}{}?{}", self.base_url, path, query);

        let request = self
            .client
            .request(method, url)
            .header(API_KEY_HEADER, self.credentials.api_key());
        self.send(request, path, params).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        path: &str,
        params: &QueryParams,
    ) -> Result<T, ExchangeError> {
        self.rate_limiter.until_ready().await;

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let err = match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(api) => ExchangeError::Api {
                    code: api.code,
                    msg: api.msg,
                },
                Err(_) => ExchangeError::Api {
                    code: -i64::from(status.as_u16()),
                    msg: body,
                },
            };
            tracing::error!(
                path,
                params = %params.to_query_string(),
                http_status = status.as_u16(),
                "❌ Exchange rejected request: {}",
                err
            );
            return Err(err);
        }

        serde_json::from_str(&body)
            .map_err(|e| ExchangeError::Decode(format!("{}: {}", path, e)))
    }

    pub async fn exchange_info(&self) -> Result<ExchangeInfoResponse, ExchangeError> {
        self.public("/api/v3/exchangeInfo", &QueryParams::new())
            .await
    }

    async fn kline_page(
        &self,
        symbol: &str,
        interval: &KlineInterval,
        limit: usize,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let mut params = QueryParams::new();
        params
            .push("symbol", symbol)
            .push("interval", interval.as_str())
            .push("limit", limit.to_string());
        if let Some(end) = end_time {
            params.push("endTime", end.to_string());
        }

        let rows: Vec<Vec<serde_json::Value>> = self.public("/api/v3/klines", &params).await?;
        parse_klines(rows)
    }

    /// Order history for a symbol, newest last
    pub async fn all_orders(
        &self,
        symbol: &str,
        limit: Option<u32>,
    ) -> Result<Vec<OrderReport>, ExchangeError> {
        let mut params = QueryParams::new();
        params.push("symbol", symbol);
        if let Some(limit) = limit {
            params.push("limit", limit.to_string());
        }
        self.signed(Method::GET, "/api/v3/allOrders", &params).await
    }

    pub async fn ticker_24h(&self, symbol: &str) -> Result<Ticker24h, ExchangeError> {
        let params = QueryParams::new().with("symbol", symbol);
        self.public("/api/v3/ticker/24hr", &params).await
    }

    pub async fn order_book(&self, symbol: &str, limit: u32) -> Result<OrderBook, ExchangeError> {
        let params = QueryParams::new()
            .with("symbol", symbol)
            .with("limit", limit.to_string());
        self.public("/api/v3/depth", &params).await
    }

    pub async fn cancel_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<OrderReport, ExchangeError> {
        let params = QueryParams::new()
            .with("symbol", symbol)
            .with("origClientOrderId", client_order_id);
        self.signed(Method::DELETE, "/api/v3/order", &params).await
    }
}

#[async_trait]
impl ExchangeGateway for BinanceClient {
    async fn symbol_filters(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, SymbolFilterSet>, ExchangeError> {
        let wanted: HashSet<&str> = symbols.iter().map(String::as_str).collect();
        let info = self.exchange_info().await?;

        Ok(info
            .symbols
            .iter()
            .filter(|s| s.is_trading() && wanted.contains(s.symbol.as_str()))
            .map(|s| (s.symbol.clone(), s.filter_set()))
            .collect())
    }

    async fn klines(
        &self,
        symbol: &str,
        interval: &KlineInterval,
        limit: usize,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Newest page first, then walk backwards in full pages.
        let mut batch = match limit % MAX_KLINES_PER_REQUEST {
            0 => MAX_KLINES_PER_REQUEST,
            rest => rest,
        };
        let mut end = end_time;
        let mut candles: Vec<Candle> = Vec::with_capacity(limit);

        while candles.len() < limit {
            let page = self.kline_page(symbol, interval, batch, end).await?;
            let Some(earliest) = page.first() else {
                break;
            };
            end = Some(earliest.open_time - 1);

            let fetched = page.len();
            candles.splice(0..0, page);
            if fetched < batch {
                break;
            }
            batch = MAX_KLINES_PER_REQUEST;
        }

        Ok(candles)
    }

    async fn place_order(
        &self,
        request: &OrderRequest,
        test: bool,
    ) -> Result<OrderReport, ExchangeError> {
        let params = request.to_params();

        if !test {
            return self.signed(Method::POST, "/api/v3/order", &params).await;
        }

        // The test endpoint answers `{}`; report what would have been booked.
        let _: serde_json::Value = self
            .signed(Method::POST, "/api/v3/order/test", &params)
            .await?;
        Ok(OrderReport {
            symbol: request.symbol().to_string(),
            client_order_id: request.client_order_id().to_string(),
            transact_time: Some(Utc::now().timestamp_millis()),
            time: None,
            price: request.price().unwrap_or(Decimal::ZERO),
            orig_qty: request.quantity(),
            executed_qty: Decimal::ZERO,
            status: "NEW".to_string(),
            order_type: request.order_type().as_str().to_string(),
            side: request.side().as_str().to_string(),
        })
    }

    async fn query_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<OrderReport, ExchangeError> {
        let params = QueryParams::new()
            .with("symbol", symbol)
            .with("origClientOrderId", client_order_id);
        self.signed(Method::GET, "/api/v3/order", &params).await
    }

    async fn account(&self) -> Result<AccountInfo, ExchangeError> {
        self.signed(Method::GET, "/api/v3/account", &QueryParams::new())
            .await
    }

    async fn average_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let params = QueryParams::new().with("symbol", symbol);
        let avg: AveragePrice = self.public("/api/v3/avgPrice", &params).await?;
        Ok(avg.price)
    }
}
