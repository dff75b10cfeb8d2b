pub mod binance;
pub mod filters;
pub mod order_request;
pub mod paper;
pub mod responses;
pub mod signing;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::error::ExchangeError;
use crate::models::{Candle, KlineInterval, Order};

pub use binance::BinanceClient;
pub use filters::{format_decimal, round_to_valid_price, round_to_valid_quantity, SymbolFilterSet};
pub use order_request::OrderRequest;
pub use paper::PaperExchange;
pub use responses::{AccountInfo, OrderReport};
pub use signing::{Credentials, RecvWindow};

/// Everything the lifecycle engine needs from the exchange.
///
/// Implemented by the REST client, the paper exchange and the scripted
/// gateways in tests.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Trading rules for the given symbols. Symbols that are unknown or not
    /// trading are absent from the map.
    async fn symbol_filters(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, SymbolFilterSet>, ExchangeError>;

    /// Most recent `limit` candles ending at `end_time` (ms) or now, ascending.
    async fn klines(
        &self,
        symbol: &str,
        interval: &KlineInterval,
        limit: usize,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Submit an order. `test = true` validates it without matching.
    async fn place_order(
        &self,
        request: &OrderRequest,
        test: bool,
    ) -> Result<OrderReport, ExchangeError>;

    async fn query_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<OrderReport, ExchangeError>;

    async fn account(&self) -> Result<AccountInfo, ExchangeError>;

    async fn average_price(&self, symbol: &str) -> Result<Decimal, ExchangeError>;

    /// Take back open orders a previous process placed. Gateways without a
    /// local order book have nothing to restore. Returns how many were added.
    async fn restore_orders(&self, _orders: &[Order]) -> usize {
        0
    }
}
