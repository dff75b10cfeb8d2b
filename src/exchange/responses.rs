//! Exchange REST response types.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::ExchangeError;
use crate::exchange::filters::SymbolFilterSet;
use crate::models::{Candle, OrderSide, OrderStatus};

/// `{"code": -1121, "msg": "Invalid symbol."}`
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub filters: Vec<RawFilter>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFilter {
    pub filter_type: String,
    pub tick_size: Option<Decimal>,
    pub step_size: Option<Decimal>,
    pub min_notional: Option<Decimal>,
}

impl SymbolInfo {
    pub fn is_trading(&self) -> bool {
        self.status == "TRADING"
    }

    pub fn filter_set(&self) -> SymbolFilterSet {
        let find = |name: &str| self.filters.iter().find(|f| f.filter_type == name);

        let min_notional = find("MIN_NOTIONAL")
            .or_else(|| find("NOTIONAL"))
            .and_then(|f| f.min_notional);

        SymbolFilterSet {
            symbol: self.symbol.clone(),
            base_asset: self.base_asset.clone(),
            quote_asset: self.quote_asset.clone(),
            tick_size: find("PRICE_FILTER").and_then(|f| f.tick_size),
            step_size: find("LOT_SIZE").and_then(|f| f.step_size),
            min_notional,
        }
    }
}

/// Order state as reported by the exchange (placement ack or query)
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderReport {
    pub symbol: String,
    pub client_order_id: String,
    #[serde(default)]
    pub transact_time: Option<i64>,
    #[serde(default)]
    pub time: Option<i64>,
    pub price: Decimal,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub status: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
}

impl OrderReport {
    pub fn status(&self) -> Result<OrderStatus, ExchangeError> {
        self.status.parse().map_err(ExchangeError::Decode)
    }

    pub fn side(&self) -> Result<OrderSide, ExchangeError> {
        self.side.parse().map_err(ExchangeError::Decode)
    }

    /// Creation time of the order, falling back to now when the exchange omits it
    pub fn created_at(&self) -> DateTime<Utc> {
        self.transact_time
            .or(self.time)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub balances: Vec<AssetBalance>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl AccountInfo {
    pub fn free_by_asset(&self) -> HashMap<String, Decimal> {
        self.balances
            .iter()
            .map(|b| (b.asset.clone(), b.free))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AveragePrice {
    pub mins: u32,
    pub price: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol: String,
    pub price_change_percent: Decimal,
    pub last_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBook {
    pub last_update_id: u64,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
}

/// Klines arrive as positional arrays:
/// `[openTime, "open", "high", "low", "close", "volume", closeTime, ...]`
pub fn parse_klines(rows: Vec<Vec<serde_json::Value>>) -> Result<Vec<Candle>, ExchangeError> {
    rows.into_iter().map(|row| parse_kline(&row)).collect()
}

fn parse_kline(row: &[serde_json::Value]) -> Result<Candle, ExchangeError> {
    let int_at = |i: usize| {
        row.get(i)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ExchangeError::Decode(format!("kline field {} is not an integer", i)))
    };
    let dec_at = |i: usize| -> Result<Decimal, ExchangeError> {
        let raw = row
            .get(i)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ExchangeError::Decode(format!("kline field {} is not a string", i)))?;
        raw.parse()
            .map_err(|e| ExchangeError::Decode(format!("kline field {}: {}", i, e)))
    };

    Ok(Candle {
        open_time: int_at(0)?,
        open: dec_at(1)?,
        high: dec_at(2)?,
        low: dec_at(3)?,
        close: dec_at(4)?,
        volume: dec_at(5)?,
        close_time: int_at(6)?,
    })
}
