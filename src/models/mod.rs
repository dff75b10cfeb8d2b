use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Kline intervals accepted by the exchange
pub const KLINE_INTERVALS: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M",
];

/// A validated kline interval (e.g. "5m")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KlineInterval(String);

impl KlineInterval {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for KlineInterval {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if KLINE_INTERVALS.contains(&s) {
            Ok(Self(s.to_string()))
        } else {
            Err(ConfigError::InvalidInterval(s.to_string()))
        }
    }
}

impl TryFrom<String> for KlineInterval {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KlineInterval> for String {
    fn from(value: KlineInterval) -> Self {
        value.0
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A trading bot: one strategy applied to a set of pairs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bot {
    pub id: String,
    pub name: String,
    pub strategy: String,
    pub interval: KlineInterval,
    pub trade_allocation: Decimal, // fraction of the free quote balance, (0, 1]
    pub profit_target: Decimal,    // exit multiplier, > 1
    pub simulation: bool,
    pub created_at: DateTime<Utc>,
}

/// One symbol tracked by a bot. At most one non-closed order at a time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pair {
    pub id: String,
    pub bot_id: String,
    pub symbol: String,
    pub is_active: bool,
    pub current_order_id: Option<String>,
    pub profit_loss: Decimal,
}

impl Pair {
    pub fn new(bot_id: &str, symbol: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            bot_id: bot_id.to_string(),
            symbol: symbol.to_string(),
            is_active: true,
            current_order_id: None,
            profit_loss: Decimal::ONE,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Canceled => "CANCELED",
            Self::PendingCancel => "PENDING_CANCEL",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Statuses after which the exchange will never fill the order further
    /// without it being FILLED.
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Canceled | Self::Rejected | Self::Expired)
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(Self::New),
            "PARTIALLY_FILLED" => Ok(Self::PartiallyFilled),
            "FILLED" => Ok(Self::Filled),
            "CANCELED" => Ok(Self::Canceled),
            "PENDING_CANCEL" => Ok(Self::PendingCancel),
            "REJECTED" => Ok(Self::Rejected),
            "EXPIRED" => Ok(Self::Expired),
            // Newer exchange status for self-trade prevention; nothing more will fill.
            "EXPIRED_IN_MATCH" => Ok(Self::Expired),
            other => Err(format!("unknown order status {other}")),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            other => Err(format!("unknown order side {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
    StopLoss,
    StopLossLimit,
    TakeProfit,
    TakeProfitLimit,
    LimitMaker,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Limit => "LIMIT",
            Self::Market => "MARKET",
            Self::StopLoss => "STOP_LOSS",
            Self::StopLossLimit => "STOP_LOSS_LIMIT",
            Self::TakeProfit => "TAKE_PROFIT",
            Self::TakeProfitLimit => "TAKE_PROFIT_LIMIT",
            Self::LimitMaker => "LIMIT_MAKER",
        }
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LIMIT" => Ok(Self::Limit),
            "MARKET" => Ok(Self::Market),
            "STOP_LOSS" => Ok(Self::StopLoss),
            "STOP_LOSS_LIMIT" => Ok(Self::StopLossLimit),
            "TAKE_PROFIT" => Ok(Self::TakeProfit),
            "TAKE_PROFIT_LIMIT" => Ok(Self::TakeProfitLimit),
            "LIMIT_MAKER" => Ok(Self::LimitMaker),
            other => Err(format!("unknown order type {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimeInForce {
    Gtc,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gtc => "GTC",
        }
    }
}

/// An order placed by a bot, keyed by its client order id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: String,
    pub bot_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub time: DateTime<Utc>,
    pub price: Decimal,
    pub take_profit_price: Decimal,
    pub original_quantity: Decimal,
    pub executed_quantity: Decimal,
    pub status: OrderStatus,
    pub is_entry_order: bool,
    pub is_closed: bool,
    pub closing_order_id: Option<String>, // exit order that closed this entry
    pub opening_order_id: Option<String>, // entry order this exit closes
}

/// OHLCV kline with exact decimals
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

impl Candle {
    /// Close as f64 for indicator math. Never used for order prices.
    pub fn close_f64(&self) -> f64 {
        self.close.to_f64().unwrap_or(0.0)
    }
}
