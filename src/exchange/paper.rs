//! Paper trading: orders are validated by the exchange but never matched.
//! Fills are simulated from the exchange's average price. The book lives in
//! memory; after a restart the runner hands stored open orders back through
//! [`ExchangeGateway::restore_orders`].

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::ExchangeError;
use crate::exchange::filters::SymbolFilterSet;
use crate::exchange::order_request::OrderRequest;
use crate::exchange::responses::{AccountInfo, OrderReport};
use crate::exchange::ExchangeGateway;
use crate::models::{Candle, KlineInterval, Order, OrderSide, OrderStatus, OrderType};

pub struct PaperExchange {
    inner: Arc<dyn ExchangeGateway>,
    book: Mutex<HashMap<String, OrderReport>>,
}

impl PaperExchange {
    pub fn new(inner: Arc<dyn ExchangeGateway>) -> Self {
        Self {
            inner,
            book: Mutex::new(HashMap::new()),
        }
    }

    pub async fn open_orders(&self) -> usize {
        self.book
            .lock()
            .await
            .values()
            .filter(|o| o.status == OrderStatus::New.as_str())
            .count()
    }
}

/// Book entry for a stored order, as the exchange would have reported it
fn report_from_order(order: &Order) -> OrderReport {
    OrderReport {
        symbol: order.symbol.clone(),
        client_order_id: order.id.clone(),
        transact_time: Some(order.time.timestamp_millis()),
        time: None,
        price: order.price,
        orig_qty: order.original_quantity,
        executed_qty: order.executed_quantity,
        status: order.status.as_str().to_string(),
        order_type: OrderType::Limit.as_str().to_string(),
        side: order.side.as_str().to_string(),
    }
}

fn crosses(side: OrderSide, limit: Decimal, average: Decimal) -> bool {
    match side {
        OrderSide::Buy => average <= limit,
        OrderSide::Sell => average >= limit,
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn symbol_filters(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, SymbolFilterSet>, ExchangeError> {
        self.inner.symbol_filters(symbols).await
    }

    async fn klines(
        &self,
        symbol: &str,
        interval: &KlineInterval,
        limit: usize,
        end_time: Option<i64>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.inner.klines(symbol, interval, limit, end_time).await
    }

    async fn place_order(
        &self,
        request: &OrderRequest,
        _test: bool,
    ) -> Result<OrderReport, ExchangeError> {
        let report = self.inner.place_order(request, true).await?;
        tracing::info!(
            symbol = request.symbol(),
            client_order_id = request.client_order_id(),
            "📝 Paper order booked: {} {} @ {}",
            request.side().as_str(),
            report.orig_qty,
            report.price
        );
        self.book
            .lock()
            .await
            .insert(report.client_order_id.clone(), report.clone());
        Ok(report)
    }

    async fn query_order(
        &self,
        symbol: &str,
        client_order_id: &str,
    ) -> Result<OrderReport, ExchangeError> {
        let booked = self.book.lock().await.get(client_order_id).cloned();
        let Some(mut report) = booked else {
            return Err(ExchangeError::unknown_order());
        };

        let is_open_limit = report.status == OrderStatus::New.as_str()
            && report.order_type == OrderType::Limit.as_str();
        if !is_open_limit {
            return Ok(report);
        }

        let average = self.inner.average_price(symbol).await?;
        if crosses(report.side()?, report.price, average) {
            report.status = OrderStatus::Filled.as_str().to_string();
            report.executed_qty = report.orig_qty;
            self.book
                .lock()
                .await
                .insert(client_order_id.to_string(), report.clone());
            tracing::info!(
                symbol,
                client_order_id,
                "📝 Paper order filled at average price {}",
                average
            );
        }

        Ok(report)
    }

    async fn account(&self) -> Result<AccountInfo, ExchangeError> {
        self.inner.account().await
    }

    async fn average_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        self.inner.average_price(symbol).await
    }

    async fn restore_orders(&self, orders: &[Order]) -> usize {
        let mut book = self.book.lock().await;
        let mut restored = 0;
        for order in orders.iter().filter(|o| !o.is_closed) {
            if book.contains_key(&order.id) {
                continue;
            }
            book.insert(order.id.clone(), report_from_order(order));
            restored += 1;
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    #[test]
    fn test_buy_fills_when_average_at_or_below_limit() {
        assert!(crosses(OrderSide::Buy, dec!(99), dec!(98.5)));
        assert!(crosses(OrderSide::Buy, dec!(99), dec!(99)));
        assert!(!crosses(OrderSide::Buy, dec!(99), dec!(99.01)));
    }

    #[test]
    fn test_sell_fills_when_average_at_or_above_limit() {
        assert!(crosses(OrderSide::Sell, dec!(100.20), dec!(100.21)));
        assert!(!crosses(OrderSide::Sell, dec!(100.20), dec!(100.19)));
    }

    #[test]
    fn test_stored_order_becomes_book_entry() {
        let order = Order {
            id: "entry-1".to_string(),
            bot_id: "bot-1".to_string(),
            symbol: "ETHUSDT".to_string(),
            side: OrderSide::Buy,
            time: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            price: dec!(99),
            take_profit_price: dec!(100.20),
            original_quantity: dec!(0.1010),
            executed_quantity: dec!(0),
            status: OrderStatus::New,
            is_entry_order: true,
            is_closed: false,
            closing_order_id: None,
            opening_order_id: None,
        };

        let report = report_from_order(&order);
        assert_eq!(report.client_order_id, "entry-1");
        assert_eq!(report.status().unwrap(), OrderStatus::New);
        assert_eq!(report.side().unwrap(), OrderSide::Buy);
        assert_eq!(report.order_type, "LIMIT");
        assert_eq!(report.created_at(), order.time);
    }
}
