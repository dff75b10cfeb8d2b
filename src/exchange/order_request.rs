use rust_decimal::Decimal;

use crate::error::ExchangeError;
use crate::exchange::filters::format_decimal;
use crate::exchange::signing::QueryParams;
use crate::models::{OrderSide, OrderType, TimeInForce};

const MAX_CLIENT_ORDER_ID_LEN: usize = 36;

/// An order request that already passed the exchange's per-type parameter rules.
///
/// Construction is the only validation point; a value of this type can be
/// signed and sent as is.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    symbol: String,
    side: OrderSide,
    order_type: OrderType,
    quantity: Decimal,
    price: Option<Decimal>,
    stop_price: Option<Decimal>,
    time_in_force: Option<TimeInForce>,
    client_order_id: String,
}

impl OrderRequest {
    pub fn new(
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
        stop_price: Option<Decimal>,
        client_order_id: &str,
    ) -> Result<Self, ExchangeError> {
        if symbol.is_empty() {
            return Err(ExchangeError::InvalidOrder("symbol is empty".into()));
        }
        validate_client_order_id(client_order_id)?;
        ensure_positive("quantity", Some(quantity))?;
        ensure_positive("price", price)?;
        ensure_positive("stopPrice", stop_price)?;

        let (needs_price, needs_stop, time_in_force) = match order_type {
            OrderType::Limit => (true, false, Some(TimeInForce::Gtc)),
            OrderType::Market => (false, false, None),
            OrderType::StopLoss | OrderType::TakeProfit => (false, true, None),
            OrderType::StopLossLimit | OrderType::TakeProfitLimit => {
                (true, true, Some(TimeInForce::Gtc))
            }
            OrderType::LimitMaker => (true, false, None),
        };

        match (needs_price, price.is_some()) {
            (true, false) => {
                return Err(ExchangeError::InvalidOrder(format!(
                    "{} order requires a price",
                    order_type.as_str()
                )))
            }
            (false, true) => {
                return Err(ExchangeError::InvalidOrder(format!(
                    "{} order does not take a price",
                    order_type.as_str()
                )))
            }
            _ => {}
        }

        match (needs_stop, stop_price.is_some()) {
            (true, false) => {
                return Err(ExchangeError::InvalidOrder(format!(
                    "{} order requires a stop price",
                    order_type.as_str()
                )))
            }
            (false, true) => {
                return Err(ExchangeError::InvalidOrder(format!(
                    "{} order does not take a stop price",
                    order_type.as_str()
                )))
            }
            _ => {}
        }

        Ok(Self {
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity,
            price,
            stop_price,
            time_in_force,
            client_order_id: client_order_id.to_string(),
        })
    }

    /// LIMIT / GTC order, the only kind the lifecycle engine places
    pub fn limit(
        symbol: &str,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
        client_order_id: &str,
    ) -> Result<Self, ExchangeError> {
        Self::new(
            symbol,
            side,
            OrderType::Limit,
            quantity,
            Some(price),
            None,
            client_order_id,
        )
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    pub fn order_type(&self) -> OrderType {
        self.order_type
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn price(&self) -> Option<Decimal> {
        self.price
    }

    pub fn client_order_id(&self) -> &str {
        &self.client_order_id
    }

    /// Wire parameters in transmission order
    pub fn to_params(&self) -> QueryParams {
        let mut params = QueryParams::new();
        params
            .push("symbol", self.symbol.as_str())
            .push("side", self.side.as_str())
            .push("type", self.order_type.as_str());
        if let Some(tif) = self.time_in_force {
            params.push("timeInForce", tif.as_str());
        }
        if let Some(price) = self.price {
            params.push("price", format_decimal(price));
        }
        params.push("quantity", format_decimal(self.quantity));
        if let Some(stop) = self.stop_price {
            params.push("stopPrice", format_decimal(stop));
        }
        params.push("newClientOrderId", self.client_order_id.as_str());
        params
    }
}

fn ensure_positive(name: &str, value: Option<Decimal>) -> Result<(), ExchangeError> {
    match value {
        Some(v) if v <= Decimal::ZERO => Err(ExchangeError::InvalidOrder(format!(
            "{} must be positive, got {}",
            name, v
        ))),
        _ => Ok(()),
    }
}

fn validate_client_order_id(id: &str) -> Result<(), ExchangeError> {
    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '/' | '_' | '-'));

    if id.is_empty() || id.len() > MAX_CLIENT_ORDER_ID_LEN || !valid_chars {
        return Err(ExchangeError::InvalidOrder(format!(
            "invalid client order id '{}'",
            id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const ID: &str = "6f1c9f0e-8a4b-4c55-9a4e-2d3b1f5c7a90";

    #[test]
    fn test_limit_order_params_in_wire_order() {
        let request = OrderRequest::limit("ETHUSDT", OrderSide::Buy, dec!(99.00), dec!(0.1010), ID)
            .unwrap();

        assert_eq!(
            request.to_params().to_query_string(),
            format!(
                "symbol=ETHUSDT&side=BUY&type=LIMIT&timeInForce=GTC&price=99.00&quantity=0.1010&newClientOrderId={}",
                ID
            )
        );
    }

    #[test]
    fn test_market_order_has_no_price_or_time_in_force() {
        let request = OrderRequest::new(
            "ETHUSDT",
            OrderSide::Sell,
            OrderType::Market,
            dec!(1),
            None,
            None,
            ID,
        )
        .unwrap();

        let query = request.to_params().to_query_string();
        assert!(!query.contains("price"));
        assert!(!query.contains("timeInForce"));
    }

    #[test]
    fn test_rejects_invalid_type_combinations() {
        let market_with_price = OrderRequest::new(
            "ETHUSDT",
            OrderSide::Buy,
            OrderType::Market,
            dec!(1),
            Some(dec!(10)),
            None,
            ID,
        );
        assert!(market_with_price.is_err());

        let limit_without_price = OrderRequest::new(
            "ETHUSDT",
            OrderSide::Buy,
            OrderType::Limit,
            dec!(1),
            None,
            None,
            ID,
        );
        assert!(limit_without_price.is_err());

        let stop_limit_without_stop = OrderRequest::new(
            "ETHUSDT",
            OrderSide::Sell,
            OrderType::StopLossLimit,
            dec!(1),
            Some(dec!(10)),
            None,
            ID,
        );
        assert!(stop_limit_without_stop.is_err());

        let stop_loss = OrderRequest::new(
            "ETHUSDT",
            OrderSide::Sell,
            OrderType::StopLoss,
            dec!(1),
            None,
            Some(dec!(9)),
            ID,
        );
        assert!(stop_loss.is_ok());
    }

    #[test]
    fn test_limit_maker_takes_no_time_in_force() {
        let request = OrderRequest::new(
            "ETHUSDT",
            OrderSide::Buy,
            OrderType::LimitMaker,
            dec!(1),
            Some(dec!(10)),
            None,
            ID,
        )
        .unwrap();
        assert!(!request.to_params().to_query_string().contains("timeInForce"));
    }

    #[test]
    fn test_rejects_non_positive_values() {
        assert!(OrderRequest::limit("ETHUSDT", OrderSide::Buy, dec!(0), dec!(1), ID).is_err());
        assert!(OrderRequest::limit("ETHUSDT", OrderSide::Buy, dec!(1), dec!(-1), ID).is_err());
    }

    #[test]
    fn test_rejects_bad_client_order_ids() {
        assert!(OrderRequest::limit("ETHUSDT", OrderSide::Buy, dec!(1), dec!(1), "").is_err());
        assert!(
            OrderRequest::limit("ETHUSDT", OrderSide::Buy, dec!(1), dec!(1), "has space").is_err()
        );
        let too_long = "x".repeat(37);
        assert!(
            OrderRequest::limit("ETHUSDT", OrderSide::Buy, dec!(1), dec!(1), &too_long).is_err()
        );
    }
}
