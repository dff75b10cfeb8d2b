//! Exchange granularity rules and exact-decimal quantization.
//!
//! The exchange rejects any order whose price is not a multiple of the
//! symbol's tick size or whose quantity is not a multiple of its step size,
//! so every value sent in an order goes through this module. All arithmetic
//! is `Decimal`; binary floats never touch a price or a quantity.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::ExchangeError;

/// Significant digits the exchange accepts for a price/quantity string
const MAX_SIGNIFICANT_DIGITS: u32 = 12;

/// Per-symbol trading rules used for quantization. Cached per run, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolFilterSet {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub tick_size: Option<Decimal>,
    pub step_size: Option<Decimal>,
    pub min_notional: Option<Decimal>,
}

impl SymbolFilterSet {
    /// Fail loudly if either granularity filter is missing.
    pub fn validate(&self) -> Result<(), ExchangeError> {
        self.tick_size()?;
        self.step_size()?;
        Ok(())
    }

    pub fn tick_size(&self) -> Result<Decimal, ExchangeError> {
        positive_filter(&self.symbol, "PRICE_FILTER", self.tick_size)
    }

    pub fn step_size(&self) -> Result<Decimal, ExchangeError> {
        positive_filter(&self.symbol, "LOT_SIZE", self.step_size)
    }
}

fn positive_filter(
    symbol: &str,
    filter: &'static str,
    value: Option<Decimal>,
) -> Result<Decimal, ExchangeError> {
    match value {
        // A zero tick/step means the exchange disabled the filter.
        None => Err(ExchangeError::FilterNotFound {
            symbol: symbol.to_string(),
            filter,
        }),
        Some(v) if v.is_zero() => Err(ExchangeError::FilterNotFound {
            symbol: symbol.to_string(),
            filter,
        }),
        Some(v) if v.is_sign_negative() => Err(ExchangeError::InvalidFilter {
            symbol: symbol.to_string(),
            filter,
            value: v.to_string(),
        }),
        Some(v) => Ok(v),
    }
}

fn pow10(exp: i32) -> Decimal {
    if exp >= 0 {
        Decimal::from(10u64.pow(exp as u32))
    } else {
        Decimal::new(1, exp.unsigned_abs())
    }
}

/// Number of decimal places implied by a granularity value.
///
/// Finds the smallest `i` in `[-20, 20)` with `num < 10^i` and returns
/// `-(i - 1)`: `0.0001 -> 4`, `1 -> 0`, `10 -> -1`. Works on the value, not
/// on however the exchange happened to format the string (`"0.00010000"`).
/// `num` must be positive.
pub fn get_10_factor(num: Decimal) -> i32 {
    for i in -20..20 {
        if num < pow10(i) {
            return -(i - 1);
        }
    }
    0
}

/// Round `value` to the nearest multiple of `step` (ties to even), optionally
/// adding one extra step, expressed with the step's decimal places.
fn quantize(value: Decimal, step: Decimal, round_up: bool) -> Decimal {
    let places = get_10_factor(step);

    let steps = (value / step).round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
    let mut quantized = steps * step;
    if round_up {
        quantized += step;
    }

    if places >= 0 {
        quantized.rescale(places as u32);
    } else {
        quantized = quantized.normalize();
    }
    quantized
}

/// Closest valid price for the symbol; `round_up` adds exactly one tick.
pub fn round_to_valid_price(
    filters: &SymbolFilterSet,
    desired_price: Decimal,
    round_up: bool,
) -> Result<Decimal, ExchangeError> {
    let tick = filters.tick_size()?;
    Ok(quantize(desired_price, tick, round_up))
}

/// Closest valid quantity for the symbol; `round_up` adds exactly one step.
pub fn round_to_valid_quantity(
    filters: &SymbolFilterSet,
    desired_quantity: Decimal,
    round_up: bool,
) -> Result<Decimal, ExchangeError> {
    let step = filters.step_size()?;
    Ok(quantize(desired_quantity, step, round_up))
}

/// Fixed-point string for the wire: no scientific notation, at most 12
/// significant digits.
pub fn format_decimal(value: Decimal) -> String {
    let digits = value.mantissa().unsigned_abs().to_string().len() as u32;
    if digits > MAX_SIGNIFICANT_DIGITS {
        if let Some(rounded) = value.round_sf(MAX_SIGNIFICANT_DIGITS) {
            return rounded.to_string();
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn filters(tick: Decimal, step: Decimal) -> SymbolFilterSet {
        SymbolFilterSet {
            symbol: "ETHUSDT".to_string(),
            base_asset: "ETH".to_string(),
            quote_asset: "USDT".to_string(),
            tick_size: Some(tick),
            step_size: Some(step),
            min_notional: Some(dec!(10)),
        }
    }

    #[test]
    fn test_10_factor_for_powers_of_ten() {
        for k in 0..=8u32 {
            let step = Decimal::new(1, k);
            assert_eq!(get_10_factor(step), k as i32, "step {}", step);
        }
    }

    #[test]
    fn test_10_factor_ignores_string_formatting() {
        // Exchange sends tick sizes padded with zeros
        let tick: Decimal = "0.00010000".parse().unwrap();
        assert_eq!(get_10_factor(tick), 4);

        assert_eq!(get_10_factor(dec!(0.00000164763)), 6);
        assert_eq!(get_10_factor(dec!(10)), -1);
        assert_eq!(get_10_factor(dec!(1600623.3)), -6);
    }

    #[test]
    fn test_price_rounds_to_tick() {
        let f = filters(dec!(0.0001), dec!(0.001));
        let price = round_to_valid_price(&f, dec!(123.456789), false).unwrap();
        assert_eq!(price, dec!(123.4568));
        assert_eq!(price.to_string(), "123.4568");
    }

    #[test]
    fn test_quantity_step_of_one_rounds_to_nearest() {
        let f = filters(dec!(0.01), dec!(1));
        let quantity = round_to_valid_quantity(&f, dec!(12.7), false).unwrap();
        assert_eq!(quantity, dec!(13));
        assert_eq!(quantity.to_string(), "13");
    }

    #[test]
    fn test_round_up_adds_one_tick() {
        let f = filters(dec!(0.01), dec!(0.0001));

        // 99 * 1.012 = 100.188 -> 100.19 -> +1 tick
        let exit = round_to_valid_price(&f, dec!(99) * dec!(1.012), true).unwrap();
        assert_eq!(exit, dec!(100.20));

        let quantity = round_to_valid_quantity(&f, dec!(0.10101), true).unwrap();
        assert_eq!(quantity, dec!(0.1011));
    }

    #[test]
    fn test_ties_round_to_even() {
        let f = filters(dec!(0.01), dec!(0.01));
        assert_eq!(round_to_valid_price(&f, dec!(1.005), false).unwrap(), dec!(1.00));
        assert_eq!(round_to_valid_price(&f, dec!(1.015), false).unwrap(), dec!(1.02));
    }

    #[test]
    fn test_quantized_values_are_exact_multiples() {
        let values = [
            dec!(0.123456789),
            dec!(98765.4321987),
            dec!(1.0000000049),
            dec!(3.14159265358979),
        ];

        for k in 0..=8u32 {
            let tick = Decimal::new(1, k);
            let f = filters(tick, tick);
            for value in values {
                let price = round_to_valid_price(&f, value, false).unwrap();
                assert_eq!(price % tick, Decimal::ZERO, "{} @ {}", value, tick);

                let up = round_to_valid_price(&f, value, true).unwrap();
                assert_eq!(up % tick, Decimal::ZERO);
                assert_eq!(up - price, tick);
            }
        }
    }

    #[test]
    fn test_quantization_is_idempotent() {
        let f = filters(dec!(0.001), dec!(0.00001));
        for value in [dec!(2.71828), dec!(0.0004999), dec!(42)] {
            let once = round_to_valid_price(&f, value, false).unwrap();
            let twice = round_to_valid_price(&f, once, false).unwrap();
            assert_eq!(once, twice);

            let once = round_to_valid_quantity(&f, value, false).unwrap();
            let twice = round_to_valid_quantity(&f, once, false).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_non_power_of_ten_tick_snaps_to_multiple() {
        let f = filters(dec!(0.05), dec!(1));
        let price = round_to_valid_price(&f, dec!(10.03), false).unwrap();
        assert_eq!(price, dec!(10.05));
        assert_eq!(price % dec!(0.05), Decimal::ZERO);
    }

    #[test]
    fn test_missing_filter_fails() {
        let mut f = filters(dec!(0.01), dec!(0.01));
        f.tick_size = None;

        let err = round_to_valid_price(&f, dec!(1), false).unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::FilterNotFound { filter: "PRICE_FILTER", .. }
        ));
        assert!(f.validate().is_err());

        f.tick_size = Some(dec!(0.01));
        f.step_size = Some(Decimal::ZERO);
        let err = round_to_valid_quantity(&f, dec!(1), false).unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::FilterNotFound { filter: "LOT_SIZE", .. }
        ));
    }

    #[test]
    fn test_format_never_uses_scientific_notation() {
        assert_eq!(format_decimal(dec!(0.00000001)), "0.00000001");
        assert_eq!(format_decimal(dec!(100.20)), "100.20");
        assert_eq!(format_decimal(dec!(1234567.123456789)), "1234567.12346");
    }
}
