// Entry signal evaluators
pub mod bollinger;
pub mod ma_crossover;

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use yata::methods::SMA;
use yata::prelude::*;

use crate::error::ConfigError;
use crate::models::Candle;

pub use bollinger::BollingerBounce;
pub use ma_crossover::MaCrossover;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    NoSignal,
    /// Buy signal at the given reference price (the candle close)
    Trigger(Decimal),
}

impl Signal {
    pub fn is_trigger(&self) -> bool {
        matches!(self, Self::Trigger(_))
    }
}

/// Decides whether to enter a position at a given candle.
///
/// Evaluators are pure: same candles and index, same answer.
pub trait SignalEvaluator: Send + Sync {
    /// Registry key stored on the bot record
    fn key(&self) -> &str;

    /// Candles required before `evaluate` can fire
    fn min_candles(&self) -> usize;

    fn evaluate(&self, candles: &[Candle], index: usize) -> Signal;
}

/// Maps strategy keys to evaluators. Lookup happens once when a bot is
/// created or loaded, never per round.
#[derive(Clone, Default)]
pub struct SignalRegistry {
    evaluators: HashMap<String, Arc<dyn SignalEvaluator>>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in evaluators
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MaCrossover::default()));
        registry.register(Arc::new(BollingerBounce::default()));
        registry
    }

    pub fn register(&mut self, evaluator: Arc<dyn SignalEvaluator>) {
        self.evaluators
            .insert(evaluator.key().to_string(), evaluator);
    }

    pub fn get(&self, key: &str) -> Result<Arc<dyn SignalEvaluator>, ConfigError> {
        self.evaluators
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownStrategy(key.to_string()))
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.evaluators.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

/// Rolling SMA over `values`; entry `i` is the mean of the `period` values
/// ending at `i`. Entries before `period - 1` are warm-up and meaningless.
pub(crate) fn sma_series(values: &[f64], period: usize) -> Option<Vec<f64>> {
    let first = values.first()?;
    let period = u8::try_from(period).ok()?;
    let mut sma = SMA::new(period, first).ok()?;
    Some(values.iter().map(|v| sma.next(v)).collect())
}

pub(crate) fn closes(candles: &[Candle], upto: usize) -> Vec<f64> {
    candles[..=upto].iter().map(Candle::close_f64).collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                let close = Decimal::from_f64_retain(*close).unwrap_or_default().round_dp(8);
                Candle {
                    open_time: i as i64 * 60_000,
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: Decimal::ONE,
                    close_time: i as i64 * 60_000 + 59_999,
                }
            })
            .collect()
    }
}
