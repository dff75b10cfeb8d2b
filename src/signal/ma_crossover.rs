use super::{closes, sma_series, Signal, SignalEvaluator};
use crate::models::Candle;

/// Fires when the fast SMA crosses above the slow SMA on the evaluated candle
pub struct MaCrossover {
    fast: usize,
    slow: usize,
}

impl MaCrossover {
    pub fn new(fast: usize, slow: usize) -> Self {
        Self { fast, slow }
    }
}

impl Default for MaCrossover {
    fn default() -> Self {
        Self::new(9, 21)
    }
}

impl SignalEvaluator for MaCrossover {
    fn key(&self) -> &str {
        "ma_crossover"
    }

    fn min_candles(&self) -> usize {
        self.slow + 1
    }

    fn evaluate(&self, candles: &[Candle], index: usize) -> Signal {
        if index >= candles.len() || index < self.slow {
            return Signal::NoSignal;
        }

        let values = closes(candles, index);
        let (Some(fast), Some(slow)) = (
            sma_series(&values, self.fast),
            sma_series(&values, self.slow),
        ) else {
            return Signal::NoSignal;
        };

        let crossed_up = fast[index - 1] <= slow[index - 1] && fast[index] > slow[index];
        if crossed_up {
            Signal::Trigger(candles[index].close)
        } else {
            Signal::NoSignal
        }
    }
}
