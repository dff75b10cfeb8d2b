use super::{closes, sma_series, Signal, SignalEvaluator};
use crate::models::Candle;

/// Fires when the close moves back above the lower Bollinger band after
/// closing below it on the previous candle
pub struct BollingerBounce {
    period: usize,
    width: f64,
}

impl BollingerBounce {
    pub fn new(period: usize, width: f64) -> Self {
        Self { period, width }
    }

    fn lower_band(&self, values: &[f64], mean: f64, end: usize) -> f64 {
        let window = &values[end + 1 - self.period..=end];
        let variance =
            window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.period as f64;
        mean - self.width * variance.sqrt()
    }
}

impl Default for BollingerBounce {
    fn default() -> Self {
        Self::new(20, 2.0)
    }
}

impl SignalEvaluator for BollingerBounce {
    fn key(&self) -> &str {
        "bollinger_bounce"
    }

    fn min_candles(&self) -> usize {
        self.period + 1
    }

    fn evaluate(&self, candles: &[Candle], index: usize) -> Signal {
        if index >= candles.len() || index < self.period {
            return Signal::NoSignal;
        }

        let values = closes(candles, index);
        let Some(means) = sma_series(&values, self.period) else {
            return Signal::NoSignal;
        };

        let prev_lower = self.lower_band(&values, means[index - 1], index - 1);
        let lower = self.lower_band(&values, means[index], index);

        if values[index - 1] < prev_lower && values[index] >= lower {
            Signal::Trigger(candles[index].close)
        } else {
            Signal::NoSignal
        }
    }
}
