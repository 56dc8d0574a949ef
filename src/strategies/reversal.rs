use crate::error::ValidationError;
use crate::strategies::traits::{validate_window, SignalSource};
use crate::types::{Candle, Signal};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

const WINDOW: usize = 3;

/// Three-candle reversal pattern.
///
/// BUY: two down candles followed by an up candle whose body is at least
/// `reversal_body_ratio` of the range spanned by the two down candles.
/// SELL is the mirror image. BUY is always checked first, so a degenerate
/// window that satisfies both (e.g. three flat candles) yields BUY.
#[derive(Debug, Clone)]
pub struct ReversalStrategy {
    reversal_body_ratio: Decimal,
    min_trend_body_pct: Decimal,
}

impl ReversalStrategy {
    /// # Arguments
    /// * `reversal_body_ratio` - Minimum body of the third candle relative to the
    ///   high/low range of the first two (e.g. 0.5).
    /// * `min_trend_body_pct` - Minimum body of each of the first two candles, in
    ///   percent of their open (0 accepts any candle of the right colour).
    pub fn new(reversal_body_ratio: Decimal, min_trend_body_pct: Decimal) -> Self {
        Self {
            reversal_body_ratio,
            min_trend_body_pct,
        }
    }

    fn has_trend_body(&self, candle: &Candle) -> bool {
        candle.body() >= candle.open * self.min_trend_body_pct / Decimal::ONE_HUNDRED
    }

    fn is_strong_reversal(&self, first: &Candle, second: &Candle, reversal: &Candle) -> bool {
        let range = first.high.max(second.high) - first.low.min(second.low);
        reversal.body() >= range * self.reversal_body_ratio
    }

    fn is_bullish(&self, c1: &Candle, c2: &Candle, c3: &Candle) -> bool {
        c1.is_down()
            && c2.is_down()
            && self.has_trend_body(c1)
            && self.has_trend_body(c2)
            && c3.is_up()
            && self.is_strong_reversal(c1, c2, c3)
    }

    fn is_bearish(&self, c1: &Candle, c2: &Candle, c3: &Candle) -> bool {
        c1.is_up()
            && c2.is_up()
            && self.has_trend_body(c1)
            && self.has_trend_body(c2)
            && c3.is_down()
            && self.is_strong_reversal(c1, c2, c3)
    }
}

impl Default for ReversalStrategy {
    fn default() -> Self {
        Self::new(dec!(0.5), Decimal::ZERO)
    }
}

impl SignalSource for ReversalStrategy {
    fn name(&self) -> &str {
        "ReversalStrategy"
    }

    fn min_candles(&self) -> usize {
        WINDOW
    }

    fn evaluate(&self, candles: &[Candle]) -> Result<Signal, ValidationError> {
        validate_window(candles, WINDOW)?;

        let window = &candles[candles.len() - WINDOW..];
        let (c1, c2, c3) = (&window[0], &window[1], &window[2]);

        let signal = if self.is_bullish(c1, c2, c3) {
            Signal::Buy
        } else if self.is_bearish(c1, c2, c3) {
            Signal::Sell
        } else {
            Signal::None
        };

        debug!(strategy = self.name(), ?signal, close = %c3.close, "Evaluated candle window");
        Ok(signal)
    }
}
