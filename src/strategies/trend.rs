use crate::error::ValidationError;
use crate::strategies::traits::{validate_window, SignalSource};
use crate::types::{Candle, Signal};

/// Two-candle continuation pattern: higher close, high and low is a BUY,
/// lower on all three is a SELL. Accepts the same window as the reversal
/// pattern but only inspects the last two candles.
#[derive(Debug, Clone, Default)]
pub struct TrendStrategy;

impl TrendStrategy {
    fn is_uptrend(prev: &Candle, last: &Candle) -> bool {
        prev.close < last.close && prev.high < last.high && prev.low < last.low
    }

    fn is_downtrend(prev: &Candle, last: &Candle) -> bool {
        prev.close > last.close && prev.high > last.high && prev.low > last.low
    }
}

impl SignalSource for TrendStrategy {
    fn name(&self) -> &str {
        "TrendStrategy"
    }

    fn min_candles(&self) -> usize {
        3
    }

    fn evaluate(&self, candles: &[Candle]) -> Result<Signal, ValidationError> {
        validate_window(candles, self.min_candles())?;

        let prev = &candles[candles.len() - 2];
        let last = &candles[candles.len() - 1];

        if Self::is_uptrend(prev, last) {
            Ok(Signal::Buy)
        } else if Self::is_downtrend(prev, last) {
            Ok(Signal::Sell)
        } else {
            Ok(Signal::None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    // Rows are [open, high, low, close], five minutes apart.
    fn candles(rows: &[[Decimal; 4]]) -> Vec<Candle> {
        let start = Utc.timestamp_opt(1_672_531_200, 0).unwrap();
        rows.iter()
            .enumerate()
            .map(|(i, row)| Candle {
                timestamp: start + Duration::minutes(5 * i as i64),
                open: row[0],
                high: row[1],
                low: row[2],
                close: row[3],
                volume: dec!(500),
            })
            .collect()
    }

    #[test]
    fn test_uptrend_is_buy() {
        let window = candles(&[
            [dec!(100), dec!(102), dec!(99), dec!(101)],
            [dec!(101), dec!(104), dec!(100), dec!(103)],
            [dec!(103), dec!(106), dec!(102), dec!(105)],
        ]);
        assert_eq!(TrendStrategy.evaluate(&window).unwrap(), Signal::Buy);
    }

    #[test]
    fn test_lower_close_breaks_uptrend() {
        let window = candles(&[
            [dec!(100), dec!(102), dec!(99), dec!(101)],
            [dec!(101), dec!(105), dec!(100), dec!(105)],
            [dec!(105), dec!(106), dec!(102), dec!(103)],
        ]);
        assert_eq!(TrendStrategy.evaluate(&window).unwrap(), Signal::None);
    }

    #[test]
    fn test_downtrend_is_sell() {
        let window = candles(&[
            [dec!(105), dec!(106), dec!(104), dec!(105)],
            [dec!(103), dec!(104), dec!(102), dec!(103)],
            [dec!(101), dec!(102), dec!(100), dec!(101)],
        ]);
        assert_eq!(TrendStrategy.evaluate(&window).unwrap(), Signal::Sell);
    }

    #[test]
    fn test_single_candle_is_an_error() {
        let window = candles(&[[dec!(100), dec!(102), dec!(99), dec!(101)]]);
        assert!(TrendStrategy.evaluate(&window).is_err());
    }
}
