// src/strategies/traits.rs
use crate::error::ValidationError;
use crate::types::{Candle, Signal};

/// A pure signal source over a window of closed candles (oldest first).
///
/// Implementations must not keep state between calls or perform I/O: the
/// same window always yields the same signal.
pub trait SignalSource: Send + Sync {
    fn name(&self) -> &str;

    /// Smallest window `evaluate` accepts.
    fn min_candles(&self) -> usize;

    fn evaluate(&self, candles: &[Candle]) -> Result<Signal, ValidationError>;
}

impl<T: SignalSource + ?Sized> SignalSource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn min_candles(&self) -> usize {
        (**self).min_candles()
    }

    fn evaluate(&self, candles: &[Candle]) -> Result<Signal, ValidationError> {
        (**self).evaluate(candles)
    }
}

/// Rejects short windows, out-of-order timestamps and inconsistent candles.
pub fn validate_window(candles: &[Candle], required: usize) -> Result<(), ValidationError> {
    if candles.len() < required {
        return Err(ValidationError::InsufficientCandles {
            required,
            actual: candles.len(),
        });
    }

    for (index, candle) in candles.iter().enumerate() {
        let reason = if candle.high < candle.low {
            Some("high below low")
        } else if candle.open < candle.low || candle.open > candle.high {
            Some("open outside high/low range")
        } else if candle.close < candle.low || candle.close > candle.high {
            Some("close outside high/low range")
        } else if candle.low.is_sign_negative() || candle.volume.is_sign_negative() {
            Some("negative price or volume")
        } else {
            None
        };

        if let Some(reason) = reason {
            return Err(ValidationError::MalformedCandle {
                index,
                reason: reason.to_string(),
            });
        }
    }

    for (i, pair) in candles.windows(2).enumerate() {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(ValidationError::NonMonotonicTimestamps { index: i + 1 });
        }
    }

    Ok(())
}
