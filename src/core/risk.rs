// src/core/risk.rs
use rust_decimal::Decimal;
use thiserror::Error;

use crate::core::position::OpenPosition;
use crate::types::ExitReason;
use crate::utils::precision::{normalize_price, shift_by_pct};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskError {
    #[error("entry price must be positive, got {0}")]
    NonPositiveEntry(Decimal),

    #[error("levels collapsed after rounding: stop {stop_loss} / entry {entry} / take {take_profit}")]
    LevelsCollapsed {
        stop_loss: Decimal,
        entry: Decimal,
        take_profit: Decimal,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Levels {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// Prices observed since the previous exit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceTick {
    pub low: Decimal,
    pub high: Decimal,
    pub last: Decimal,
}

impl PriceTick {
    pub fn at(price: Decimal) -> Self {
        Self {
            low: price,
            high: price,
            last: price,
        }
    }

    /// Range covering the previously observed price (if any) and `last`.
    pub fn spanning(previous: Option<Decimal>, last: Decimal) -> Self {
        let previous = previous.unwrap_or(last);
        Self {
            low: previous.min(last),
            high: previous.max(last),
            last,
        }
    }
}

/// Fixed-percentage stop-loss / take-profit rules for a long-only position.
#[derive(Debug, Clone)]
pub struct RiskPolicy {
    stop_loss_pct: Decimal,
    take_profit_pct: Decimal,
    tick_size: Decimal,
    sell_signal_min_profit_pct: Option<Decimal>,
}

impl RiskPolicy {
    /// Percentages are plain percent values (1.5 means 1.5%). A zero
    /// `tick_size` disables rounding of the computed levels.
    pub fn new(stop_loss_pct: Decimal, take_profit_pct: Decimal, tick_size: Decimal) -> Self {
        Self {
            stop_loss_pct,
            take_profit_pct,
            tick_size,
            sell_signal_min_profit_pct: None,
        }
    }

    /// Only let a SELL signal close the position once it is up by `pct`.
    pub fn with_sell_signal_min_profit(mut self, pct: Option<Decimal>) -> Self {
        self.sell_signal_min_profit_pct = pct;
        self
    }

    /// Stop-loss and take-profit prices for a new entry. Computed once per
    /// trade; an open position keeps its levels even if the policy changes.
    pub fn compute_levels(&self, entry_price: Decimal) -> Result<Levels, RiskError> {
        if entry_price <= Decimal::ZERO {
            return Err(RiskError::NonPositiveEntry(entry_price));
        }

        let stop_loss = normalize_price(shift_by_pct(entry_price, -self.stop_loss_pct), self.tick_size);
        let take_profit = normalize_price(shift_by_pct(entry_price, self.take_profit_pct), self.tick_size);

        if !(stop_loss < entry_price && entry_price < take_profit) {
            return Err(RiskError::LevelsCollapsed {
                stop_loss,
                entry: entry_price,
                take_profit,
            });
        }

        Ok(Levels {
            stop_loss,
            take_profit,
        })
    }

    /// Stop-loss wins when a gap move crosses both levels in one tick.
    pub fn check_exit(&self, tick: &PriceTick, position: &OpenPosition) -> Option<ExitReason> {
        if tick.low <= position.stop_loss_price {
            return Some(ExitReason::StopLoss);
        }
        if tick.high >= position.take_profit_price {
            return Some(ExitReason::TakeProfit);
        }
        None
    }

    /// Whether a SELL signal may close the position at `price`.
    pub fn allows_signal_exit(&self, price: Decimal, position: &OpenPosition) -> bool {
        match self.sell_signal_min_profit_pct {
            Some(min_pct) => position.return_pct(price) >= min_pct,
            None => true,
        }
    }
}
