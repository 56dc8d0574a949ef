//! The bot's belief about its market exposure.
//!
//! `Position` is either FLAT or OPEN; the OPEN-only fields live inside
//! [`PositionState::Open`] so "OPEN iff all fields are present" holds by
//! construction. The price ordering `stop_loss < entry < take_profit` is
//! checked by [`OpenPosition::new`] and again by [`Position::validate`] after
//! a record is loaded from disk.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::risk::Levels;
use crate::error::BotError;
use crate::utils::precision::pct_change;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    pub opened_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_order_id: Option<String>,
}

impl OpenPosition {
    pub fn new(
        entry_price: Decimal,
        quantity: Decimal,
        levels: Levels,
        opened_at: DateTime<Utc>,
        entry_order_id: Option<String>,
    ) -> Result<Self, BotError> {
        let position = Self {
            entry_price,
            quantity,
            stop_loss_price: levels.stop_loss,
            take_profit_price: levels.take_profit,
            opened_at,
            entry_order_id,
        };
        position.validate()?;
        Ok(position)
    }

    pub fn validate(&self) -> Result<(), BotError> {
        if self.quantity <= Decimal::ZERO {
            return Err(BotError::Invariant(format!(
                "open position with non-positive quantity {}",
                self.quantity
            )));
        }
        if !(self.stop_loss_price < self.entry_price && self.entry_price < self.take_profit_price) {
            return Err(BotError::Invariant(format!(
                "expected stop_loss < entry < take_profit, got {} / {} / {}",
                self.stop_loss_price, self.entry_price, self.take_profit_price
            )));
        }
        Ok(())
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.quantity
    }

    pub fn return_pct(&self, price: Decimal) -> Decimal {
        pct_change(self.entry_price, price)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionState {
    Flat,
    Open(OpenPosition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub dry_run: bool,
    #[serde(flatten)]
    pub state: PositionState,
}

impl Position {
    pub fn flat(symbol: impl Into<String>, dry_run: bool) -> Self {
        Self {
            symbol: symbol.into(),
            dry_run,
            state: PositionState::Flat,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, PositionState::Open(_))
    }

    pub fn open_position(&self) -> Option<&OpenPosition> {
        match &self.state {
            PositionState::Open(open) => Some(open),
            PositionState::Flat => None,
        }
    }

    pub fn validate(&self) -> Result<(), BotError> {
        match &self.state {
            PositionState::Open(open) => open.validate(),
            PositionState::Flat => Ok(()),
        }
    }

    /// FLAT -> OPEN. Returns the next state; `self` is untouched.
    pub fn opened(&self, open: OpenPosition) -> Result<Position, BotError> {
        if self.is_open() {
            return Err(BotError::Invariant(format!(
                "cannot open {}: a position is already open",
                self.symbol
            )));
        }
        open.validate()?;
        Ok(Position {
            symbol: self.symbol.clone(),
            dry_run: self.dry_run,
            state: PositionState::Open(open),
        })
    }

    /// OPEN -> FLAT. Returns the next state and the position being closed.
    pub fn closed(&self) -> Result<(Position, OpenPosition), BotError> {
        match &self.state {
            PositionState::Open(open) => Ok((Position::flat(&self.symbol, self.dry_run), open.clone())),
            PositionState::Flat => Err(BotError::Invariant(format!(
                "cannot close {}: no open position",
                self.symbol
            ))),
        }
    }
}
