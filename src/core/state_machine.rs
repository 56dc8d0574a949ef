// src/core/state_machine.rs
//! FLAT/OPEN transitions with a durable commit in between.
//!
//! Every accepted transition builds the next [`StateRecord`], saves it at
//! `revision + 1` and only then replaces the in-memory record. If the save
//! fails the machine keeps the last durable record and the error is fatal.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::connectors::traits::ExchangeClient;
use crate::core::position::{OpenPosition, Position};
use crate::core::risk::RiskPolicy;
use crate::error::BotError;
use crate::storage::{StateRecord, StateStore, TradeStats};
use crate::types::{ExitReason, Side};
use crate::utils::precision::normalize_quantity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryKind {
    /// No record on disk; a FLAT record at revision 0 was written.
    Created,
    /// The stored record was adopted.
    Restored,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Opened {
        position: OpenPosition,
        revision: u64,
    },
    Closed {
        position: OpenPosition,
        exit_price: Decimal,
        reason: ExitReason,
        pnl: Decimal,
        revision: u64,
    },
}

pub struct PositionMachine {
    record: StateRecord,
    store: Arc<dyn StateStore>,
    /// Lot step quantities are floored to; zero leaves them untouched.
    lot_step: Decimal,
}

impl PositionMachine {
    /// Loads the last committed record, or creates the first one.
    pub async fn recover(
        store: Arc<dyn StateStore>,
        symbol: &str,
        dry_run: bool,
    ) -> Result<(Self, RecoveryKind), BotError> {
        let Some(record) = store.load().await? else {
            let record = StateRecord::initial(symbol, dry_run);
            store.save(&record).await?;
            info!(symbol, dry_run, "no saved state, starting FLAT at revision 0");
            return Ok((
                Self {
                    record,
                    store,
                    lot_step: Decimal::ZERO,
                },
                RecoveryKind::Created,
            ));
        };

        if record.position.symbol != symbol {
            return Err(BotError::Config(format!(
                "state file belongs to {}, configured symbol is {}",
                record.position.symbol, symbol
            )));
        }
        record
            .position
            .validate()
            .map_err(|e| BotError::Persistence(format!("stored position is invalid: {}", e)))?;

        let mut machine = Self {
            record,
            store,
            lot_step: Decimal::ZERO,
        };

        if machine.record.position.dry_run != dry_run {
            if machine.record.position.is_open() {
                return Err(BotError::Config(format!(
                    "stored OPEN position was taken with dry_run={}, refusing to resume with dry_run={}",
                    machine.record.position.dry_run, dry_run
                )));
            }
            warn!(dry_run, "FLAT state switches trading mode");
            let stats = machine.record.stats.clone();
            machine.commit(Position::flat(symbol, dry_run), stats).await?;
        }

        info!(
            symbol,
            revision = machine.record.revision,
            open = machine.record.position.is_open(),
            "state restored"
        );
        Ok((machine, RecoveryKind::Restored))
    }

    /// Floors stored and sold quantities to the exchange lot step.
    pub fn with_lot_step(mut self, step: Decimal) -> Self {
        self.lot_step = step;
        self
    }

    pub fn record(&self) -> &StateRecord {
        &self.record
    }

    pub fn position(&self) -> &Position {
        &self.record.position
    }

    pub fn revision(&self) -> u64 {
        self.record.revision
    }

    pub fn stats(&self) -> &TradeStats {
        &self.record.stats
    }

    /// FLAT -> OPEN. `reference_price` is the price the decision was made
    /// at; levels are checked against it before any order is sent and then
    /// recomputed from the actual fill.
    pub async fn enter(
        &mut self,
        exchange: &dyn ExchangeClient,
        quantity: Decimal,
        reference_price: Decimal,
        risk: &RiskPolicy,
    ) -> Result<Transition, BotError> {
        if self.record.position.is_open() {
            return Err(BotError::Invariant(format!(
                "entry requested while {} is already open",
                self.record.position.symbol
            )));
        }
        risk.compute_levels(reference_price)
            .map_err(|e| BotError::Invariant(e.to_string()))?;

        let symbol = self.record.position.symbol.clone();
        let fill = exchange
            .place_market_order(&symbol, Side::Buy, quantity)
            .await
            .map_err(|e| BotError::OrderExecution(format!("entry order failed: {}", e)))?;

        let levels = risk
            .compute_levels(fill.price)
            .map_err(|e| BotError::Invariant(format!("filled at {} but {}", fill.price, e)))?;
        // Only the floored amount can be sold back; the dust stays in the wallet.
        let quantity = normalize_quantity(fill.quantity, self.lot_step);
        if quantity != fill.quantity {
            info!(filled = %fill.quantity, %quantity, "entry quantity floored to lot step");
        }
        let open = OpenPosition::new(fill.price, quantity, levels, Utc::now(), fill.order_id)?;

        let next = self.record.position.opened(open.clone())?;
        let stats = self.record.stats.clone();
        let revision = self.commit(next, stats).await?;

        Ok(Transition::Opened {
            position: open,
            revision,
        })
    }

    /// OPEN -> FLAT, selling the full recorded quantity.
    pub async fn exit(
        &mut self,
        exchange: &dyn ExchangeClient,
        reason: ExitReason,
    ) -> Result<Transition, BotError> {
        let (next, closed) = self.record.position.closed()?;
        let quantity = normalize_quantity(closed.quantity, self.lot_step);
        if quantity <= Decimal::ZERO {
            return Err(BotError::Invariant(format!(
                "open quantity {} is below the lot step {}",
                closed.quantity, self.lot_step
            )));
        }

        let fill = exchange
            .place_market_order(&next.symbol, Side::Sell, quantity)
            .await
            .map_err(|e| BotError::OrderExecution(format!("exit order failed: {}", e)))?;

        let pnl = closed.unrealized_pnl(fill.price);
        let mut stats = self.record.stats.clone();
        stats.record_close(pnl);
        let revision = self.commit(next, stats).await?;

        Ok(Transition::Closed {
            position: closed,
            exit_price: fill.price,
            reason,
            pnl,
            revision,
        })
    }

    async fn commit(&mut self, position: Position, stats: TradeStats) -> Result<u64, BotError> {
        position.validate()?;
        let next = self.record.successor(position, stats);
        self.store.save(&next).await?;
        self.record = next;
        Ok(self.record.revision)
    }
}
