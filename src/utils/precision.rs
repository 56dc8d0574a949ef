// src/utils/precision.rs
use rust_decimal::{Decimal, RoundingStrategy};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Rounds a quantity DOWN to the nearest multiple of `step_size`.
/// amount=10.999, step=1.0 -> 10.0
pub fn normalize_quantity(amount: Decimal, step_size: Decimal) -> Decimal {
    if step_size.is_zero() {
        return amount;
    }
    ((amount / step_size).floor() * step_size).normalize()
}

/// Rounds a price to the NEAREST multiple of `tick_size`, halves away from zero.
/// price=100.16, tick=0.1 -> 100.2
pub fn normalize_price(price: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size.is_zero() {
        return price;
    }
    let ticks = (price / tick_size).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    (ticks * tick_size).normalize()
}

/// `value` moved by `pct` percent (negative moves down).
pub fn shift_by_pct(value: Decimal, pct: Decimal) -> Decimal {
    value * (Decimal::ONE + pct / HUNDRED)
}

/// Percentage change from `from` to `to`; zero when `from` is zero.
pub fn pct_change(from: Decimal, to: Decimal) -> Decimal {
    if from.is_zero() {
        return Decimal::ZERO;
    }
    (to - from) / from * HUNDRED
}
