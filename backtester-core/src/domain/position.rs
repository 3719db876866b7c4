use serde::{Deserialize, Serialize};

/// Amounts closer to zero than this are treated as flat.
pub const AMOUNT_EPSILON: f64 = 1e-12;

/// Open exposure for one pair.
///
/// `amount` is signed: positive = long, negative = short, zero = flat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub amount: f64,
    pub avg_entry_price: f64,
    pub realized_pnl: f64,
}

/// Effect of applying one fill to a position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionChange {
    /// Portion of the previous exposure that was closed, in `[0, 1]`.
    pub closed_fraction: f64,
    /// PnL realised by the closing portion.
    pub realized_pnl: f64,
}

impl Position {
    pub fn is_invested(&self) -> bool {
        self.amount.abs() > AMOUNT_EPSILON
    }

    pub fn is_long(&self) -> bool {
        self.amount > AMOUNT_EPSILON
    }

    pub fn is_short(&self) -> bool {
        self.amount < -AMOUNT_EPSILON
    }

    pub fn market_value(&self, current_price: f64) -> f64 {
        self.amount * current_price
    }

    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        self.amount * (current_price - self.avg_entry_price)
    }

    /// Apply a signed fill amount at `price`.
    ///
    /// Increasing exposure recomputes the size-weighted average entry price.
    /// Reducing exposure leaves it unchanged. Crossing through zero opens the
    /// remainder at `price`.
    pub fn apply(&mut self, signed_amount: f64, price: f64) -> PositionChange {
        let previous = self.amount;
        let increasing = !self.is_invested() || previous.signum() == signed_amount.signum();

        if increasing {
            let new_amount = previous + signed_amount;
            if new_amount.abs() > AMOUNT_EPSILON {
                self.avg_entry_price = (previous.abs() * self.avg_entry_price
                    + signed_amount.abs() * price)
                    / new_amount.abs();
            }
            self.amount = new_amount;
            return PositionChange { closed_fraction: 0.0, realized_pnl: 0.0 };
        }

        let closing = signed_amount.abs().min(previous.abs());
        let realized = closing * (price - self.avg_entry_price) * previous.signum();
        self.realized_pnl += realized;
        self.amount = previous + signed_amount;

        if !self.is_invested() {
            self.amount = 0.0;
            self.avg_entry_price = 0.0;
        } else if self.amount.signum() != previous.signum() {
            // Flipped: the remainder is a fresh position at the fill price.
            self.avg_entry_price = price;
        }

        PositionChange {
            closed_fraction: closing / previous.abs(),
            realized_pnl: realized,
        }
    }
}
