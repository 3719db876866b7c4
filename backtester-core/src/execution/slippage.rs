//! Slippage: the difference between the reference and executed price.
//!
//! Rates are percentages sampled uniformly from `[min, max]`. Slippage is
//! directional: buyers pay more, sellers receive less.

use crate::event::Direction;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformSlippage {
    pub min_percent: f64,
    pub max_percent: f64,
}

impl UniformSlippage {
    pub fn new(min_percent: f64, max_percent: f64) -> Self {
        Self { min_percent, max_percent }
    }

    /// Draw a slippage percentage. Equal bounds return the bound without
    /// touching the RNG.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.max_percent <= self.min_percent {
            return self.min_percent;
        }
        rng.gen_range(self.min_percent..=self.max_percent)
    }
}

/// Apply `percent` slippage to `price` against the trader.
pub fn apply_slippage(price: f64, direction: Direction, percent: f64) -> f64 {
    let fraction = percent / 100.0;
    match direction {
        Direction::Buy => price * (1.0 + fraction),
        Direction::Sell => price * (1.0 - fraction),
        _ => price,
    }
}

/// Signed slippage of `executed` relative to `reference`, in percent.
pub fn slippage_percent(reference: f64, executed: f64) -> f64 {
    if reference <= 0.0 {
        return 0.0;
    }
    (executed - reference).abs() / reference * 100.0
}
