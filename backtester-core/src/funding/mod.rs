//! Funding: balance pools owned by one run's portfolio.

pub mod item;
pub mod ledger;

pub use item::{FundingItem, FundingKey, FUNDS_EPSILON};
pub use ledger::{FundingLedger, PairFunds};

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FundingError {
    #[error("funding item {0} not found")]
    NotFound(String),

    #[error("insufficient funds in {key}: need {needed}, have {available}")]
    InsufficientFunds { key: String, needed: f64, available: f64 },

    #[error("amount must be positive, got {0}")]
    NegativeAmount(f64),

    #[error("transfers require exchange level funding")]
    ExchangeLevelFundingDisabled,

    #[error("cannot transfer {from} into {to}")]
    CurrencyMismatch { from: String, to: String },

    #[error("transfer source and destination are both on {0}")]
    SameExchange(String),

    #[error("initial funds must be non-negative, got {0}")]
    InvalidInitialFunds(f64),

    #[error("duplicate funding item {0}")]
    Duplicate(String),
}
