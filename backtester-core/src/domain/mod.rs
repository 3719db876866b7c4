//! Domain types shared by every stage of the pipeline.

pub mod candle;
pub mod ids;
pub mod pair;
pub mod position;

pub use candle::{Candle, TimedCandle};
pub use ids::{ConfigFingerprint, RunId};
pub use pair::{AssetClass, CurrencyPair, PairError, PairKey};
pub use position::{Position, PositionChange, AMOUNT_EPSILON};
