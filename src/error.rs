//! Domain error types
//!
//! Recoverable conditions (`FeedError`, `VenueError`, `SizingError`) abort a
//! single cycle action and are logged by the engine. `EngineError::Init` is
//! the only fatal condition.

use thiserror::Error;

use crate::PositionId;

/// Market data could not be obtained this cycle
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("insufficient bar history: need {needed}, have {available}")]
    InsufficientHistory { needed: usize, available: usize },

    #[error("indicator {0} unavailable")]
    IndicatorUnavailable(&'static str),

    #[error("no quote available")]
    NoQuote,
}

/// Order venue refused or failed a request
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("position {0} not found")]
    UnknownPosition(PositionId),

    #[error("modify rejected for position {id}: {reason}")]
    ModifyRejected { id: PositionId, reason: String },
}

/// Position sizing could not produce a tradable volume
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SizingError {
    #[error("account balance must be positive (got {0})")]
    NonPositiveBalance(f64),

    #[error("risk amount must be positive after margin cap (got {0})")]
    NonPositiveRisk(f64),

    #[error("stop distance {distance} is at or below one price increment {point}")]
    StopTooClose { distance: f64, point: f64 },

    #[error("no conversion rate from {from} to {to}")]
    Conversion { from: String, to: String },

    #[error("invalid tick economics: size={tick_size}, value={tick_value}")]
    InvalidTickEconomics { tick_size: f64, tick_value: f64 },
}

/// Fatal engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine initialization failed: {0}")]
    Init(String),
}
