//! Collaborator interfaces
//!
//! The engine never talks to a real broker directly. A host supplies bars,
//! indicator snapshots and quotes (`MarketFeed`), account and symbol facts
//! (`Account`) and order execution (`Venue`). `paper` provides in-memory
//! implementations for dry runs and tests.

pub mod paper;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SymbolConfig;
use crate::error::{FeedError, VenueError};
use crate::{Candle, Money, PositionId, Quote, Side};

pub use paper::{PaperAccount, PaperFeed, PaperVenue};

/// Two most recent values of an indicator buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPair {
    pub current: f64,
    pub previous: f64,
}

impl IndicatorPair {
    pub fn new(current: f64, previous: f64) -> Self {
        Self { current, previous }
    }

    /// Same value for both slots
    pub fn flat(value: f64) -> Self {
        Self::new(value, value)
    }
}

/// Indicator values for the most recently closed bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub atr: IndicatorPair,
    pub ma: IndicatorPair,
    pub adx: IndicatorPair,
    pub plus_di: IndicatorPair,
    pub minus_di: IndicatorPair,
    pub rsi: IndicatorPair,
    /// Higher-timeframe moving average, when the host computes one
    pub htf_ma: Option<IndicatorPair>,
}

/// Market data source
pub trait MarketFeed {
    /// Closed bars, oldest first. `offset` skips that many of the most recent
    /// bars; offset 0 ends at the most recently closed bar.
    fn bars(&self, count: usize, offset: usize) -> Result<Vec<Candle>, FeedError>;

    fn quote(&self) -> Result<Quote, FeedError>;

    fn indicators(&self) -> Result<IndicatorSnapshot, FeedError>;
}

/// Contract economics of the traded instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSpec {
    pub name: String,
    pub point: f64,
    pub digits: u32,
    pub tick_size: f64,
    pub tick_value: f64,
    pub contract_size: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    pub stops_level: u32,
    pub base_currency: String,
    pub profit_currency: String,
    pub margin_currency: String,
}

impl SymbolSpec {
    /// Pip size: ten points on 3/5-digit quotes, one point otherwise
    pub fn pip_size(&self) -> f64 {
        if self.digits == 3 || self.digits == 5 {
            self.point * 10.0
        } else {
            self.point
        }
    }

    /// Minimum stop/target distance from the current price
    pub fn min_stop_distance(&self) -> f64 {
        self.stops_level as f64 * self.point
    }

    /// Profit per 1.0 price move per lot, in the profit currency
    pub fn value_per_price_unit(&self) -> f64 {
        if self.tick_size > 0.0 {
            self.tick_value / self.tick_size
        } else {
            0.0
        }
    }

    pub fn normalize_price(&self, price: f64) -> f64 {
        let factor = 10f64.powi(self.digits as i32);
        (price * factor).round() / factor
    }
}

impl From<&SymbolConfig> for SymbolSpec {
    fn from(cfg: &SymbolConfig) -> Self {
        SymbolSpec {
            name: cfg.name.clone(),
            point: cfg.point,
            digits: cfg.digits,
            tick_size: cfg.tick_size,
            tick_value: cfg.tick_value,
            contract_size: cfg.contract_size,
            volume_min: cfg.volume_min,
            volume_max: cfg.volume_max,
            volume_step: cfg.volume_step,
            stops_level: cfg.stops_level,
            base_currency: cfg.base_currency.clone(),
            profit_currency: cfg.profit_currency.clone(),
            margin_currency: cfg.margin_currency.clone(),
        }
    }
}

/// Account figures and conversion quotes
pub trait Account {
    fn balance(&self) -> f64;

    fn free_margin(&self) -> f64;

    fn currency(&self) -> &str;

    fn symbol_spec(&self) -> &SymbolSpec;

    /// Price of a currency pair such as "EURUSD", if quoted
    fn pair_price(&self, pair: &str) -> Option<f64>;
}

/// Market order with attached protective levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub side: Side,
    pub volume: f64,
    pub stop: f64,
    pub target: f64,
    pub comment: String,
}

/// Acknowledged fill of a market order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillAck {
    pub position_id: PositionId,
    pub side: Side,
    pub volume: f64,
    pub entry_price: f64,
    pub stop: f64,
    pub target: f64,
    pub time: DateTime<Utc>,
}

/// Whether a deal opened or reduced a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealEntry {
    In,
    Out,
}

/// One execution in a position's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub position_id: PositionId,
    pub entry: DealEntry,
    pub price: f64,
    pub volume: f64,
    pub time: DateTime<Utc>,
    pub profit: Money,
    pub commission: Money,
    pub swap: Money,
}

/// A position currently open at the venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePosition {
    pub position_id: PositionId,
    pub side: Side,
    pub volume: f64,
    pub entry_price: f64,
    pub stop: f64,
    pub target: f64,
    pub open_time: DateTime<Utc>,
}

/// Order execution venue
pub trait Venue {
    fn submit_market_order(&mut self, request: &OrderRequest) -> Result<FillAck, VenueError>;

    fn modify_stop(&mut self, id: PositionId, stop: f64, target: f64) -> Result<(), VenueError>;

    fn is_open(&self, id: PositionId) -> bool;

    /// All deals belonging to a position, in execution order
    fn history(&self, id: PositionId) -> Result<Vec<Deal>, VenueError>;

    fn open_positions(&self) -> Result<Vec<LivePosition>, VenueError>;
}
