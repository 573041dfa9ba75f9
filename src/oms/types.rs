//! Position lifecycle types
//!
//! A `PositionRecord` is created on fill acknowledgement and finalized
//! exactly once with `CloseFacts`. Close facts are set together, so a
//! record is either fully open or fully closed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::exchange::{FillAck, LivePosition};
use crate::risk::DynamicParams;
use crate::{MarketRegime, Money, PositionId, Side};

/// Lifecycle state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    /// Filled, protective levels at their initial values
    Open,
    /// Stop has been trailed at least once
    Trailing,
    Closed,
}

/// Realized outcome of a closed position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseFacts {
    pub time: DateTime<Utc>,
    /// Volume-weighted exit price
    pub price: f64,
    /// Profit + commission + swap over every deal of the position
    pub profit: Money,
    /// Volume-weighted pip distance of the exit deals, signed by outcome
    pub pips: f64,
    pub stop_hit: bool,
    pub target_hit: bool,
    /// No exit history was found; profit is a placeholder
    pub needs_attention: bool,
}

/// Everything known about one position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub id: PositionId,
    pub side: Side,
    pub open_time: DateTime<Utc>,
    pub entry_price: f64,
    pub initial_stop: f64,
    pub initial_target: f64,
    pub volume: f64,

    /// Snapshot at open
    pub regime: MarketRegime,
    pub risk_percent: f64,
    pub tier: u8,

    /// Stop currently at the venue
    pub last_stop: f64,
    pub trailing_applied: bool,
    /// Found live at startup rather than opened by this process
    pub adopted: bool,

    pub close: Option<CloseFacts>,
}

impl PositionRecord {
    /// Record for a position the engine just opened
    pub fn from_fill(ack: &FillAck, regime: MarketRegime, params: &DynamicParams) -> Self {
        Self {
            id: ack.position_id,
            side: ack.side,
            open_time: ack.time,
            entry_price: ack.entry_price,
            initial_stop: ack.stop,
            initial_target: ack.target,
            volume: ack.volume,
            regime,
            risk_percent: params.risk_percent,
            tier: params.tier,
            last_stop: ack.stop,
            trailing_applied: false,
            adopted: false,
            close: None,
        }
    }

    /// Record for a live position discovered at startup
    pub fn adopt(live: &LivePosition, regime: MarketRegime, risk_percent: f64, tier: u8) -> Self {
        Self {
            id: live.position_id,
            side: live.side,
            open_time: live.open_time,
            entry_price: live.entry_price,
            initial_stop: live.stop,
            initial_target: live.target,
            volume: live.volume,
            regime,
            risk_percent,
            tier,
            last_stop: live.stop,
            trailing_applied: false,
            adopted: true,
            close: None,
        }
    }

    pub fn state(&self) -> PositionState {
        if self.close.is_some() {
            PositionState::Closed
        } else if self.trailing_applied {
            PositionState::Trailing
        } else {
            PositionState::Open
        }
    }

    pub fn is_open(&self) -> bool {
        self.close.is_none()
    }

    /// Distance between entry and the initial stop
    pub fn initial_risk(&self) -> f64 {
        (self.entry_price - self.initial_stop).abs()
    }

    /// Price move in the position's favour, negative when against it
    pub fn favourable_excursion(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.side.sign()
    }

    /// Realized profit, zero while open
    pub fn profit(&self) -> Money {
        self.close.as_ref().map(|c| c.profit).unwrap_or(Money::ZERO)
    }

    pub fn close_time(&self) -> Option<DateTime<Utc>> {
        self.close.as_ref().map(|c| c.time)
    }

    /// Finalize the record. Returns false, leaving it untouched, when it
    /// was already closed.
    pub fn finalize(&mut self, facts: CloseFacts) -> bool {
        if self.close.is_some() {
            return false;
        }
        self.close = Some(facts);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record() -> PositionRecord {
        let ack = FillAck {
            position_id: 7,
            side: Side::Short,
            volume: 1.0,
            entry_price: 1.1000,
            stop: 1.1050,
            target: 1.0900,
            time: Utc::now(),
        };
        let params = DynamicParams {
            risk_percent: 0.5,
            adx_threshold: 30.0,
            rsi_oversold: 35.0,
            rsi_overbought: 65.0,
            tier: 1,
        };
        PositionRecord::from_fill(&ack, MarketRegime::default(), &params)
    }

    fn facts(profit: Money) -> CloseFacts {
        CloseFacts {
            time: Utc::now(),
            price: 1.0900,
            profit,
            pips: 100.0,
            stop_hit: false,
            target_hit: true,
            needs_attention: false,
        }
    }

    #[test]
    fn test_record_from_fill() {
        let r = record();
        assert_eq!(r.state(), PositionState::Open);
        assert_eq!(r.last_stop, 1.1050);
        assert_eq!(r.tier, 1);
        assert!((r.initial_risk() - 0.0050).abs() < 1e-12);
        assert!(r.favourable_excursion(1.0950) > 0.0);
        assert_eq!(r.profit(), Money::ZERO);
    }

    #[test]
    fn test_finalize_once() {
        let mut r = record();
        assert!(r.finalize(facts(Money::from_decimal(dec!(100.00)))));
        assert_eq!(r.state(), PositionState::Closed);

        assert!(!r.finalize(facts(Money::from_decimal(dec!(-5.00)))));
        assert_eq!(r.profit(), Money::from_decimal(dec!(100.00)));
    }
}
