//! In-memory venue, account and feed
//!
//! Fills market orders at the current quote, executes attached stops and
//! targets when `mark` moves the quote through them and keeps a per-position
//! deal history. Used by the paper driver and the test suite.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use super::{
    Account, Deal, DealEntry, FillAck, IndicatorSnapshot, LivePosition, MarketFeed, OrderRequest,
    SymbolSpec, Venue,
};
use crate::error::{FeedError, VenueError};
use crate::{Candle, Money, PositionId, Quote, Side};

/// Simulated order venue
#[derive(Debug)]
pub struct PaperVenue {
    spec: SymbolSpec,
    quote: Option<Quote>,
    positions: BTreeMap<PositionId, LivePosition>,
    deals: HashMap<PositionId, Vec<Deal>>,
    next_id: PositionId,
    commission_per_lot: f64,
    reject_orders: Option<String>,
    reject_modifications: bool,
    rejected_modifications: usize,
    realized: Money,
}

impl PaperVenue {
    pub fn new(spec: SymbolSpec) -> Self {
        Self {
            spec,
            quote: None,
            positions: BTreeMap::new(),
            deals: HashMap::new(),
            next_id: 1,
            commission_per_lot: 0.0,
            reject_orders: None,
            reject_modifications: false,
            rejected_modifications: 0,
            realized: Money::ZERO,
        }
    }

    /// Charge a commission per lot on every deal
    pub fn with_commission_per_lot(mut self, commission: f64) -> Self {
        self.commission_per_lot = commission;
        self
    }

    /// Reject every order until cleared with `None`
    pub fn set_reject_orders(&mut self, reason: Option<String>) {
        self.reject_orders = reason;
    }

    pub fn set_reject_modifications(&mut self, reject: bool) {
        self.reject_modifications = reject;
    }

    pub fn set_quote(&mut self, quote: Quote) {
        self.quote = Some(quote);
    }

    pub fn quote(&self) -> Option<Quote> {
        self.quote
    }

    /// Update the quote and execute any stop or target it crosses.
    /// Returns the ids closed by this mark.
    pub fn mark(&mut self, quote: Quote) -> Vec<PositionId> {
        self.quote = Some(quote);

        let triggered: Vec<(PositionId, f64)> = self
            .positions
            .values()
            .filter_map(|p| {
                let px = quote.exit_price(p.side);
                let stop_hit = p.stop > 0.0
                    && match p.side {
                        Side::Long => px <= p.stop,
                        Side::Short => px >= p.stop,
                    };
                let target_hit = p.target > 0.0
                    && match p.side {
                        Side::Long => px >= p.target,
                        Side::Short => px <= p.target,
                    };
                if stop_hit {
                    Some((p.position_id, p.stop))
                } else if target_hit {
                    Some((p.position_id, p.target))
                } else {
                    None
                }
            })
            .collect();

        let mut closed = Vec::with_capacity(triggered.len());
        for (id, price) in triggered {
            if self.close_position(id, price, quote.time).is_ok() {
                closed.push(id);
            }
        }
        closed
    }

    /// Close the whole position at `price`
    pub fn close_position(
        &mut self,
        id: PositionId,
        price: f64,
        time: DateTime<Utc>,
    ) -> Result<(), VenueError> {
        let volume = self
            .positions
            .get(&id)
            .map(|p| p.volume)
            .ok_or(VenueError::UnknownPosition(id))?;
        self.close_partial(id, volume, price, time)
    }

    /// Reduce the position by `volume` at `price`; removes it when flat
    pub fn close_partial(
        &mut self,
        id: PositionId,
        volume: f64,
        price: f64,
        time: DateTime<Utc>,
    ) -> Result<(), VenueError> {
        let value_per_unit = self.spec.value_per_price_unit();
        let held = self
            .positions
            .get(&id)
            .map(|p| p.volume)
            .ok_or(VenueError::UnknownPosition(id))?;
        let volume = volume.min(held);
        let commission = self.commission(volume);

        let position = self
            .positions
            .get_mut(&id)
            .ok_or(VenueError::UnknownPosition(id))?;
        let profit = Money::from_f64(
            (price - position.entry_price) * position.side.sign() * volume * value_per_unit,
        )
        .round_dp(2);

        self.deals.entry(id).or_default().push(Deal {
            position_id: id,
            entry: DealEntry::Out,
            price,
            volume,
            time,
            profit,
            commission,
            swap: Money::ZERO,
        });
        self.realized += profit + commission;

        position.volume -= volume;
        if position.volume <= f64::EPSILON {
            self.positions.remove(&id);
            info!(position_id = id, price, %profit, "Paper position closed");
        } else {
            debug!(position_id = id, volume, price, "Paper position reduced");
        }
        Ok(())
    }

    /// Place a position the engine did not open (restart adoption)
    pub fn inject_position(&mut self, position: LivePosition) {
        self.next_id = self.next_id.max(position.position_id + 1);
        self.positions.insert(position.position_id, position);
    }

    /// Drop the recorded deals of a position (history gap)
    pub fn forget_history(&mut self, id: PositionId) {
        self.deals.remove(&id);
    }

    /// Net realized profit including commissions
    pub fn realized_profit(&self) -> Money {
        self.realized
    }

    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    /// Stop modifications refused so far, for any reason
    pub fn rejected_modifications(&self) -> usize {
        self.rejected_modifications
    }

    pub fn position(&self, id: PositionId) -> Option<&LivePosition> {
        self.positions.get(&id)
    }

    fn commission(&self, volume: f64) -> Money {
        Money::from_f64(-self.commission_per_lot * volume).round_dp(2)
    }
}

impl Venue for PaperVenue {
    fn submit_market_order(&mut self, request: &OrderRequest) -> Result<FillAck, VenueError> {
        if let Some(reason) = &self.reject_orders {
            return Err(VenueError::Rejected(reason.clone()));
        }
        let quote = self
            .quote
            .ok_or_else(|| VenueError::Rejected("no quote".to_string()))?;
        if request.volume <= 0.0 {
            return Err(VenueError::Rejected(format!(
                "invalid volume {}",
                request.volume
            )));
        }

        let id = self.next_id;
        self.next_id += 1;
        let entry_price = quote.entry_price(request.side);

        let position = LivePosition {
            position_id: id,
            side: request.side,
            volume: request.volume,
            entry_price,
            stop: request.stop,
            target: request.target,
            open_time: quote.time,
        };
        self.positions.insert(id, position);

        let commission = self.commission(request.volume);
        self.realized += commission;
        self.deals.entry(id).or_default().push(Deal {
            position_id: id,
            entry: DealEntry::In,
            price: entry_price,
            volume: request.volume,
            time: quote.time,
            profit: Money::ZERO,
            commission,
            swap: Money::ZERO,
        });

        Ok(FillAck {
            position_id: id,
            side: request.side,
            volume: request.volume,
            entry_price,
            stop: request.stop,
            target: request.target,
            time: quote.time,
        })
    }

    fn modify_stop(&mut self, id: PositionId, stop: f64, target: f64) -> Result<(), VenueError> {
        let result = if self.reject_modifications {
            Err(VenueError::ModifyRejected {
                id,
                reason: "modifications disabled".to_string(),
            })
        } else {
            match self.positions.get_mut(&id) {
                Some(position) => {
                    position.stop = stop;
                    position.target = target;
                    Ok(())
                }
                None => Err(VenueError::UnknownPosition(id)),
            }
        };
        if result.is_err() {
            self.rejected_modifications += 1;
        }
        result
    }

    fn is_open(&self, id: PositionId) -> bool {
        self.positions.contains_key(&id)
    }

    fn history(&self, id: PositionId) -> Result<Vec<Deal>, VenueError> {
        Ok(self.deals.get(&id).cloned().unwrap_or_default())
    }

    fn open_positions(&self) -> Result<Vec<LivePosition>, VenueError> {
        Ok(self.positions.values().cloned().collect())
    }
}

/// Scripted market data: bars, quote and indicators set by the caller
#[derive(Debug, Clone, Default)]
pub struct PaperFeed {
    bars: Vec<Candle>,
    quote: Option<Quote>,
    indicators: Option<IndicatorSnapshot>,
}

impl PaperFeed {
    pub fn new(bars: Vec<Candle>) -> Self {
        Self {
            bars,
            ..Default::default()
        }
    }

    pub fn push_bar(&mut self, bar: Candle) {
        self.bars.push(bar);
    }

    pub fn set_quote(&mut self, quote: Quote) {
        self.quote = Some(quote);
    }

    pub fn set_indicators(&mut self, snapshot: IndicatorSnapshot) {
        self.indicators = Some(snapshot);
    }
}

impl MarketFeed for PaperFeed {
    fn bars(&self, count: usize, offset: usize) -> Result<Vec<Candle>, FeedError> {
        let needed = count + offset;
        if self.bars.len() < needed {
            return Err(FeedError::InsufficientHistory {
                needed,
                available: self.bars.len(),
            });
        }
        let end = self.bars.len() - offset;
        Ok(self.bars[end - count..end].to_vec())
    }

    fn quote(&self) -> Result<Quote, FeedError> {
        self.quote.ok_or(FeedError::NoQuote)
    }

    fn indicators(&self) -> Result<IndicatorSnapshot, FeedError> {
        self.indicators
            .ok_or(FeedError::IndicatorUnavailable("snapshot"))
    }
}

/// Simulated account
#[derive(Debug, Clone)]
pub struct PaperAccount {
    pub balance: f64,
    pub free_margin: f64,
    pub currency: String,
    pub spec: SymbolSpec,
    pub rates: HashMap<String, f64>,
}

impl PaperAccount {
    pub fn new(balance: f64, currency: impl Into<String>, spec: SymbolSpec) -> Self {
        Self {
            balance,
            free_margin: balance,
            currency: currency.into(),
            spec,
            rates: HashMap::new(),
        }
    }

    pub fn with_rate(mut self, pair: impl Into<String>, price: f64) -> Self {
        self.rates.insert(pair.into(), price);
        self
    }

    /// Move balance and free margin by a realized amount
    pub fn apply_realized(&mut self, amount: f64) {
        self.balance += amount;
        self.free_margin += amount;
    }
}

impl Account for PaperAccount {
    fn balance(&self) -> f64 {
        self.balance
    }

    fn free_margin(&self) -> f64 {
        self.free_margin
    }

    fn currency(&self) -> &str {
        &self.currency
    }

    fn symbol_spec(&self) -> &SymbolSpec {
        &self.spec
    }

    fn pair_price(&self, pair: &str) -> Option<f64> {
        self.rates.get(pair).copied()
    }
}
