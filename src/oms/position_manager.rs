//! Position lifecycle management
//!
//! Owns the position records and the set of ids awaiting a close. Drives
//! entries, stop trailing, closure detection and restart adoption against
//! a `Venue`.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use super::reconcile::reconcile;
use super::types::PositionRecord;
use crate::config::RiskConfig;
use crate::error::VenueError;
use crate::exchange::{OrderRequest, SymbolSpec, Venue};
use crate::risk::DynamicParams;
use crate::strategy::Setup;
use crate::{MarketRegime, PositionId, Quote, Side};

/// Prices for a market entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryPlan {
    pub side: Side,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
}

impl EntryPlan {
    /// Stop beyond the trapped zone by `atr * stop_loss_atr_multiplier`, target
    /// at `reward_ratio` times the stop distance; both at least the venue's
    /// minimum distance from entry
    pub fn build(
        setup: &Setup,
        quote: &Quote,
        atr: f64,
        spec: &SymbolSpec,
        risk: &RiskConfig,
    ) -> Self {
        let side = setup.side;
        let sign = side.sign();
        let entry = quote.entry_price(side);
        let min_distance = spec.min_stop_distance();

        let mut stop = setup.zone_level - sign * atr * risk.stop_loss_atr_multiplier;
        if (entry - stop) * sign < min_distance {
            stop = entry - sign * min_distance;
        }

        let stop_distance = (entry - stop).abs();
        let mut target = entry + sign * stop_distance * risk.reward_ratio;
        if (target - entry) * sign < min_distance {
            target = entry + sign * min_distance;
        }

        Self {
            side,
            entry,
            stop: spec.normalize_price(stop),
            target: spec.normalize_price(target),
        }
    }
}

/// Position records plus the tracked-id set
#[derive(Debug, Default)]
pub struct PositionManager {
    records: HashMap<PositionId, PositionRecord>,
    tracked: HashSet<PositionId>,
}

impl PositionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted records; open ones are tracked again
    pub fn restore(records: impl IntoIterator<Item = PositionRecord>) -> Self {
        let mut manager = Self::new();
        for record in records {
            if record.is_open() {
                manager.tracked.insert(record.id);
            }
            manager.records.insert(record.id, record);
        }
        manager
    }

    pub fn get(&self, id: PositionId) -> Option<&PositionRecord> {
        self.records.get(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &PositionRecord> {
        self.records.values()
    }

    pub fn is_tracked(&self, id: PositionId) -> bool {
        self.tracked.contains(&id)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Records not yet closed
    pub fn open_count(&self) -> usize {
        self.records.values().filter(|r| r.is_open()).count()
    }

    /// Closed records, most recently closed first
    pub fn recent_closed(&self, limit: usize) -> Vec<&PositionRecord> {
        let mut closed: Vec<&PositionRecord> =
            self.records.values().filter(|r| !r.is_open()).collect();
        closed.sort_by(|a, b| b.close_time().cmp(&a.close_time()).then(b.id.cmp(&a.id)));
        closed.truncate(limit);
        closed
    }

    fn sorted_tracked(&self) -> Vec<PositionId> {
        let mut ids: Vec<PositionId> = self.tracked.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    // =========================================================================
    // Open
    // =========================================================================

    /// Submit the entry and record the fill. On rejection nothing changes.
    pub fn open_position(
        &mut self,
        venue: &mut dyn Venue,
        plan: &EntryPlan,
        volume: f64,
        regime: MarketRegime,
        params: &DynamicParams,
    ) -> Result<PositionId, VenueError> {
        let request = OrderRequest {
            side: plan.side,
            volume,
            stop: plan.stop,
            target: plan.target,
            comment: format!("liquidity-trap {} t{}", regime, params.tier),
        };

        let ack = venue.submit_market_order(&request).map_err(|e| {
            warn!(side = %plan.side, volume, error = %e, "Entry rejected by venue");
            e
        })?;

        let record = PositionRecord::from_fill(&ack, regime, params);
        info!(
            position_id = ack.position_id,
            side = %ack.side,
            volume = ack.volume,
            entry = ack.entry_price,
            stop = ack.stop,
            target = ack.target,
            regime = %regime,
            risk_percent = params.risk_percent,
            tier = params.tier,
            "Position opened"
        );

        self.tracked.insert(record.id);
        self.records.insert(record.id, record);
        Ok(ack.position_id)
    }

    // =========================================================================
    // Trailing
    // =========================================================================

    /// Trail the stop of every tracked position whose favourable excursion
    /// reached `trail_start` times its initial risk. Returns ids modified.
    pub fn apply_trailing(
        &mut self,
        venue: &mut dyn Venue,
        quote: &Quote,
        atr: f64,
        spec: &SymbolSpec,
        risk: &RiskConfig,
    ) -> Vec<PositionId> {
        let mut modified = Vec::new();
        if !risk.trailing_enabled || atr <= 0.0 {
            return modified;
        }

        let min_distance = spec.min_stop_distance();

        for id in self.sorted_tracked() {
            let Some(record) = self.records.get_mut(&id) else {
                continue;
            };
            if !record.is_open() {
                continue;
            }

            let sign = record.side.sign();
            let price = quote.exit_price(record.side);
            let initial_risk = record.initial_risk();
            if initial_risk <= 0.0
                || record.favourable_excursion(price) < initial_risk * risk.trail_start
            {
                continue;
            }

            let proposed = spec.normalize_price(price - sign * atr * risk.trail_step_atr);
            let tightens = record.last_stop <= 0.0 || (proposed - record.last_stop) * sign > 0.0;
            let clear_of_price = (price - proposed) * sign >= min_distance;
            if !tightens || !clear_of_price {
                continue;
            }

            match venue.modify_stop(id, proposed, record.initial_target) {
                Ok(()) => {
                    debug!(
                        position_id = id,
                        from = record.last_stop,
                        to = proposed,
                        "Stop trailed"
                    );
                    record.last_stop = proposed;
                    record.trailing_applied = true;
                    modified.push(id);
                }
                Err(e) => {
                    warn!(position_id = id, error = %e, "Trailing stop modification rejected");
                }
            }
        }

        modified
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Finalize every tracked position the venue no longer holds. Returns
    /// the closed records in id order. `quote` prices positions that have
    /// no exit history.
    pub fn detect_closures(
        &mut self,
        venue: &dyn Venue,
        spec: &SymbolSpec,
        quote: &Quote,
    ) -> Vec<PositionRecord> {
        let mut closed = Vec::new();

        for id in self.sorted_tracked() {
            if venue.is_open(id) {
                continue;
            }

            let Some(record) = self.records.get_mut(&id) else {
                warn!(position_id = id, "Tracked position has no record");
                self.tracked.remove(&id);
                continue;
            };

            let deals = venue.history(id).unwrap_or_else(|e| {
                warn!(position_id = id, error = %e, "Deal history unavailable");
                Vec::new()
            });

            let last_price = quote.exit_price(record.side);
            let facts = reconcile(record, &deals, spec, last_price, quote.time);
            if facts.needs_attention {
                warn!(
                    position_id = id,
                    price = facts.price,
                    "Closed position has no exit history, recorded with zero profit"
                );
            }

            if record.finalize(facts) {
                info!(
                    position_id = id,
                    profit = %record.profit(),
                    stop_hit = record.close.as_ref().map(|c| c.stop_hit).unwrap_or(false),
                    target_hit = record.close.as_ref().map(|c| c.target_hit).unwrap_or(false),
                    "Position closed"
                );
                closed.push(record.clone());
            }
            self.tracked.remove(&id);
        }

        closed
    }

    // =========================================================================
    // Restart and drift
    // =========================================================================

    /// Create records for live positions this manager has never seen.
    /// Returns the number adopted.
    pub fn adopt_existing(
        &mut self,
        venue: &dyn Venue,
        regime: MarketRegime,
        risk_percent: f64,
        tier: u8,
    ) -> Result<usize, VenueError> {
        let mut adopted = 0;
        for live in venue.open_positions()? {
            if let Some(existing) = self.records.get(&live.position_id) {
                if existing.is_open() {
                    self.tracked.insert(live.position_id);
                }
                continue;
            }
            info!(
                position_id = live.position_id,
                side = %live.side,
                volume = live.volume,
                "Adopting live position"
            );
            let record = PositionRecord::adopt(&live, regime, risk_percent, tier);
            self.tracked.insert(record.id);
            self.records.insert(record.id, record);
            adopted += 1;
        }
        Ok(adopted)
    }

    /// Rebuild the tracked set from open records when the two disagree.
    /// Returns true when drift was corrected.
    pub fn reconcile_tracking(&mut self) -> bool {
        let open: HashSet<PositionId> = self
            .records
            .values()
            .filter(|r| r.is_open())
            .map(|r| r.id)
            .collect();

        if open == self.tracked {
            return false;
        }

        warn!(
            tracked = self.tracked.len(),
            open_records = open.len(),
            "Tracked positions drifted from records, rebuilding"
        );
        self.tracked = open;
        true
    }

    /// Drop an id from the tracked set without closing its record
    pub fn untrack(&mut self, id: PositionId) -> bool {
        self.tracked.remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SymbolConfig;
    use crate::exchange::{LivePosition, PaperVenue};
    use chrono::Utc;

    fn spec() -> SymbolSpec {
        SymbolSpec::from(&SymbolConfig::default())
    }

    fn quote(bid: f64) -> Quote {
        Quote {
            bid,
            ask: bid + 0.0002,
            time: Utc::now(),
        }
    }

    fn params() -> DynamicParams {
        DynamicParams {
            risk_percent: 1.0,
            adx_threshold: 25.0,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            tier: 0,
        }
    }

    fn venue_at(bid: f64) -> PaperVenue {
        let mut v = PaperVenue::new(spec());
        v.set_quote(quote(bid));
        v
    }

    fn short_plan(q: &Quote) -> EntryPlan {
        let setup = Setup {
            side: Side::Short,
            zone_level: 1.1050,
        };
        EntryPlan::build(&setup, q, 0.0010, &spec(), &RiskConfig::default())
    }

    #[test]
    fn test_entry_plan_short() {
        let q = quote(1.1040);
        let plan = short_plan(&q);
        assert_eq!(plan.entry, 1.1040);
        // zone + 0.5 ATR
        assert!((plan.stop - 1.1055).abs() < 1e-9);
        // 15 pips of risk, 2R
        assert!((plan.target - 1.1010).abs() < 1e-9);
    }

    #[test]
    fn test_entry_plan_respects_min_distance() {
        let mut s = spec();
        s.stops_level = 500;
        let setup = Setup {
            side: Side::Long,
            zone_level: 1.1000,
        };
        let q = quote(1.1000);
        let plan = EntryPlan::build(&setup, &q, 0.0001, &s, &RiskConfig::default());
        assert!(plan.entry - plan.stop >= 0.0050 - 1e-9);
        assert!(plan.target - plan.entry >= 0.0050 - 1e-9);
    }

    #[test]
    fn test_open_tracks_record() {
        let mut venue = venue_at(1.1040);
        let mut pm = PositionManager::new();
        let plan = short_plan(&quote(1.1040));

        let id = pm
            .open_position(&mut venue, &plan, 1.0, MarketRegime::default(), &params())
            .unwrap();
        assert!(pm.is_tracked(id));
        assert_eq!(pm.open_count(), 1);
        assert_eq!(pm.get(id).unwrap().entry_price, 1.1040);
    }

    #[test]
    fn test_rejection_leaves_state() {
        let mut venue = venue_at(1.1040);
        venue.set_reject_orders(Some("no money".to_string()));
        let mut pm = PositionManager::new();
        let plan = short_plan(&quote(1.1040));

        assert!(pm
            .open_position(&mut venue, &plan, 1.0, MarketRegime::default(), &params())
            .is_err());
        assert_eq!(pm.tracked_count(), 0);
        assert_eq!(pm.records().count(), 0);
    }

    #[test]
    fn test_trailing_tightens_only() {
        let mut venue = venue_at(1.1040);
        let mut pm = PositionManager::new();
        let plan = short_plan(&quote(1.1040));
        let id = pm
            .open_position(&mut venue, &plan, 1.0, MarketRegime::default(), &params())
            .unwrap();

        // 30 pips in favour against 15 pips of initial risk
        let q = quote(1.1008);
        venue.set_quote(q);
        let modified = pm.apply_trailing(&mut venue, &q, 0.0010, &spec(), &RiskConfig::default());
        assert_eq!(modified, vec![id]);
        let r = pm.get(id).unwrap();
        assert!(r.trailing_applied);
        assert!((r.last_stop - 1.1020).abs() < 1e-9);

        // price backs off: proposal would loosen
        let q = quote(1.1015);
        let modified = pm.apply_trailing(&mut venue, &q, 0.0010, &spec(), &RiskConfig::default());
        assert!(modified.is_empty());
        assert!((pm.get(id).unwrap().last_stop - 1.1020).abs() < 1e-9);
    }

    #[test]
    fn test_trailing_rejected_by_venue() {
        let mut venue = venue_at(1.1040);
        let mut pm = PositionManager::new();
        let plan = short_plan(&quote(1.1040));
        let id = pm
            .open_position(&mut venue, &plan, 1.0, MarketRegime::default(), &params())
            .unwrap();

        venue.set_reject_modifications(true);
        let q = quote(1.1008);
        assert!(pm
            .apply_trailing(&mut venue, &q, 0.0010, &spec(), &RiskConfig::default())
            .is_empty());
        assert!(!pm.get(id).unwrap().trailing_applied);
    }

    #[test]
    fn test_closure_detected_once() {
        let mut venue = venue_at(1.1040);
        let mut pm = PositionManager::new();
        let plan = short_plan(&quote(1.1040));
        let id = pm
            .open_position(&mut venue, &plan, 1.0, MarketRegime::default(), &params())
            .unwrap();

        // through the target
        venue.mark(quote(1.1000));
        assert!(!venue.is_open(id));

        let closed = pm.detect_closures(&venue, &spec(), &quote(1.1000));
        assert_eq!(closed.len(), 1);
        let facts = closed[0].close.as_ref().unwrap();
        assert!(facts.target_hit);
        assert!(facts.profit.is_positive());
        assert!(!pm.is_tracked(id));

        assert!(pm.detect_closures(&venue, &spec(), &quote(1.1000)).is_empty());
    }

    #[test]
    fn test_adopt_and_drift() {
        let mut venue = venue_at(1.1040);
        venue.inject_position(LivePosition {
            position_id: 42,
            side: Side::Long,
            volume: 0.5,
            entry_price: 1.0990,
            stop: 1.0950,
            target: 1.1100,
            open_time: Utc::now(),
        });

        let mut pm = PositionManager::new();
        let adopted = pm
            .adopt_existing(&venue, MarketRegime::default(), 1.0, 0)
            .unwrap();
        assert_eq!(adopted, 1);
        assert!(pm.get(42).unwrap().adopted);

        // adopting again is a no-op
        assert_eq!(pm.adopt_existing(&venue, MarketRegime::default(), 1.0, 0).unwrap(), 0);

        assert!(pm.untrack(42));
        assert!(pm.reconcile_tracking());
        assert!(pm.is_tracked(42));
        assert!(!pm.reconcile_tracking());
    }
}
