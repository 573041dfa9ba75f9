//! Closed-position reconciliation
//!
//! Rebuilds realized figures from the venue's deal history and attributes
//! the exit to the stop or the target. Attribution is a best-effort price
//! comparison; the venue does not report why a position closed.

use chrono::{DateTime, Utc};

use super::types::{CloseFacts, PositionRecord};
use crate::exchange::{Deal, DealEntry, SymbolSpec};
use crate::{Money, Side};

/// Exit attribution tolerance in pips
pub const TOLERANCE_PIPS: f64 = 2.0;
/// Exit attribution tolerance in points, used when larger than the pip figure
pub const TOLERANCE_POINTS: f64 = 3.0;

/// Price distance within which an exit counts as hitting a level
pub fn price_tolerance(spec: &SymbolSpec) -> f64 {
    (TOLERANCE_PIPS * spec.pip_size()).max(TOLERANCE_POINTS * spec.point)
}

/// Aggregated exit deals of one position
#[derive(Debug, Clone, PartialEq)]
pub struct ExitSummary {
    pub profit: Money,
    pub pips: f64,
    pub price: f64,
    pub time: DateTime<Utc>,
    pub volume: f64,
}

/// Sum every deal and volume-weight the exits. `None` without exit deals.
pub fn summarize_deals(
    record: &PositionRecord,
    deals: &[Deal],
    pip_size: f64,
) -> Option<ExitSummary> {
    let profit: Money = deals.iter().map(|d| d.profit + d.commission + d.swap).sum();

    let exits: Vec<&Deal> = deals
        .iter()
        .filter(|d| d.entry == DealEntry::Out && d.volume > 0.0)
        .collect();
    let volume: f64 = exits.iter().map(|d| d.volume).sum();
    if exits.is_empty() || volume <= 0.0 {
        return None;
    }

    let price = exits.iter().map(|d| d.price * d.volume).sum::<f64>() / volume;
    let pips = if pip_size > 0.0 {
        exits
            .iter()
            .map(|d| record.favourable_excursion(d.price) / pip_size * d.volume)
            .sum::<f64>()
            / volume
    } else {
        0.0
    };
    let time = exits.iter().map(|d| d.time).max()?;

    Some(ExitSummary {
        profit,
        pips,
        price,
        time,
        volume,
    })
}

/// Attribute an exit to (stop hit, target hit)
pub fn infer_exit(
    record: &PositionRecord,
    close_price: f64,
    profit: Money,
    tolerance: f64,
) -> (bool, bool) {
    let has_target = record.initial_target > 0.0;
    let has_stop = record.last_stop > 0.0;

    if has_target && (close_price - record.initial_target).abs() <= tolerance {
        return (false, true);
    }
    if has_stop && (close_price - record.last_stop).abs() <= tolerance {
        return (true, false);
    }

    if profit.is_negative() && has_stop {
        return (true, false);
    }
    if profit.is_positive() {
        if record.trailing_applied {
            return (true, false);
        }
        let through_target = has_target
            && match record.side {
                Side::Long => close_price >= record.initial_target,
                Side::Short => close_price <= record.initial_target,
            };
        if through_target {
            return (false, true);
        }
    }

    (false, false)
}

/// Close facts for a position no longer live at the venue.
///
/// Without exit deals the position is closed at `last_price` with zero
/// profit and flagged for attention.
pub fn reconcile(
    record: &PositionRecord,
    deals: &[Deal],
    spec: &SymbolSpec,
    last_price: f64,
    now: DateTime<Utc>,
) -> CloseFacts {
    match summarize_deals(record, deals, spec.pip_size()) {
        Some(exit) => {
            let (stop_hit, target_hit) =
                infer_exit(record, exit.price, exit.profit, price_tolerance(spec));
            CloseFacts {
                time: exit.time,
                price: exit.price,
                profit: exit.profit,
                pips: exit.pips,
                stop_hit,
                target_hit,
                needs_attention: false,
            }
        }
        None => CloseFacts {
            time: now,
            price: last_price,
            profit: Money::ZERO,
            pips: 0.0,
            stop_hit: false,
            target_hit: false,
            needs_attention: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SymbolConfig;
    use crate::exchange::FillAck;
    use crate::risk::DynamicParams;
    use crate::MarketRegime;
    use approx::assert_relative_eq;
    use rust_decimal_macros::dec;

    fn spec() -> SymbolSpec {
        SymbolSpec::from(&SymbolConfig::default())
    }

    fn record(side: Side) -> PositionRecord {
        let (stop, target) = match side {
            Side::Long => (1.0950, 1.1100),
            Side::Short => (1.1050, 1.0900),
        };
        let ack = FillAck {
            position_id: 1,
            side,
            volume: 1.0,
            entry_price: 1.1000,
            stop,
            target,
            time: Utc::now(),
        };
        let params = DynamicParams {
            risk_percent: 1.0,
            adx_threshold: 25.0,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            tier: 0,
        };
        PositionRecord::from_fill(&ack, MarketRegime::default(), &params)
    }

    fn deal(entry: DealEntry, price: f64, volume: f64, profit: Money, commission: Money) -> Deal {
        Deal {
            position_id: 1,
            entry,
            price,
            volume,
            time: Utc::now(),
            profit,
            commission,
            swap: Money::ZERO,
        }
    }

    #[test]
    fn test_tolerance() {
        // 5-digit quote: 2 pips = 20 points
        assert_relative_eq!(price_tolerance(&spec()), 0.0002, epsilon = 1e-12);

        let mut s = spec();
        s.digits = 2;
        s.point = 0.01;
        assert_relative_eq!(price_tolerance(&s), 0.03, epsilon = 1e-12);
    }

    #[test]
    fn test_partial_closes_are_volume_weighted() {
        let r = record(Side::Long);
        let deals = vec![
            deal(DealEntry::In, 1.1000, 1.0, Money::ZERO, Money::from_decimal(dec!(-3.50))),
            deal(DealEntry::Out, 1.1050, 0.4, Money::from_decimal(dec!(200.00)), Money::ZERO),
            deal(
                DealEntry::Out,
                1.1100,
                0.6,
                Money::from_decimal(dec!(600.00)),
                Money::from_decimal(dec!(-3.50)),
            ),
        ];

        let exit = summarize_deals(&r, &deals, 0.0001).unwrap();
        assert_eq!(exit.profit, Money::from_decimal(dec!(793.00)));
        assert_relative_eq!(exit.price, 1.1080, epsilon = 1e-9);
        assert_relative_eq!(exit.pips, 80.0, epsilon = 1e-6);
        assert_relative_eq!(exit.volume, 1.0);
    }

    #[test]
    fn test_target_hit_by_price() {
        let r = record(Side::Short);
        let facts = reconcile(
            &r,
            &[deal(DealEntry::Out, 1.09001, 1.0, Money::from_decimal(dec!(999.00)), Money::ZERO)],
            &spec(),
            1.0,
            Utc::now(),
        );
        assert!(facts.target_hit);
        assert!(!facts.stop_hit);
        assert!(!facts.needs_attention);
    }

    #[test]
    fn test_trailed_stop_hit_by_price() {
        let mut r = record(Side::Short);
        r.last_stop = 1.0980;
        r.trailing_applied = true;
        let (stop, target) = infer_exit(&r, 1.0981, Money::from_decimal(dec!(19.00)), 0.0002);
        assert!(stop);
        assert!(!target);
    }

    #[test]
    fn test_profit_sign_tiebreakers() {
        let r = record(Side::Long);
        // slipped loss far from the stop
        assert_eq!(infer_exit(&r, 1.0900, Money::from_decimal(dec!(-100)), 0.0002), (true, false));
        // profit through the target
        assert_eq!(infer_exit(&r, 1.1150, Money::from_decimal(dec!(150)), 0.0002), (false, true));
        // profit short of the target without trailing
        assert_eq!(infer_exit(&r, 1.1040, Money::from_decimal(dec!(40)), 0.0002), (false, false));

        let mut trailed = record(Side::Long);
        trailed.trailing_applied = true;
        trailed.last_stop = 1.1030;
        assert_eq!(
            infer_exit(&trailed, 1.1020, Money::from_decimal(dec!(20)), 0.0002),
            (true, false)
        );
    }

    #[test]
    fn test_missing_history_needs_attention() {
        let r = record(Side::Long);
        let now = Utc::now();
        let facts = reconcile(
            &r,
            &[deal(DealEntry::In, 1.1000, 1.0, Money::ZERO, Money::ZERO)],
            &spec(),
            1.1023,
            now,
        );
        assert!(facts.needs_attention);
        assert_eq!(facts.profit, Money::ZERO);
        assert_eq!(facts.price, 1.1023);
        assert_eq!(facts.time, now);
    }
}
