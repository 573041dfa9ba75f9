//! Performance analytics
//!
//! Rolling statistics over the most recently closed positions. Reporting
//! only; nothing here feeds back into risk.

use serde::{Deserialize, Serialize};

use crate::oms::PositionRecord;
use crate::Money;

/// Maximum number of closed positions in the rolling window
pub const ANALYTICS_WINDOW: usize = 20;
/// Reported in place of an infinite ratio (profit with no loss)
pub const RATIO_SENTINEL: f64 = 999.0;
const VARIANCE_EPSILON: f64 = 1e-12;

/// Performance over the rolling window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Percent of trades with positive profit
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    /// Mean / sample standard deviation of per-trade profit
    pub sharpe: f64,
    /// Largest decline as a fraction of the running peak balance
    pub max_drawdown: f64,
    pub recovery_factor: f64,
    pub net_profit: Money,
}

/// Running mean and variance (Welford)
#[derive(Debug, Clone, Copy, Default)]
struct Welford {
    n: usize,
    mean: f64,
    m2: f64,
}

impl Welford {
    fn push(&mut self, x: f64) {
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn sample_variance(&self) -> Option<f64> {
        (self.n >= 2).then(|| self.m2 / (self.n - 1) as f64)
    }
}

fn ratio_with_sentinel(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else if numerator > 0.0 {
        RATIO_SENTINEL
    } else {
        0.0
    }
}

/// Statistics over up to [`ANALYTICS_WINDOW`] of the given closed records.
///
/// `records` may be in any order; they are sorted by close time and the
/// most recent window is kept. The starting balance of the window is
/// `current_balance` minus the window's net profit.
pub fn compute(records: &[&PositionRecord], current_balance: f64) -> PerformanceSnapshot {
    let mut closed: Vec<&PositionRecord> =
        records.iter().copied().filter(|r| !r.is_open()).collect();
    closed.sort_by(|a, b| a.close_time().cmp(&b.close_time()).then(a.id.cmp(&b.id)));
    let start = closed.len().saturating_sub(ANALYTICS_WINDOW);
    let window = &closed[start..];

    if window.is_empty() {
        return PerformanceSnapshot::default();
    }

    let profits: Vec<f64> = window.iter().map(|r| r.profit().to_f64()).collect();
    let net_profit: Money = window.iter().map(|r| r.profit()).sum();

    let wins: Vec<f64> = profits.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = profits.iter().copied().filter(|p| *p < 0.0).collect();
    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().map(|l| l.abs()).sum();

    let avg_win = if wins.is_empty() {
        0.0
    } else {
        gross_profit / wins.len() as f64
    };
    let avg_loss = if losses.is_empty() {
        0.0
    } else {
        gross_loss / losses.len() as f64
    };

    let mut stats = Welford::default();
    for p in &profits {
        stats.push(*p);
    }
    let sharpe = match stats.sample_variance() {
        Some(var) if var > VARIANCE_EPSILON => stats.mean / var.sqrt(),
        _ => 0.0,
    };

    let mut equity = current_balance - net_profit.to_f64();
    let mut peak = equity;
    let mut max_drawdown = 0.0;
    let mut max_drawdown_amount = 0.0;
    for p in &profits {
        equity += p;
        if equity > peak {
            peak = equity;
        }
        let amount = peak - equity;
        if amount > max_drawdown_amount {
            max_drawdown_amount = amount;
        }
        if peak > 0.0 {
            let dd = amount / peak;
            if dd > max_drawdown {
                max_drawdown = dd;
            }
        }
    }

    PerformanceSnapshot {
        trades: window.len(),
        wins: wins.len(),
        losses: losses.len(),
        win_rate: wins.len() as f64 / window.len() as f64 * 100.0,
        profit_factor: ratio_with_sentinel(gross_profit, gross_loss),
        avg_win,
        avg_loss,
        sharpe,
        max_drawdown,
        recovery_factor: ratio_with_sentinel(gross_profit, max_drawdown_amount),
        net_profit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::FillAck;
    use crate::oms::CloseFacts;
    use crate::risk::DynamicParams;
    use crate::{MarketRegime, Side};
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn closed(id: u64, profit: f64) -> PositionRecord {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ack = FillAck {
            position_id: id,
            side: Side::Long,
            volume: 1.0,
            entry_price: 1.1,
            stop: 1.09,
            target: 1.12,
            time: t0,
        };
        let params = DynamicParams {
            risk_percent: 1.0,
            adx_threshold: 25.0,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            tier: 0,
        };
        let mut r = PositionRecord::from_fill(&ack, MarketRegime::default(), &params);
        r.finalize(CloseFacts {
            time: t0 + Duration::hours(id as i64),
            price: 1.1,
            profit: Money::from_f64(profit),
            pips: 0.0,
            stop_hit: false,
            target_hit: false,
            needs_attention: false,
        });
        r
    }

    fn snapshot(profits: &[f64], balance: f64) -> PerformanceSnapshot {
        let records: Vec<PositionRecord> = profits
            .iter()
            .enumerate()
            .map(|(i, p)| closed(i as u64 + 1, *p))
            .collect();
        let refs: Vec<&PositionRecord> = records.iter().collect();
        compute(&refs, balance)
    }

    #[test]
    fn test_empty_window() {
        assert_eq!(snapshot(&[], 1000.0), PerformanceSnapshot::default());
    }

    #[test]
    fn test_profit_factor_sentinel() {
        let s = snapshot(&[10.0, 20.0], 1030.0);
        assert_eq!(s.profit_factor, RATIO_SENTINEL);
        assert_eq!(s.recovery_factor, RATIO_SENTINEL);
        assert_eq!(s.win_rate, 100.0);

        let s = snapshot(&[0.0, 0.0], 1000.0);
        assert_eq!(s.profit_factor, 0.0);
        assert_eq!(s.sharpe, 0.0);
    }

    #[test]
    fn test_mixed_window() {
        // start 1000: 1100, 1050, 1080
        let s = snapshot(&[100.0, -50.0, 30.0], 1080.0);
        assert_eq!(s.trades, 3);
        assert_relative_eq!(s.win_rate, 200.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(s.profit_factor, 130.0 / 50.0, epsilon = 1e-9);
        assert_relative_eq!(s.avg_win, 65.0, epsilon = 1e-9);
        assert_relative_eq!(s.avg_loss, 50.0, epsilon = 1e-9);
        assert_relative_eq!(s.max_drawdown, 50.0 / 1100.0, epsilon = 1e-9);
        assert_relative_eq!(s.recovery_factor, 130.0 / 50.0, epsilon = 1e-9);

        let mean = 80.0 / 3.0;
        let var = [100.0, -50.0, 30.0]
            .iter()
            .map(|p: &f64| (p - mean).powi(2))
            .sum::<f64>()
            / 2.0;
        assert_relative_eq!(s.sharpe, mean / var.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn test_window_keeps_most_recent() {
        let mut profits = vec![-10.0; 5];
        profits.extend(vec![10.0; 20]);
        let s = snapshot(&profits, 10_000.0);
        assert_eq!(s.trades, ANALYTICS_WINDOW);
        assert_eq!(s.losses, 0);
    }

    #[test]
    fn test_single_trade_sharpe_zero() {
        let s = snapshot(&[50.0], 1050.0);
        assert_eq!(s.sharpe, 0.0);
    }
}
