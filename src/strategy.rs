//! Liquidity trap signal detection
//!
//! Locates liquidity zones at the swing extrema of a lookback window,
//! optionally pulls them toward volume-profile nodes and recognises trap
//! candles: bars that pierce a zone and close back inside it with a long
//! rejection wick.

use tracing::debug;

use crate::config::SignalConfig;
use crate::risk::DynamicParams;
use crate::volume_profile::VolumeProfile;
use crate::{Candle, MarketRegime, Side, TrendRegime};

/// Bars compared on each side of a swing candidate
pub const SWING_NEIGHBOURS: usize = 2;
/// Minimum wick / body ratio of a false breakout
pub const FALSE_BREAKOUT_WICK_RATIO: f64 = 1.5;

/// Resistance and support levels for the current bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidityZones {
    pub high: f64,
    pub low: f64,
}

/// A trap pattern ready for entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setup {
    pub side: Side,
    /// Zone the bar trapped, stop is placed beyond it
    pub zone_level: f64,
}

/// Everything the detector derived for one bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalAnalysis {
    pub zones: LiquidityZones,
    pub average_bar_size: f64,
    pub setup: Option<Setup>,
    pub false_breakout: Option<Side>,
}

// =============================================================================
// Zones
// =============================================================================

/// Most recent bar whose high is strictly above its two neighbours on each side
pub fn find_swing_high(bars: &[Candle]) -> Option<(usize, f64)> {
    find_swing(bars, |c| c.high, |a, b| a > b)
}

/// Most recent bar whose low is strictly below its two neighbours on each side
pub fn find_swing_low(bars: &[Candle]) -> Option<(usize, f64)> {
    find_swing(bars, |c| c.low, |a, b| a < b)
}

fn find_swing(
    bars: &[Candle],
    price: impl Fn(&Candle) -> f64,
    beats: impl Fn(f64, f64) -> bool,
) -> Option<(usize, f64)> {
    let n = SWING_NEIGHBOURS;
    if bars.len() < 2 * n + 1 {
        return None;
    }

    (n..bars.len() - n).rev().find_map(|i| {
        let candidate = price(&bars[i]);
        let dominates = (i - n..=i + n)
            .filter(|&j| j != i)
            .all(|j| beats(candidate, price(&bars[j])));
        dominates.then_some((i, candidate))
    })
}

/// Swing extrema of the window, falling back to its absolute extremes.
/// `None` when the window is empty or the levels are inverted.
pub fn detect_zones(window: &[Candle]) -> Option<LiquidityZones> {
    if window.is_empty() {
        return None;
    }

    let high = find_swing_high(window)
        .map(|(_, h)| h)
        .unwrap_or_else(|| window.iter().map(|c| c.high).fold(f64::MIN, f64::max));
    let low = find_swing_low(window)
        .map(|(_, l)| l)
        .unwrap_or_else(|| window.iter().map(|c| c.low).fold(f64::MAX, f64::min));

    if low >= high {
        return None;
    }
    Some(LiquidityZones { high, low })
}

/// Pull both zones toward the profile's activity nodes
pub fn refine_with_profile(
    zones: LiquidityZones,
    profile: &VolumeProfile,
    atr: f64,
) -> LiquidityZones {
    LiquidityZones {
        high: profile.refine(zones.high, atr),
        low: profile.refine(zones.low, atr),
    }
}

/// Mean high-low range of the window, or `atr` when that is not positive
pub fn average_bar_size(window: &[Candle], atr: f64) -> f64 {
    if window.is_empty() {
        return atr;
    }
    let mean = window.iter().map(Candle::range).sum::<f64>() / window.len() as f64;
    if mean > 0.0 {
        mean
    } else {
        atr
    }
}

// =============================================================================
// Patterns
// =============================================================================

/// Pierced above the zone high and closed back inside, with a dominant upper wick
pub fn is_short_trap(
    bar: &Candle,
    zones: &LiquidityZones,
    avg_bar: f64,
    cfg: &SignalConfig,
) -> bool {
    let body = bar.body();
    bar.high > zones.high
        && bar.close < zones.high
        && bar.upper_wick() > cfg.wick_ratio * body
        && body > cfg.body_ratio * avg_bar
}

/// Mirror of [`is_short_trap`] on the zone low
pub fn is_long_trap(
    bar: &Candle,
    zones: &LiquidityZones,
    avg_bar: f64,
    cfg: &SignalConfig,
) -> bool {
    let body = bar.body();
    bar.low < zones.low
        && bar.close > zones.low
        && bar.lower_wick() > cfg.wick_ratio * body
        && body > cfg.body_ratio * avg_bar
}

/// Small pierce beyond a zone that closed back inside. Diagnostic only.
pub fn detect_false_breakout(
    bar: &Candle,
    zones: &LiquidityZones,
    atr: f64,
    margin_atr: f64,
) -> Option<Side> {
    let margin = margin_atr * atr;
    let body = bar.body();

    let above = bar.high - zones.high;
    if above > 0.0
        && above <= margin
        && bar.close < zones.high
        && bar.upper_wick() >= FALSE_BREAKOUT_WICK_RATIO * body
    {
        return Some(Side::Short);
    }

    let below = zones.low - bar.low;
    if below > 0.0
        && below <= margin
        && bar.close > zones.low
        && bar.lower_wick() >= FALSE_BREAKOUT_WICK_RATIO * body
    {
        return Some(Side::Long);
    }

    None
}

/// Liquidity trap detector
#[derive(Debug, Clone)]
pub struct LiquidityTrapStrategy {
    config: SignalConfig,
}

impl LiquidityTrapStrategy {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    fn regime_allows(
        &self,
        side: Side,
        regime: &MarketRegime,
        rsi: f64,
        params: &DynamicParams,
    ) -> bool {
        match (side, regime.trend) {
            (Side::Short, TrendRegime::Down) | (Side::Long, TrendRegime::Up) => true,
            (_, TrendRegime::Range) if self.config.allow_trade_on_range => match side {
                Side::Short => rsi > params.rsi_oversold,
                Side::Long => rsi < params.rsi_overbought,
            },
            _ => false,
        }
    }

    /// Trap setup on `bar`. Short is checked first and wins when both match.
    pub fn detect_trap(
        &self,
        bar: &Candle,
        zones: &LiquidityZones,
        avg_bar: f64,
        regime: &MarketRegime,
        rsi: f64,
        params: &DynamicParams,
    ) -> Option<Setup> {
        if is_short_trap(bar, zones, avg_bar, &self.config)
            && self.regime_allows(Side::Short, regime, rsi, params)
        {
            return Some(Setup {
                side: Side::Short,
                zone_level: zones.high,
            });
        }

        if is_long_trap(bar, zones, avg_bar, &self.config)
            && self.regime_allows(Side::Long, regime, rsi, params)
        {
            return Some(Setup {
                side: Side::Long,
                zone_level: zones.low,
            });
        }

        None
    }

    /// Analyze the signal bar against the `window` of bars preceding it.
    /// `profile_bars` feeds the volume profile when enabled.
    #[allow(clippy::too_many_arguments)]
    pub fn analyze(
        &self,
        bar: &Candle,
        window: &[Candle],
        profile_bars: Option<&[Candle]>,
        atr: f64,
        regime: &MarketRegime,
        rsi: f64,
        params: &DynamicParams,
    ) -> Option<SignalAnalysis> {
        let raw = detect_zones(window)?;

        let zones = match profile_bars
            .filter(|_| self.config.use_volume_profile)
            .and_then(|bars| VolumeProfile::build(bars, self.config.profile_buckets))
        {
            Some(profile) => refine_with_profile(raw, &profile, atr),
            None => raw,
        };

        let average_bar_size = average_bar_size(window, atr);
        let setup = self.detect_trap(bar, &zones, average_bar_size, regime, rsi, params);
        let false_breakout =
            detect_false_breakout(bar, &zones, atr, self.config.false_breakout_margin_atr);

        if let Some(side) = false_breakout {
            debug!(%side, zone_high = zones.high, zone_low = zones.low, "False breakout");
        }

        Some(SignalAnalysis {
            zones,
            average_bar_size,
            setup,
            false_breakout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VolatilityRegime;
    use chrono::Utc;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new_unchecked(Utc::now(), open, high, low, close, 100.0)
    }

    fn flat_bar(high: f64, low: f64) -> Candle {
        let mid = (high + low) / 2.0;
        candle(mid, high, low, mid)
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

    fn regime(trend: TrendRegime) -> MarketRegime {
        MarketRegime {
            trend,
            volatility: VolatilityRegime::Normal,
        }
    }

    #[test]
    fn test_swing_high_selected() {
        let highs = [1.0, 1.1, 1.2, 1.3, 1.8, 1.4, 1.2, 1.5, 1.6, 1.7];
        let bars: Vec<Candle> = highs.iter().map(|&h| flat_bar(h, 0.5)).collect();
        assert_eq!(find_swing_high(&bars), Some((4, 1.8)));
    }

    #[test]
    fn test_most_recent_swing_wins() {
        let highs = [1.0, 1.1, 1.5, 1.1, 1.0, 1.1, 1.4, 1.1, 1.0, 1.0];
        let bars: Vec<Candle> = highs.iter().map(|&h| flat_bar(h, 0.5)).collect();
        assert_eq!(find_swing_high(&bars), Some((6, 1.4)));
    }

    #[test]
    fn test_no_swing_falls_back_to_extreme() {
        // monotonic: no interior swing
        let bars: Vec<Candle> = (0..10)
            .map(|i| flat_bar(1.0 + i as f64 * 0.1, 0.5 + i as f64 * 0.1))
            .collect();
        assert_eq!(find_swing_high(&bars), None);
        let zones = detect_zones(&bars).unwrap();
        assert!((zones.high - 1.9).abs() < 1e-12);
        assert!((zones.low - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_equal_neighbour_is_not_swing() {
        let highs = [1.0, 1.1, 1.3, 1.3, 1.8, 1.4, 1.8, 1.2, 1.1, 1.0];
        let bars: Vec<Candle> = highs.iter().map(|&h| flat_bar(h, 0.5)).collect();
        assert_eq!(find_swing_high(&bars), None);
    }

    #[test]
    fn test_swing_low() {
        let lows = [1.0, 0.9, 0.8, 0.7, 0.2, 0.6, 0.7, 0.5, 0.4, 0.3];
        let bars: Vec<Candle> = lows.iter().map(|&l| flat_bar(2.0, l)).collect();
        assert_eq!(find_swing_low(&bars), Some((4, 0.2)));
    }

    #[test]
    fn test_inverted_zones_rejected() {
        // swing high at 1.0 early, swing low at 1.5 later
        let mut bars = vec![flat_bar(0.9, 0.8); 5];
        bars[2] = flat_bar(1.0, 0.8);
        bars.extend(vec![flat_bar(2.0, 1.6); 5]);
        bars[7] = flat_bar(2.0, 1.5);
        assert_eq!(find_swing_high(&bars), Some((2, 1.0)));
        assert_eq!(find_swing_low(&bars), Some((7, 1.5)));
        assert!(detect_zones(&bars).is_none());
        assert!(detect_zones(&[]).is_none());
    }

    #[test]
    fn test_average_bar_size_fallback() {
        let bars = vec![flat_bar(1.0, 1.0); 3];
        assert_eq!(average_bar_size(&bars, 0.002), 0.002);
        let bars = vec![flat_bar(1.2, 1.0); 3];
        assert!((average_bar_size(&bars, 0.002) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_short_trap_in_downtrend() {
        let strategy = LiquidityTrapStrategy::new(SignalConfig::default());
        let zones = LiquidityZones {
            high: 1.1050,
            low: 1.0950,
        };
        // body 0.0004, upper wick 0.0008, avg bar 0.001
        let bar = candle(1.1044, 1.1052, 1.1038, 1.1040);
        let setup =
            strategy.detect_trap(&bar, &zones, 0.0010, &regime(TrendRegime::Down), 50.0, &params());
        assert_eq!(
            setup,
            Some(Setup {
                side: Side::Short,
                zone_level: 1.1050
            })
        );

        // uptrend blocks shorts
        let setup =
            strategy.detect_trap(&bar, &zones, 0.0010, &regime(TrendRegime::Up), 50.0, &params());
        assert!(setup.is_none());
    }

    #[test]
    fn test_range_rsi_gate() {
        let strategy = LiquidityTrapStrategy::new(SignalConfig::default());
        let zones = LiquidityZones {
            high: 1.1050,
            low: 1.0950,
        };
        let bar = candle(1.1044, 1.1052, 1.1038, 1.1040);
        let range = regime(TrendRegime::Range);

        assert!(strategy
            .detect_trap(&bar, &zones, 0.0010, &range, 50.0, &params())
            .is_some());
        // oversold RSI blocks shorts in a range
        assert!(strategy
            .detect_trap(&bar, &zones, 0.0010, &range, 25.0, &params())
            .is_none());

        let mut cfg = SignalConfig::default();
        cfg.allow_trade_on_range = false;
        let strict = LiquidityTrapStrategy::new(cfg);
        assert!(strict
            .detect_trap(&bar, &zones, 0.0010, &range, 50.0, &params())
            .is_none());
    }

    #[test]
    fn test_long_trap_mirror() {
        let strategy = LiquidityTrapStrategy::new(SignalConfig::default());
        let zones = LiquidityZones {
            high: 1.1050,
            low: 1.0950,
        };
        let bar = candle(1.0956, 1.0962, 1.0948, 1.0960);
        let setup =
            strategy.detect_trap(&bar, &zones, 0.0010, &regime(TrendRegime::Up), 50.0, &params());
        assert_eq!(setup.map(|s| s.side), Some(Side::Long));
    }

    #[test]
    fn test_short_wins_tie() {
        let strategy = LiquidityTrapStrategy::new(SignalConfig::default());
        // narrow zones pierced on both sides
        let zones = LiquidityZones {
            high: 1.1010,
            low: 1.0990,
        };
        let bar = candle(1.1000, 1.1030, 1.0970, 1.1004);
        let range = regime(TrendRegime::Range);
        let setup = strategy.detect_trap(&bar, &zones, 0.0010, &range, 50.0, &params());
        assert_eq!(setup.map(|s| s.side), Some(Side::Short));
    }

    #[test]
    fn test_false_breakout() {
        let zones = LiquidityZones {
            high: 1.1050,
            low: 1.0950,
        };
        // pierce 0.0002 with ATR 0.001 and margin 0.3
        let bar = candle(1.1045, 1.1052, 1.1040, 1.1044);
        assert_eq!(detect_false_breakout(&bar, &zones, 0.0010, 0.3), Some(Side::Short));
        // pierce too deep
        let bar = candle(1.1045, 1.1080, 1.1040, 1.1044);
        assert_eq!(detect_false_breakout(&bar, &zones, 0.0010, 0.3), None);
    }

    #[test]
    fn test_analyze_with_profile() {
        let strategy = LiquidityTrapStrategy::new(SignalConfig::default());
        let highs = [
            1.1000, 1.1010, 1.1020, 1.1030, 1.1050, 1.1030, 1.1020, 1.1010, 1.1000, 1.1005,
        ];
        let window: Vec<Candle> = highs
            .iter()
            .map(|&h| candle(h - 0.0005, h, h - 0.0010, h - 0.0005))
            .collect();
        let bar = candle(1.1044, 1.1052, 1.1038, 1.1040);

        let plain = strategy
            .analyze(&bar, &window, None, 0.0010, &regime(TrendRegime::Down), 50.0, &params())
            .unwrap();
        assert!((plain.zones.high - 1.1050).abs() < 1e-12);
        assert_eq!(plain.setup.map(|s| s.side), Some(Side::Short));

        let refined = strategy
            .analyze(
                &bar,
                &window,
                Some(&window),
                0.0010,
                &regime(TrendRegime::Down),
                50.0,
                &params(),
            )
            .unwrap();
        assert!(refined.zones.high < plain.zones.high);
    }
}
