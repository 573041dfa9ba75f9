//! Market condition classification
//!
//! Pure functions of an indicator snapshot. Evaluated once per new bar,
//! before the adaptive controller derives thresholds for the detector.

use crate::exchange::IndicatorSnapshot;
use crate::{MarketRegime, TrendRegime, VolatilityRegime};

/// ATR ratio above which volatility is high
pub const HIGH_VOLATILITY_RATIO: f64 = 1.5;
/// ATR ratio below which volatility is low
pub const LOW_VOLATILITY_RATIO: f64 = 0.7;

/// Classify volatility from the current vs previous ATR
pub fn classify_volatility(atr_current: f64, atr_previous: f64) -> VolatilityRegime {
    if atr_previous <= 0.0 {
        return VolatilityRegime::Normal;
    }

    let ratio = atr_current / atr_previous;
    if ratio > HIGH_VOLATILITY_RATIO {
        VolatilityRegime::High
    } else if ratio < LOW_VOLATILITY_RATIO {
        VolatilityRegime::Low
    } else {
        VolatilityRegime::Normal
    }
}

/// Classify trend direction.
///
/// Up requires ADX above `adx_threshold`, +DI over -DI, price over the MA
/// and, with `require_htf`, price over the higher-timeframe MA. Down is the
/// mirror. Everything else, including strong ADX with conflicting
/// directional signals or a missing HTF MA, is a range.
pub fn classify_trend(
    snapshot: &IndicatorSnapshot,
    price: f64,
    adx_threshold: f64,
    require_htf: bool,
) -> TrendRegime {
    let adx = snapshot.adx.current;
    if adx <= adx_threshold {
        return TrendRegime::Range;
    }

    let plus_di = snapshot.plus_di.current;
    let minus_di = snapshot.minus_di.current;
    let ma = snapshot.ma.current;
    let htf_ma = snapshot.htf_ma.map(|p| p.current);

    let htf_confirms = |above: bool| -> bool {
        if !require_htf {
            return true;
        }
        match htf_ma {
            Some(h) if above => price > h,
            Some(h) => price < h,
            None => false,
        }
    };

    if plus_di > minus_di && price > ma && htf_confirms(true) {
        TrendRegime::Up
    } else if minus_di > plus_di && price < ma && htf_confirms(false) {
        TrendRegime::Down
    } else {
        TrendRegime::Range
    }
}

/// Full classification for one cycle
pub fn classify(
    snapshot: &IndicatorSnapshot,
    price: f64,
    adx_threshold: f64,
    require_htf: bool,
) -> MarketRegime {
    MarketRegime {
        trend: classify_trend(snapshot, price, adx_threshold, require_htf),
        volatility: classify_volatility(snapshot.atr.current, snapshot.atr.previous),
    }
}
