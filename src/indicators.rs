//! Technical indicators
//!
//! SMA and RSI come from the `ta` crate. ATR and the directional movement
//! system use Wilder's smoothing, implemented here.
//!
//! Every function returns one entry per input bar, `None` during warmup.

use ta::indicators::{RelativeStrengthIndex, SimpleMovingAverage};
use ta::Next;

use crate::Candle;

/// Type alias for two-line indicators (+DI, -DI)
pub type DualLineOutput = (Vec<Option<f64>>, Vec<Option<f64>>);

// =============================================================================
// Moving Averages
// =============================================================================

/// Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let out = indicator.next(v);
            (i + 1 >= period).then_some(out)
        })
        .collect()
}

/// Wilder's smoothing: seed with the SMA of the first `period` values, then
/// `(prev * (period - 1) + current) / period`
fn wilders_smooth(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut result = Vec::with_capacity(values.len());
    let mut smoothed: Option<f64> = None;

    for (i, &v) in values.iter().enumerate() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            let sum: f64 = values[..period].iter().sum();
            smoothed = Some(sum / period as f64);
            result.push(smoothed);
        } else if let Some(prev) = smoothed {
            let next = (prev * (period - 1) as f64 + v) / period as f64;
            smoothed = Some(next);
            result.push(smoothed);
        } else {
            result.push(None);
        }
    }

    result
}

// =============================================================================
// Volatility
// =============================================================================

/// True Range
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i == 0 {
                c.high - c.low
            } else {
                let prev_close = candles[i - 1].close;
                (c.high - c.low)
                    .max((c.high - prev_close).abs())
                    .max((c.low - prev_close).abs())
            }
        })
        .collect()
}

/// Average True Range with Wilder's smoothing
pub fn atr(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    wilders_smooth(&true_range(candles), period)
}

// =============================================================================
// Momentum
// =============================================================================

/// Relative Strength Index
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match RelativeStrengthIndex::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let out = indicator.next(v);
            (i + 1 >= period).then_some(out)
        })
        .collect()
}

// =============================================================================
// Directional Movement
// =============================================================================

/// Directional Movement Index, returns (+DI, -DI)
pub fn dmi(candles: &[Candle], period: usize) -> DualLineOutput {
    if candles.is_empty() || period == 0 {
        return (vec![], vec![]);
    }

    let mut plus_dm = vec![0.0; candles.len()];
    let mut minus_dm = vec![0.0; candles.len()];

    for i in 1..candles.len() {
        let up_move = candles[i].high - candles[i - 1].high;
        let down_move = candles[i - 1].low - candles[i].low;

        if up_move > down_move && up_move > 0.0 {
            plus_dm[i] = up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            minus_dm[i] = down_move;
        }
    }

    let smoothed_plus = wilders_smooth(&plus_dm, period);
    let smoothed_minus = wilders_smooth(&minus_dm, period);
    let atr_values = atr(candles, period);

    let mut plus_di = Vec::with_capacity(candles.len());
    let mut minus_di = Vec::with_capacity(candles.len());

    for i in 0..candles.len() {
        match (smoothed_plus[i], smoothed_minus[i], atr_values[i]) {
            (Some(pdm), Some(mdm), Some(a)) if a > 0.0 => {
                plus_di.push(Some(pdm / a * 100.0));
                minus_di.push(Some(mdm / a * 100.0));
            }
            _ => {
                plus_di.push(None);
                minus_di.push(None);
            }
        }
    }

    (plus_di, minus_di)
}

/// Average Directional Index from the DI lines of `dmi`.
///
/// Needs `2 * period - 1` bars: one period for the DI lines, a second for
/// smoothing DX.
pub fn adx_from_di(
    plus_di: &[Option<f64>],
    minus_di: &[Option<f64>],
    period: usize,
) -> Vec<Option<f64>> {
    let len = plus_di.len();
    let mut result = vec![None; len];
    if period == 0 || len < period {
        return result;
    }

    let di_start = period - 1;
    let dx: Vec<f64> = (di_start..len)
        .map(|i| match (plus_di[i], minus_di[i]) {
            (Some(p), Some(m)) if p + m > 0.0 => (p - m).abs() / (p + m) * 100.0,
            _ => 0.0,
        })
        .collect();

    for (j, value) in wilders_smooth(&dx, period).into_iter().enumerate() {
        result[di_start + j] = value;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candles(closes: &[f64], spread: f64) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Candle::new_unchecked(
                    Utc.timestamp_opt(i as i64 * 3600, 0).unwrap(),
                    c,
                    c + spread,
                    c - spread,
                    c,
                    100.0,
                )
            })
            .collect()
    }

    #[test]
    fn test_sma() {
        let result = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert_eq!(result[2], Some(2.0));
        assert_eq!(result[4], Some(4.0));
    }

    #[test]
    fn test_atr_constant_range() {
        let bars = candles(&[1.0; 20], 0.01);
        let values = atr(&bars, 5);
        assert_eq!(values[3], None);
        let last = values[19].unwrap();
        assert!((last - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_rsi_bounds() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.7).sin()).collect();
        for v in rsi(&closes, 14).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn test_dmi_uptrend() {
        let closes: Vec<f64> = (0..40).map(|i| 1.0 + i as f64 * 0.01).collect();
        let bars = candles(&closes, 0.005);
        let (plus, minus) = dmi(&bars, 14);
        let p = plus[39].unwrap();
        let m = minus[39].unwrap();
        assert!(p > m);

        let adx_values = adx_from_di(&plus, &minus, 14);
        assert!(adx_values[26].is_some());
        assert!(adx_values[25].is_none());
        assert!(adx_values[39].unwrap() > 50.0);
    }
}
