//! Volume-at-price profile
//!
//! Splits a window's price range into equal buckets and spreads each bar's
//! volume evenly over the buckets its range touches.

use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::Candle;

/// Share of the zone level kept when blending toward a profile node
pub const ZONE_WEIGHT: f64 = 0.7;
/// Maximum distance, in ATRs, from a zone to a profile node for blending
pub const NODE_DISTANCE_ATR: f64 = 1.5;

/// Highest and lowest activity price levels of a window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeProfile {
    /// Centre of the highest-volume bucket
    pub peak: f64,
    /// Centre of the lowest non-zero bucket
    pub trough: f64,
}

impl VolumeProfile {
    /// Build the profile, `None` when the window has no usable range
    pub fn build(bars: &[Candle], buckets: usize) -> Option<Self> {
        if bars.is_empty() || buckets == 0 {
            return None;
        }

        let (low, high) = match bars
            .iter()
            .flat_map(|c| [c.low, c.high])
            .map(OrderedFloat)
            .minmax()
            .into_option()
        {
            Some((lo, hi)) => (lo.0, hi.0),
            None => return None,
        };

        let range = high - low;
        let height = range / buckets as f64;
        if range <= 0.0 || height <= 0.0 {
            return None;
        }

        let bucket_of = |price: f64| -> usize {
            (((price - low) / height).floor() as usize).min(buckets - 1)
        };

        let mut volume = vec![0.0; buckets];
        for bar in bars {
            let first = bucket_of(bar.low);
            let last = bucket_of(bar.high);
            let share = bar.volume / (last - first + 1) as f64;
            for v in &mut volume[first..=last] {
                *v += share;
            }
        }

        let centre = |i: usize| low + (i as f64 + 0.5) * height;

        let peak = volume
            .iter()
            .enumerate()
            .max_by_key(|(_, v)| OrderedFloat(**v))
            .map(|(i, _)| i)?;
        let trough = volume
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > 0.0)
            .min_by_key(|(_, v)| OrderedFloat(**v))
            .map(|(i, _)| i)?;

        Some(Self {
            peak: centre(peak),
            trough: centre(trough),
        })
    }

    /// Blend `level` toward the peak when it lies within reach, otherwise
    /// toward the trough when that does
    pub fn refine(&self, level: f64, atr: f64) -> f64 {
        let reach = NODE_DISTANCE_ATR * atr;
        if (self.peak - level).abs() <= reach {
            level * ZONE_WEIGHT + self.peak * (1.0 - ZONE_WEIGHT)
        } else if (self.trough - level).abs() <= reach {
            level * ZONE_WEIGHT + self.trough * (1.0 - ZONE_WEIGHT)
        } else {
            level
        }
    }
}
