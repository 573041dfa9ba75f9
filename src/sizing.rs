//! Position sizing
//!
//! Converts a risk percentage and a stop distance into a tradable volume,
//! respecting margin, contract economics and the volume grid.

use tracing::debug;

use crate::error::SizingError;
use crate::exchange::Account;

/// Fraction of free margin a single trade may risk
pub const MAX_FREE_MARGIN_FRACTION: f64 = 0.5;
const STEP_EPSILON: f64 = 1e-6;

/// Rate converting `from` currency amounts into `to`.
///
/// Tries the direct pair, the inverse pair, then two hops through
/// `reference`.
pub fn conversion_rate(
    account: &dyn Account,
    from: &str,
    to: &str,
    reference: &str,
) -> Option<f64> {
    if from == to {
        return Some(1.0);
    }
    if let Some(rate) = single_hop(account, from, to) {
        return Some(rate);
    }
    if reference == from || reference == to {
        return None;
    }
    let first = single_hop(account, from, reference)?;
    let second = single_hop(account, reference, to)?;
    Some(first * second)
}

fn single_hop(account: &dyn Account, from: &str, to: &str) -> Option<f64> {
    if from == to {
        return Some(1.0);
    }
    if let Some(p) = account.pair_price(&format!("{from}{to}")).filter(|p| *p > 0.0) {
        return Some(p);
    }
    account
        .pair_price(&format!("{to}{from}"))
        .filter(|p| *p > 0.0)
        .map(|p| 1.0 / p)
}

/// Round `volume` down to the venue's step and clamp to its limits
pub fn normalize_volume(volume: f64, min: f64, max: f64, step: f64) -> f64 {
    let capped = volume.min(max);
    let stepped = if step > 0.0 {
        let steps = (capped / step + STEP_EPSILON).floor();
        let decimals = step_decimals(step);
        let factor = 10f64.powi(decimals);
        (steps * step * factor).round() / factor
    } else {
        capped
    };
    stepped.max(min)
}

fn step_decimals(step: f64) -> i32 {
    let mut decimals = 0;
    let mut s = step;
    while decimals < 8 && (s - s.round()).abs() > STEP_EPSILON {
        s *= 10.0;
        decimals += 1;
    }
    decimals
}

/// Risk-based volume sizing
#[derive(Debug, Clone)]
pub struct PositionSizer {
    reference_currency: String,
}

impl PositionSizer {
    pub fn new(reference_currency: impl Into<String>) -> Self {
        Self {
            reference_currency: reference_currency.into(),
        }
    }

    /// Volume risking `risk_percent` of balance between `entry` and `stop`
    pub fn calculate_volume(
        &self,
        entry: f64,
        stop: f64,
        account: &dyn Account,
        risk_percent: f64,
    ) -> Result<f64, SizingError> {
        let balance = account.balance();
        if balance <= 0.0 {
            return Err(SizingError::NonPositiveBalance(balance));
        }

        let risk_amount =
            (balance * risk_percent / 100.0).min(account.free_margin() * MAX_FREE_MARGIN_FRACTION);
        if risk_amount <= 0.0 {
            return Err(SizingError::NonPositiveRisk(risk_amount));
        }

        let spec = account.symbol_spec();
        let distance = (entry - stop).abs();
        if distance <= spec.point {
            return Err(SizingError::StopTooClose {
                distance,
                point: spec.point,
            });
        }

        if spec.tick_size <= 0.0 || spec.tick_value <= 0.0 {
            return Err(SizingError::InvalidTickEconomics {
                tick_size: spec.tick_size,
                tick_value: spec.tick_value,
            });
        }

        let rate = conversion_rate(
            account,
            &spec.profit_currency,
            account.currency(),
            &self.reference_currency,
        )
        .ok_or_else(|| SizingError::Conversion {
            from: spec.profit_currency.clone(),
            to: account.currency().to_string(),
        })?;

        let value_per_unit = spec.tick_value / spec.tick_size * rate;
        let raw = risk_amount / (distance * value_per_unit);
        let volume = normalize_volume(raw, spec.volume_min, spec.volume_max, spec.volume_step);

        debug!(
            risk_amount,
            distance,
            value_per_unit,
            raw_volume = raw,
            volume,
            "Position sized"
        );

        Ok(volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SymbolConfig;
    use crate::exchange::{PaperAccount, SymbolSpec};
    use approx::assert_relative_eq;

    fn spec() -> SymbolSpec {
        let mut spec = SymbolSpec::from(&SymbolConfig::default());
        spec.tick_size = 0.0001;
        spec.tick_value = 1.0;
        spec.point = 0.0001;
        spec.digits = 4;
        spec
    }

    fn account(balance: f64) -> PaperAccount {
        PaperAccount::new(balance, "USD", spec())
    }

    #[test]
    fn test_reference_sizing_example() {
        // 1% of 10,000 = 100 risk over 50 pips at 1.0 per tick
        let sizer = PositionSizer::new("USD");
        let volume = sizer
            .calculate_volume(1.2000, 1.1950, &account(10_000.0), 1.0)
            .unwrap();
        assert_relative_eq!(volume, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_free_margin_cap() {
        let sizer = PositionSizer::new("USD");
        let mut acct = account(10_000.0);
        acct.free_margin = 100.0;
        // risk capped at 50
        let volume = sizer.calculate_volume(1.2000, 1.1950, &acct, 1.0).unwrap();
        assert_relative_eq!(volume, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_error_cases() {
        let sizer = PositionSizer::new("USD");

        assert!(matches!(
            sizer.calculate_volume(1.2, 1.19, &account(0.0), 1.0),
            Err(SizingError::NonPositiveBalance(_))
        ));

        let mut acct = account(10_000.0);
        acct.free_margin = 0.0;
        assert!(matches!(
            sizer.calculate_volume(1.2, 1.19, &acct, 1.0),
            Err(SizingError::NonPositiveRisk(_))
        ));

        assert!(matches!(
            sizer.calculate_volume(1.2000, 1.2000, &account(10_000.0), 1.0),
            Err(SizingError::StopTooClose { .. })
        ));

        let mut acct = account(10_000.0);
        acct.spec.tick_size = 0.0;
        assert!(matches!(
            sizer.calculate_volume(1.2, 1.19, &acct, 1.0),
            Err(SizingError::InvalidTickEconomics { .. })
        ));
    }

    #[test]
    fn test_unresolvable_conversion() {
        let sizer = PositionSizer::new("USD");
        let acct = PaperAccount::new(10_000.0, "JPY", spec());
        assert!(matches!(
            sizer.calculate_volume(1.2, 1.19, &acct, 1.0),
            Err(SizingError::Conversion { .. })
        ));
    }

    #[test]
    fn test_conversion_paths() {
        let acct = PaperAccount::new(10_000.0, "EUR", spec())
            .with_rate("EURUSD", 1.25)
            .with_rate("USDJPY", 150.0)
            .with_rate("GBPUSD", 1.5);

        // inverse of EURUSD
        assert_relative_eq!(
            conversion_rate(&acct, "USD", "EUR", "USD").unwrap(),
            0.8,
            epsilon = 1e-12
        );
        // direct
        assert_relative_eq!(
            conversion_rate(&acct, "EUR", "USD", "USD").unwrap(),
            1.25,
            epsilon = 1e-12
        );
        // JPY -> USD -> EUR
        assert_relative_eq!(
            conversion_rate(&acct, "JPY", "EUR", "USD").unwrap(),
            (1.0 / 150.0) * 0.8,
            epsilon = 1e-12
        );
        // GBP -> USD -> EUR
        assert_relative_eq!(
            conversion_rate(&acct, "GBP", "EUR", "USD").unwrap(),
            1.5 * 0.8,
            epsilon = 1e-12
        );
        assert!(conversion_rate(&acct, "CHF", "EUR", "USD").is_none());
    }

    #[test]
    fn test_normalize_volume() {
        assert_relative_eq!(normalize_volume(2.0, 0.01, 100.0, 0.01), 2.0);
        assert_relative_eq!(normalize_volume(1.23999, 0.01, 100.0, 0.01), 1.23);
        assert_relative_eq!(normalize_volume(500.0, 0.01, 100.0, 0.01), 100.0);
        assert_relative_eq!(normalize_volume(0.001, 0.01, 100.0, 0.01), 0.01);
        assert_relative_eq!(normalize_volume(0.29, 0.1, 10.0, 0.1), 0.2);
    }
}
