//! Adaptive risk control
//!
//! Derives the per-cycle risk percentage and indicator thresholds from the
//! consecutive-loss counter, and owns the loss-pause state machine.
//!
//! # Tiers
//!
//! ```text
//! tier 0: losses <  adaptive trigger            -> 100% of base risk
//! tier 1: losses >= adaptive trigger            ->  50% of base risk
//! tier 2: losses >= pause trigger (> adaptive)  ->  25% of base risk
//! ```
//!
//! # Pause state machine
//!
//! ```text
//! Active --(pause enabled, losses >= trigger)--> Paused
//! Paused --(bars elapsed >= auto reset > 0)----> Active, losses = 0
//! Paused --(winning close)---------------------> Active, losses = 0
//! any    --(losses >= 10)----------------------> Active, losses = 0
//! ```

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{AdaptiveConfig, Config, LossPauseConfig};
use crate::Money;

/// Consecutive losses that force a full reset regardless of configuration
pub const HARD_RESET_LOSSES: u32 = 10;
/// Floor for the adaptive risk percentage
pub const MIN_RISK_PERCENT: f64 = 0.1;
const RSI_MIDPOINT: f64 = 50.0;

/// Whether new entries are allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PauseState {
    #[default]
    Active,
    Paused,
}

/// Result of a closed trade, by sign of realized profit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOutcome {
    Win,
    Loss,
    Breakeven,
}

impl TradeOutcome {
    pub fn from_profit(profit: Money) -> Self {
        if profit.is_positive() {
            TradeOutcome::Win
        } else if profit.is_negative() {
            TradeOutcome::Loss
        } else {
            TradeOutcome::Breakeven
        }
    }
}

/// Process-wide adaptive counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptiveState {
    pub consecutive_losses: u32,
    pub consecutive_wins: u32,
    pub pause_bars_elapsed: u32,
    pub pause: PauseState,
}

impl AdaptiveState {
    pub fn is_paused(&self) -> bool {
        self.pause == PauseState::Paused
    }

    /// Record a winning trade. Clears losses and any pause.
    pub fn record_win(&mut self) {
        self.consecutive_wins += 1;
        self.consecutive_losses = 0;
        self.pause_bars_elapsed = 0;
        self.pause = PauseState::Active;
    }

    /// Record a losing trade
    pub fn record_loss(&mut self) {
        self.consecutive_losses += 1;
        self.consecutive_wins = 0;
    }

    /// A filled entry ends the winning streak. Losses carry over.
    pub fn record_entry(&mut self) {
        self.consecutive_wins = 0;
    }

    /// Apply a closed trade's outcome. Breakeven leaves the counters alone.
    pub fn record_outcome(&mut self, outcome: TradeOutcome) {
        match outcome {
            TradeOutcome::Win => self.record_win(),
            TradeOutcome::Loss => self.record_loss(),
            TradeOutcome::Breakeven => {}
        }
    }

    fn clear_losses(&mut self) {
        self.consecutive_losses = 0;
        self.pause_bars_elapsed = 0;
        self.pause = PauseState::Active;
    }
}

/// Parameters derived for the current cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DynamicParams {
    pub risk_percent: f64,
    pub adx_threshold: f64,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// 0 normal, 1 reduced, 2 heavily reduced
    pub tier: u8,
}

/// Outcome of the per-cycle entry check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryGate {
    Open,
    Paused {
        bars_elapsed: u32,
        auto_reset_bars: u32,
    },
}

impl EntryGate {
    pub fn is_open(&self) -> bool {
        matches!(self, EntryGate::Open)
    }
}

/// Adaptive risk controller
#[derive(Debug, Clone)]
pub struct RiskController {
    base_risk_percent: f64,
    base_adx_threshold: f64,
    base_rsi_oversold: f64,
    base_rsi_overbought: f64,
    adaptive: AdaptiveConfig,
    pause: LossPauseConfig,
}

impl RiskController {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_risk_percent: config.risk.risk_percent,
            base_adx_threshold: config.indicators.adx_threshold,
            base_rsi_oversold: config.indicators.rsi_oversold,
            base_rsi_overbought: config.indicators.rsi_overbought,
            adaptive: config.adaptive.clone(),
            pause: config.loss_pause.clone(),
        }
    }

    pub fn base_risk_percent(&self) -> f64 {
        self.base_risk_percent
    }

    /// Adaptive tier for a loss count
    pub fn tier(&self, losses: u32) -> u8 {
        if !self.adaptive.enabled {
            return 0;
        }
        let pause_tier_active = self.pause.trigger_losses > self.adaptive.trigger_losses;
        if pause_tier_active && losses >= self.pause.trigger_losses {
            2
        } else if losses >= self.adaptive.trigger_losses {
            1
        } else {
            0
        }
    }

    /// Risk percentage for a loss count
    pub fn risk_percent(&self, losses: u32) -> f64 {
        if !self.adaptive.enabled {
            return self.base_risk_percent;
        }
        let multiplier = match self.tier(losses) {
            2 => 0.25,
            1 => 0.50,
            _ => 1.0,
        };
        (self.base_risk_percent * multiplier).max(MIN_RISK_PERCENT)
    }

    /// ADX threshold and RSI oversold/overbought for a loss count
    pub fn thresholds(&self, losses: u32) -> (f64, f64, f64) {
        let base = (
            self.base_adx_threshold,
            self.base_rsi_oversold,
            self.base_rsi_overbought,
        );
        if !self.adaptive.enabled || losses < self.adaptive.trigger_losses {
            return base;
        }

        let adx = if self.adaptive.adapt_adx {
            self.base_adx_threshold + self.adaptive.adx_increment
        } else {
            self.base_adx_threshold
        };

        if !self.adaptive.adapt_rsi {
            return (adx, base.1, base.2);
        }

        let oversold = (self.base_rsi_oversold + self.adaptive.rsi_tighten).min(RSI_MIDPOINT);
        let overbought = (self.base_rsi_overbought - self.adaptive.rsi_tighten).max(RSI_MIDPOINT);

        if oversold >= overbought {
            warn!(
                oversold,
                overbought,
                "Adaptive RSI thresholds crossed, reverting to base values"
            );
            return (adx, base.1, base.2);
        }

        (adx, oversold, overbought)
    }

    /// Derive this cycle's dynamic parameters
    pub fn derive(&self, state: &AdaptiveState) -> DynamicParams {
        let losses = state.consecutive_losses;
        let (adx_threshold, rsi_oversold, rsi_overbought) = self.thresholds(losses);
        DynamicParams {
            risk_percent: self.risk_percent(losses),
            adx_threshold,
            rsi_oversold,
            rsi_overbought,
            tier: self.tier(losses),
        }
    }

    /// Run the hard-reset and pause state machine for one entry-check cycle
    pub fn check_entry(&self, state: &mut AdaptiveState) -> EntryGate {
        if state.consecutive_losses >= HARD_RESET_LOSSES {
            warn!(
                losses = state.consecutive_losses,
                "Hard reset of consecutive losses"
            );
            state.clear_losses();
        }

        if self.pause.enabled && state.consecutive_losses >= self.pause.trigger_losses {
            if !state.is_paused() {
                info!(
                    losses = state.consecutive_losses,
                    auto_reset_bars = self.pause.auto_reset_bars,
                    "Trading paused after consecutive losses"
                );
                state.pause = PauseState::Paused;
            }
            state.pause_bars_elapsed += 1;

            if self.pause.auto_reset_bars > 0
                && state.pause_bars_elapsed >= self.pause.auto_reset_bars
            {
                info!(
                    bars = state.pause_bars_elapsed,
                    "Pause expired, consecutive losses reset"
                );
                state.clear_losses();
                return EntryGate::Open;
            }

            return EntryGate::Paused {
                bars_elapsed: state.pause_bars_elapsed,
                auto_reset_bars: self.pause.auto_reset_bars,
            };
        }

        if state.is_paused() {
            state.pause = PauseState::Active;
            state.pause_bars_elapsed = 0;
        }
        EntryGate::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> RiskController {
        RiskController::from_config(&Config::default())
    }

    fn state_with_losses(losses: u32) -> AdaptiveState {
        AdaptiveState {
            consecutive_losses: losses,
            ..Default::default()
        }
    }

    #[test]
    fn test_risk_tiers() {
        let rc = controller();
        // defaults: base 1.0, adaptive trigger 2, pause trigger 4
        assert_eq!(rc.risk_percent(0), 1.0);
        assert_eq!(rc.risk_percent(1), 1.0);
        assert_eq!(rc.risk_percent(2), 0.5);
        assert_eq!(rc.risk_percent(3), 0.5);
        assert_eq!(rc.risk_percent(4), 0.25);
        assert_eq!(rc.tier(4), 2);
    }

    #[test]
    fn test_entry_clears_win_streak_only() {
        let mut state = AdaptiveState {
            consecutive_wins: 3,
            ..Default::default()
        };
        state.record_entry();
        assert_eq!(state.consecutive_wins, 0);

        let mut state = state_with_losses(2);
        state.record_entry();
        assert_eq!(state.consecutive_losses, 2);
    }

    #[test]
    fn test_risk_floor() {
        let mut config = Config::default();
        config.risk.risk_percent = 0.2;
        let rc = RiskController::from_config(&config);
        assert_eq!(rc.risk_percent(5), MIN_RISK_PERCENT);
    }

    #[test]
    fn test_adaptive_disabled_uses_base() {
        let mut config = Config::default();
        config.adaptive.enabled = false;
        let rc = RiskController::from_config(&config);
        assert_eq!(rc.risk_percent(7), 1.0);
        assert_eq!(rc.thresholds(7), (25.0, 30.0, 70.0));
    }

    #[test]
    fn test_pause_tier_requires_higher_trigger() {
        let mut config = Config::default();
        config.loss_pause.trigger_losses = 2;
        config.adaptive.trigger_losses = 2;
        let rc = RiskController::from_config(&config);
        assert_eq!(rc.risk_percent(3), 0.5);
    }

    #[test]
    fn test_thresholds_tighten() {
        let rc = controller();
        assert_eq!(rc.thresholds(1), (25.0, 30.0, 70.0));
        assert_eq!(rc.thresholds(2), (30.0, 35.0, 65.0));
    }

    #[test]
    fn test_rsi_tightening_reverts_when_crossed() {
        let mut config = Config::default();
        config.adaptive.rsi_tighten = 25.0;
        let rc = RiskController::from_config(&config);
        let (_, oversold, overbought) = rc.thresholds(3);
        assert_eq!(oversold, 30.0);
        assert_eq!(overbought, 70.0);
    }

    #[test]
    fn test_rsi_tightening_never_crosses() {
        for tighten in [0.0, 5.0, 10.0, 19.0, 20.0, 21.0, 40.0, 100.0] {
            let mut config = Config::default();
            config.adaptive.rsi_tighten = tighten;
            let rc = RiskController::from_config(&config);
            let (_, oversold, overbought) = rc.thresholds(5);
            assert!(oversold < overbought, "tighten={tighten}");
        }
    }

    #[test]
    fn test_counters_mutually_exclusive() {
        let mut s = AdaptiveState::default();
        let outcomes = [
            TradeOutcome::Loss,
            TradeOutcome::Loss,
            TradeOutcome::Breakeven,
            TradeOutcome::Win,
            TradeOutcome::Win,
            TradeOutcome::Loss,
            TradeOutcome::Breakeven,
        ];
        for o in outcomes {
            s.record_outcome(o);
            assert!(s.consecutive_losses == 0 || s.consecutive_wins == 0);
        }
        assert_eq!(s.consecutive_losses, 1);
        assert_eq!(s.consecutive_wins, 0);
    }

    #[test]
    fn test_breakeven_leaves_counters() {
        let mut s = state_with_losses(2);
        s.record_outcome(TradeOutcome::from_profit(Money::ZERO));
        assert_eq!(s.consecutive_losses, 2);
    }

    #[test]
    fn test_pause_blocks_until_auto_reset() {
        let mut config = Config::default();
        config.loss_pause.auto_reset_bars = 3;
        let rc = RiskController::from_config(&config);
        let mut s = state_with_losses(4);

        assert!(!rc.check_entry(&mut s).is_open());
        assert!(s.is_paused());
        assert!(!rc.check_entry(&mut s).is_open());
        assert_eq!(s.pause_bars_elapsed, 2);

        assert!(rc.check_entry(&mut s).is_open());
        assert_eq!(s.consecutive_losses, 0);
        assert_eq!(s.pause_bars_elapsed, 0);
        assert!(!s.is_paused());
    }

    #[test]
    fn test_pause_without_auto_reset_needs_win() {
        let mut config = Config::default();
        config.loss_pause.auto_reset_bars = 0;
        let rc = RiskController::from_config(&config);
        let mut s = state_with_losses(4);

        for _ in 0..100 {
            assert!(!rc.check_entry(&mut s).is_open());
        }
        s.record_win();
        assert_eq!(s.consecutive_losses, 0);
        assert_eq!(s.pause_bars_elapsed, 0);
        assert!(rc.check_entry(&mut s).is_open());
    }

    #[test]
    fn test_hard_reset_at_ten_losses() {
        let mut config = Config::default();
        config.loss_pause.enabled = false;
        let rc = RiskController::from_config(&config);
        let mut s = state_with_losses(HARD_RESET_LOSSES);

        assert!(rc.check_entry(&mut s).is_open());
        assert_eq!(s.consecutive_losses, 0);
    }

    #[test]
    fn test_hard_reset_clears_pause() {
        let mut config = Config::default();
        config.loss_pause.auto_reset_bars = 0;
        let rc = RiskController::from_config(&config);
        let mut s = state_with_losses(4);
        assert!(!rc.check_entry(&mut s).is_open());

        s.consecutive_losses = HARD_RESET_LOSSES;
        assert!(rc.check_entry(&mut s).is_open());
        assert_eq!(s.consecutive_losses, 0);
        assert!(!s.is_paused());
    }
}
