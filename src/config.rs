//! Configuration management
//!
//! Handles loading and validation of the JSON configuration file. Every
//! section has defaults so a partial file (or `{}`) is a valid config.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub symbol: SymbolConfig,
    pub signal: SignalConfig,
    pub risk: RiskConfig,
    pub indicators: IndicatorConfig,
    pub multi_timeframe: MultiTimeframeConfig,
    pub loss_pause: LossPauseConfig,
    pub adaptive: AdaptiveConfig,
    pub state: StateConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let s = &self.signal;
        if s.lookback < 5 {
            bail!("signal.lookback must be >= 5 (got {})", s.lookback);
        }
        if s.wick_ratio <= 0.0 || s.body_ratio <= 0.0 {
            bail!("signal.wick_ratio and signal.body_ratio must be positive");
        }
        if s.use_volume_profile && (s.profile_buckets == 0 || s.profile_lookback < s.lookback) {
            bail!("signal.profile_buckets must be > 0 and profile_lookback >= lookback");
        }

        let r = &self.risk;
        if r.risk_percent <= 0.0 || r.risk_percent > 100.0 {
            bail!("risk.risk_percent must be in (0, 100] (got {})", r.risk_percent);
        }
        if r.max_positions == 0 {
            bail!("risk.max_positions must be >= 1");
        }
        if r.reward_ratio <= 0.0 {
            bail!("risk.reward_ratio must be positive");
        }
        if r.trailing_enabled && (r.trail_start <= 0.0 || r.trail_step_atr <= 0.0) {
            bail!("risk.trail_start and risk.trail_step_atr must be positive when trailing");
        }

        let i = &self.indicators;
        if i.rsi_oversold >= i.rsi_overbought {
            bail!(
                "indicators.rsi_oversold ({}) must be below rsi_overbought ({})",
                i.rsi_oversold,
                i.rsi_overbought
            );
        }
        if i.atr_period == 0 || i.ma_period == 0 || i.adx_period == 0 || i.rsi_period == 0 {
            bail!("indicator periods must be >= 1");
        }

        if self.multi_timeframe.enabled && self.multi_timeframe.timeframe_factor < 2 {
            bail!("multi_timeframe.timeframe_factor must be >= 2");
        }

        if self.loss_pause.enabled && self.loss_pause.trigger_losses == 0 {
            bail!("loss_pause.trigger_losses must be >= 1");
        }
        if self.adaptive.enabled && self.adaptive.trigger_losses == 0 {
            bail!("adaptive.trigger_losses must be >= 1");
        }

        Ok(())
    }

    /// SHA-256 fingerprint of the effective configuration
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&json))
    }
}

/// Instrument economics used by the paper venue and as sizing defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolConfig {
    pub name: String,
    pub point: f64,
    pub digits: u32,
    pub tick_size: f64,
    pub tick_value: f64,
    pub contract_size: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    /// Minimum stop distance in points
    pub stops_level: u32,
    pub base_currency: String,
    pub profit_currency: String,
    pub margin_currency: String,
}

impl Default for SymbolConfig {
    fn default() -> Self {
        SymbolConfig {
            name: "EURUSD".to_string(),
            point: 0.00001,
            digits: 5,
            tick_size: 0.00001,
            tick_value: 1.0,
            contract_size: 100_000.0,
            volume_min: 0.01,
            volume_max: 100.0,
            volume_step: 0.01,
            stops_level: 10,
            base_currency: "EUR".to_string(),
            profit_currency: "USD".to_string(),
            margin_currency: "EUR".to_string(),
        }
    }
}

/// Liquidity zone and trap pattern settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Bars scanned for swing extrema
    pub lookback: usize,
    /// Minimum wick / body ratio of a trap candle
    pub wick_ratio: f64,
    /// Minimum body / average bar size ratio of a trap candle
    pub body_ratio: f64,
    pub use_volume_profile: bool,
    pub profile_lookback: usize,
    pub profile_buckets: usize,
    /// Maximum pierce beyond a zone, in ATRs, for a false breakout
    pub false_breakout_margin_atr: f64,
    pub allow_trade_on_range: bool,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            lookback: 20,
            wick_ratio: 1.5,
            body_ratio: 0.3,
            use_volume_profile: true,
            profile_lookback: 100,
            profile_buckets: 20,
            false_breakout_margin_atr: 0.3,
            allow_trade_on_range: true,
        }
    }
}

/// Position risk settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Base risk per trade, percent of balance
    pub risk_percent: f64,
    pub max_positions: usize,
    pub stop_loss_atr_multiplier: f64,
    pub reward_ratio: f64,
    /// Entries are skipped when ATR exceeds this multiple of the average bar size
    pub max_atr_to_bar_ratio: f64,
    pub trailing_enabled: bool,
    /// Trailing starts once favourable excursion reaches this multiple of initial risk
    pub trail_start: f64,
    /// Trailing distance in ATRs
    pub trail_step_atr: f64,
    /// Pivot currency for two-hop conversion
    pub reference_currency: String,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            risk_percent: 1.0,
            max_positions: 1,
            stop_loss_atr_multiplier: 0.5,
            reward_ratio: 2.0,
            max_atr_to_bar_ratio: 3.0,
            trailing_enabled: true,
            trail_start: 1.0,
            trail_step_atr: 1.0,
            reference_currency: "USD".to_string(),
        }
    }
}

/// Indicator periods and base thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub atr_period: usize,
    pub ma_period: usize,
    pub adx_period: usize,
    pub rsi_period: usize,
    pub adx_threshold: f64,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            atr_period: 14,
            ma_period: 50,
            adx_period: 14,
            rsi_period: 14,
            adx_threshold: 25.0,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
        }
    }
}

/// Higher-timeframe trend confirmation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiTimeframeConfig {
    pub enabled: bool,
    /// Primary bars per higher-timeframe bar
    pub timeframe_factor: usize,
    pub ma_period: usize,
}

impl Default for MultiTimeframeConfig {
    fn default() -> Self {
        MultiTimeframeConfig {
            enabled: false,
            timeframe_factor: 4,
            ma_period: 50,
        }
    }
}

/// Consecutive-loss trading pause
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LossPauseConfig {
    pub enabled: bool,
    pub trigger_losses: u32,
    /// Bars after which a pause expires; 0 never expires
    pub auto_reset_bars: u32,
}

impl Default for LossPauseConfig {
    fn default() -> Self {
        LossPauseConfig {
            enabled: true,
            trigger_losses: 4,
            auto_reset_bars: 24,
        }
    }
}

/// Consecutive-loss risk and threshold adaptation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    pub trigger_losses: u32,
    pub adx_increment: f64,
    pub rsi_tighten: f64,
    pub adapt_adx: bool,
    pub adapt_rsi: bool,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        AdaptiveConfig {
            enabled: true,
            trigger_losses: 2,
            adx_increment: 5.0,
            rsi_tighten: 5.0,
            adapt_adx: true,
            adapt_rsi: true,
        }
    }
}

/// Persistence locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub state_dir: String,
    pub report_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        StateConfig {
            state_dir: "state".to_string(),
            report_path: "reports/closed_positions.csv".to_string(),
        }
    }
}
