//! Liquidity Trap Engine
//!
//! Single-symbol trading engine that fades false breakouts of liquidity
//! zones. Classifies the market, adapts risk to losing streaks, sizes
//! positions against account risk and manages them through trailing,
//! closure reconciliation and restart adoption.

pub mod analytics;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod indicators;
pub mod oms;
pub mod regime;
pub mod report;
pub mod risk;
pub mod sizing;
pub mod state_manager;
pub mod strategy;
pub mod types;
pub mod volume_profile;

pub use config::Config;
pub use engine::{BarDecision, Engine};
pub use types::*;
