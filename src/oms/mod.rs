//! Position lifecycle
//!
//! - `types`: position records and their close facts
//! - `position_manager`: entries, trailing, closure detection, adoption
//! - `reconcile`: realized profit and exit attribution from deal history

pub mod position_manager;
pub mod reconcile;
pub mod types;

pub use position_manager::{EntryPlan, PositionManager};
pub use reconcile::{infer_exit, price_tolerance, reconcile, summarize_deals};
pub use types::{CloseFacts, PositionRecord, PositionState};
