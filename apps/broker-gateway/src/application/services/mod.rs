//! Application Services
//!
//! - `OrderTracker`: authoritative in-memory order view

mod order_tracker;

pub use order_tracker::{
    ApplyOutcome, CancelDecision, OrderTracker, OrderTrackerConfig, ReconcileSummary,
};
