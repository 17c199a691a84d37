//! The autonomous position-management loop: stepped trailing stops,
//! breakeven protection and one-shot partial closes.

pub mod engine;

pub use engine::{AutomationEngine, AutomationEvent};
