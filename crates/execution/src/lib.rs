//! Order execution: validation, pricing and submission of client trade
//! requests, plus the automation bookkeeping tied to each placement.

pub mod executor;
pub mod intent;

pub use executor::{
    close_price, preferred_fill_policy, CloseReport, OrderExecutor, PlacedOrder, StopValue,
};
pub use intent::{AutomationRequest, OrderIntent, OrderKind, StopSpec};
