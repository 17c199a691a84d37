pub mod config;
pub mod config_loader;
pub mod error;
pub mod instrument;
pub mod monitor;
pub mod symbols;
pub mod traits;
pub mod types;

pub use config::{AppConfig, AutomationConfig, GatewayConfig, ServerConfig, StreamConfig};
pub use config_loader::ConfigLoader;
pub use error::TradeError;
pub use instrument::{
    money_to_price_delta, position_profit, round_price, stop_offset, InstrumentClass, StopUnit,
};
pub use monitor::{AutomationSettings, MonitorStore};
pub use symbols::SymbolMap;
pub use traits::{Broker, Credentials, TradeRequest, TradeResponse, RETCODE_DONE};
pub use types::{
    AccountInfo, Bar, Deal, DealEntry, DealSide, FillModes, FillPolicy, InstrumentInfo,
    PendingKind, PendingOrder, Position, PositionSide, Tick, Timeframe,
};
