use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use fx_terminal_automation::AutomationEvent;
use fx_terminal_core::{AppConfig, Broker, MonitorStore, SymbolMap};
use fx_terminal_execution::OrderExecutor;

use crate::push::TickThrottle;

/// Everything a session or HTTP handler needs, shared across connections.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<dyn Broker>,
    pub executor: Arc<OrderExecutor>,
    pub monitors: Arc<MonitorStore>,
    pub symbols: Arc<RwLock<SymbolMap>>,
    pub throttle: Arc<TickThrottle>,
    pub automation_events: broadcast::Sender<AutomationEvent>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        executor: Arc<OrderExecutor>,
        monitors: Arc<MonitorStore>,
        automation_events: broadcast::Sender<AutomationEvent>,
        config: AppConfig,
    ) -> Self {
        let throttle = Arc::new(TickThrottle::new(config.stream.tick_throttle()));
        Self {
            broker,
            executor,
            monitors,
            symbols: Arc::new(RwLock::new(SymbolMap::new())),
            throttle,
            automation_events,
            config: Arc::new(config),
        }
    }
}
