use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub automation: AutomationConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Connection settings for the MetaTrader bridge gateway process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub rate_limit_per_sec: u32,
}

impl GatewayConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Engine evaluation cadence, seconds.
    pub cycle_secs: u64,
    /// Minimum gap between amendments of one position, seconds.
    pub cooldown_secs: u64,
}

impl AutomationConfig {
    #[must_use]
    pub const fn cycle(&self) -> Duration {
        Duration::from_secs(self.cycle_secs)
    }

    #[must_use]
    pub const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Per-session push cadence, milliseconds.
    pub push_interval_ms: u64,
    /// Process-wide per-instrument quote throttle, milliseconds.
    pub tick_throttle_ms: u64,
}

impl StreamConfig {
    #[must_use]
    pub const fn push_interval(&self) -> Duration {
        Duration::from_millis(self.push_interval_ms)
    }

    #[must_use]
    pub const fn tick_throttle(&self) -> Duration {
        Duration::from_millis(self.tick_throttle_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            gateway: GatewayConfig {
                base_url: "http://127.0.0.1:5055".to_string(),
                request_timeout_secs: 10,
                rate_limit_per_sec: 20,
            },
            automation: AutomationConfig {
                cycle_secs: 2,
                cooldown_secs: 5,
            },
            stream: StreamConfig {
                push_interval_ms: 500,
                tick_throttle_ms: 100,
            },
        }
    }
}
