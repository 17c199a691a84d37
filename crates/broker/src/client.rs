use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{clock::DefaultClock, state::InMemoryState, Quota, RateLimiter};
use reqwest::Client;
use serde::Serialize;

use fx_terminal_core::{GatewayConfig, TradeError};

type DirectLimiter = RateLimiter<governor::state::direct::NotKeyed, InMemoryState, DefaultClock>;

/// HTTP client for the MetaTrader bridge gateway.
///
/// Every round-trip is rate-limited and bounded by the configured timeout;
/// expiry or a transport failure surfaces as [`TradeError::BrokerUnavailable`]
/// so no trading operation is ever left waiting on the gateway.
pub struct GatewayClient {
    http: Client,
    base_url: String,
    timeout: Duration,
    rate_limiter: Arc<DirectLimiter>,
}

impl GatewayClient {
    #[must_use]
    pub fn new(config: &GatewayConfig) -> Self {
        let per_second =
            NonZeroU32::new(config.rate_limit_per_sec.max(1)).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Self {
            http: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.request_timeout(),
            rate_limiter,
        }
    }

    pub async fn get(&self, endpoint: &str) -> Result<serde_json::Value, TradeError> {
        self.rate_limiter.until_ready().await;
        let url = format!("{}{}", self.base_url, endpoint);
        let send = async {
            let response = self.http.get(&url).send().await?;
            response.error_for_status()?.json().await
        };
        self.bounded(endpoint, send).await
    }

    pub async fn get_query<Q: Serialize>(
        &self,
        endpoint: &str,
        query: &Q,
    ) -> Result<serde_json::Value, TradeError> {
        self.rate_limiter.until_ready().await;
        let url = format!("{}{}", self.base_url, endpoint);
        let send = async {
            let response = self.http.get(&url).query(query).send().await?;
            response.error_for_status()?.json().await
        };
        self.bounded(endpoint, send).await
    }

    pub async fn post(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, TradeError> {
        self.rate_limiter.until_ready().await;
        let url = format!("{}{}", self.base_url, endpoint);
        let send = async {
            let response = self.http.post(&url).json(&body).send().await?;
            response.error_for_status()?.json().await
        };
        self.bounded(endpoint, send).await
    }

    async fn bounded<F>(&self, endpoint: &str, send: F) -> Result<serde_json::Value, TradeError>
    where
        F: std::future::Future<Output = Result<serde_json::Value, reqwest::Error>>,
    {
        match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TradeError::BrokerUnavailable(format!("{endpoint}: {e}"))),
            Err(_) => Err(TradeError::BrokerUnavailable(format!(
                "{endpoint}: no response within {:?}",
                self.timeout
            ))),
        }
    }
}
