use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TradeError;
use crate::types::{
    AccountInfo, Bar, Deal, FillPolicy, InstrumentInfo, PendingKind, PendingOrder, Position,
    PositionSide, Tick, Timeframe,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub login: u64,
    pub password: String,
    pub server: String,
}

/// A single trade round-trip. Every variant is treated by the broker as
/// atomic; local bookkeeping only changes after a confirmed done retcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TradeRequest {
    /// Market execution. `position: Some(ticket)` closes (part of) an
    /// existing position, `None` opens a new one.
    Deal {
        symbol: String,
        side: PositionSide,
        volume: Decimal,
        price: Decimal,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
        position: Option<u64>,
        deviation: u32,
        fill_policy: FillPolicy,
        comment: String,
    },
    Pending {
        symbol: String,
        kind: PendingKind,
        volume: Decimal,
        price: Decimal,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
        fill_policy: FillPolicy,
        comment: String,
    },
    /// In-place stop-loss/take-profit amendment of an open position.
    ModifyStops {
        ticket: u64,
        symbol: String,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
    },
    /// Cancels a pending order.
    Remove { ticket: u64 },
}

pub const RETCODE_DONE: u32 = 10009;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResponse {
    pub retcode: u32,
    pub comment: String,
    pub order: u64,
    pub deal: u64,
    pub price: Decimal,
}

impl TradeResponse {
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.retcode == RETCODE_DONE
    }
}

/// The brokerage trading API, treated as an opaque synchronous service.
///
/// Every method is a suspension point; implementations must bound the wait
/// and surface expiry as [`TradeError::BrokerUnavailable`].
#[async_trait]
pub trait Broker: Send + Sync {
    fn connected(&self) -> bool;

    async fn connect(&self, credentials: &Credentials) -> Result<AccountInfo, TradeError>;

    async fn account_info(&self) -> Result<AccountInfo, TradeError>;

    async fn quote(&self, symbol: &str) -> Result<Option<Tick>, TradeError>;

    async fn instrument_info(&self, symbol: &str) -> Result<Option<InstrumentInfo>, TradeError>;

    async fn bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from_index: usize,
        count: usize,
    ) -> Result<Vec<Bar>, TradeError>;

    async fn positions(&self) -> Result<Vec<Position>, TradeError>;

    async fn position(&self, ticket: u64) -> Result<Option<Position>, TradeError>;

    async fn pending_orders(&self) -> Result<Vec<PendingOrder>, TradeError>;

    async fn pending_order(&self, ticket: u64) -> Result<Option<PendingOrder>, TradeError>;

    async fn submit(&self, request: &TradeRequest) -> Result<TradeResponse, TradeError>;

    async fn deals(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Deal>, TradeError>;
}
