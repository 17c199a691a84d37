use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use fx_terminal_core::{
    AccountInfo, Bar, Broker, Credentials, Deal, DealEntry, DealSide, FillModes, InstrumentInfo,
    PendingKind, PendingOrder, Position, PositionSide, Tick, Timeframe, TradeError, TradeRequest,
    TradeResponse,
};

use crate::client::GatewayClient;

/// [`Broker`] backed by the MetaTrader bridge gateway over HTTP.
pub struct GatewayBroker {
    client: GatewayClient,
    connected: AtomicBool,
}

impl GatewayBroker {
    #[must_use]
    pub fn new(client: GatewayClient) -> Self {
        Self {
            client,
            connected: AtomicBool::new(false),
        }
    }
}

fn optional_stop(value: Decimal) -> Option<Decimal> {
    if value.is_zero() {
        None
    } else {
        Some(value)
    }
}

#[derive(Debug, Deserialize)]
struct TickDto {
    bid: Decimal,
    ask: Decimal,
    time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct InstrumentDto {
    digits: u32,
    point: Decimal,
    volume_min: Decimal,
    volume_max: Decimal,
    volume_step: Decimal,
    filling_mode: u32,
}

#[derive(Debug, Deserialize)]
struct PositionDto {
    ticket: u64,
    symbol: String,
    side: PositionSide,
    volume: Decimal,
    #[serde(rename = "price_open")]
    open_price: Decimal,
    #[serde(default)]
    sl: Decimal,
    #[serde(default)]
    tp: Decimal,
    profit: Decimal,
    #[serde(default)]
    swap: Decimal,
    #[serde(default)]
    commission: Decimal,
    #[serde(default)]
    comment: String,
    #[serde(rename = "price_current")]
    current_price: Decimal,
}

impl From<PositionDto> for Position {
    fn from(dto: PositionDto) -> Self {
        Self {
            ticket: dto.ticket,
            symbol: dto.symbol,
            side: dto.side,
            volume: dto.volume,
            open_price: dto.open_price,
            sl: optional_stop(dto.sl),
            tp: optional_stop(dto.tp),
            profit: dto.profit,
            swap: dto.swap,
            commission: dto.commission,
            comment: dto.comment,
            current_price: dto.current_price,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PendingDto {
    ticket: u64,
    symbol: String,
    kind: PendingKind,
    volume: Decimal,
    price: Decimal,
    #[serde(default)]
    sl: Decimal,
    #[serde(default)]
    tp: Decimal,
    #[serde(default)]
    comment: String,
    time_setup: DateTime<Utc>,
}

impl From<PendingDto> for PendingOrder {
    fn from(dto: PendingDto) -> Self {
        Self {
            ticket: dto.ticket,
            symbol: dto.symbol,
            kind: dto.kind,
            volume: dto.volume,
            price: dto.price,
            sl: optional_stop(dto.sl),
            tp: optional_stop(dto.tp),
            comment: dto.comment,
            time_setup: dto.time_setup,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DealDto {
    ticket: u64,
    position_id: u64,
    symbol: String,
    side: DealSide,
    entry: DealEntry,
    volume: Decimal,
    price: Decimal,
    profit: Decimal,
    #[serde(default)]
    swap: Decimal,
    #[serde(default)]
    commission: Decimal,
    #[serde(default)]
    comment: String,
    time: DateTime<Utc>,
}

impl From<DealDto> for Deal {
    fn from(dto: DealDto) -> Self {
        Self {
            ticket: dto.ticket,
            position_id: dto.position_id,
            symbol: dto.symbol,
            side: dto.side,
            entry: dto.entry,
            volume: dto.volume,
            price: dto.price,
            profit: dto.profit,
            swap: dto.swap,
            commission: dto.commission,
            comment: dto.comment,
            time: dto.time,
        }
    }
}

#[async_trait]
impl Broker for GatewayBroker {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn connect(&self, credentials: &Credentials) -> Result<AccountInfo, TradeError> {
        let body = json!({
            "login": credentials.login,
            "password": credentials.password,
            "server": credentials.server,
        });
        let value = self.client.post("/connect", body).await?;
        let account: AccountInfo = serde_json::from_value(value)
            .map_err(|e| TradeError::BrokerUnavailable(format!("connect: {e}")))?;
        self.connected.store(true, Ordering::Release);
        debug!(login = credentials.login, "gateway session established");
        Ok(account)
    }

    async fn account_info(&self) -> Result<AccountInfo, TradeError> {
        let value = self.client.get("/account").await?;
        serde_json::from_value(value)
            .map_err(|e| TradeError::BrokerUnavailable(format!("account: {e}")))
    }

    async fn quote(&self, symbol: &str) -> Result<Option<Tick>, TradeError> {
        let value = self.client.get_query("/quote", &[("symbol", symbol)]).await?;
        if value.is_null() {
            return Ok(None);
        }
        let dto: TickDto = serde_json::from_value(value)
            .map_err(|e| TradeError::BrokerUnavailable(format!("quote: {e}")))?;
        Ok(Some(Tick {
            bid: dto.bid,
            ask: dto.ask,
            time: dto.time,
        }))
    }

    async fn instrument_info(&self, symbol: &str) -> Result<Option<InstrumentInfo>, TradeError> {
        let value = self
            .client
            .get_query("/instrument", &[("symbol", symbol)])
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let dto: InstrumentDto = serde_json::from_value(value)
            .map_err(|e| TradeError::BrokerUnavailable(format!("instrument: {e}")))?;
        Ok(Some(InstrumentInfo {
            digits: dto.digits,
            point: dto.point,
            volume_min: dto.volume_min,
            volume_max: dto.volume_max,
            volume_step: dto.volume_step,
            fill_modes: FillModes(dto.filling_mode),
        }))
    }

    async fn bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from_index: usize,
        count: usize,
    ) -> Result<Vec<Bar>, TradeError> {
        let value = self
            .client
            .get_query(
                "/bars",
                &[
                    ("symbol", symbol.to_string()),
                    ("timeframe", timeframe.as_str().to_string()),
                    ("from", from_index.to_string()),
                    ("count", count.to_string()),
                ],
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| TradeError::BrokerUnavailable(format!("bars: {e}")))
    }

    async fn positions(&self) -> Result<Vec<Position>, TradeError> {
        let value = self.client.get("/positions").await?;
        let dtos: Vec<PositionDto> = serde_json::from_value(value)
            .map_err(|e| TradeError::BrokerUnavailable(format!("positions: {e}")))?;
        Ok(dtos.into_iter().map(Position::from).collect())
    }

    async fn position(&self, ticket: u64) -> Result<Option<Position>, TradeError> {
        let positions = self.positions().await?;
        Ok(positions.into_iter().find(|p| p.ticket == ticket))
    }

    async fn pending_orders(&self) -> Result<Vec<PendingOrder>, TradeError> {
        let value = self.client.get("/orders").await?;
        let dtos: Vec<PendingDto> = serde_json::from_value(value)
            .map_err(|e| TradeError::BrokerUnavailable(format!("orders: {e}")))?;
        Ok(dtos.into_iter().map(PendingOrder::from).collect())
    }

    async fn pending_order(&self, ticket: u64) -> Result<Option<PendingOrder>, TradeError> {
        let orders = self.pending_orders().await?;
        Ok(orders.into_iter().find(|o| o.ticket == ticket))
    }

    async fn submit(&self, request: &TradeRequest) -> Result<TradeResponse, TradeError> {
        let body = serde_json::to_value(request)
            .map_err(|e| TradeError::InvalidParameter(e.to_string()))?;
        let value = self.client.post("/trade", body).await?;
        let response: TradeResponse = serde_json::from_value(value)
            .map_err(|e| TradeError::BrokerUnavailable(format!("trade: {e}")))?;
        if !response.is_done() {
            warn!(
                retcode = response.retcode,
                comment = %response.comment,
                "gateway rejected trade request"
            );
        }
        Ok(response)
    }

    async fn deals(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Deal>, TradeError> {
        let value = self
            .client
            .get_query(
                "/deals",
                &[("from", from.to_rfc3339()), ("to", to.to_rfc3339())],
            )
            .await?;
        let dtos: Vec<DealDto> = serde_json::from_value(value)
            .map_err(|e| TradeError::BrokerUnavailable(format!("deals: {e}")))?;
        Ok(dtos.into_iter().map(Deal::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn zero_stops_become_none() {
        assert_eq!(optional_stop(Decimal::ZERO), None);
        assert_eq!(optional_stop(dec!(1.0950)), Some(dec!(1.0950)));
    }

    #[test]
    fn position_dto_maps_zero_stops() {
        let dto: PositionDto = serde_json::from_value(serde_json::json!({
            "ticket": 101,
            "symbol": "EURUSD",
            "side": "buy",
            "volume": "0.10",
            "price_open": "1.1000",
            "profit": "12.50",
            "price_current": "1.1012",
        }))
        .unwrap();
        let position = Position::from(dto);
        assert_eq!(position.sl, None);
        assert_eq!(position.tp, None);
        assert_eq!(position.volume, dec!(0.10));
    }
}
