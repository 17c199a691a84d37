use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, warn};

use fx_terminal_core::instrument::{round_price, stop_offset, InstrumentClass, StopUnit};
use fx_terminal_core::{
    Broker, FillModes, FillPolicy, InstrumentInfo, MonitorStore, Position, PositionSide, Tick,
    TradeError, TradeRequest,
};

use crate::intent::{OrderIntent, OrderKind, StopSpec};

/// Maximum allowed slippage for market deals, in broker points.
const DEVIATION: u32 = 20;

/// Outcome of a successful placement.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub ticket: u64,
    pub deal: u64,
    pub price: Decimal,
}

/// Per-ticket outcome of a bulk close.
#[derive(Debug, Clone, Default)]
pub struct CloseReport {
    pub closed: Vec<u64>,
    pub failed: Vec<(u64, String)>,
}

/// New stop value for an in-place position amendment.
#[derive(Debug, Clone, Copy)]
pub enum StopValue {
    /// Absolute price level.
    Price(Decimal),
    /// Dollar distance measured from the open price.
    ProfitOffset(Decimal),
}

/// Validates, prices and submits every trading operation, and keeps the
/// automation bookkeeping in step with what the broker confirmed.
pub struct OrderExecutor {
    broker: Arc<dyn Broker>,
    monitors: Arc<MonitorStore>,
}

impl OrderExecutor {
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, monitors: Arc<MonitorStore>) -> Self {
        Self { broker, monitors }
    }

    #[must_use]
    pub fn monitors(&self) -> &Arc<MonitorStore> {
        &self.monitors
    }

    /// Places a market or limit order.
    ///
    /// # Errors
    ///
    /// `NotConnected` before login, `InvalidParameter` for an unknown symbol
    /// or a limit order without a positive price, `QuoteUnavailable` when
    /// the instrument has no current tick, and `BrokerRejected` when the
    /// broker answers with a non-done retcode.
    pub async fn place(&self, intent: &OrderIntent) -> Result<PlacedOrder, TradeError> {
        if !self.broker.connected() {
            return Err(TradeError::NotConnected);
        }
        let info = self
            .broker
            .instrument_info(&intent.symbol)
            .await?
            .ok_or_else(|| {
                TradeError::InvalidParameter(format!("unknown symbol {}", intent.symbol))
            })?;
        let volume = clamp_volume(&intent.symbol, intent.volume, &info);

        let tick = self
            .broker
            .quote(&intent.symbol)
            .await?
            .ok_or_else(|| TradeError::QuoteUnavailable(intent.symbol.clone()))?;

        let anchor = match intent.kind {
            OrderKind::Market(PositionSide::Buy) => tick.ask,
            OrderKind::Market(PositionSide::Sell) => tick.bid,
            OrderKind::BuyLimit | OrderKind::SellLimit => {
                let price = intent.limit_price.unwrap_or(Decimal::ZERO);
                if price <= Decimal::ZERO {
                    return Err(TradeError::InvalidParameter(
                        "limit order requires a positive price".to_string(),
                    ));
                }
                price
            }
        };

        let class = InstrumentClass::of(&intent.symbol);
        let side = intent.kind.side();
        let sl = intent
            .stop_loss
            .map(|spec| protective_stop(anchor, side, spec, class, volume, &info));
        let tp = intent
            .take_profit
            .map(|spec| profit_target(anchor, side, spec, class, volume, &info));

        let fill_policy = preferred_fill_policy(info.fill_modes);
        let request = match intent.kind.pending_kind() {
            None => TradeRequest::Deal {
                symbol: intent.symbol.clone(),
                side,
                volume,
                price: anchor,
                sl,
                tp,
                position: None,
                deviation: DEVIATION,
                fill_policy,
                comment: intent.comment.clone(),
            },
            Some(kind) => TradeRequest::Pending {
                symbol: intent.symbol.clone(),
                kind,
                volume,
                price: anchor,
                sl,
                tp,
                fill_policy,
                comment: intent.comment.clone(),
            },
        };

        let response = self.broker.submit(&request).await?;
        if !response.is_done() {
            return Err(TradeError::BrokerRejected {
                code: response.retcode,
                comment: response.comment,
            });
        }

        if let Some(automation) = intent.automation.as_ref().filter(|a| a.is_active()) {
            let settings = automation.to_settings();
            match intent.kind {
                OrderKind::Market(_) => {
                    // Deal id identifies the resulting position; some
                    // responses only carry the order id.
                    let key = if response.deal != 0 {
                        response.deal
                    } else {
                        response.order
                    };
                    self.monitors.insert(key, settings).await;
                }
                OrderKind::BuyLimit | OrderKind::SellLimit => {
                    self.monitors.stage_pending(response.order, settings).await;
                }
            }
        }

        info!(
            symbol = %intent.symbol,
            ticket = response.order,
            %volume,
            "order placed at {}",
            response.price
        );
        Ok(PlacedOrder {
            ticket: response.order,
            deal: response.deal,
            price: response.price,
        })
    }

    /// Closes a position at the current market price.
    pub async fn close_position(&self, ticket: u64) -> Result<(), TradeError> {
        let position = self
            .broker
            .position(ticket)
            .await?
            .ok_or(TradeError::PositionNotFound(ticket))?;
        self.close_volume(&position, position.volume).await?;
        self.monitors.remove(ticket).await;
        Ok(())
    }

    /// Closes part of a position, snapped to the instrument's lot step and
    /// clamped to its live volume. Marks the position's partial-close rule
    /// as spent so automation will not close it a second time.
    pub async fn close_partial(&self, ticket: u64, volume: Decimal) -> Result<(), TradeError> {
        let position = self
            .broker
            .position(ticket)
            .await?
            .ok_or(TradeError::PositionNotFound(ticket))?;
        if volume <= Decimal::ZERO {
            return Err(TradeError::InvalidParameter(
                "close volume must be positive".to_string(),
            ));
        }
        let volume = match self.broker.instrument_info(&position.symbol).await? {
            Some(info) => info.snap_volume(volume),
            None => volume,
        };
        let volume = volume.min(position.volume);
        self.close_volume(&position, volume).await?;
        if volume >= position.volume {
            self.monitors.remove(ticket).await;
        } else {
            self.monitors.set_partial_closed(ticket).await;
        }
        Ok(())
    }

    /// Closes every open position, continuing past individual failures.
    pub async fn close_all(&self) -> Result<CloseReport, TradeError> {
        let tickets: Vec<u64> = self
            .broker
            .positions()
            .await?
            .iter()
            .map(|p| p.ticket)
            .collect();
        Ok(self.close_many(&tickets).await)
    }

    pub async fn close_many(&self, tickets: &[u64]) -> CloseReport {
        let mut report = CloseReport::default();
        for &ticket in tickets {
            match self.close_position(ticket).await {
                Ok(()) => report.closed.push(ticket),
                Err(e) => {
                    warn!(ticket, "close failed: {e}");
                    report.failed.push((ticket, e.to_string()));
                }
            }
        }
        report
    }

    /// Cancels a pending order and drops any automation staged on it.
    pub async fn cancel_pending(&self, ticket: u64) -> Result<(), TradeError> {
        self.broker
            .pending_order(ticket)
            .await?
            .ok_or(TradeError::OrderNotFound(ticket))?;
        let response = self.broker.submit(&TradeRequest::Remove { ticket }).await?;
        if !response.is_done() {
            return Err(TradeError::BrokerRejected {
                code: response.retcode,
                comment: response.comment,
            });
        }
        self.monitors.discard_staged(ticket).await;
        Ok(())
    }

    /// Replaces a pending order with new parameters via cancel-and-recreate,
    /// following the staged automation to the new ticket. Returns the new
    /// order ticket.
    pub async fn modify_pending(
        &self,
        ticket: u64,
        price: Decimal,
        sl: Option<Decimal>,
        tp: Option<Decimal>,
        volume: Option<Decimal>,
    ) -> Result<u64, TradeError> {
        let existing = self
            .broker
            .pending_order(ticket)
            .await?
            .ok_or(TradeError::OrderNotFound(ticket))?;
        if price <= Decimal::ZERO {
            return Err(TradeError::InvalidParameter(
                "limit order requires a positive price".to_string(),
            ));
        }

        let cancel = self.broker.submit(&TradeRequest::Remove { ticket }).await?;
        if !cancel.is_done() {
            return Err(TradeError::BrokerRejected {
                code: cancel.retcode,
                comment: cancel.comment,
            });
        }

        let fill_policy = match self.broker.instrument_info(&existing.symbol).await? {
            Some(info) => preferred_fill_policy(info.fill_modes),
            None => FillPolicy::ImmediateOrCancel,
        };
        let request = TradeRequest::Pending {
            symbol: existing.symbol.clone(),
            kind: existing.kind,
            volume: volume.unwrap_or(existing.volume),
            price,
            sl: sl.or(existing.sl),
            tp: tp.or(existing.tp),
            fill_policy,
            comment: existing.comment.clone(),
        };
        let response = self.broker.submit(&request).await?;
        if !response.is_done() {
            return Err(TradeError::BrokerRejected {
                code: response.retcode,
                comment: response.comment,
            });
        }

        if self.monitors.restage(ticket, response.order).await {
            info!(
                old = ticket,
                new = response.order,
                "staged automation follows modified order"
            );
        }
        Ok(response.order)
    }

    /// Amends the stop-loss/take-profit of an open position. Unspecified
    /// sides keep their current value.
    pub async fn modify_stops(
        &self,
        ticket: u64,
        sl: Option<StopValue>,
        tp: Option<StopValue>,
    ) -> Result<(), TradeError> {
        let position = self
            .broker
            .position(ticket)
            .await?
            .ok_or(TradeError::PositionNotFound(ticket))?;
        let digits = match self.broker.instrument_info(&position.symbol).await? {
            Some(info) => info.digits,
            None => 5,
        };
        let class = InstrumentClass::of(&position.symbol);

        let resolve = |value: StopValue, protective: bool| -> Decimal {
            let price = match value {
                StopValue::Price(price) => price,
                StopValue::ProfitOffset(amount) => {
                    let delta =
                        stop_offset(class, amount, StopUnit::Dollar, position.volume);
                    match (position.side, protective) {
                        (PositionSide::Buy, true) | (PositionSide::Sell, false) => {
                            position.open_price - delta
                        }
                        (PositionSide::Buy, false) | (PositionSide::Sell, true) => {
                            position.open_price + delta
                        }
                    }
                }
            };
            round_price(price, digits)
        };

        let request = TradeRequest::ModifyStops {
            ticket,
            symbol: position.symbol.clone(),
            sl: sl.map(|v| resolve(v, true)).or(position.sl),
            tp: tp.map(|v| resolve(v, false)).or(position.tp),
        };
        let response = self.broker.submit(&request).await?;
        if !response.is_done() {
            return Err(TradeError::BrokerRejected {
                code: response.retcode,
                comment: response.comment,
            });
        }
        Ok(())
    }

    async fn close_volume(&self, position: &Position, volume: Decimal) -> Result<(), TradeError> {
        let tick = self
            .broker
            .quote(&position.symbol)
            .await?
            .ok_or_else(|| TradeError::QuoteUnavailable(position.symbol.clone()))?;
        let price = close_price(position.side, &tick);
        let fill_policy = match self.broker.instrument_info(&position.symbol).await? {
            Some(info) => preferred_fill_policy(info.fill_modes),
            None => FillPolicy::ImmediateOrCancel,
        };
        let request = TradeRequest::Deal {
            symbol: position.symbol.clone(),
            side: position.side.opposite(),
            volume,
            price,
            sl: None,
            tp: None,
            position: Some(position.ticket),
            deviation: DEVIATION,
            fill_policy,
            comment: String::new(),
        };
        let response = self.broker.submit(&request).await?;
        if !response.is_done() {
            return Err(TradeError::BrokerRejected {
                code: response.retcode,
                comment: response.comment,
            });
        }
        info!(ticket = position.ticket, %volume, "position volume closed");
        Ok(())
    }
}

/// A long closes at the bid, a short at the ask.
#[must_use]
pub fn close_price(side: PositionSide, tick: &Tick) -> Decimal {
    match side {
        PositionSide::Buy => tick.bid,
        PositionSide::Sell => tick.ask,
    }
}

/// First fill mode the instrument declares, probed in a fixed order. Falls
/// back to immediate-or-cancel when the broker declares none.
#[must_use]
pub fn preferred_fill_policy(modes: FillModes) -> FillPolicy {
    for policy in [
        FillPolicy::FillOrKill,
        FillPolicy::ImmediateOrCancel,
        FillPolicy::Return,
    ] {
        if modes.supports(policy) {
            return policy;
        }
    }
    FillPolicy::ImmediateOrCancel
}

/// Clamps a requested volume into the instrument's limits and snaps it to
/// the lot step. Out-of-range requests are adjusted, never refused.
fn clamp_volume(symbol: &str, requested: Decimal, info: &InstrumentInfo) -> Decimal {
    let mut volume = requested.clamp(info.volume_min, info.volume_max);
    if !info.volume_step.is_zero() {
        let steps = (volume / info.volume_step).floor();
        volume = (steps * info.volume_step).max(info.volume_min);
    }
    volume = volume.round_dp(2);
    if volume != requested {
        warn!(%symbol, %requested, adjusted = %volume, "volume clamped to instrument limits");
    }
    volume
}

fn protective_stop(
    anchor: Decimal,
    side: PositionSide,
    spec: StopSpec,
    class: InstrumentClass,
    volume: Decimal,
    info: &InstrumentInfo,
) -> Decimal {
    let offset = stop_offset(class, spec.value, spec.unit, volume);
    let price = match side {
        PositionSide::Buy => anchor - offset,
        PositionSide::Sell => anchor + offset,
    };
    round_price(price, info.digits)
}

fn profit_target(
    anchor: Decimal,
    side: PositionSide,
    spec: StopSpec,
    class: InstrumentClass,
    volume: Decimal,
    info: &InstrumentInfo,
) -> Decimal {
    let offset = stop_offset(class, spec.value, spec.unit, volume);
    let price = match side {
        PositionSide::Buy => anchor + offset,
        PositionSide::Sell => anchor - offset,
    };
    round_price(price, info.digits)
}
