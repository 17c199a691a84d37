use axum::extract::ws::{Message, WebSocket};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use fx_terminal_automation::AutomationEvent;
use fx_terminal_core::{PositionSide, Timeframe};
use fx_terminal_execution::{OrderIntent, OrderKind, StopSpec, StopValue};

use crate::history;
use crate::messages::{
    AutomationMessage, Candle, ClientMessage, ModifyMessage, OrderMessage, ServerMessage,
};
use crate::push;
use crate::state::AppState;

/// The instrument a session is watching: broker-native name plus the name
/// the client asked for.
struct Subscription {
    broker_symbol: String,
    display_symbol: String,
}

/// One connected client. All session state lives on this task and vanishes
/// with it on disconnect.
struct Session {
    state: AppState,
    subscription: Option<Subscription>,
    positions_fingerprint: Option<String>,
    pending_fingerprint: Option<String>,
}

/// Drives a websocket until the client goes away: a fixed-cadence push
/// loop, the automation event feed and the inbound command router all
/// interleave on this one task.
pub async fn serve_socket(mut socket: WebSocket, state: AppState) {
    let mut events = state.automation_events.subscribe();
    let mut push_timer = tokio::time::interval(state.config.stream.push_interval());
    push_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut session = Session {
        state,
        subscription: None,
        positions_fingerprint: None,
        pending_fingerprint: None,
    };
    info!("client session started");

    loop {
        tokio::select! {
            _ = push_timer.tick() => {
                session.push_cycle(&mut socket).await;
            }
            event = events.recv() => {
                if let Ok(event) = event {
                    let frame = ServerMessage::notify(describe_event(&event));
                    send(&mut socket, &frame).await;
                }
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        session.handle_text(&text, &mut socket).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("websocket receive error: {e}");
                        break;
                    }
                }
            }
        }
    }
    info!("client session ended");
}

fn describe_event(event: &AutomationEvent) -> String {
    match event {
        AutomationEvent::TrailingStepped { ticket, sl, .. } => {
            format!("Trailing stop for position #{ticket} moved to {sl}")
        }
        AutomationEvent::BreakevenActivated { ticket, price } => {
            format!("Position #{ticket} moved to breakeven at {price}")
        }
        AutomationEvent::PartialClosed { ticket, volume } => {
            format!("Closed {volume} lots of position #{ticket}")
        }
    }
}

async fn send(socket: &mut WebSocket, message: &ServerMessage) {
    match serde_json::to_string(message) {
        Ok(json) => {
            if let Err(e) = socket.send(Message::Text(json)).await {
                warn!("websocket send failed: {e}");
            }
        }
        Err(e) => error!("outbound frame serialization failed: {e}"),
    }
}

impl Session {
    /// One pass of the streaming loop: a throttled tick for the subscribed
    /// instrument, then positions and pending orders, each suppressed when
    /// nothing changed since the last push.
    async fn push_cycle(&mut self, socket: &mut WebSocket) {
        if !self.state.broker.connected() {
            return;
        }
        if let Some(sub) = &self.subscription {
            if self.state.throttle.allow(&sub.broker_symbol).await {
                match push::tick_message(
                    self.state.broker.as_ref(),
                    &sub.broker_symbol,
                    &sub.display_symbol,
                )
                .await
                {
                    Ok(Some(frame)) => send(socket, &frame).await,
                    Ok(None) => {}
                    Err(e) => warn!(symbol = %sub.broker_symbol, "tick push failed: {e}"),
                }
            }
        }
        self.push_positions(socket, false).await;
        self.push_pending(socket, false).await;
    }

    async fn push_positions(&mut self, socket: &mut WebSocket, force: bool) {
        match push::positions_snapshot(self.state.broker.as_ref()).await {
            Ok((positions, fingerprint)) => {
                if !force && self.positions_fingerprint.as_deref() == Some(&fingerprint) {
                    return;
                }
                self.positions_fingerprint = Some(fingerprint);
                send(socket, &ServerMessage::Positions { positions }).await;
            }
            Err(e) => warn!("positions push failed: {e}"),
        }
    }

    async fn push_pending(&mut self, socket: &mut WebSocket, force: bool) {
        match push::pending_snapshot(self.state.broker.as_ref()).await {
            Ok((orders, fingerprint)) => {
                if !force && self.pending_fingerprint.as_deref() == Some(&fingerprint) {
                    return;
                }
                self.pending_fingerprint = Some(fingerprint);
                send(socket, &ServerMessage::PendingOrders { orders }).await;
            }
            Err(e) => warn!("pending orders push failed: {e}"),
        }
    }

    async fn push_account(&self, socket: &mut WebSocket) {
        match push::account_message(self.state.broker.as_ref()).await {
            Ok(frame) => send(socket, &frame).await,
            Err(e) => {
                warn!("account push failed: {e}");
                send(socket, &ServerMessage::error("Failed to get account data")).await;
            }
        }
    }

    /// Refresh pushed after every confirmed trading command.
    async fn refresh_after_trade(&mut self, socket: &mut WebSocket) {
        self.push_account(socket).await;
        self.push_positions(socket, true).await;
        self.push_pending(socket, true).await;
    }

    async fn handle_text(&mut self, text: &str, socket: &mut WebSocket) {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("unparseable client frame: {e}");
                return;
            }
        };
        self.dispatch(message, socket).await;
    }

    async fn dispatch(&mut self, message: ClientMessage, socket: &mut WebSocket) {
        match message {
            ClientMessage::Request { data } => match data.as_str() {
                "initial" => {
                    self.push_account(socket).await;
                    self.push_positions(socket, true).await;
                    self.push_pending(socket, true).await;
                }
                "positions" => {
                    self.push_positions(socket, true).await;
                    self.push_pending(socket, true).await;
                }
                "account" => self.push_account(socket).await,
                other => info!("ignoring request for {other:?}"),
            },
            ClientMessage::Subscribe { symbol } => self.handle_subscribe(symbol, socket).await,
            ClientMessage::Order(order) => self.handle_order(order, socket).await,
            ClientMessage::Close { position_id } => {
                match self.state.executor.close_position(position_id).await {
                    Ok(()) => {
                        info!(ticket = position_id, "position closed");
                        self.refresh_after_trade(socket).await;
                    }
                    Err(e) => send(socket, &ServerMessage::error(format!("Close error: {e}"))).await,
                }
            }
            ClientMessage::CloseAll {} => self.handle_close_all(socket).await,
            ClientMessage::CloseMultiple { position_ids } => {
                let report = self.state.executor.close_many(&position_ids).await;
                info!(
                    closed = report.closed.len(),
                    errors = report.failed.len(),
                    "multiple close finished"
                );
                self.refresh_after_trade(socket).await;
            }
            ClientMessage::ClosePartial {
                position_id,
                volume,
            } => match self.state.executor.close_partial(position_id, volume).await {
                Ok(()) => {
                    send(
                        socket,
                        &ServerMessage::notify(format!(
                            "Closed {volume} lots of position #{position_id}"
                        )),
                    )
                    .await;
                    self.refresh_after_trade(socket).await;
                }
                Err(e) => {
                    send(socket, &ServerMessage::error(format!("Partial close error: {e}"))).await;
                }
            },
            ClientMessage::Modify(modify) => self.handle_modify(modify, socket).await,
            ClientMessage::Chart {
                symbol,
                timeframe,
                count,
            } => self.handle_chart(symbol, timeframe, count, socket).await,
            ClientMessage::History { from, to } => {
                self.handle_history(from.as_deref(), to.as_deref(), socket).await;
            }
            ClientMessage::Automation(message) => self.handle_automation(message).await,
            ClientMessage::CancelOrder { ticket } => {
                match self.state.executor.cancel_pending(ticket).await {
                    Ok(()) => {
                        send(socket, &ServerMessage::notify(format!("Order #{ticket} cancelled")))
                            .await;
                        self.push_pending(socket, true).await;
                        self.push_account(socket).await;
                    }
                    Err(e) => {
                        send(socket, &ServerMessage::error(format!("Cancel error: {e}"))).await;
                    }
                }
            }
            ClientMessage::ModifyPending {
                ticket,
                price,
                sl,
                tp,
            } => {
                match self
                    .state
                    .executor
                    .modify_pending(ticket, price, sl, tp, None)
                    .await
                {
                    Ok(new_ticket) => {
                        info!(old = ticket, new = new_ticket, "pending order modified");
                        send(socket, &ServerMessage::notify("Order modified successfully")).await;
                        self.push_pending(socket, true).await;
                    }
                    Err(e) => {
                        send(socket, &ServerMessage::error(format!("Modify error: {e}"))).await;
                    }
                }
            }
        }
    }

    async fn handle_subscribe(&mut self, symbol: String, socket: &mut WebSocket) {
        let broker_symbol = self.state.symbols.read().await.resolve(&symbol);
        info!(%symbol, %broker_symbol, "client subscribed");
        self.subscription = Some(Subscription {
            broker_symbol: broker_symbol.clone(),
            display_symbol: symbol.clone(),
        });
        if self.state.throttle.allow(&broker_symbol).await {
            match push::tick_message(self.state.broker.as_ref(), &broker_symbol, &symbol).await {
                Ok(Some(frame)) => send(socket, &frame).await,
                Ok(None) => {}
                Err(e) => warn!("initial tick failed: {e}"),
            }
        }
    }

    async fn handle_order(&mut self, order: OrderMessage, socket: &mut WebSocket) {
        if !self.state.broker.connected() {
            send(socket, &ServerMessage::error("Broker not connected")).await;
            return;
        }
        let side = if order.action == "sell" {
            PositionSide::Sell
        } else {
            PositionSide::Buy
        };
        let kind = match order.order_type.as_str() {
            "buy_limit" => OrderKind::BuyLimit,
            "sell_limit" => OrderKind::SellLimit,
            _ => OrderKind::Market(side),
        };
        let broker_symbol = self.state.symbols.read().await.resolve(&order.symbol);
        let intent = OrderIntent {
            symbol: broker_symbol,
            kind,
            volume: order.volume,
            limit_price: order.price,
            stop_loss: zip_stop(order.sl, order.sl_unit),
            take_profit: zip_stop(order.tp, order.tp_unit),
            automation: Some(order.automation),
            comment: match kind {
                OrderKind::Market(_) => "Terminal market order".to_string(),
                _ => "Terminal limit order".to_string(),
            },
        };

        match self.state.executor.place(&intent).await {
            Ok(placed) => {
                send(
                    socket,
                    &ServerMessage::Execution {
                        success: true,
                        order: Some(placed.ticket),
                        volume: Some(order.volume),
                        price: Some(placed.price),
                        symbol: Some(order.symbol),
                        side: Some(order.action),
                        error: None,
                    },
                )
                .await;
                self.refresh_after_trade(socket).await;
            }
            Err(e) => {
                error!("order failed: {e}");
                send(socket, &ServerMessage::execution_failure(e.to_string())).await;
                self.refresh_after_trade(socket).await;
            }
        }
    }

    async fn handle_close_all(&mut self, socket: &mut WebSocket) {
        match self.state.broker.positions().await {
            Ok(positions) if positions.is_empty() => {
                send(socket, &ServerMessage::error("No open positions")).await;
            }
            Ok(_) => match self.state.executor.close_all().await {
                Ok(report) => {
                    info!(
                        closed = report.closed.len(),
                        errors = report.failed.len(),
                        "close all finished"
                    );
                    self.refresh_after_trade(socket).await;
                }
                Err(e) => send(socket, &ServerMessage::error(format!("Close error: {e}"))).await,
            },
            Err(e) => send(socket, &ServerMessage::error(format!("Close error: {e}"))).await,
        }
    }

    async fn handle_modify(&mut self, modify: ModifyMessage, socket: &mut WebSocket) {
        let sl = modify
            .sl_price
            .map(StopValue::Price)
            .or(modify.sl.map(StopValue::ProfitOffset));
        let tp = modify
            .tp_price
            .map(StopValue::Price)
            .or(modify.tp.map(StopValue::ProfitOffset));
        match self
            .state
            .executor
            .modify_stops(modify.position_id, sl, tp)
            .await
        {
            Ok(()) => {
                info!(ticket = modify.position_id, "stops modified");
                self.push_positions(socket, true).await;
            }
            Err(e) => send(socket, &ServerMessage::error(format!("Modify error: {e}"))).await,
        }
    }

    async fn handle_chart(
        &mut self,
        symbol: String,
        timeframe: String,
        count: usize,
        socket: &mut WebSocket,
    ) {
        let broker_symbol = self.state.symbols.read().await.resolve(&symbol);
        let timeframe = Timeframe::parse(&timeframe);
        match self
            .state
            .broker
            .bars(&broker_symbol, timeframe, 0, count)
            .await
        {
            Ok(bars) if bars.is_empty() => {
                send(socket, &ServerMessage::error(format!("No data for {symbol}"))).await;
            }
            Ok(bars) => {
                let candles: Vec<Candle> = bars
                    .iter()
                    .map(|bar| Candle {
                        time: bar.time.timestamp_millis(),
                        open: bar.open,
                        high: bar.high,
                        low: bar.low,
                        close: bar.close,
                        volume: bar.tick_volume,
                    })
                    .collect();
                info!(%symbol, candles = candles.len(), "chart sent");
                send(socket, &ServerMessage::Chart { candles }).await;
            }
            Err(e) => send(socket, &ServerMessage::error(format!("Chart error: {e}"))).await,
        }
    }

    async fn handle_history(
        &mut self,
        from: Option<&str>,
        to: Option<&str>,
        socket: &mut WebSocket,
    ) {
        let (start, end) = history::parse_range(from, to);
        match self.state.broker.deals(start, end).await {
            Ok(deals) => {
                let trades = history::group_deals(&deals);
                send(socket, &ServerMessage::History { trades }).await;
            }
            Err(e) => send(socket, &ServerMessage::error(format!("History error: {e}"))).await,
        }
    }

    /// Settings updates keyed by the dialog that sent them: the trailing
    /// and breakeven dialogs carry enabled/profitTrigger/distance fields,
    /// anything else merges whichever fields are present. Disabling
    /// breakeven re-arms its one-shot guard.
    async fn handle_automation(&mut self, message: AutomationMessage) {
        let patch = message.settings;
        self.state
            .monitors
            .apply(message.position_id, move |settings| {
                match message.automation_type.as_deref() {
                    Some("trailing") => {
                        settings.trailing = patch.enabled.unwrap_or(false);
                        settings.trailing_profit =
                            patch.profit_trigger.unwrap_or(Decimal::TEN);
                        settings.trailing_distance =
                            patch.distance.unwrap_or_else(|| Decimal::from(5));
                    }
                    Some("breakeven") => {
                        settings.breakeven = patch.enabled.unwrap_or(false);
                        settings.breakeven_profit =
                            patch.profit_trigger.unwrap_or_else(|| Decimal::from(5));
                        if !settings.breakeven {
                            settings.breakeven_activated = false;
                        }
                    }
                    _ => {
                        if let Some(trailing) = patch.trailing {
                            settings.trailing = trailing;
                        }
                        if let Some(value) = patch.trailing_profit {
                            settings.trailing_profit = value;
                        }
                        if let Some(value) = patch.trailing_distance {
                            settings.trailing_distance = value;
                        }
                        if let Some(breakeven) = patch.breakeven {
                            settings.breakeven = breakeven;
                        }
                        if let Some(value) = patch.breakeven_profit {
                            settings.breakeven_profit = value;
                        }
                        if let Some(value) = patch.partial_close_profit {
                            settings.partial_close_profit = Some(value);
                        }
                    }
                }
            })
            .await;
        info!(ticket = message.position_id, "automation settings updated");
    }
}

fn zip_stop(value: Option<Decimal>, unit: Option<fx_terminal_core::StopUnit>) -> Option<StopSpec> {
    match (value, unit) {
        (Some(value), Some(unit)) => Some(StopSpec { value, unit }),
        _ => None,
    }
}
