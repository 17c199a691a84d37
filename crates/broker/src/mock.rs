use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use fx_terminal_core::instrument::position_profit;
use fx_terminal_core::{
    AccountInfo, Bar, Broker, Credentials, Deal, FillModes, InstrumentInfo, PendingOrder,
    Position, PositionSide, Tick, Timeframe, TradeError, TradeRequest, TradeResponse,
    RETCODE_DONE,
};

const RETCODE_REJECT: u32 = 10013;

#[derive(Debug, Clone)]
struct Rejection {
    retcode: u32,
    comment: String,
}

#[derive(Default)]
struct MockState {
    quotes: HashMap<String, Tick>,
    instruments: HashMap<String, InstrumentInfo>,
    positions: BTreeMap<u64, Position>,
    pending: BTreeMap<u64, PendingOrder>,
    deals: Vec<Deal>,
    bars: HashMap<String, Vec<Bar>>,
    rejections: HashMap<String, Rejection>,
    submissions: Vec<TradeRequest>,
    next_ticket: u64,
}

/// In-memory broker used by executor, automation and server tests.
///
/// Market deals open and close positions against stored quotes, pending
/// orders sit in a book until `fill_pending` promotes them, and every
/// submitted request is recorded for assertions.
pub struct MockBroker {
    state: Mutex<MockState>,
    connected: AtomicBool,
    account: Mutex<AccountInfo>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_ticket: 1000,
                ..MockState::default()
            }),
            connected: AtomicBool::new(true),
            account: Mutex::new(AccountInfo {
                login: 7_000_001,
                server: "MockBroker-Demo".to_string(),
                balance: Decimal::from(10_000),
                equity: Decimal::from(10_000),
                margin: Decimal::ZERO,
                margin_free: Decimal::from(10_000),
                margin_level: Decimal::ZERO,
            }),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn set_quote(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        let mut state = self.state.lock().unwrap();
        state.quotes.insert(
            symbol.to_string(),
            Tick {
                bid,
                ask,
                time: Utc::now(),
            },
        );
    }

    pub fn set_instrument(&self, symbol: &str, info: InstrumentInfo) {
        let mut state = self.state.lock().unwrap();
        state.instruments.insert(symbol.to_string(), info);
    }

    /// Registers a five-digit forex instrument with all fill modes, the
    /// shape most tests want.
    pub fn set_default_instrument(&self, symbol: &str) {
        self.set_instrument(
            symbol,
            InstrumentInfo {
                digits: 5,
                point: Decimal::new(1, 5),
                volume_min: Decimal::new(1, 2),
                volume_max: Decimal::from(100),
                volume_step: Decimal::new(1, 2),
                fill_modes: FillModes(1 | 2 | 4),
            },
        );
    }

    pub fn set_bars(&self, symbol: &str, bars: Vec<Bar>) {
        let mut state = self.state.lock().unwrap();
        state.bars.insert(symbol.to_string(), bars);
    }

    /// All subsequent deal/pending submissions for `symbol` come back with a
    /// non-done retcode.
    pub fn reject_symbol(&self, symbol: &str, retcode: u32, comment: &str) {
        let mut state = self.state.lock().unwrap();
        state.rejections.insert(
            symbol.to_string(),
            Rejection {
                retcode,
                comment: comment.to_string(),
            },
        );
    }

    /// Seeds an already-open position and returns its ticket.
    pub fn open_position(
        &self,
        symbol: &str,
        side: PositionSide,
        volume: Decimal,
        open_price: Decimal,
    ) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        state.positions.insert(
            ticket,
            Position {
                ticket,
                symbol: symbol.to_string(),
                side,
                volume,
                open_price,
                sl: None,
                tp: None,
                profit: Decimal::ZERO,
                swap: Decimal::ZERO,
                commission: Decimal::ZERO,
                comment: String::new(),
                current_price: open_price,
            },
        );
        ticket
    }

    /// Promotes a pending order into an open position. The order ticket is
    /// embedded in the new position's comment, mirroring how live brokers
    /// tie fills back to their originating order.
    pub fn fill_pending(&self, ticket: u64) -> Option<u64> {
        let mut state = self.state.lock().unwrap();
        let order = state.pending.remove(&ticket)?;
        state.next_ticket += 1;
        let position_ticket = state.next_ticket;
        state.positions.insert(
            position_ticket,
            Position {
                ticket: position_ticket,
                symbol: order.symbol,
                side: order.kind.side(),
                volume: order.volume,
                open_price: order.price,
                sl: order.sl,
                tp: order.tp,
                profit: Decimal::ZERO,
                swap: Decimal::ZERO,
                commission: Decimal::ZERO,
                comment: format!("order {ticket}"),
                current_price: order.price,
            },
        );
        Some(position_ticket)
    }

    pub fn push_deal(&self, deal: Deal) {
        let mut state = self.state.lock().unwrap();
        state.deals.push(deal);
    }

    /// Every request ever passed to `submit`, in order.
    #[must_use]
    pub fn submissions(&self) -> Vec<TradeRequest> {
        self.state.lock().unwrap().submissions.clone()
    }

    fn rejected(state: &MockState, symbol: &str) -> Option<TradeResponse> {
        state.rejections.get(symbol).map(|r| TradeResponse {
            retcode: r.retcode,
            comment: r.comment.clone(),
            order: 0,
            deal: 0,
            price: Decimal::ZERO,
        })
    }

    fn done(order: u64, deal: u64, price: Decimal) -> TradeResponse {
        TradeResponse {
            retcode: RETCODE_DONE,
            comment: "done".to_string(),
            order,
            deal,
            price,
        }
    }

    fn execute(state: &mut MockState, request: &TradeRequest) -> TradeResponse {
        match request {
            TradeRequest::Deal {
                symbol,
                side,
                volume,
                price,
                sl,
                tp,
                position,
                comment,
                ..
            } => {
                if let Some(response) = Self::rejected(state, symbol) {
                    return response;
                }
                match position {
                    Some(ticket) => {
                        let Some(existing) = state.positions.get_mut(ticket) else {
                            return TradeResponse {
                                retcode: RETCODE_REJECT,
                                comment: "position not found".to_string(),
                                order: 0,
                                deal: 0,
                                price: Decimal::ZERO,
                            };
                        };
                        if *volume >= existing.volume {
                            state.positions.remove(ticket);
                        } else {
                            existing.volume -= volume;
                        }
                        Self::done(*ticket, *ticket, *price)
                    }
                    None => {
                        state.next_ticket += 1;
                        let ticket = state.next_ticket;
                        state.positions.insert(
                            ticket,
                            Position {
                                ticket,
                                symbol: symbol.clone(),
                                side: *side,
                                volume: *volume,
                                open_price: *price,
                                sl: *sl,
                                tp: *tp,
                                profit: Decimal::ZERO,
                                swap: Decimal::ZERO,
                                commission: Decimal::ZERO,
                                comment: comment.clone(),
                                current_price: *price,
                            },
                        );
                        Self::done(ticket, ticket, *price)
                    }
                }
            }
            TradeRequest::Pending {
                symbol,
                kind,
                volume,
                price,
                sl,
                tp,
                comment,
                ..
            } => {
                if let Some(response) = Self::rejected(state, symbol) {
                    return response;
                }
                state.next_ticket += 1;
                let ticket = state.next_ticket;
                state.pending.insert(
                    ticket,
                    PendingOrder {
                        ticket,
                        symbol: symbol.clone(),
                        kind: *kind,
                        volume: *volume,
                        price: *price,
                        sl: *sl,
                        tp: *tp,
                        time_setup: Utc::now(),
                        comment: comment.clone(),
                    },
                );
                Self::done(ticket, 0, *price)
            }
            TradeRequest::ModifyStops { ticket, sl, tp, .. } => {
                let Some(existing) = state.positions.get_mut(ticket) else {
                    return TradeResponse {
                        retcode: RETCODE_REJECT,
                        comment: "position not found".to_string(),
                        order: 0,
                        deal: 0,
                        price: Decimal::ZERO,
                    };
                };
                existing.sl = *sl;
                existing.tp = *tp;
                Self::done(*ticket, 0, Decimal::ZERO)
            }
            TradeRequest::Remove { ticket } => {
                if state.pending.remove(ticket).is_none() {
                    return TradeResponse {
                        retcode: RETCODE_REJECT,
                        comment: "order not found".to_string(),
                        order: 0,
                        deal: 0,
                        price: Decimal::ZERO,
                    };
                }
                Self::done(*ticket, 0, Decimal::ZERO)
            }
        }
    }
}

#[async_trait]
impl Broker for MockBroker {
    fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn connect(&self, _credentials: &Credentials) -> Result<AccountInfo, TradeError> {
        self.connected.store(true, Ordering::Release);
        Ok(self.account.lock().unwrap().clone())
    }

    async fn account_info(&self) -> Result<AccountInfo, TradeError> {
        Ok(self.account.lock().unwrap().clone())
    }

    async fn quote(&self, symbol: &str) -> Result<Option<Tick>, TradeError> {
        Ok(self.state.lock().unwrap().quotes.get(symbol).cloned())
    }

    async fn instrument_info(&self, symbol: &str) -> Result<Option<InstrumentInfo>, TradeError> {
        Ok(self.state.lock().unwrap().instruments.get(symbol).cloned())
    }

    async fn bars(
        &self,
        symbol: &str,
        _timeframe: Timeframe,
        from_index: usize,
        count: usize,
    ) -> Result<Vec<Bar>, TradeError> {
        let state = self.state.lock().unwrap();
        let Some(bars) = state.bars.get(symbol) else {
            return Ok(Vec::new());
        };
        Ok(bars.iter().skip(from_index).take(count).cloned().collect())
    }

    async fn positions(&self) -> Result<Vec<Position>, TradeError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .positions
            .values()
            .map(|position| {
                let tick = state.quotes.get(&position.symbol);
                let mut snapshot = position.clone();
                snapshot.profit = position_profit(position, tick);
                if let Some(tick) = tick {
                    snapshot.current_price = match position.side {
                        PositionSide::Buy => tick.bid,
                        PositionSide::Sell => tick.ask,
                    };
                }
                snapshot
            })
            .collect())
    }

    async fn position(&self, ticket: u64) -> Result<Option<Position>, TradeError> {
        Ok(self.positions().await?.into_iter().find(|p| p.ticket == ticket))
    }

    async fn pending_orders(&self) -> Result<Vec<PendingOrder>, TradeError> {
        Ok(self.state.lock().unwrap().pending.values().cloned().collect())
    }

    async fn pending_order(&self, ticket: u64) -> Result<Option<PendingOrder>, TradeError> {
        Ok(self.state.lock().unwrap().pending.get(&ticket).cloned())
    }

    async fn submit(&self, request: &TradeRequest) -> Result<TradeResponse, TradeError> {
        let mut state = self.state.lock().unwrap();
        state.submissions.push(request.clone());
        Ok(Self::execute(&mut state, request))
    }

    async fn deals(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Deal>, TradeError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .deals
            .iter()
            .filter(|deal| deal.time >= from && deal.time <= to)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fx_terminal_core::{FillPolicy, PendingKind};
    use rust_decimal_macros::dec;

    fn open_request(symbol: &str, volume: Decimal, price: Decimal) -> TradeRequest {
        TradeRequest::Deal {
            symbol: symbol.to_string(),
            side: PositionSide::Buy,
            volume,
            price,
            sl: None,
            tp: None,
            position: None,
            deviation: 20,
            fill_policy: FillPolicy::FillOrKill,
            comment: String::new(),
        }
    }

    #[tokio::test]
    async fn deal_opens_then_partial_close_shrinks_volume() {
        let broker = MockBroker::new();
        let response = broker
            .submit(&open_request("EURUSD", dec!(0.10), dec!(1.1000)))
            .await
            .unwrap();
        assert!(response.is_done());
        let ticket = response.order;

        let close = TradeRequest::Deal {
            symbol: "EURUSD".to_string(),
            side: PositionSide::Sell,
            volume: dec!(0.05),
            price: dec!(1.1010),
            sl: None,
            tp: None,
            position: Some(ticket),
            deviation: 20,
            fill_policy: FillPolicy::FillOrKill,
            comment: String::new(),
        };
        broker.submit(&close).await.unwrap();

        let remaining = broker.position(ticket).await.unwrap().unwrap();
        assert_eq!(remaining.volume, dec!(0.05));
    }

    #[tokio::test]
    async fn positions_recompute_profit_from_quotes() {
        let broker = MockBroker::new();
        let ticket = broker.open_position("EURUSD", PositionSide::Buy, dec!(0.10), dec!(1.1000));
        broker.set_quote("EURUSD", dec!(1.1050), dec!(1.1052));

        let position = broker.position(ticket).await.unwrap().unwrap();
        assert_eq!(position.profit, dec!(50.000));
        assert_eq!(position.current_price, dec!(1.1050));
    }

    #[tokio::test]
    async fn fill_pending_ties_position_to_order_comment() {
        let broker = MockBroker::new();
        let response = broker
            .submit(&TradeRequest::Pending {
                symbol: "EURUSD".to_string(),
                kind: PendingKind::BuyLimit,
                volume: dec!(0.10),
                price: dec!(1.0900),
                sl: None,
                tp: None,
                fill_policy: FillPolicy::Return,
                comment: String::new(),
            })
            .await
            .unwrap();
        let order_ticket = response.order;

        let position_ticket = broker.fill_pending(order_ticket).unwrap();
        let position = broker.position(position_ticket).await.unwrap().unwrap();
        assert!(position.comment.contains(&order_ticket.to_string()));
        assert!(broker.pending_order(order_ticket).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejection_surfaces_as_non_done_retcode() {
        let broker = MockBroker::new();
        broker.reject_symbol("EURUSD", 10018, "market closed");
        let response = broker
            .submit(&open_request("EURUSD", dec!(0.10), dec!(1.1000)))
            .await
            .unwrap();
        assert!(!response.is_done());
        assert_eq!(response.retcode, 10018);
        assert_eq!(broker.submissions().len(), 1);
    }
}
