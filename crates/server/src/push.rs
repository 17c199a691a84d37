use std::collections::HashMap;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::Mutex;

use fx_terminal_core::instrument::position_profit;
use fx_terminal_core::{Broker, PositionSide, SymbolMap, Timeframe, TradeError};

use crate::messages::{PendingPayload, PositionPayload, ServerMessage};

/// Process-wide per-instrument quote throttle, shared by every session so
/// the upstream polling rate is bounded regardless of client count.
pub struct TickThrottle {
    min_gap: Duration,
    last: Mutex<HashMap<String, Instant>>,
}

impl TickThrottle {
    #[must_use]
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true when enough time has passed since the last allowed
    /// fetch of this instrument, and stamps it.
    pub async fn allow(&self, symbol: &str) -> bool {
        let mut last = self.last.lock().await;
        let now = Instant::now();
        if let Some(previous) = last.get(symbol) {
            if now.duration_since(*previous) < self.min_gap {
                return false;
            }
        }
        last.insert(symbol.to_string(), now);
        true
    }
}

/// Builds the positions frame plus its dedup fingerprint: ticket, stops,
/// profit, volume and current price of every open position in ticket order.
pub async fn positions_snapshot(
    broker: &dyn Broker,
) -> Result<(Vec<PositionPayload>, String), TradeError> {
    let mut positions = broker.positions().await?;
    positions.sort_by_key(|p| p.ticket);

    let mut payloads = Vec::with_capacity(positions.len());
    let mut fingerprint = String::new();
    for position in &positions {
        let tick = broker.quote(&position.symbol).await?;
        let profit = position_profit(position, tick.as_ref()).round_dp(2);
        let current = tick.as_ref().map_or(position.current_price, |t| {
            match position.side {
                PositionSide::Buy => t.bid,
                PositionSide::Sell => t.ask,
            }
        });
        fingerprint.push_str(&format!(
            "{}_{}_{}_{}_{}_{}_",
            position.ticket,
            position.sl.unwrap_or_default(),
            position.tp.unwrap_or_default(),
            profit,
            position.volume,
            current
        ));
        payloads.push(PositionPayload {
            id: position.ticket,
            symbol: SymbolMap::to_canonical(&position.symbol),
            side: position.side,
            volume: position.volume,
            open_price: position.open_price,
            current_price: current,
            sl: position.sl,
            tp: position.tp,
            profit,
            commission: position.commission,
            swap: position.swap,
            comment: position.comment.clone(),
        });
    }
    Ok((payloads, fingerprint))
}

/// Builds the pending-orders frame plus a change fingerprint.
pub async fn pending_snapshot(
    broker: &dyn Broker,
) -> Result<(Vec<PendingPayload>, String), TradeError> {
    let mut orders = broker.pending_orders().await?;
    orders.sort_by_key(|o| o.ticket);

    let mut payloads = Vec::with_capacity(orders.len());
    let mut fingerprint = String::new();
    for order in &orders {
        fingerprint.push_str(&format!(
            "{}_{}_{}_{}_{}_",
            order.ticket,
            order.price,
            order.sl.unwrap_or_default(),
            order.tp.unwrap_or_default(),
            order.volume
        ));
        payloads.push(PendingPayload {
            ticket: order.ticket,
            symbol: SymbolMap::to_canonical(&order.symbol),
            kind: order.kind,
            volume: order.volume,
            price: order.price,
            sl: order.sl,
            tp: order.tp,
            time_setup: order.time_setup.timestamp_millis(),
            comment: order.comment.clone(),
        });
    }
    Ok((payloads, fingerprint))
}

/// Account frame; margin level reads zero while nothing is on margin.
pub async fn account_message(broker: &dyn Broker) -> Result<ServerMessage, TradeError> {
    let account = broker.account_info().await?;
    let margin_level = if account.margin > Decimal::ZERO {
        account.margin_level
    } else {
        Decimal::ZERO
    };
    Ok(ServerMessage::Account {
        balance: account.balance,
        equity: account.equity,
        margin: account.margin,
        free_margin: account.margin_free,
        margin_level,
        server: account.server,
    })
}

/// Tick frame for a subscribed instrument, or None when the broker has no
/// quote. The daily open comes from the latest D1 bar, falling back to the
/// bid; spread is reported in instrument points.
pub async fn tick_message(
    broker: &dyn Broker,
    broker_symbol: &str,
    display_symbol: &str,
) -> Result<Option<ServerMessage>, TradeError> {
    let Some(tick) = broker.quote(broker_symbol).await? else {
        return Ok(None);
    };
    let open = broker
        .bars(broker_symbol, Timeframe::D1, 0, 1)
        .await?
        .first()
        .map_or(tick.bid, |bar| bar.open);
    let spread = match broker.instrument_info(broker_symbol).await? {
        Some(info) if !info.point.is_zero() => ((tick.ask - tick.bid) / info.point).round_dp(1),
        _ => tick.ask - tick.bid,
    };
    Ok(Some(ServerMessage::Tick {
        symbol: display_symbol.to_string(),
        bid: tick.bid,
        ask: tick.ask,
        spread,
        open,
        time: tick.time.timestamp_millis(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fx_terminal_broker::MockBroker;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn identical_snapshots_share_a_fingerprint() {
        let broker = MockBroker::new();
        broker.open_position("EURUSD", PositionSide::Buy, dec!(0.10), dec!(1.1000));
        broker.set_quote("EURUSD", dec!(1.1020), dec!(1.1022));

        let (_, first) = positions_snapshot(&broker).await.unwrap();
        let (_, second) = positions_snapshot(&broker).await.unwrap();
        assert_eq!(first, second);

        broker.set_quote("EURUSD", dec!(1.1030), dec!(1.1032));
        let (_, third) = positions_snapshot(&broker).await.unwrap();
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn snapshot_strips_broker_suffixes() {
        let broker = MockBroker::new();
        broker.open_position("EURUSD.a", PositionSide::Buy, dec!(0.10), dec!(1.1000));
        let (payloads, _) = positions_snapshot(&broker).await.unwrap();
        assert_eq!(payloads[0].symbol, "EURUSD");
    }

    #[tokio::test]
    async fn tick_message_reports_spread_in_points() {
        let broker = MockBroker::new();
        broker.set_default_instrument("EURUSD+");
        broker.set_quote("EURUSD+", dec!(1.1000), dec!(1.10018));

        let message = tick_message(&broker, "EURUSD+", "EURUSD")
            .await
            .unwrap()
            .unwrap();
        let ServerMessage::Tick { symbol, spread, open, .. } = message else {
            panic!("expected tick");
        };
        assert_eq!(symbol, "EURUSD");
        assert_eq!(spread, dec!(18.0));
        // No D1 bar seeded, so the daily open falls back to the bid.
        assert_eq!(open, dec!(1.1000));
    }

    #[tokio::test]
    async fn throttle_blocks_within_the_window() {
        let throttle = TickThrottle::new(Duration::from_millis(100));
        assert!(throttle.allow("EURUSD").await);
        assert!(!throttle.allow("EURUSD").await);
        assert!(throttle.allow("GBPUSD").await);
    }
}
