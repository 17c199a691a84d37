use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fx_terminal_core::instrument::{money_to_price_delta, position_profit, InstrumentClass};
use fx_terminal_core::{
    AutomationConfig, AutomationSettings, Broker, MonitorStore, Position, PositionSide,
    TradeError, TradeRequest,
};
use fx_terminal_execution::OrderExecutor;

/// Stop amendments closer than this to the current stop are skipped.
const STOP_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 5);

/// Something the engine did to a position, fanned out to every connected
/// client session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AutomationEvent {
    TrailingStepped {
        ticket: u64,
        step: u32,
        sl: Decimal,
    },
    BreakevenActivated {
        ticket: u64,
        price: Decimal,
    },
    PartialClosed {
        ticket: u64,
        volume: Decimal,
    },
}

/// Single process-wide automation loop.
///
/// One engine evaluates every monitored position on a fixed cadence,
/// regardless of how many client sessions are connected. At most one
/// broker amendment is made per position per cycle, and a per-position
/// cooldown bounds the amendment rate.
pub struct AutomationEngine {
    broker: Arc<dyn Broker>,
    executor: Arc<OrderExecutor>,
    monitors: Arc<MonitorStore>,
    config: AutomationConfig,
    events: broadcast::Sender<AutomationEvent>,
}

impl AutomationEngine {
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        executor: Arc<OrderExecutor>,
        monitors: Arc<MonitorStore>,
        config: AutomationConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            broker,
            executor,
            monitors,
            config,
            events,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AutomationEvent> {
        self.events.subscribe()
    }

    /// Sender handle for fan-out wiring; sessions subscribe through it.
    #[must_use]
    pub fn events(&self) -> broadcast::Sender<AutomationEvent> {
        self.events.clone()
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.cycle());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(e) = self.run_cycle().await {
                    warn!("automation cycle failed: {e}");
                }
            }
        })
    }

    /// One evaluation pass over every monitored position.
    pub async fn run_cycle(&self) -> Result<(), TradeError> {
        if !self.broker.connected() {
            return Ok(());
        }
        let positions = self.broker.positions().await?;

        // Reconcile bookkeeping with the broker's view before evaluating:
        // filled pending orders adopt their staged settings, new positions
        // get defaults, closed ones are purged.
        for position in &positions {
            if !self.monitors.adopt_staged(position).await {
                self.monitors.ensure(position.ticket).await;
            }
        }
        let open: Vec<u64> = positions.iter().map(|p| p.ticket).collect();
        self.monitors.retain_open(&open).await;

        for position in &positions {
            let Some(settings) = self.monitors.get(position.ticket).await else {
                continue;
            };
            if !settings.cooled_down(self.config.cooldown()) {
                continue;
            }
            self.evaluate(position, &settings).await;
        }
        Ok(())
    }

    /// Applies the first rule that fires; the cooldown then covers the
    /// rest of this position's rules until the next eligible cycle.
    async fn evaluate(&self, position: &Position, settings: &AutomationSettings) {
        let tick = match self.broker.quote(&position.symbol).await {
            Ok(Some(tick)) => tick,
            Ok(None) => return,
            Err(e) => {
                debug!(symbol = %position.symbol, "quote fetch failed: {e}");
                return;
            }
        };
        let info = match self.broker.instrument_info(&position.symbol).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                debug!(symbol = %position.symbol, "no instrument info, skipping");
                return;
            }
            Err(e) => {
                debug!(symbol = %position.symbol, "instrument info fetch failed: {e}");
                return;
            }
        };
        let profit = position_profit(position, Some(&tick));

        if let Some(target) = settings.partial_close_profit {
            if !settings.partial_closed && profit >= target {
                let half = info.snap_volume(position.volume / Decimal::TWO);
                if half > Decimal::ZERO {
                    match self.executor.close_partial(position.ticket, half).await {
                        Ok(()) => {
                            self.monitors.mark_modified(position.ticket).await;
                            info!(
                                ticket = position.ticket,
                                %half,
                                "partial close triggered at ${profit}"
                            );
                            let _ = self.events.send(AutomationEvent::PartialClosed {
                                ticket: position.ticket,
                                volume: half,
                            });
                            return;
                        }
                        Err(e) => {
                            warn!(ticket = position.ticket, "partial close failed: {e}")
                        }
                    }
                }
            }
        }

        if settings.breakeven && !settings.breakeven_activated && profit >= settings.breakeven_profit
        {
            // Lock the position at one quoted point past entry.
            let target = match position.side {
                PositionSide::Buy => position.open_price + info.point,
                PositionSide::Sell => position.open_price - info.point,
            };
            if self.amend_stop(position, target, info.digits).await {
                self.monitors
                    .apply(position.ticket, |s| s.breakeven_activated = true)
                    .await;
                self.monitors.mark_modified(position.ticket).await;
                info!(ticket = position.ticket, "breakeven activated at {target}");
                let _ = self.events.send(AutomationEvent::BreakevenActivated {
                    ticket: position.ticket,
                    price: target,
                });
            }
            return;
        }

        if settings.trailing && profit >= settings.trailing_profit {
            let class = InstrumentClass::of(&position.symbol);
            let steps = (profit / settings.trailing_profit).floor();
            let movement = steps * settings.trailing_distance;
            let delta = money_to_price_delta(class, movement, position.volume);
            let target = match position.side {
                PositionSide::Buy => position.open_price + delta,
                PositionSide::Sell => position.open_price - delta,
            };
            // The stop only ever ratchets in the profit direction.
            let improves = match position.side {
                PositionSide::Buy => position.sl.map_or(true, |sl| target > sl),
                PositionSide::Sell => position.sl.map_or(true, |sl| target < sl),
            };
            if improves && self.amend_stop(position, target, info.digits).await {
                self.monitors.mark_modified(position.ticket).await;
                let step = steps.to_u32().unwrap_or(0);
                info!(
                    ticket = position.ticket,
                    step, "trailing stop moved to {target}"
                );
                let _ = self.events.send(AutomationEvent::TrailingStepped {
                    ticket: position.ticket,
                    step,
                    sl: target,
                });
            }
        }
    }

    /// Submits a stop-loss amendment, preserving the take-profit. Returns
    /// false without submitting when the stop already sits at the target.
    async fn amend_stop(&self, position: &Position, target: Decimal, digits: u32) -> bool {
        if let Some(current) = position.sl {
            if (current - target).abs() < STOP_EPSILON {
                return false;
            }
        }
        let request = TradeRequest::ModifyStops {
            ticket: position.ticket,
            symbol: position.symbol.clone(),
            sl: Some(target.round_dp(digits)),
            tp: position.tp,
        };
        match self.broker.submit(&request).await {
            Ok(response) if response.is_done() => true,
            Ok(response) => {
                warn!(
                    ticket = position.ticket,
                    retcode = response.retcode,
                    "stop amendment rejected: {}",
                    response.comment
                );
                false
            }
            Err(e) => {
                warn!(ticket = position.ticket, "stop amendment failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fx_terminal_broker::MockBroker;
    use fx_terminal_core::{InstrumentInfo, FillModes};
    use rust_decimal_macros::dec;

    fn rig(cooldown_secs: u64) -> (Arc<MockBroker>, Arc<MonitorStore>, AutomationEngine) {
        let broker = Arc::new(MockBroker::new());
        let monitors = Arc::new(MonitorStore::new());
        let executor = Arc::new(OrderExecutor::new(broker.clone(), monitors.clone()));
        let engine = AutomationEngine::new(
            broker.clone(),
            executor,
            monitors.clone(),
            AutomationConfig {
                cycle_secs: 2,
                cooldown_secs,
            },
        );
        (broker, monitors, engine)
    }

    fn modify_count(broker: &MockBroker) -> usize {
        broker
            .submissions()
            .iter()
            .filter(|r| matches!(r, TradeRequest::ModifyStops { .. }))
            .count()
    }

    #[tokio::test]
    async fn trailing_steps_from_the_open_price() {
        let (broker, monitors, engine) = rig(0);
        broker.set_default_instrument("EURUSD");
        let ticket = broker.open_position("EURUSD", PositionSide::Buy, dec!(0.10), dec!(1.1000));
        monitors
            .apply(ticket, |s| {
                s.trailing = true;
                s.trailing_profit = dec!(10);
                s.trailing_distance = dec!(5);
            })
            .await;

        // $50 profit on the trigger of $10 is five full steps of $5 each,
        // which is 0.0025 of price on 0.10 lots.
        broker.set_quote("EURUSD", dec!(1.1050), dec!(1.1052));
        engine.run_cycle().await.unwrap();

        let position = broker.position(ticket).await.unwrap().unwrap();
        assert_eq!(position.sl, Some(dec!(1.1025)));
    }

    #[tokio::test]
    async fn trailing_never_retreats() {
        let (broker, monitors, engine) = rig(0);
        broker.set_default_instrument("EURUSD");
        let ticket = broker.open_position("EURUSD", PositionSide::Buy, dec!(0.10), dec!(1.1000));
        monitors
            .apply(ticket, |s| {
                s.trailing = true;
                s.trailing_profit = dec!(10);
                s.trailing_distance = dec!(5);
            })
            .await;

        broker.set_quote("EURUSD", dec!(1.1025), dec!(1.1027));
        engine.run_cycle().await.unwrap();
        // Price falls back one step; the stop must stay where it is.
        broker.set_quote("EURUSD", dec!(1.1015), dec!(1.1017));
        engine.run_cycle().await.unwrap();

        let position = broker.position(ticket).await.unwrap().unwrap();
        assert_eq!(position.sl, Some(dec!(1.1010)));
        assert_eq!(modify_count(&broker), 1);
    }

    #[tokio::test]
    async fn short_trailing_moves_down() {
        let (broker, monitors, engine) = rig(0);
        broker.set_default_instrument("EURUSD");
        let ticket = broker.open_position("EURUSD", PositionSide::Sell, dec!(0.10), dec!(1.1000));
        monitors
            .apply(ticket, |s| {
                s.trailing = true;
                s.trailing_profit = dec!(10);
                s.trailing_distance = dec!(5);
            })
            .await;

        broker.set_quote("EURUSD", dec!(1.0973), dec!(1.0975));
        engine.run_cycle().await.unwrap();

        let position = broker.position(ticket).await.unwrap().unwrap();
        assert_eq!(position.sl, Some(dec!(1.0990)));
    }

    #[tokio::test]
    async fn breakeven_fires_once() {
        let (broker, monitors, engine) = rig(0);
        broker.set_default_instrument("EURUSD");
        let ticket = broker.open_position("EURUSD", PositionSide::Buy, dec!(0.10), dec!(1.1000));
        monitors
            .apply(ticket, |s| {
                s.breakeven = true;
                s.breakeven_profit = dec!(5);
            })
            .await;

        broker.set_quote("EURUSD", dec!(1.1010), dec!(1.1012));
        engine.run_cycle().await.unwrap();
        engine.run_cycle().await.unwrap();

        let position = broker.position(ticket).await.unwrap().unwrap();
        assert_eq!(position.sl, Some(dec!(1.10001)));
        assert_eq!(modify_count(&broker), 1);
        assert!(monitors.get(ticket).await.unwrap().breakeven_activated);
    }

    #[tokio::test]
    async fn gold_breakeven_uses_the_quoted_point() {
        let (broker, monitors, engine) = rig(0);
        broker.set_instrument(
            "XAUUSD",
            InstrumentInfo {
                digits: 2,
                point: dec!(0.01),
                volume_min: dec!(0.01),
                volume_max: dec!(50),
                volume_step: dec!(0.01),
                fill_modes: FillModes(1 | 2 | 4),
            },
        );
        let ticket = broker.open_position("XAUUSD", PositionSide::Buy, dec!(0.01), dec!(1900.00));
        monitors
            .apply(ticket, |s| {
                s.breakeven = true;
                s.breakeven_profit = dec!(5);
            })
            .await;

        // 5.30 of price on 0.01 lots of gold is $5.30. The stop lands one
        // quoted point of 0.01 past the entry.
        broker.set_quote("XAUUSD", dec!(1905.30), dec!(1905.50));
        engine.run_cycle().await.unwrap();

        let position = broker.position(ticket).await.unwrap().unwrap();
        assert_eq!(position.sl, Some(dec!(1900.01)));
    }

    #[tokio::test]
    async fn missing_instrument_info_skips_the_position() {
        let (broker, monitors, engine) = rig(0);
        let ticket = broker.open_position("EURUSD", PositionSide::Buy, dec!(0.10), dec!(1.1000));
        monitors
            .apply(ticket, |s| {
                s.trailing = true;
                s.trailing_profit = dec!(10);
                s.trailing_distance = dec!(5);
            })
            .await;

        // A quote alone is not enough; without instrument info the stop
        // could not be rounded to the right precision.
        broker.set_quote("EURUSD", dec!(1.1050), dec!(1.1052));
        engine.run_cycle().await.unwrap();

        let position = broker.position(ticket).await.unwrap().unwrap();
        assert_eq!(position.sl, None);
        assert_eq!(modify_count(&broker), 0);
    }

    #[tokio::test]
    async fn partial_close_snaps_the_half_to_the_lot_step() {
        let (broker, monitors, engine) = rig(0);
        broker.set_instrument(
            "USOIL",
            InstrumentInfo {
                digits: 3,
                point: dec!(0.001),
                volume_min: dec!(0.1),
                volume_max: dec!(100),
                volume_step: dec!(0.1),
                fill_modes: FillModes(1 | 2 | 4),
            },
        );
        let ticket = broker.open_position("USOIL", PositionSide::Buy, dec!(0.30), dec!(74.500));
        monitors
            .apply(ticket, |s| {
                s.partial_close_profit = Some(dec!(20));
            })
            .await;

        // Half of 0.30 is 0.15; the 0.1 step turns it into a 0.2 close.
        broker.set_quote("USOIL", dec!(75.500), dec!(75.530));
        engine.run_cycle().await.unwrap();

        let position = broker.position(ticket).await.unwrap().unwrap();
        assert_eq!(position.volume, dec!(0.10));
        assert!(monitors.get(ticket).await.unwrap().partial_closed);
    }

    #[tokio::test]
    async fn partial_close_halves_once() {
        let (broker, monitors, engine) = rig(0);
        broker.set_default_instrument("EURUSD");
        let ticket = broker.open_position("EURUSD", PositionSide::Buy, dec!(0.10), dec!(1.1000));
        monitors
            .apply(ticket, |s| {
                s.partial_close_profit = Some(dec!(20));
            })
            .await;

        broker.set_quote("EURUSD", dec!(1.1025), dec!(1.1027));
        engine.run_cycle().await.unwrap();
        engine.run_cycle().await.unwrap();

        let position = broker.position(ticket).await.unwrap().unwrap();
        assert_eq!(position.volume, dec!(0.05));
        assert!(monitors.get(ticket).await.unwrap().partial_closed);
    }

    #[tokio::test]
    async fn cooldown_defers_the_next_amendment() {
        let (broker, monitors, engine) = rig(60);
        broker.set_default_instrument("EURUSD");
        let ticket = broker.open_position("EURUSD", PositionSide::Buy, dec!(0.10), dec!(1.1000));
        monitors
            .apply(ticket, |s| {
                s.trailing = true;
                s.trailing_profit = dec!(10);
                s.trailing_distance = dec!(5);
            })
            .await;

        broker.set_quote("EURUSD", dec!(1.1025), dec!(1.1027));
        engine.run_cycle().await.unwrap();
        broker.set_quote("EURUSD", dec!(1.1045), dec!(1.1047));
        engine.run_cycle().await.unwrap();

        let position = broker.position(ticket).await.unwrap().unwrap();
        assert_eq!(position.sl, Some(dec!(1.1010)));
        assert_eq!(modify_count(&broker), 1);
    }

    #[tokio::test]
    async fn cycle_reconciles_filled_orders_and_closed_positions() {
        let (broker, monitors, engine) = rig(0);
        broker.set_default_instrument("EURUSD");
        broker.set_quote("EURUSD", dec!(1.0900), dec!(1.0902));

        let mut staged = AutomationSettings::default();
        staged.trailing = true;
        monitors.stage_pending(4242, staged).await;

        // Ghost entry for a position the broker no longer reports.
        monitors.ensure(31_337).await;

        let pending = fx_terminal_core::TradeRequest::Pending {
            symbol: "EURUSD".to_string(),
            kind: fx_terminal_core::PendingKind::BuyLimit,
            volume: dec!(0.10),
            price: dec!(1.0900),
            sl: None,
            tp: None,
            fill_policy: fx_terminal_core::FillPolicy::Return,
            comment: String::new(),
        };
        let response = broker.submit(&pending).await.unwrap();
        monitors.restage(4242, response.order).await;
        let position_ticket = broker.fill_pending(response.order).unwrap();

        engine.run_cycle().await.unwrap();

        assert!(monitors.get(position_ticket).await.unwrap().trailing);
        assert!(monitors.get(31_337).await.is_none());
        assert_eq!(monitors.staged_count().await, 0);
    }

    #[tokio::test]
    async fn disconnected_broker_is_a_quiet_cycle() {
        let (broker, _monitors, engine) = rig(0);
        broker.set_connected(false);
        engine.run_cycle().await.unwrap();
        assert!(broker.submissions().is_empty());
    }
}
