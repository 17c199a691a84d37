//! Full order lifecycle against the in-memory broker: a limit order placed
//! with automation attached, filled, managed by the engine and closed out.

use std::sync::Arc;

use rust_decimal_macros::dec;

use fx_terminal_automation::{AutomationEngine, AutomationEvent};
use fx_terminal_broker::MockBroker;
use fx_terminal_core::{
    AutomationConfig, Broker, FillModes, InstrumentInfo, MonitorStore, PositionSide,
};
use fx_terminal_execution::{AutomationRequest, OrderExecutor, OrderIntent, OrderKind};

fn rig() -> (
    Arc<MockBroker>,
    Arc<MonitorStore>,
    Arc<OrderExecutor>,
    AutomationEngine,
) {
    let broker = Arc::new(MockBroker::new());
    let monitors = Arc::new(MonitorStore::new());
    let executor = Arc::new(OrderExecutor::new(broker.clone(), monitors.clone()));
    let engine = AutomationEngine::new(
        broker.clone(),
        executor.clone(),
        monitors.clone(),
        AutomationConfig {
            cycle_secs: 2,
            cooldown_secs: 0,
        },
    );
    (broker, monitors, executor, engine)
}

#[tokio::test]
async fn limit_order_is_adopted_trailed_and_closed() {
    let (broker, monitors, executor, engine) = rig();
    broker.set_default_instrument("EURUSD");
    broker.set_quote("EURUSD", dec!(1.1000), dec!(1.1002));
    let mut events = engine.subscribe();

    let intent = OrderIntent {
        symbol: "EURUSD".to_string(),
        kind: OrderKind::BuyLimit,
        volume: dec!(0.10),
        limit_price: Some(dec!(1.0950)),
        stop_loss: None,
        take_profit: None,
        automation: Some(AutomationRequest {
            trailing: true,
            trailing_profit: Some(dec!(10)),
            trailing_distance: Some(dec!(5)),
            ..AutomationRequest::default()
        }),
        comment: "lifecycle".to_string(),
    };
    let placed = executor.place(&intent).await.unwrap();
    assert_eq!(monitors.staged_count().await, 1);

    // Price reaches the limit; the order fills and the next cycle adopts
    // the staged settings.
    broker.set_quote("EURUSD", dec!(1.0950), dec!(1.0952));
    let position_ticket = broker.fill_pending(placed.ticket).unwrap();
    engine.run_cycle().await.unwrap();
    assert_eq!(monitors.staged_count().await, 0);
    assert!(monitors.get(position_ticket).await.unwrap().trailing);

    // Price runs $25 into profit from the 1.0950 fill; the trailing rule
    // moves the stop two steps of $5, which is 0.0010 of price.
    broker.set_quote("EURUSD", dec!(1.0975), dec!(1.0977));
    engine.run_cycle().await.unwrap();
    let position = broker.position(position_ticket).await.unwrap().unwrap();
    assert_eq!(position.sl, Some(dec!(1.0960)));
    let event = events.recv().await.unwrap();
    assert!(matches!(
        event,
        AutomationEvent::TrailingStepped { ticket, .. } if ticket == position_ticket
    ));

    // Manual close: the monitor entry goes with the position.
    executor.close_position(position_ticket).await.unwrap();
    assert!(broker.position(position_ticket).await.unwrap().is_none());
    engine.run_cycle().await.unwrap();
    assert!(monitors.get(position_ticket).await.is_none());
}

#[tokio::test]
async fn market_order_with_partial_close_then_breakeven() {
    let (broker, monitors, executor, engine) = rig();
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
    broker.set_quote("XAUUSD", dec!(1900.00), dec!(1900.30));

    let intent = OrderIntent {
        symbol: "XAUUSD".to_string(),
        kind: OrderKind::Market(PositionSide::Buy),
        volume: dec!(0.10),
        limit_price: None,
        stop_loss: None,
        take_profit: None,
        automation: Some(AutomationRequest {
            breakeven: true,
            breakeven_profit: Some(dec!(5)),
            partial_close_profit: Some(dec!(20)),
            ..AutomationRequest::default()
        }),
        comment: String::new(),
    };
    let placed = executor.place(&intent).await.unwrap();
    let ticket = placed.deal;

    // $30 in profit on 0.10 lots of gold (bid 3.00 over the 1900.30 fill).
    // The partial close fires first and consumes this cycle.
    broker.set_quote("XAUUSD", dec!(1903.30), dec!(1903.60));
    engine.run_cycle().await.unwrap();
    let position = broker.position(ticket).await.unwrap().unwrap();
    assert_eq!(position.volume, dec!(0.05));
    assert!(position.sl.is_none());
    assert!(monitors.get(ticket).await.unwrap().partial_closed);

    // Next cycle the breakeven rule runs: entry plus one quoted point.
    engine.run_cycle().await.unwrap();
    let position = broker.position(ticket).await.unwrap().unwrap();
    assert_eq!(position.sl, Some(dec!(1900.31)));
    assert!(monitors.get(ticket).await.unwrap().breakeven_activated);
}
