use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fx_terminal_core::{PendingKind, PositionSide, StopUnit};
use fx_terminal_execution::AutomationRequest;

fn default_symbol() -> String {
    "EURUSD".to_string()
}

fn default_volume() -> Decimal {
    Decimal::new(1, 2)
}

fn default_order_type() -> String {
    "market".to_string()
}

fn default_timeframe() -> String {
    "H1".to_string()
}

fn default_count() -> usize {
    500
}

/// Inbound client command, dispatched on the `type` tag.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "request")]
    Request {
        #[serde(default)]
        data: String,
    },
    #[serde(rename = "subscribe")]
    Subscribe {
        #[serde(default = "default_symbol")]
        symbol: String,
    },
    #[serde(rename = "order")]
    Order(OrderMessage),
    #[serde(rename = "close")]
    Close {
        #[serde(rename = "positionId")]
        position_id: u64,
    },
    #[serde(rename = "closeAll")]
    CloseAll {},
    #[serde(rename = "closeMultiple")]
    CloseMultiple {
        #[serde(rename = "positionIds", default)]
        position_ids: Vec<u64>,
    },
    #[serde(rename = "closePartial")]
    ClosePartial {
        #[serde(rename = "positionId")]
        position_id: u64,
        volume: Decimal,
    },
    #[serde(rename = "modify")]
    Modify(ModifyMessage),
    #[serde(rename = "chart")]
    Chart {
        #[serde(default = "default_symbol")]
        symbol: String,
        #[serde(default = "default_timeframe")]
        timeframe: String,
        #[serde(default = "default_count")]
        count: usize,
    },
    #[serde(rename = "history")]
    History {
        from: Option<String>,
        to: Option<String>,
    },
    #[serde(rename = "automation")]
    Automation(AutomationMessage),
    #[serde(rename = "cancelOrder")]
    CancelOrder { ticket: u64 },
    #[serde(rename = "modifyPending")]
    ModifyPending {
        ticket: u64,
        price: Decimal,
        #[serde(default)]
        sl: Option<Decimal>,
        #[serde(default)]
        tp: Option<Decimal>,
    },
}

#[derive(Debug, Deserialize)]
pub struct OrderMessage {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_volume")]
    pub volume: Decimal,
    /// `buy` or `sell`.
    pub action: String,
    #[serde(rename = "order_type", default = "default_order_type")]
    pub order_type: String,
    pub price: Option<Decimal>,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    #[serde(rename = "sl_unit")]
    pub sl_unit: Option<StopUnit>,
    #[serde(rename = "tp_unit")]
    pub tp_unit: Option<StopUnit>,
    #[serde(flatten)]
    pub automation: AutomationRequest,
}

#[derive(Debug, Deserialize)]
pub struct ModifyMessage {
    #[serde(rename = "positionId")]
    pub position_id: u64,
    /// Absolute price levels take precedence over dollar offsets.
    #[serde(rename = "sl_price")]
    pub sl_price: Option<Decimal>,
    #[serde(rename = "tp_price")]
    pub tp_price: Option<Decimal>,
    /// Dollar distances measured from the open price.
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct AutomationMessage {
    #[serde(rename = "positionId")]
    pub position_id: u64,
    #[serde(rename = "automationType")]
    pub automation_type: Option<String>,
    #[serde(default)]
    pub settings: AutomationSettingsPatch,
}

/// Sparse settings payload: only present fields are applied.
#[derive(Debug, Default, Deserialize)]
pub struct AutomationSettingsPatch {
    pub enabled: Option<bool>,
    #[serde(rename = "profitTrigger")]
    pub profit_trigger: Option<Decimal>,
    pub distance: Option<Decimal>,
    pub trailing: Option<bool>,
    pub trailing_profit: Option<Decimal>,
    pub trailing_distance: Option<Decimal>,
    pub breakeven: Option<bool>,
    pub breakeven_profit: Option<Decimal>,
    pub partial_close_profit: Option<Decimal>,
}

/// Outbound frame, tagged the same way inbound frames are.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "account")]
    Account {
        balance: Decimal,
        equity: Decimal,
        margin: Decimal,
        #[serde(rename = "freeMargin")]
        free_margin: Decimal,
        #[serde(rename = "marginLevel")]
        margin_level: Decimal,
        server: String,
    },
    #[serde(rename = "tick")]
    Tick {
        symbol: String,
        bid: Decimal,
        ask: Decimal,
        spread: Decimal,
        open: Decimal,
        time: i64,
    },
    #[serde(rename = "positions")]
    Positions { positions: Vec<PositionPayload> },
    #[serde(rename = "pending_orders")]
    PendingOrders { orders: Vec<PendingPayload> },
    #[serde(rename = "execution")]
    Execution {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        order: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        volume: Option<Decimal>,
        #[serde(skip_serializing_if = "Option::is_none")]
        price: Option<Decimal>,
        #[serde(skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        side: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "chart")]
    Chart { candles: Vec<Candle> },
    #[serde(rename = "history")]
    History { trades: Vec<TradeRecord> },
    #[serde(rename = "notification")]
    Notification { message: String, level: String },
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn notify(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
            level: "success".to_string(),
        }
    }

    #[must_use]
    pub fn execution_failure(error: impl Into<String>) -> Self {
        Self::Execution {
            success: false,
            order: None,
            volume: None,
            price: None,
            symbol: None,
            side: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionPayload {
    pub id: u64,
    pub symbol: String,
    #[serde(rename = "type")]
    pub side: PositionSide,
    pub volume: Decimal,
    #[serde(rename = "openPrice")]
    pub open_price: Decimal,
    #[serde(rename = "currentPrice")]
    pub current_price: Decimal,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    pub profit: Decimal,
    pub commission: Decimal,
    pub swap: Decimal,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingPayload {
    pub ticket: u64,
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: PendingKind,
    pub volume: Decimal,
    pub price: Decimal,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    #[serde(rename = "time_setup")]
    pub time_setup: i64,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Candle {
    pub time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub id: u64,
    pub ticket: u64,
    pub symbol: String,
    #[serde(rename = "type")]
    pub side: String,
    pub volume: Decimal,
    #[serde(rename = "openTime")]
    pub open_time: i64,
    #[serde(rename = "closeTime")]
    pub close_time: i64,
    pub price: Decimal,
    #[serde(rename = "openPrice")]
    pub open_price: Decimal,
    #[serde(rename = "closePrice")]
    pub close_price: Decimal,
    pub profit: Decimal,
    pub commission: Decimal,
    pub swap: Decimal,
    pub comment: String,
    pub exit_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn order_message_carries_flattened_automation() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{
                "type": "order",
                "symbol": "XAUUSD",
                "volume": 0.05,
                "action": "buy",
                "order_type": "market",
                "sl": 50, "sl_unit": "dollar",
                "trailing": true, "trailing_profit": 10, "trailing_distance": 5
            }"#,
        )
        .unwrap();
        let ClientMessage::Order(order) = msg else {
            panic!("expected order");
        };
        assert_eq!(order.symbol, "XAUUSD");
        assert_eq!(order.sl, Some(dec!(50)));
        assert!(order.automation.trailing);
        assert_eq!(order.automation.trailing_profit, Some(dec!(10)));
    }

    #[test]
    fn camel_case_wire_names_parse() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type": "closeMultiple", "positionIds": [1, 2, 3]}"#,
        )
        .unwrap();
        let ClientMessage::CloseMultiple { position_ids } = msg else {
            panic!("expected closeMultiple");
        };
        assert_eq!(position_ids, vec![1, 2, 3]);
    }

    #[test]
    fn unknown_tag_is_a_parse_error() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "selfdestruct"}"#).is_err());
    }

    #[test]
    fn execution_failure_omits_trade_fields() {
        let json = serde_json::to_value(ServerMessage::execution_failure("rejected")).unwrap();
        assert_eq!(json["type"], "execution");
        assert_eq!(json["success"], false);
        assert!(json.get("order").is_none());
        assert_eq!(json["error"], "rejected");
    }

    #[test]
    fn position_payload_uses_wire_field_names() {
        let json = serde_json::to_value(ServerMessage::Positions {
            positions: vec![PositionPayload {
                id: 42,
                symbol: "EURUSD".to_string(),
                side: PositionSide::Buy,
                volume: dec!(0.10),
                open_price: dec!(1.1000),
                current_price: dec!(1.1020),
                sl: None,
                tp: Some(dec!(1.1100)),
                profit: dec!(20.00),
                commission: dec!(0),
                swap: dec!(0),
                comment: String::new(),
            }],
        })
        .unwrap();
        let position = &json["positions"][0];
        assert_eq!(position["type"], "buy");
        assert_eq!(position["openPrice"], "1.1000");
        assert!(position["sl"].is_null());
    }
}
