use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fx_terminal_core::{AutomationSettings, PendingKind, PositionSide, StopUnit};

/// What kind of order a client asked for. Market orders carry their side
/// directly; limit orders imply it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Market(PositionSide),
    BuyLimit,
    SellLimit,
}

impl OrderKind {
    #[must_use]
    pub const fn side(self) -> PositionSide {
        match self {
            Self::Market(side) => side,
            Self::BuyLimit => PositionSide::Buy,
            Self::SellLimit => PositionSide::Sell,
        }
    }

    #[must_use]
    pub const fn pending_kind(self) -> Option<PendingKind> {
        match self {
            Self::Market(_) => None,
            Self::BuyLimit => Some(PendingKind::BuyLimit),
            Self::SellLimit => Some(PendingKind::SellLimit),
        }
    }
}

/// A stop-loss or take-profit distance as the client expressed it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StopSpec {
    pub value: Decimal,
    pub unit: StopUnit,
}

/// Automation parameters attached to an order at placement time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationRequest {
    #[serde(default)]
    pub trailing: bool,
    pub trailing_profit: Option<Decimal>,
    pub trailing_distance: Option<Decimal>,
    #[serde(default)]
    pub breakeven: bool,
    pub breakeven_profit: Option<Decimal>,
    pub partial_close_profit: Option<Decimal>,
}

impl AutomationRequest {
    /// Whether any rule is switched on. Inactive requests create no
    /// monitoring record at all.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.trailing || self.breakeven || self.partial_close_profit.is_some()
    }

    #[must_use]
    pub fn to_settings(&self) -> AutomationSettings {
        let defaults = AutomationSettings::default();
        AutomationSettings {
            trailing: self.trailing,
            trailing_profit: self.trailing_profit.unwrap_or(defaults.trailing_profit),
            trailing_distance: self.trailing_distance.unwrap_or(defaults.trailing_distance),
            breakeven: self.breakeven,
            breakeven_profit: self.breakeven_profit.unwrap_or(defaults.breakeven_profit),
            partial_close_profit: self.partial_close_profit,
            ..defaults
        }
    }
}

/// A fully parsed order request, ready for the executor.
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub symbol: String,
    pub kind: OrderKind,
    pub volume: Decimal,
    /// Required for limit orders, ignored for market orders.
    pub limit_price: Option<Decimal>,
    pub stop_loss: Option<StopSpec>,
    pub take_profit: Option<StopSpec>,
    pub automation: Option<AutomationRequest>,
    pub comment: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn inactive_automation_creates_nothing() {
        assert!(!AutomationRequest::default().is_active());
        let partial_only = AutomationRequest {
            partial_close_profit: Some(dec!(20)),
            ..AutomationRequest::default()
        };
        assert!(partial_only.is_active());
    }

    #[test]
    fn settings_fall_back_to_defaults() {
        let request = AutomationRequest {
            trailing: true,
            trailing_profit: Some(dec!(15)),
            ..AutomationRequest::default()
        };
        let settings = request.to_settings();
        assert!(settings.trailing);
        assert_eq!(settings.trailing_profit, dec!(15));
        assert_eq!(settings.trailing_distance, dec!(5));
        assert!(!settings.breakeven_activated);
        assert!(!settings.partial_closed);
    }

    #[test]
    fn limit_kinds_map_to_pending() {
        assert_eq!(OrderKind::BuyLimit.pending_kind(), Some(PendingKind::BuyLimit));
        assert_eq!(OrderKind::Market(PositionSide::Sell).pending_kind(), None);
        assert_eq!(OrderKind::SellLimit.side(), PositionSide::Sell);
    }
}
