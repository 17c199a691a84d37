use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Buy,
    Sell,
}

impl PositionSide {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingKind {
    BuyLimit,
    SellLimit,
}

impl PendingKind {
    /// Side of the position this order opens once filled.
    #[must_use]
    pub const fn side(self) -> PositionSide {
        match self {
            Self::BuyLimit => PositionSide::Buy,
            Self::SellLimit => PositionSide::Sell,
        }
    }
}

/// Broker-owned open position, mirrored read-only into the terminal.
///
/// Broker round-trips are the only authoritative mutation path; local code
/// never edits these fields directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    /// Broker-native instrument name (may carry a broker suffix).
    pub symbol: String,
    pub side: PositionSide,
    pub volume: Decimal,
    pub open_price: Decimal,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    pub profit: Decimal,
    pub swap: Decimal,
    pub commission: Decimal,
    pub comment: String,
    pub current_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrder {
    pub ticket: u64,
    pub symbol: String,
    pub kind: PendingKind,
    pub volume: Decimal,
    pub price: Decimal,
    pub sl: Option<Decimal>,
    pub tp: Option<Decimal>,
    pub time_setup: DateTime<Utc>,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub bid: Decimal,
    pub ask: Decimal,
    pub time: DateTime<Utc>,
}

/// Broker-declared order-matching modes for an instrument, as a bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillModes(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    FillOrKill,
    ImmediateOrCancel,
    Return,
}

impl FillPolicy {
    const fn mask(self) -> u32 {
        match self {
            Self::FillOrKill => 1,
            Self::ImmediateOrCancel => 2,
            Self::Return => 4,
        }
    }
}

impl FillModes {
    #[must_use]
    pub const fn supports(self, policy: FillPolicy) -> bool {
        self.0 & policy.mask() != 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub digits: u32,
    pub point: Decimal,
    pub volume_min: Decimal,
    pub volume_max: Decimal,
    pub volume_step: Decimal,
    pub fill_modes: FillModes,
}

impl InstrumentInfo {
    /// Rounds a volume to the nearest lot step, keeping at least the
    /// minimum tradable volume.
    #[must_use]
    pub fn snap_volume(&self, volume: Decimal) -> Decimal {
        if self.volume_step.is_zero() {
            return volume;
        }
        let steps = (volume / self.volume_step).round();
        (steps * self.volume_step).max(self.volume_min)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub tick_volume: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
    Mn1,
}

impl Timeframe {
    /// Parses the wire timeframe label, falling back to H1 for anything
    /// unrecognized.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        match label {
            "M1" => Self::M1,
            "M5" => Self::M5,
            "M15" => Self::M15,
            "M30" => Self::M30,
            "H4" => Self::H4,
            "D1" => Self::D1,
            "W1" => Self::W1,
            "MN" => Self::Mn1,
            _ => Self::H1,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M1 => "M1",
            Self::M5 => "M5",
            Self::M15 => "M15",
            Self::M30 => "M30",
            Self::H1 => "H1",
            Self::H4 => "H4",
            Self::D1 => "D1",
            Self::W1 => "W1",
            Self::Mn1 => "MN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub login: u64,
    pub server: String,
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub margin_free: Decimal,
    pub margin_level: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealSide {
    Buy,
    Sell,
    Balance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealEntry {
    In,
    Out,
    OutBy,
}

/// A single executed deal from the broker's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deal {
    pub ticket: u64,
    pub position_id: u64,
    pub symbol: String,
    pub side: DealSide,
    pub entry: DealEntry,
    pub volume: Decimal,
    pub price: Decimal,
    pub profit: Decimal,
    pub commission: Decimal,
    pub swap: Decimal,
    pub comment: String,
    pub time: DateTime<Utc>,
}
