use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Position, PositionSide, Tick};

/// Instrument classification by substring match on the broker symbol name,
/// evaluated in a fixed precedence with generic forex as the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentClass {
    Gold,
    Silver,
    Crypto,
    Forex,
}

impl InstrumentClass {
    #[must_use]
    pub fn of(symbol: &str) -> Self {
        if symbol.contains("XAU") || symbol.contains("GOLD") {
            Self::Gold
        } else if symbol.contains("XAG") || symbol.contains("SILVER") {
            Self::Silver
        } else if symbol.contains("BTC") || symbol.contains("ETH") || symbol.contains("LTC") {
            Self::Crypto
        } else {
            Self::Forex
        }
    }

    /// Price-to-money multiplier per lot: a price move of `d` on `v` lots is
    /// worth `d * v * profit_units()` dollars. Also the divisor for the
    /// trailing-distance conversion.
    #[must_use]
    pub fn profit_units(self) -> Decimal {
        match self {
            Self::Gold => Decimal::from(100),
            Self::Silver => Decimal::from(5_000),
            Self::Crypto => Decimal::ONE,
            Self::Forex => Decimal::from(100_000),
        }
    }

    /// Divisor for order-time dollar stop/take-profit conversion.
    ///
    /// Silver shares the forex divisor here even though its profit
    /// multiplier is 5000; stops placed on silver depend on that asymmetry.
    #[must_use]
    pub fn stop_units(self) -> Decimal {
        match self {
            Self::Gold => Decimal::from(100),
            Self::Silver | Self::Forex => Decimal::from(100_000),
            Self::Crypto => Decimal::ONE,
        }
    }

    /// Price delta of one abstract "point" for stop placement: gold quotes
    /// move 0.1 per point, everything else 0.00001.
    #[must_use]
    pub fn point_delta(self) -> Decimal {
        match self {
            Self::Gold => Decimal::new(1, 1),
            _ => Decimal::new(1, 5),
        }
    }
}

/// Unit in which a client expresses a stop-loss/take-profit distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopUnit {
    Dollar,
    #[serde(alias = "pips")]
    Points,
}

/// Converts a dollar amount into the price delta that realizes it on
/// `volume` lots of an instrument of the given class. Used by the
/// automation engine (trailing distance) and by profit-offset stops.
#[must_use]
pub fn money_to_price_delta(class: InstrumentClass, amount: Decimal, volume: Decimal) -> Decimal {
    if volume.is_zero() {
        return Decimal::ZERO;
    }
    amount / (volume * class.profit_units())
}

/// Converts a client stop distance (dollars or points) into a price offset
/// from the anchor price at order time.
#[must_use]
pub fn stop_offset(
    class: InstrumentClass,
    value: Decimal,
    unit: StopUnit,
    volume: Decimal,
) -> Decimal {
    match unit {
        StopUnit::Dollar => {
            if volume.is_zero() {
                Decimal::ZERO
            } else {
                value / (volume * class.stop_units())
            }
        }
        StopUnit::Points => value * class.point_delta(),
    }
}

/// Dollar profit of a position at the given quote: bid references a long,
/// ask a short. Returns zero when no quote is available; never errors.
#[must_use]
pub fn position_profit(position: &Position, tick: Option<&Tick>) -> Decimal {
    let Some(tick) = tick else {
        return Decimal::ZERO;
    };
    let diff = match position.side {
        PositionSide::Buy => tick.bid - position.open_price,
        PositionSide::Sell => position.open_price - tick.ask,
    };
    diff * position.volume * InstrumentClass::of(&position.symbol).profit_units()
}

/// Rounds a price to the instrument's declared decimal precision. Applied
/// to every stop-loss/take-profit before submission.
#[must_use]
pub fn round_price(price: Decimal, digits: u32) -> Decimal {
    price.round_dp(digits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn position(symbol: &str, side: PositionSide, volume: Decimal, open: Decimal) -> Position {
        Position {
            ticket: 1,
            symbol: symbol.to_string(),
            side,
            volume,
            open_price: open,
            sl: None,
            tp: None,
            profit: Decimal::ZERO,
            swap: Decimal::ZERO,
            commission: Decimal::ZERO,
            comment: String::new(),
            current_price: open,
        }
    }

    fn tick(bid: Decimal, ask: Decimal) -> Tick {
        Tick {
            bid,
            ask,
            time: Utc::now(),
        }
    }

    #[test]
    fn classification_precedence() {
        assert_eq!(InstrumentClass::of("XAUUSD"), InstrumentClass::Gold);
        assert_eq!(InstrumentClass::of("XAGUSD.a"), InstrumentClass::Silver);
        assert_eq!(InstrumentClass::of("BTCUSD"), InstrumentClass::Crypto);
        assert_eq!(InstrumentClass::of("ETHUSDm"), InstrumentClass::Crypto);
        assert_eq!(InstrumentClass::of("EURUSD"), InstrumentClass::Forex);
        assert_eq!(InstrumentClass::of("GBPJPY+"), InstrumentClass::Forex);
    }

    #[test]
    fn forex_profit_matches_terminal_convention() {
        // 0.10 lots EURUSD, +0.0050 from entry => $50.
        let pos = position("EURUSD", PositionSide::Buy, dec!(0.10), dec!(1.1000));
        let profit = position_profit(&pos, Some(&tick(dec!(1.1050), dec!(1.1052))));
        assert_eq!(profit, dec!(50.000));
    }

    #[test]
    fn short_position_references_ask() {
        let pos = position("EURUSD", PositionSide::Sell, dec!(0.10), dec!(1.1000));
        let profit = position_profit(&pos, Some(&tick(dec!(1.0948), dec!(1.0950))));
        assert_eq!(profit, dec!(50.000));
    }

    #[test]
    fn gold_profit_uses_hundred_multiplier() {
        let pos = position("XAUUSD", PositionSide::Buy, dec!(0.01), dec!(1900.00));
        let profit = position_profit(&pos, Some(&tick(dec!(1905.00), dec!(1905.30))));
        assert_eq!(profit, dec!(5.0000));
    }

    #[test]
    fn missing_quote_is_zero_profit() {
        let pos = position("EURUSD", PositionSide::Buy, dec!(0.10), dec!(1.1000));
        assert_eq!(position_profit(&pos, None), Decimal::ZERO);
    }

    #[test]
    fn money_round_trips_through_price_delta() {
        for (symbol, volume) in [
            ("XAUUSD", dec!(0.01)),
            ("XAGUSD", dec!(0.05)),
            ("BTCUSD", dec!(0.5)),
            ("EURUSD", dec!(0.10)),
        ] {
            let class = InstrumentClass::of(symbol);
            let amount = dec!(25);
            let delta = money_to_price_delta(class, amount, volume);
            let pos = position(symbol, PositionSide::Buy, volume, dec!(100.0));
            let quote = tick(dec!(100.0) + delta, dec!(100.0) + delta);
            let recovered = position_profit(&pos, Some(&quote)).round_dp(5);
            assert_eq!(recovered, amount, "round trip failed for {symbol}");
        }
    }

    #[test]
    fn silver_stop_conversion_falls_through_to_forex_divisor() {
        // Profit math treats silver as 5000 units, stop math as 100000.
        assert_eq!(InstrumentClass::Silver.profit_units(), dec!(5000));
        assert_eq!(
            InstrumentClass::Silver.stop_units(),
            InstrumentClass::Forex.stop_units()
        );
        let dollar = stop_offset(InstrumentClass::Silver, dec!(10), StopUnit::Dollar, dec!(0.01));
        assert_eq!(dollar, dec!(0.01));
    }

    #[test]
    fn gold_point_stop_is_tenths() {
        let offset = stop_offset(InstrumentClass::Gold, dec!(30), StopUnit::Points, dec!(0.01));
        assert_eq!(offset, dec!(3.0));
    }

    #[test]
    fn forex_point_stop_is_hundred_thousandths() {
        // 100 points ~= 0.001 of price movement.
        let offset = stop_offset(InstrumentClass::Forex, dec!(100), StopUnit::Points, dec!(0.10));
        assert_eq!(offset, dec!(0.00100));
    }

    #[test]
    fn rounding_honors_instrument_digits() {
        assert_eq!(round_price(dec!(1.123456), 5), dec!(1.12346));
        assert_eq!(round_price(dec!(1912.3449), 2), dec!(1912.34));
    }
}
