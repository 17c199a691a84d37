use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;

use fx_terminal_core::{Deal, DealEntry, DealSide};

use crate::messages::TradeRecord;

/// Parses a `YYYY-MM-DD` date range. The from-date defaults to the start
/// of 2025, the to-date to today; the to-date is extended by one day so
/// same-day deals are included.
#[must_use]
pub fn parse_range(from: Option<&str>, to: Option<&str>) -> (DateTime<Utc>, DateTime<Utc>) {
    let parse = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok();
    let from_date = from
        .and_then(parse)
        .unwrap_or_else(|| NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    let to_date = to
        .and_then(parse)
        .unwrap_or_else(|| Utc::now().date_naive());
    let start = from_date.and_hms_opt(0, 0, 0).unwrap().and_utc();
    let end = to_date.and_hms_opt(0, 0, 0).unwrap().and_utc() + Duration::days(1);
    (start, end)
}

#[derive(Default)]
struct TradeGroup {
    symbol: String,
    side: Option<String>,
    volume: Decimal,
    open_time: i64,
    close_time: Option<i64>,
    open_price: Decimal,
    close_price: Option<Decimal>,
    profit: Decimal,
    commission: Decimal,
    swap: Decimal,
    comment: String,
    exit_type: String,
    has_entry: bool,
}

/// Scans a closing comment for broker exit markers. Take-profit markers
/// are checked before stop-loss; a stop-out counts as a stop-loss.
fn infer_exit_type(comment: &str) -> String {
    let lower = comment.to_lowercase();
    if lower.contains("[tp]") || lower.contains("take profit") || lower.contains("tp") {
        "tp".to_string()
    } else if lower.contains("[sl]") || lower.contains("stop loss") || lower.contains("sl") {
        "sl".to_string()
    } else if lower.contains("so") {
        "sl".to_string()
    } else {
        "manual".to_string()
    }
}

/// Folds raw deals into per-position trade records: entry deals set the
/// side, volume and open leg, exit deals set the close leg, and money
/// fields sum over every deal of the position. Balance operations are
/// skipped, as are positions whose entry deal falls outside the range.
/// Sorted by close time, newest first.
#[must_use]
pub fn group_deals(deals: &[Deal]) -> Vec<TradeRecord> {
    let mut groups: HashMap<u64, TradeGroup> = HashMap::new();

    for deal in deals {
        if deal.side == DealSide::Balance {
            continue;
        }
        let group = groups.entry(deal.position_id).or_insert_with(|| TradeGroup {
            symbol: deal.symbol.clone(),
            exit_type: "manual".to_string(),
            ..TradeGroup::default()
        });

        match deal.entry {
            DealEntry::In => {
                group.has_entry = true;
                group.side = Some(
                    match deal.side {
                        DealSide::Buy => "buy",
                        _ => "sell",
                    }
                    .to_string(),
                );
                group.volume = deal.volume;
                group.open_time = deal.time.timestamp_millis();
                group.open_price = deal.price;
            }
            DealEntry::Out | DealEntry::OutBy => {
                group.close_time = Some(deal.time.timestamp_millis());
                group.close_price = Some(deal.price);
            }
        }

        group.profit += deal.profit;
        group.commission += deal.commission;
        group.swap += deal.swap;

        if !deal.comment.is_empty() {
            group.comment = deal.comment.clone();
            group.exit_type = infer_exit_type(&deal.comment);
        }
    }

    let mut trades: Vec<TradeRecord> = groups
        .into_iter()
        .filter(|(_, group)| group.has_entry)
        .map(|(position_id, group)| TradeRecord {
            id: position_id,
            ticket: position_id,
            symbol: group.symbol,
            side: group.side.unwrap_or_else(|| "unknown".to_string()),
            volume: group.volume,
            open_time: group.open_time,
            close_time: group.close_time.unwrap_or(group.open_time),
            price: group.open_price,
            open_price: group.open_price,
            close_price: group.close_price.unwrap_or(group.open_price),
            profit: group.profit,
            commission: group.commission,
            swap: group.swap,
            comment: group.comment,
            exit_type: group.exit_type,
        })
        .collect();
    trades.sort_by(|a, b| b.close_time.cmp(&a.close_time));
    trades
}
