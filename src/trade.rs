//! Trade records and the aggregates served from them
//!
//! `Trade` is one parsed row of a B3 trade file. `DailySummary` is the
//! per-ticker, per-day aggregate kept by the store, and `TradeSummary` is the
//! per-ticker roll-up returned to readers.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One parsed trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub ticker: String,
    pub gross_amount: f64,
    pub quantity: i64,
    /// Entry time-of-day as a UTC instant on the parser's reference date
    pub entry_time: DateTime<Utc>,
    pub trade_date: NaiveDate,
}

impl Trade {
    /// Entry time expressed in the civil timezone it was recorded in
    pub fn local_entry_time(&self, tz: Tz) -> DateTime<Tz> {
        self.entry_time.with_timezone(&tz)
    }
}

/// Aggregate of one ticker on one trading day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    /// Highest gross amount traded during the day
    pub max_range_value: f64,
    /// Total quantity traded during the day
    pub total_quantity: i64,
}

impl DailySummary {
    pub fn from_trade(trade: &Trade) -> Self {
        Self {
            max_range_value: trade.gross_amount,
            total_quantity: trade.quantity,
        }
    }

    pub fn absorb(&mut self, trade: &Trade) {
        self.max_range_value = self.max_range_value.max(trade.gross_amount);
        self.total_quantity += trade.quantity;
    }
}

/// Per-ticker summary served by the read API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSummary {
    pub ticker: String,
    pub max_range_value: f64,
    pub max_daily_volume: i64,
}

impl TradeSummary {
    /// Summary reported for a ticker without any stored day
    pub fn empty(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            max_range_value: 0.0,
            max_daily_volume: 0,
        }
    }
}

/// Group trades by (ticker, trade date) into daily aggregates
pub fn daily_summaries<'a, I>(trades: I) -> BTreeMap<(String, NaiveDate), DailySummary>
where
    I: IntoIterator<Item = &'a Trade>,
{
    let mut days = BTreeMap::new();
    for trade in trades {
        add_to_daily_summaries(&mut days, trade);
    }
    days
}

/// Fold one trade into a map of daily aggregates
pub fn add_to_daily_summaries(
    days: &mut BTreeMap<(String, NaiveDate), DailySummary>,
    trade: &Trade,
) {
    days.entry((trade.ticker.clone(), trade.trade_date))
        .and_modify(|day| day.absorb(trade))
        .or_insert_with(|| DailySummary::from_trade(trade));
}

/// Roll daily aggregates up per ticker, keeping only days on or after `since`
///
/// The result is ordered by ticker.
pub fn rollup<'a, I>(days: I, since: Option<NaiveDate>) -> Vec<TradeSummary>
where
    I: IntoIterator<Item = (&'a str, NaiveDate, DailySummary)>,
{
    let mut by_ticker: BTreeMap<&'a str, TradeSummary> = BTreeMap::new();
    for (ticker, date, day) in days {
        if since.is_some_and(|since| date < since) {
            continue;
        }
        by_ticker
            .entry(ticker)
            .and_modify(|summary| {
                summary.max_range_value = summary.max_range_value.max(day.max_range_value);
                summary.max_daily_volume = summary.max_daily_volume.max(day.total_quantity);
            })
            .or_insert_with(|| TradeSummary {
                ticker: ticker.to_string(),
                max_range_value: day.max_range_value,
                max_daily_volume: day.total_quantity,
            });
    }
    by_ticker.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn trade(ticker: &str, gross_amount: f64, quantity: i64, date: NaiveDate) -> Trade {
        Trade {
            ticker: ticker.to_string(),
            gross_amount,
            quantity,
            entry_time: Utc.with_ymd_and_hms(1970, 1, 1, 13, 0, 0).unwrap(),
            trade_date: date,
        }
    }

    #[test]
    fn test_daily_summaries_take_max_amount_and_sum_quantity() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let trades = vec![
            trade("PETR4", 1.0, 3, day),
            trade("PETR4", 2.0, 1, day),
            trade("PETR4", 1.5, 2, day),
        ];

        let days = daily_summaries(&trades);
        assert_eq!(days.len(), 1);
        let summary = days[&("PETR4".to_string(), day)];
        assert_eq!(summary.max_range_value, 2.0);
        assert_eq!(summary.total_quantity, 6);
    }

    #[test]
    fn test_rollup_uses_largest_day_volume() {
        let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let trades = vec![
            trade("VALE3", 1.0, 20, monday),
            trade("VALE3", 1.0, 10, tuesday),
            trade("VALE3", 1.0, 30, tuesday),
        ];

        let days = daily_summaries(&trades);
        let summaries = rollup(days.iter().map(|((t, d), s)| (t.as_str(), *d, *s)), None);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].max_daily_volume, 40);
    }

    #[test]
    fn test_rollup_filters_days_before_since() {
        let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let trades = vec![
            trade("ITUB4", 9.0, 10, monday),
            trade("ITUB4", 0.5, 1, tuesday),
            trade("BBAS3", 7.0, 5, monday),
        ];

        let days = daily_summaries(&trades);
        let summaries = rollup(
            days.iter().map(|((t, d), s)| (t.as_str(), *d, *s)),
            Some(tuesday),
        );
        assert_eq!(
            summaries,
            vec![TradeSummary {
                ticker: "ITUB4".to_string(),
                max_range_value: 0.5,
                max_daily_volume: 1,
            }]
        );
    }
}
