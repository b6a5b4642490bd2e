//! Record parser
//!
//! Converts one raw `;`-delimited row of a B3 trade file into a `Trade`.
//! Fields are positional: [1] ticker, [3] gross amount, [4] quantity,
//! [5] entry time, [8] trade date.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use csv::StringRecord;

use super::error::{ParseError, TradeField};
use crate::trade::Trade;

/// Timezone the exchange records entry times in
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Sao_Paulo;

/// Calendar date every entry time-of-day is anchored to
pub const REFERENCE_DATE: (i32, u32, u32) = (1970, 1, 1);

const ENTRY_TIME_DIGITS: usize = 9;
const TRADE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Stateless row parser bound to the timezone of the entry-time field
#[derive(Debug, Clone, Copy)]
pub struct TradeParser {
    timezone: Tz,
}

impl Default for TradeParser {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEZONE)
    }
}

impl TradeParser {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Parse one data row into a trade
    pub fn parse(&self, row: &StringRecord) -> Result<Trade, ParseError> {
        let ticker = field(row, TradeField::Ticker)?;
        if ticker.is_empty() {
            return Err(ParseError::new(TradeField::Ticker, ticker, "empty ticker"));
        }

        let gross_amount = parse_gross_amount(field(row, TradeField::GrossAmount)?)?;

        let raw_quantity = field(row, TradeField::Quantity)?;
        let quantity = raw_quantity
            .parse::<i64>()
            .map_err(|e| ParseError::new(TradeField::Quantity, raw_quantity, e.to_string()))?;

        let entry_time = self.parse_entry_time(field(row, TradeField::EntryTime)?)?;
        let trade_date = parse_trade_date(field(row, TradeField::TradeDate)?)?;

        Ok(Trade {
            ticker: ticker.to_string(),
            gross_amount,
            quantity,
            entry_time,
            trade_date,
        })
    }

    /// Parse a `HHMMSSmmm` entry time in the parser's timezone into a UTC instant
    pub fn parse_entry_time(&self, raw: &str) -> Result<DateTime<Utc>, ParseError> {
        if raw.len() != ENTRY_TIME_DIGITS || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::new(
                TradeField::EntryTime,
                raw,
                format!("expected {} digits (HHMMSSmmm)", ENTRY_TIME_DIGITS),
            ));
        }

        let number = |range: std::ops::Range<usize>| -> Result<u32, ParseError> {
            raw[range]
                .parse::<u32>()
                .map_err(|e| ParseError::new(TradeField::EntryTime, raw, e.to_string()))
        };
        let hour = number(0..2)?;
        let minute = number(2..4)?;
        let second = number(4..6)?;
        let millis = number(6..9)?;

        // Out-of-range parts carry over, so "240000000" is midnight of the next day
        let offset = Duration::hours(i64::from(hour))
            + Duration::minutes(i64::from(minute))
            + Duration::seconds(i64::from(second))
            + Duration::milliseconds(i64::from(millis));
        let (year, month, day) = REFERENCE_DATE;
        let naive = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .and_then(|midnight| midnight.checked_add_signed(offset))
            .ok_or_else(|| ParseError::new(TradeField::EntryTime, raw, "invalid reference date"))?;

        let local = self
            .timezone
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| {
                ParseError::new(
                    TradeField::EntryTime,
                    raw,
                    format!("time does not exist in {}", self.timezone),
                )
            })?;

        Ok(local.with_timezone(&Utc))
    }
}

fn field(row: &StringRecord, field: TradeField) -> Result<&str, ParseError> {
    row.get(field.column()).ok_or_else(|| {
        ParseError::new(
            field,
            "",
            format!("row has {} columns, missing column {}", row.len(), field.column()),
        )
    })
}

/// Parse a comma-decimal amount; the first comma becomes the decimal point
pub fn parse_gross_amount(raw: &str) -> Result<f64, ParseError> {
    let normalized = raw.replacen(',', ".", 1);
    normalized
        .parse::<f64>()
        .map_err(|e| ParseError::new(TradeField::GrossAmount, raw, e.to_string()))
}

/// Parse a strict `YYYY-MM-DD` trade date
pub fn parse_trade_date(raw: &str) -> Result<NaiveDate, ParseError> {
    if raw.len() != 10 {
        return Err(ParseError::new(TradeField::TradeDate, raw, "expected YYYY-MM-DD"));
    }
    NaiveDate::parse_from_str(raw, TRADE_DATE_FORMAT)
        .map_err(|e| ParseError::new(TradeField::TradeDate, raw, e.to_string()))
}
