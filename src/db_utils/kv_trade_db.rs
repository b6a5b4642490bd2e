//! sled-backed trade store
//!
//! Two trees are kept inside one sled database:
//! - `trade`: every inserted record, keyed `{trade_date}|{ticker}|{id}`
//! - `trade_summary`: one `DailySummary` per `{ticker}|{trade_date}`, rebuilt
//!   from `trade` by `post_load`
//!
//! Reads only see the summaries as of the last `post_load`.

use async_trait::async_trait;
use chrono::NaiveDate;
use sled::{Batch, Db, Tree};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use super::trade_db::{DbError, TradeDb};
use crate::trade::{add_to_daily_summaries, rollup, DailySummary, Trade, TradeSummary};

const TRADE_TREE: &str = "trade";
const SUMMARY_TREE: &str = "trade_summary";
const KEY_SEPARATOR: char = '|';
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone)]
pub struct KvTradeDb {
    db: Db,
}

impl KvTradeDb {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Store removed from disk when dropped (for tests)
    pub fn temporary() -> Result<Self, DbError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn trades(&self) -> Result<Tree, DbError> {
        Ok(self.db.open_tree(TRADE_TREE)?)
    }

    fn summaries(&self) -> Result<Tree, DbError> {
        Ok(self.db.open_tree(SUMMARY_TREE)?)
    }

    /// Create both trees if they do not exist yet
    pub async fn create_table(&self) -> Result<(), DbError> {
        self.blocking(|store| {
            store.trades()?;
            store.summaries()?;
            store.db.flush()?;
            Ok(())
        })
        .await
    }

    /// Rebuild the daily summaries from the stored trades
    ///
    /// Returns the number of (ticker, day) summaries written.
    pub async fn post_load(&self) -> Result<usize, DbError> {
        self.blocking(|store| store.refresh_summaries()).await
    }

    /// Remove every trade and summary
    pub async fn drop_table(&self) -> Result<(), DbError> {
        self.blocking(|store| {
            store.trades()?.clear()?;
            store.summaries()?.clear()?;
            store.db.flush()?;
            Ok(())
        })
        .await
    }

    /// Number of stored trades
    pub fn count(&self) -> Result<u64, DbError> {
        Ok(self.trades()?.len() as u64)
    }

    pub async fn flush(&self) -> Result<(), DbError> {
        self.db.flush_async().await?;
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, DbError>
    where
        T: Send + 'static,
        F: FnOnce(&KvTradeDb) -> Result<T, DbError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| DbError::Task(e.to_string()))?
    }

    fn insert_batch(&self, trades: &[Trade]) -> Result<(), DbError> {
        let mut batch = Batch::default();
        for trade in trades {
            let key = format!(
                "{}{sep}{}{sep}{:020}",
                trade.trade_date.format(DATE_FORMAT),
                trade.ticker,
                self.db.generate_id()?,
                sep = KEY_SEPARATOR
            );
            batch.insert(key.as_bytes(), serde_json::to_vec(trade)?);
        }
        self.trades()?.apply_batch(batch)?;
        Ok(())
    }

    fn refresh_summaries(&self) -> Result<usize, DbError> {
        let mut days = BTreeMap::new();
        for item in self.trades()?.iter() {
            let (_, value) = item?;
            let trade: Trade = serde_json::from_slice(&value)?;
            add_to_daily_summaries(&mut days, &trade);
        }

        let summaries = self.summaries()?;
        summaries.clear()?;
        let mut batch = Batch::default();
        for ((ticker, date), day) in &days {
            batch.insert(summary_key(ticker, *date).as_bytes(), serde_json::to_vec(day)?);
        }
        summaries.apply_batch(batch)?;
        self.db.flush()?;

        info!("Refreshed {} daily summaries", days.len());
        Ok(days.len())
    }

    fn read_summaries(
        &self,
        ticker: Option<&str>,
    ) -> Result<Vec<(String, NaiveDate, DailySummary)>, DbError> {
        let summaries = self.summaries()?;
        let items = match ticker {
            Some(ticker) => summaries.scan_prefix(format!("{}{}", ticker, KEY_SEPARATOR)),
            None => summaries.iter(),
        };

        let mut days = Vec::new();
        for item in items {
            let (key, value) = item?;
            let Some((day_ticker, date)) = parse_summary_key(&key) else {
                debug!("Skipping malformed summary key {:?}", String::from_utf8_lossy(&key));
                continue;
            };
            if ticker.is_some_and(|ticker| ticker != day_ticker) {
                continue;
            }
            let day: DailySummary = serde_json::from_slice(&value)?;
            days.push((day_ticker, date, day));
        }
        Ok(days)
    }
}

fn summary_key(ticker: &str, date: NaiveDate) -> String {
    format!("{}{}{}", ticker, KEY_SEPARATOR, date.format(DATE_FORMAT))
}

fn parse_summary_key(key: &[u8]) -> Option<(String, NaiveDate)> {
    let key = std::str::from_utf8(key).ok()?;
    let (ticker, date) = key.rsplit_once(KEY_SEPARATOR)?;
    let date = NaiveDate::parse_from_str(date, DATE_FORMAT).ok()?;
    Some((ticker.to_string(), date))
}

#[async_trait]
impl TradeDb for KvTradeDb {
    async fn insert_many(&self, trades: Vec<Trade>) -> Result<(), DbError> {
        self.blocking(move |store| store.insert_batch(&trades)).await
    }

    async fn fetch_trades(&self, since: Option<NaiveDate>) -> Result<Vec<TradeSummary>, DbError> {
        self.blocking(move |store| {
            let days = store.read_summaries(None)?;
            Ok(rollup(
                days.iter().map(|(ticker, date, day)| (ticker.as_str(), *date, *day)),
                since,
            ))
        })
        .await
    }

    async fn get_trade(
        &self,
        ticker: &str,
        since: Option<NaiveDate>,
    ) -> Result<TradeSummary, DbError> {
        let ticker = ticker.to_string();
        self.blocking(move |store| {
            let days = store.read_summaries(Some(&ticker))?;
            let summary = rollup(
                days.iter().map(|(ticker, date, day)| (ticker.as_str(), *date, *day)),
                since,
            )
            .into_iter()
            .next()
            .unwrap_or_else(|| TradeSummary::empty(&ticker));
            Ok(summary)
        })
        .await
    }
}
