//! In-memory `TradeDb` that records every submission

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::db_utils::trade_db::{DbError, TradeDb};
use crate::trade::{daily_summaries, rollup, Trade, TradeSummary};

#[derive(Default)]
pub struct RecordingTradeDb {
    batches: Mutex<Vec<Vec<Trade>>>,
    reject_ticker: Option<String>,
    delay: Option<Duration>,
    submissions: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingTradeDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every batch holding a trade of `ticker`
    pub fn rejecting(mut self, ticker: &str) -> Self {
        self.reject_ticker = Some(ticker.to_string());
        self
    }

    /// Hold every submission for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn recorded(&self) -> MutexGuard<'_, Vec<Vec<Trade>>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accepted batches in acknowledgment order
    pub fn batches(&self) -> Vec<Vec<Trade>> {
        self.recorded().clone()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.recorded().iter().map(Vec::len).collect()
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.recorded().iter().flatten().cloned().collect()
    }

    pub fn record_count(&self) -> usize {
        self.recorded().iter().map(Vec::len).sum()
    }

    /// Number of `insert_many` calls, rejected ones included
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Largest number of `insert_many` calls observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TradeDb for RecordingTradeDb {
    async fn insert_many(&self, trades: Vec<Trade>) -> Result<(), DbError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(ticker) = &self.reject_ticker {
            if trades.iter().any(|trade| &trade.ticker == ticker) {
                return Err(DbError::Rejected(format!("ticker {} is not accepted", ticker)));
            }
        }

        self.recorded().push(trades);
        Ok(())
    }

    async fn fetch_trades(&self, since: Option<NaiveDate>) -> Result<Vec<TradeSummary>, DbError> {
        let trades = self.trades();
        let days = daily_summaries(&trades);
        Ok(rollup(
            days.iter().map(|((ticker, date), day)| (ticker.as_str(), *date, *day)),
            since,
        ))
    }

    async fn get_trade(
        &self,
        ticker: &str,
        since: Option<NaiveDate>,
    ) -> Result<TradeSummary, DbError> {
        let summary = self
            .fetch_trades(since)
            .await?
            .into_iter()
            .find(|summary| summary.ticker == ticker)
            .unwrap_or_else(|| TradeSummary::empty(ticker));
        Ok(summary)
    }
}
