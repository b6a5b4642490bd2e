use async_trait::async_trait;
use chrono::NaiveDate;

use crate::trade::{Trade, TradeSummary};

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("batch rejected: {0}")]
    Rejected(String),

    #[error("storage task failed: {0}")]
    Task(String),

    #[error("submission timed out")]
    Timeout,
}

/// Trade store used by the loader (write side) and the read API
///
/// Implementations must be safe for concurrent use: the loader issues several
/// `insert_many` calls at once.
#[async_trait]
pub trait TradeDb: Send + Sync {
    /// Persist a whole batch as one logical write
    async fn insert_many(&self, trades: Vec<Trade>) -> Result<(), DbError>;

    /// Per-ticker summaries over trading days on or after `since`
    async fn fetch_trades(&self, since: Option<NaiveDate>) -> Result<Vec<TradeSummary>, DbError>;

    /// Summary of one ticker over trading days on or after `since`
    ///
    /// A ticker without data yields `TradeSummary::empty`.
    async fn get_trade(&self, ticker: &str, since: Option<NaiveDate>)
        -> Result<TradeSummary, DbError>;
}
