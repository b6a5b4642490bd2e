//! B3 Market Data Library
//!
//! This library bulk-loads archived B3 trade files into a local trade store
//! and serves pre-aggregated daily summaries from it.
//!
//! The load path is:
//! - discover the archives of a directory
//! - read the `;`-delimited payload embedded in each archive
//! - parse every row into a typed `Trade`
//! - group trades into bounded batches and flush them concurrently to a `TradeDb`

pub mod api;
pub mod config;
pub mod loader;
pub mod trade;

pub mod db_utils {
    pub mod kv_trade_db;
    pub mod trade_db;
}

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    pub mod archive_fixture;
    pub mod recording_trade_db;
}

// Re-export commonly used types
pub use config::{ApiConfig, Config, LoaderConfig, StoreConfig};
pub use db_utils::kv_trade_db::KvTradeDb;
pub use db_utils::trade_db::{DbError, TradeDb};
pub use loader::{
    ErrorKind, FileReport, LoadError, LoadOptions, LoadSummary, Loader, ParseError,
    ProgressCounter, ProgressDisplay, TradeField, TradeParser,
};
pub use trade::{DailySummary, Trade, TradeSummary};
