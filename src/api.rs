//! Read-only HTTP API over the trade summaries

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::db_utils::trade_db::{DbError, TradeDb};
use crate::loader::parser::parse_trade_date;
use crate::trade::TradeSummary;

#[derive(Clone)]
pub struct AppState {
    db: Arc<dyn TradeDb>,
}

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    date: Option<String>,
}

impl DateQuery {
    /// Missing or empty `date` means no filter
    fn since(&self) -> Result<Option<NaiveDate>, AppError> {
        match self.date.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => parse_trade_date(raw)
                .map(Some)
                .map_err(|_| AppError::InvalidDate(raw.to_string())),
        }
    }
}

pub fn router(db: Arc<dyn TradeDb>) -> Router {
    Router::new()
        .route("/trades", get(fetch_trades))
        .route("/trades/:ticker", get(get_trade))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { db })
}

/// Serve the API on `0.0.0.0:{port}` until the process stops
pub async fn serve(db: Arc<dyn TradeDb>, port: u16) -> anyhow::Result<()> {
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server running on http://{}", bind_addr);

    axum::serve(listener, router(db)).await?;
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn fetch_trades(
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> Result<Json<Vec<TradeSummary>>, AppError> {
    let since = query.since()?;
    let summaries = state.db.fetch_trades(since).await?;
    Ok(Json(summaries))
}

async fn get_trade(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(query): Query<DateQuery>,
) -> Result<Json<TradeSummary>, AppError> {
    let since = query.since()?;
    let summary = state.db.get_trade(&ticker, since).await?;
    Ok(Json(summary))
}

#[derive(Debug)]
pub enum AppError {
    InvalidDate(String),
    Database(DbError),
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        AppError::Database(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::InvalidDate(raw) => (
                StatusCode::BAD_REQUEST,
                format!("Invalid date {:?}, expected YYYY-MM-DD", raw),
            ),
            AppError::Database(e) => {
                error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
        };

        error!("API Error: {} - {}", status, message);

        let body = Json(serde_json::json!({
            "error": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::recording_trade_db::RecordingTradeDb;
    use crate::trade::Trade;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use tower::ServiceExt;

    struct BrokenDb;

    #[async_trait]
    impl TradeDb for BrokenDb {
        async fn insert_many(&self, _trades: Vec<Trade>) -> Result<(), DbError> {
            Err(DbError::Rejected("read only".to_string()))
        }

        async fn fetch_trades(&self, _since: Option<NaiveDate>) -> Result<Vec<TradeSummary>, DbError> {
            Err(DbError::Task("store unavailable".to_string()))
        }

        async fn get_trade(
            &self,
            _ticker: &str,
            _since: Option<NaiveDate>,
        ) -> Result<TradeSummary, DbError> {
            Err(DbError::Task("store unavailable".to_string()))
        }
    }

    fn trade(ticker: &str, gross_amount: f64, quantity: i64, day: u32) -> Trade {
        Trade {
            ticker: ticker.to_string(),
            gross_amount,
            quantity,
            entry_time: Utc.with_ymd_and_hms(1970, 1, 1, 13, 0, 0).unwrap(),
            trade_date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
        }
    }

    async fn seeded_db() -> Arc<RecordingTradeDb> {
        let db = Arc::new(RecordingTradeDb::new());
        db.insert_many(vec![
            trade("PETR4", 37.5, 100, 1),
            trade("PETR4", 38.0, 50, 4),
            trade("VALE3", 61.2, 300, 4),
        ])
        .await
        .unwrap();
        db
    }

    async fn get(db: Arc<dyn TradeDb>, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(db)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_fetch_trades() {
        let (status, body) = get(seeded_db().await, "/trades").await;
        assert_eq!(status, StatusCode::OK);
        let summaries: Vec<TradeSummary> = serde_json::from_value(body).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].ticker, "PETR4");
        assert_eq!(summaries[0].max_range_value, 38.0);
        assert_eq!(summaries[0].max_daily_volume, 100);
    }

    #[tokio::test]
    async fn test_fetch_trades_since_date() {
        let (status, body) = get(seeded_db().await, "/trades?date=2024-03-02").await;
        assert_eq!(status, StatusCode::OK);
        let summaries: Vec<TradeSummary> = serde_json::from_value(body).unwrap();
        assert_eq!(summaries[0].ticker, "PETR4");
        assert_eq!(summaries[0].max_daily_volume, 50);
    }

    #[tokio::test]
    async fn test_get_trade() {
        let (status, body) = get(seeded_db().await, "/trades/VALE3").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ticker"], "VALE3");
        assert_eq!(body["max_daily_volume"], 300);

        let (status, body) = get(seeded_db().await, "/trades/NOPE3?date=").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["max_daily_volume"], 0);
    }

    #[tokio::test]
    async fn test_bad_date_is_bad_request() {
        let (status, body) = get(seeded_db().await, "/trades?date=01-03-2024").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], 400);
    }

    #[tokio::test]
    async fn test_store_failure_is_server_error() {
        let (status, body) = get(Arc::new(BrokenDb), "/trades/PETR4").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Database error");
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(Arc::new(RecordingTradeDb::new()))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
