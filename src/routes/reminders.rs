use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::services::reminders::{ReminderKind, ScanSummary};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/:kind/run", post(run_scan))
}

#[derive(Debug, Deserialize)]
pub struct RunScanQuery {
    /// Scan as of this instant instead of now.
    pub at: Option<DateTime<Utc>>,
}

/// Run one reminder scan on demand
async fn run_scan(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    Query(query): Query<RunScanQuery>,
) -> AppResult<Json<ScanSummary>> {
    let kind = ReminderKind::from_str(&kind)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown reminder kind: {}", kind)))?;
    let now = query.at.unwrap_or_else(Utc::now);

    tracing::info!("Manual {} reminder scan as of {}", kind, now);
    let summary = state.scanner.scan(kind, now).await?;

    Ok(Json(summary))
}
