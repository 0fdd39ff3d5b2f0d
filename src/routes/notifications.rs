use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::{
    Channel, DeliveryFilter, DeliveryRecord, DeliveryRecordRepository, DeliveryStatus,
    NotificationType,
};
use crate::error::{AppError, AppResult};
use crate::services::stats::{DeliveryStats, StatsAggregator};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/stats", get(get_notification_stats))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub notification_type: Option<String>,
    pub channel: Option<String>,
    pub status: Option<String>,
    pub trip_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NotificationsListResponse {
    pub items: Vec<DeliveryRecord>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl ListNotificationsQuery {
    /// Validate filter values so a typo is a 400 rather than an empty page.
    fn filter(&self) -> AppResult<DeliveryFilter> {
        let notification_type = self
            .notification_type
            .as_deref()
            .map(|t| NotificationType::try_from(t).map(|t| t.as_str().to_string()))
            .transpose()
            .map_err(AppError::BadRequest)?;
        let channel = self
            .channel
            .as_deref()
            .map(|c| Channel::try_from(c).map(|c| c.as_str().to_string()))
            .transpose()
            .map_err(AppError::BadRequest)?;
        let status = self
            .status
            .as_deref()
            .map(|s| DeliveryStatus::try_from(s).map(|s| s.as_str().to_string()))
            .transpose()
            .map_err(AppError::BadRequest)?;

        Ok(DeliveryFilter {
            notification_type,
            channel,
            status,
            trip_id: self.trip_id.clone(),
        })
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Delivery ledger, newest first
async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListNotificationsQuery>,
) -> AppResult<Json<NotificationsListResponse>> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * per_page;
    let filter = query.filter()?;

    let items = DeliveryRecordRepository::list(&state.db, &filter, per_page, offset).await?;
    let total = DeliveryRecordRepository::count(&state.db, &filter).await?;

    let total_pages = (total as f64 / per_page as f64).ceil() as i64;

    Ok(Json(NotificationsListResponse {
        items,
        total,
        page,
        per_page,
        total_pages,
    }))
}

async fn get_notification_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> AppResult<Json<DeliveryStats>> {
    let stats = StatsAggregator::summarize(&state.db, query.start, query.end).await?;
    Ok(Json(stats))
}
