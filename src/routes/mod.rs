use std::sync::Arc;

use axum::{routing::get, Router};

use crate::AppState;

pub mod health;
pub mod notifications;
pub mod reminders;
pub mod templates;
pub mod trips;
pub mod webhooks;

/// Health check and the operator API. Webhooks are nested separately so the
/// caller can put a rate limiter in front of them.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/notifications", notifications::router())
        .nest("/api/templates", templates::router())
        .nest("/api/reminders", reminders::router())
        .nest("/api/trips", trips::router())
}
