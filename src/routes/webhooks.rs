use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};

use crate::error::AppError;
use crate::services::webhooks::{apply_status_callback, authenticate, StatusCallback};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/sms/status", post(handle_sms_status))
}

/// Provider delivery receipt. Always 200 once authenticated and parsed, so the
/// provider does not retry receipts that change nothing.
async fn handle_sms_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, String), AppError> {
    authenticate(state.config.gateway.webhook_secret.as_deref(), &headers, &body)?;

    let callback = StatusCallback::from_form(&body)?;

    tracing::info!(
        "Received SMS status callback: sid={}, status={}",
        callback.message_sid,
        callback.message_status
    );

    apply_status_callback(&state.db, &callback).await?;

    Ok((StatusCode::OK, "OK".to_string()))
}
