use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::config::DeploymentMode;
use crate::db::Channel;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub database: bool,
    pub sms_gateway_configured: bool,
    pub mode: DeploymentMode,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    if !database {
        tracing::warn!("Health check: database unreachable");
    }

    let response = HealthResponse {
        status: if database { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        database,
        sms_gateway_configured: state.dispatcher.gateways().is_configured(Channel::Sms),
        mode: state.config.deployment.mode,
    };

    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};

    use crate::test_support::{call, memory_pool, test_app};

    #[tokio::test]
    async fn reports_gateway_and_mode() {
        let pool = memory_pool().await;
        let app = test_app(pool, None);

        let (status, body) = call(app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"], true);
        assert_eq!(body["sms_gateway_configured"], false);
        assert_eq!(body["mode"], "development");
    }
}
