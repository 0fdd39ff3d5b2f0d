use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::services::dispatcher::DeliveryOutcome;
use crate::services::trip_events::{notify_trip_event, TripEvent};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/:id/notify", post(notify))
}

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub event: TripEvent,
}

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    /// True when the trip had no usable contact and nothing was sent.
    pub skipped: bool,
    pub outcome: Option<DeliveryOutcome>,
}

/// Immediate passenger notification for a trip status change
async fn notify(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<NotifyRequest>,
) -> AppResult<Json<NotifyResponse>> {
    let outcome =
        notify_trip_event(&state.dispatcher, state.config.service_timezone(), &id, req.event)
            .await?;

    Ok(Json(NotifyResponse {
        skipped: outcome.is_none(),
        outcome,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use serde_json::json;

    use crate::config::DeploymentMode;
    use crate::test_support::{
        add_passenger, call, insert_trip, insert_user, json_request, memory_pool, router_for,
        test_config, test_state, ScriptedGateway, TripFixture,
    };

    #[tokio::test]
    async fn failed_send_is_reported_not_raised() {
        let pool = memory_pool().await;
        let state = test_state(
            pool.clone(),
            Some(Arc::new(ScriptedGateway::failing_for(&["+15551230001"]))),
            test_config(DeploymentMode::Production),
        );
        let app = router_for(state);

        let pickup = NaiveDate::from_ymd_opt(2026, 10, 20)
            .unwrap()
            .and_hms_opt(15, 0, 0)
            .unwrap();
        let user = insert_user(&pool, "Ada", Some("5551230001")).await;
        let trip = insert_trip(&pool, TripFixture::at(pickup)).await;
        add_passenger(&pool, &trip, &user, true).await;

        let (status, body) = call(
            app.clone(),
            json_request(
                "POST",
                &format!("/api/trips/{}/notify", trip),
                json!({ "event": "driver_en_route" }),
            ),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body["skipped"], false);
        assert_eq!(body["outcome"]["success"], false);
        assert!(body["outcome"]["error"]
            .as_str()
            .unwrap()
            .contains("not a valid phone number"));

        let (status, _) = call(
            app,
            json_request(
                "POST",
                "/api/trips/unknown/notify",
                json!({ "event": "trip_started" }),
            ),
        )
        .await;
        assert_eq!(status, 404);
    }
}
