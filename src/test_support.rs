//! Shared fixtures for unit tests: an in-memory database with the real
//! migrations applied, row builders for the read-side trip tables, and a
//! scripted gateway.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{body::Body, http::Request, http::StatusCode, Router};
use chrono::{NaiveDate, NaiveDateTime};
use http_body_util::BodyExt;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tower::ServiceExt;
use uuid::Uuid;

use crate::config::{Config, DeploymentMode};
use crate::db::Channel;
use crate::error::{AppError, AppResult};
use crate::services::gateway::{GatewayAdapter, Gateways, OutboundMessage};
use crate::AppState;

pub async fn memory_pool() -> SqlitePool {
    // A single connection that never recycles, otherwise the in-memory
    // database disappears.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    pool
}

pub fn test_config(mode: DeploymentMode) -> Config {
    let mut config = Config::default();
    config.deployment.mode = mode;
    config.gateway.timeout_seconds = 2;
    config
}

/// Full router (API + webhooks, no rate limiting) in development mode.
pub fn test_app(pool: SqlitePool, gateway: Option<Arc<ScriptedGateway>>) -> Router {
    router_for(test_state(
        pool,
        gateway,
        test_config(DeploymentMode::Development),
    ))
}

pub fn test_state(
    pool: SqlitePool,
    gateway: Option<Arc<ScriptedGateway>>,
    config: Config,
) -> Arc<AppState> {
    let mut gateways = Gateways::new();
    if let Some(gateway) = gateway {
        gateways = gateways.with(gateway);
    }
    Arc::new(AppState::new(pool, config, gateways))
}

pub fn router_for(state: Arc<AppState>) -> Router {
    crate::routes::api_router()
        .nest("/webhooks", crate::routes::webhooks::router())
        .with_state(state)
}

/// Run one request through the router; the body is parsed as JSON when
/// possible and returned as a JSON string otherwise.
pub async fn call<B: Into<Body>>(app: Router, request: Request<B>) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(request.map(Into::into))
        .await
        .expect("router is infallible");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
        serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
    });
    (status, body)
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

pub async fn insert_user(pool: &SqlitePool, first_name: &str, phone: Option<&str>) -> String {
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO users (id, first_name, last_name, phone) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(first_name)
        .bind("Tester")
        .bind(phone)
        .execute(pool)
        .await
        .expect("insert user");
    id
}

pub async fn insert_driver(pool: &SqlitePool, user_id: &str) -> String {
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO drivers (id, user_id) VALUES (?, ?)")
        .bind(&id)
        .bind(user_id)
        .execute(pool)
        .await
        .expect("insert driver");
    id
}

pub struct TripFixture {
    pub scheduled_pickup: NaiveDateTime,
    pub status: String,
    pub driver_id: Option<String>,
    pub contact_phone: Option<String>,
}

impl TripFixture {
    pub fn at(scheduled_pickup: NaiveDateTime) -> Self {
        Self {
            scheduled_pickup,
            status: "confirmed".to_string(),
            driver_id: None,
            contact_phone: None,
        }
    }

    pub fn status(mut self, status: &str) -> Self {
        self.status = status.to_string();
        self
    }

    pub fn driver(mut self, driver_id: &str) -> Self {
        self.driver_id = Some(driver_id.to_string());
        self
    }

    pub fn contact(mut self, phone: &str) -> Self {
        self.contact_phone = Some(phone.to_string());
        self
    }
}

pub async fn insert_trip(pool: &SqlitePool, fixture: TripFixture) -> String {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO trips (
            id, scheduled_pickup, pickup_address, dropoff_address,
            status, driver_id, contact_phone
        )
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(fixture.scheduled_pickup)
    .bind("12 Elm St")
    .bind("City Clinic")
    .bind(fixture.status)
    .bind(fixture.driver_id)
    .bind(fixture.contact_phone)
    .execute(pool)
    .await
    .expect("insert trip");
    id
}

pub async fn add_passenger(pool: &SqlitePool, trip_id: &str, user_id: &str, is_primary: bool) {
    sqlx::query("INSERT INTO trip_passengers (trip_id, user_id, is_primary) VALUES (?, ?, ?)")
        .bind(trip_id)
        .bind(user_id)
        .bind(is_primary)
        .execute(pool)
        .await
        .expect("insert passenger");
}

/// Insert an active SMS override directly, bypassing the single-active rule.
pub async fn insert_raw_override(pool: &SqlitePool, notification_type: &str, body: &str, minute: u32) {
    let created_at = NaiveDate::from_ymd_opt(2026, 1, 1)
        .and_then(|d| d.and_hms_opt(0, minute, 0))
        .expect("valid timestamp");
    sqlx::query(
        r#"
        INSERT INTO template_overrides (
            id, notification_type, channel, body, is_active, created_at, updated_at
        )
        VALUES (?, ?, 'sms', ?, 1, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(notification_type)
    .bind(body)
    .bind(created_at)
    .bind(created_at)
    .execute(pool)
    .await
    .expect("insert override");
}

/// In-process gateway that records what it was asked to send.
#[derive(Default)]
pub struct ScriptedGateway {
    sent: Mutex<Vec<OutboundMessage>>,
    failing: Vec<String>,
    delay: Option<Duration>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every send addressed to one of `recipients` (normalized form).
    pub fn failing_for(recipients: &[&str]) -> Self {
        Self {
            failing: recipients.iter().map(|r| r.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().expect("gateway lock").clone()
    }
}

#[async_trait]
impl GatewayAdapter for ScriptedGateway {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, message: &OutboundMessage) -> AppResult<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&message.to) {
            return Err(AppError::Gateway(format!(
                "SMS gateway error (400): The 'To' number {} is not a valid phone number.",
                message.to
            )));
        }
        let mut sent = self.sent.lock().expect("gateway lock");
        sent.push(message.clone());
        Ok(format!("SM{:04}", sent.len()))
    }
}
