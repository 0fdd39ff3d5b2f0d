use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::{Config, DeploymentMode};
use crate::db::{
    Channel, CreateDeliveryRecord, DeliveryRecord, DeliveryRecordRepository, NotificationType,
};
use crate::error::AppResult;
use crate::services::gateway::{Gateways, OutboundMessage};
use crate::services::phone::normalize_phone;
use crate::services::templates::{render, TemplateResolver};

/// One notification to send.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub notification_type: NotificationType,
    pub channel: Channel,
    /// Raw recipient address; normalized before use.
    pub recipient: String,
    pub variables: HashMap<String, String>,
    pub trip_id: Option<String>,
    pub user_id: Option<String>,
}

impl DispatchRequest {
    pub fn sms(notification_type: NotificationType, recipient: impl Into<String>) -> Self {
        Self {
            notification_type,
            channel: Channel::Sms,
            recipient: recipient.into(),
            variables: HashMap::new(),
            trip_id: None,
            user_id: None,
        }
    }

    pub fn variables(mut self, variables: HashMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    pub fn trip(mut self, trip_id: impl Into<String>) -> Self {
        self.trip_id = Some(trip_id.into());
        self
    }

    pub fn user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }
}

/// Result of one dispatch. Gateway failures land here, not in `Err`.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub record_id: String,
    pub success: bool,
    pub provider_ref: Option<String>,
    pub error: Option<String>,
}

impl DeliveryOutcome {
    fn sent(record: &DeliveryRecord, provider_ref: String) -> Self {
        Self {
            record_id: record.id.clone(),
            success: true,
            provider_ref: Some(provider_ref),
            error: None,
        }
    }

    fn failed(record: &DeliveryRecord, error: String) -> Self {
        Self {
            record_id: record.id.clone(),
            success: false,
            provider_ref: None,
            error: Some(error),
        }
    }
}

/// Sends notifications and keeps the delivery ledger in step.
///
/// Every call writes a `pending` ledger entry before anything leaves the
/// process, then moves it to `sent` or `failed` exactly once.
#[derive(Clone)]
pub struct NotificationDispatcher {
    pool: SqlitePool,
    gateways: Gateways,
    mode: DeploymentMode,
    gateway_timeout: Duration,
    status_callback_url: Option<String>,
}

impl NotificationDispatcher {
    pub fn new(pool: SqlitePool, gateways: Gateways, config: &Config) -> Self {
        Self {
            pool,
            gateways,
            mode: config.deployment.mode,
            gateway_timeout: Duration::from_secs(config.gateway.timeout_seconds.max(1)),
            status_callback_url: config.status_callback_url(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn gateways(&self) -> &Gateways {
        &self.gateways
    }

    /// Immediate send. `Err` only for ledger (storage) failures.
    pub async fn send(&self, request: DispatchRequest) -> AppResult<DeliveryOutcome> {
        let (record, message) = self.prepare(&request).await?;
        let record = DeliveryRecordRepository::create(&self.pool, record).await?;
        self.deliver(&request, record, message).await
    }

    /// Send unless a ledger entry with `dedupe_key` already exists.
    ///
    /// Returns `Ok(None)` when another send already claimed the key.
    pub async fn send_once(
        &self,
        request: DispatchRequest,
        dedupe_key: String,
    ) -> AppResult<Option<DeliveryOutcome>> {
        let (mut record, message) = self.prepare(&request).await?;
        record.dedupe_key = Some(dedupe_key);

        let Some(record) = DeliveryRecordRepository::create_if_absent(&self.pool, record).await?
        else {
            tracing::debug!(
                "{} for trip {:?} already recorded, skipping",
                request.notification_type,
                request.trip_id
            );
            return Ok(None);
        };

        self.deliver(&request, record, message).await.map(Some)
    }

    async fn prepare(
        &self,
        request: &DispatchRequest,
    ) -> AppResult<(CreateDeliveryRecord, OutboundMessage)> {
        let to = normalize_phone(&request.recipient);
        let template =
            TemplateResolver::resolve(&self.pool, request.notification_type, request.channel)
                .await?;
        let body = render(&template.body, &request.variables);

        let record = CreateDeliveryRecord {
            trip_id: request.trip_id.clone(),
            user_id: request.user_id.clone(),
            recipient: to.clone(),
            channel: request.channel.as_str().to_string(),
            notification_type: request.notification_type.as_str().to_string(),
            content: body.clone(),
            dedupe_key: None,
        };
        let message = OutboundMessage {
            to,
            body,
            status_callback: self.status_callback_url.clone(),
        };
        Ok((record, message))
    }

    async fn deliver(
        &self,
        request: &DispatchRequest,
        record: DeliveryRecord,
        message: OutboundMessage,
    ) -> AppResult<DeliveryOutcome> {
        let Some(gateway) = self.gateways.get(request.channel) else {
            if self.mode.is_production() {
                return self
                    .fail(record, format!("{} channel not configured", request.channel))
                    .await;
            }
            // Development without credentials: record the send as done so the
            // rest of the system stays exercisable. No provider ref is stored.
            let simulated = format!("simulated-{}", Uuid::new_v4());
            tracing::info!(
                "[simulated] {} to {}: {}",
                request.notification_type,
                message.to,
                message.body
            );
            let record = DeliveryRecordRepository::mark_sent(&self.pool, &record.id, None).await?;
            return Ok(DeliveryOutcome::sent(&record, simulated));
        };

        let result = tokio::time::timeout(self.gateway_timeout, gateway.send(&message)).await;
        match result {
            Ok(Ok(provider_ref)) => {
                let record =
                    DeliveryRecordRepository::mark_sent(&self.pool, &record.id, Some(&provider_ref))
                        .await?;
                tracing::info!(
                    "Sent {} to {} (delivery {}, provider ref {})",
                    request.notification_type,
                    record.recipient,
                    record.id,
                    provider_ref
                );
                Ok(DeliveryOutcome::sent(&record, provider_ref))
            }
            Ok(Err(e)) => self.fail(record, e.to_string()).await,
            Err(_) => {
                self.fail(
                    record,
                    format!(
                        "gateway timed out after {}s",
                        self.gateway_timeout.as_secs()
                    ),
                )
                .await
            }
        }
    }

    async fn fail(&self, record: DeliveryRecord, error: String) -> AppResult<DeliveryOutcome> {
        let record = DeliveryRecordRepository::mark_failed(&self.pool, &record.id, &error).await?;
        tracing::warn!(
            "Failed to send {} to {} (delivery {}): {}",
            record.notification_type,
            record.recipient,
            record.id,
            error
        );
        Ok(DeliveryOutcome::failed(&record, error))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::DeliveryStatus;
    use crate::test_support::{memory_pool, test_config, ScriptedGateway};

    fn reminder_request() -> DispatchRequest {
        let mut vars = HashMap::new();
        vars.insert("time".to_string(), "3:00 PM".to_string());
        DispatchRequest::sms(NotificationType::Reminder1h, "(555) 123-4567")
            .variables(vars)
            .trip("trip-1")
    }

    async fn record(pool: &SqlitePool, id: &str) -> DeliveryRecord {
        DeliveryRecordRepository::find_by_id(pool, id)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn successful_send_records_provider_ref() {
        let pool = memory_pool().await;
        let gateway = Arc::new(ScriptedGateway::new());
        let dispatcher = NotificationDispatcher::new(
            pool.clone(),
            Gateways::new().with(gateway.clone()),
            &test_config(DeploymentMode::Production),
        );

        let outcome = dispatcher.send(reminder_request()).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.provider_ref.as_deref(), Some("SM0001"));

        let sent = gateway.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "+15551234567");
        assert!(sent[0].body.contains("3:00 PM"));
        assert!(sent[0].body.contains("{pickup}"));

        let stored = record(&pool, &outcome.record_id).await;
        assert_eq!(stored.status, DeliveryStatus::Sent.as_str());
        assert_eq!(stored.provider_ref.as_deref(), Some("SM0001"));
        assert!(stored.sent_at.is_some());
        assert!(stored.failed_at.is_none());
        assert_eq!(stored.content, sent[0].body);
    }

    #[tokio::test]
    async fn gateway_error_becomes_failed_outcome() {
        let pool = memory_pool().await;
        let dispatcher = NotificationDispatcher::new(
            pool.clone(),
            Gateways::new().with(Arc::new(ScriptedGateway::failing_for(&["+15551234567"]))),
            &test_config(DeploymentMode::Production),
        );

        let outcome = dispatcher.send(reminder_request()).await.unwrap();
        assert!(!outcome.success);
        let error = outcome.error.unwrap();
        assert!(error.starts_with("SMS gateway error (400)"));

        let stored = record(&pool, &outcome.record_id).await;
        assert_eq!(stored.status, DeliveryStatus::Failed.as_str());
        assert_eq!(stored.error_message.as_deref(), Some(error.as_str()));
        assert!(stored.failed_at.is_some());
        assert!(stored.sent_at.is_none());
        assert!(stored.provider_ref.is_none());
    }

    #[tokio::test]
    async fn missing_gateway_depends_on_mode() {
        let pool = memory_pool().await;

        let prod = NotificationDispatcher::new(
            pool.clone(),
            Gateways::new(),
            &test_config(DeploymentMode::Production),
        );
        let outcome = prod.send(reminder_request()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("sms channel not configured"));

        let dev = NotificationDispatcher::new(
            pool.clone(),
            Gateways::new(),
            &test_config(DeploymentMode::Development),
        );
        let outcome = dev.send(reminder_request()).await.unwrap();
        assert!(outcome.success);
        assert!(outcome
            .provider_ref
            .as_deref()
            .is_some_and(|r| r.starts_with("simulated-")));
        let stored = record(&pool, &outcome.record_id).await;
        assert_eq!(stored.status, DeliveryStatus::Sent.as_str());
        assert!(stored.provider_ref.is_none());
    }

    #[tokio::test]
    async fn slow_gateway_times_out_as_failure() {
        let pool = memory_pool().await;
        let mut config = test_config(DeploymentMode::Production);
        config.gateway.timeout_seconds = 1;
        let dispatcher = NotificationDispatcher::new(
            pool.clone(),
            Gateways::new().with(Arc::new(ScriptedGateway::slow(Duration::from_secs(5)))),
            &config,
        );

        let outcome = dispatcher.send(reminder_request()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("gateway timed out after 1s"));
    }

    #[tokio::test]
    async fn send_once_claims_the_key_a_single_time() {
        let pool = memory_pool().await;
        let gateway = Arc::new(ScriptedGateway::new());
        let dispatcher = NotificationDispatcher::new(
            pool.clone(),
            Gateways::new().with(gateway.clone()),
            &test_config(DeploymentMode::Production),
        );

        let first = dispatcher
            .send_once(reminder_request(), "trip-1:reminder_1h".to_string())
            .await
            .unwrap();
        assert!(first.is_some());

        let second = dispatcher
            .send_once(reminder_request(), "trip-1:reminder_1h".to_string())
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(gateway.sent().len(), 1);
    }

    #[tokio::test]
    async fn status_callback_is_attached_when_public_url_known() {
        let pool = memory_pool().await;
        let gateway = Arc::new(ScriptedGateway::new());
        let mut config = test_config(DeploymentMode::Production);
        config.server.public_base_url = Some("https://notify.example.com".to_string());
        let dispatcher =
            NotificationDispatcher::new(pool, Gateways::new().with(gateway.clone()), &config);

        dispatcher.send(reminder_request()).await.unwrap();
        assert_eq!(
            gateway.sent()[0].status_callback.as_deref(),
            Some("https://notify.example.com/webhooks/sms/status")
        );
    }
}
