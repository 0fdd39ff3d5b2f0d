use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::SqlitePool;

use crate::db::{DeliveryRecord, DeliveryRecordRepository, DeliveryStatus};
use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";

/// Delivery receipt posted by the SMS provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCallback {
    pub message_sid: String,
    pub message_status: String,
    pub error_message: Option<String>,
}

impl StatusCallback {
    /// Parse the provider's form-encoded body.
    pub fn from_form(body: &[u8]) -> AppResult<Self> {
        let mut message_sid = None;
        let mut message_status = None;
        let mut error_message = None;
        let mut error_code = None;

        for (key, value) in url::form_urlencoded::parse(body) {
            match key.as_ref() {
                "MessageSid" | "SmsSid" => message_sid = Some(value.into_owned()),
                "MessageStatus" | "SmsStatus" => message_status = Some(value.into_owned()),
                "ErrorMessage" => error_message = Some(value.into_owned()),
                "ErrorCode" => error_code = Some(value.into_owned()),
                _ => {}
            }
        }

        let message_sid = message_sid
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::BadRequest("Missing MessageSid".to_string()))?;
        let message_status = message_status
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::BadRequest("Missing MessageStatus".to_string()))?;

        let error_message = match (error_message, error_code) {
            (Some(msg), _) if !msg.trim().is_empty() => Some(msg),
            (_, Some(code)) if !code.trim().is_empty() => Some(format!("error code {}", code)),
            _ => None,
        };

        Ok(Self {
            message_sid,
            message_status,
            error_message,
        })
    }

    /// Ledger status this receipt moves a `sent` record to, if any.
    /// Intermediate provider states (queued, sending, sent) change nothing.
    pub fn target_status(&self) -> Option<DeliveryStatus> {
        match self.message_status.trim().to_lowercase().as_str() {
            "delivered" => Some(DeliveryStatus::Delivered),
            "failed" | "undelivered" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

/// Check `X-Signature: sha256=<hex>` against an HMAC-SHA256 of the raw body.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> AppResult<()> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to create HMAC")))?;
    mac.update(body);

    let expected_sig = if let Some(hex_sig) = signature.trim().strip_prefix("sha256=") {
        hex::decode(hex_sig)
            .map_err(|_| AppError::BadRequest("Invalid signature format".to_string()))?
    } else {
        return Err(AppError::BadRequest("Invalid signature format".to_string()));
    };

    mac.verify_slice(&expected_sig)
        .map_err(|_| AppError::Unauthorized)
}

/// Verify the request when a secret is configured; unsigned callbacks are
/// accepted otherwise.
pub fn authenticate(secret: Option<&str>, headers: &HeaderMap, body: &[u8]) -> AppResult<()> {
    let Some(secret) = secret else {
        return Ok(());
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    verify_signature(secret, body, signature)
}

/// Apply a receipt to the ledger. Returns the updated record, or `None` when
/// the receipt changes nothing (intermediate state, unknown reference, or the
/// record is no longer `sent`).
pub async fn apply_status_callback(
    pool: &SqlitePool,
    callback: &StatusCallback,
) -> AppResult<Option<DeliveryRecord>> {
    let Some(status) = callback.target_status() else {
        tracing::debug!(
            "Ignoring provider status '{}' for {}",
            callback.message_status,
            callback.message_sid
        );
        return Ok(None);
    };

    let updated = DeliveryRecordRepository::apply_provider_status(
        pool,
        &callback.message_sid,
        status,
        callback.error_message.as_deref(),
    )
    .await?;

    match &updated {
        Some(record) => tracing::info!(
            "Delivery {} marked {} by provider callback",
            record.id,
            record.status
        ),
        None => {
            let known = DeliveryRecordRepository::find_by_provider_ref(pool, &callback.message_sid)
                .await?;
            match known {
                Some(record) => tracing::debug!(
                    "Delivery {} already '{}', ignoring provider status '{}'",
                    record.id,
                    record.status,
                    callback.message_status
                ),
                None => tracing::warn!(
                    "Provider callback for unknown message {}",
                    callback.message_sid
                ),
            }
        }
    }

    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CreateDeliveryRecord;
    use crate::test_support::memory_pool;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    async fn sent_record(pool: &SqlitePool, provider_ref: &str) -> DeliveryRecord {
        let record = DeliveryRecordRepository::create(
            pool,
            CreateDeliveryRecord {
                trip_id: Some("trip-1".to_string()),
                user_id: None,
                recipient: "+15551234567".to_string(),
                channel: "sms".to_string(),
                notification_type: "booking_confirmation".to_string(),
                content: "Booked".to_string(),
                dedupe_key: None,
            },
        )
        .await
        .unwrap();
        DeliveryRecordRepository::mark_sent(pool, &record.id, Some(provider_ref))
            .await
            .unwrap()
    }

    #[test]
    fn parses_form_body() {
        let cb = StatusCallback::from_form(
            b"MessageSid=SM0001&MessageStatus=undelivered&ErrorCode=30003",
        )
        .unwrap();
        assert_eq!(cb.message_sid, "SM0001");
        assert_eq!(cb.target_status(), Some(DeliveryStatus::Failed));
        assert_eq!(cb.error_message.as_deref(), Some("error code 30003"));

        let queued = StatusCallback::from_form(b"MessageSid=SM1&MessageStatus=queued").unwrap();
        assert_eq!(queued.target_status(), None);

        assert!(StatusCallback::from_form(b"MessageStatus=delivered").is_err());
    }

    #[test]
    fn signature_verification() {
        let body = b"MessageSid=SM1&MessageStatus=delivered";
        assert!(verify_signature("s3cret", body, &sign("s3cret", body)).is_ok());
        assert!(matches!(
            verify_signature("s3cret", body, &sign("other", body)),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            verify_signature("s3cret", body, "md5=abc"),
            Err(AppError::BadRequest(_))
        ));

        let headers = HeaderMap::new();
        assert!(authenticate(None, &headers, body).is_ok());
        assert!(matches!(
            authenticate(Some("s3cret"), &headers, body),
            Err(AppError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn delivered_then_late_failure_is_ignored() {
        let pool = memory_pool().await;
        let record = sent_record(&pool, "SM0042").await;

        let delivered = StatusCallback::from_form(b"MessageSid=SM0042&MessageStatus=delivered")
            .unwrap();
        let updated = apply_status_callback(&pool, &delivered).await.unwrap().unwrap();
        assert_eq!(updated.id, record.id);
        assert_eq!(updated.status, DeliveryStatus::Delivered.as_str());
        assert!(updated.delivered_at.is_some());

        let failed = StatusCallback::from_form(b"MessageSid=SM0042&MessageStatus=failed").unwrap();
        assert!(apply_status_callback(&pool, &failed).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failure_receipt_keeps_sent_at_as_only_timestamp() {
        let pool = memory_pool().await;
        sent_record(&pool, "SM0043").await;

        let cb = StatusCallback::from_form(
            b"MessageSid=SM0043&MessageStatus=undelivered&ErrorMessage=Unreachable+handset",
        )
        .unwrap();
        let updated = apply_status_callback(&pool, &cb).await.unwrap().unwrap();
        assert_eq!(updated.status, DeliveryStatus::Failed.as_str());
        assert_eq!(updated.error_message.as_deref(), Some("Unreachable handset"));
        assert!(updated.sent_at.is_some());
        assert!(updated.failed_at.is_none());
        assert!(updated.delivered_at.is_none());
    }
}
