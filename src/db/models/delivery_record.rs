use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of a delivery attempt.
///
/// `pending -> sent | failed` is driven by the dispatcher. `sent -> delivered`
/// (and a late `sent -> failed`) only happens through the provider's
/// delivery-status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(DeliveryStatus::Pending),
            "sent" => Some(DeliveryStatus::Sent),
            "delivered" => Some(DeliveryStatus::Delivered),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl TryFrom<&str> for DeliveryStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_str(value).ok_or_else(|| format!("Invalid delivery status: {}", value))
    }
}

/// One row of the delivery ledger: the audit trail of a single notification attempt.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: String,
    pub trip_id: Option<String>,
    pub user_id: Option<String>,
    /// Normalized recipient address (E.164-like for SMS).
    pub recipient: String,
    pub channel: String,
    pub notification_type: String,
    /// Fully rendered message body.
    pub content: String,
    pub status: String,
    /// Provider message id; only set after a real gateway call succeeded.
    pub provider_ref: Option<String>,
    pub error_message: Option<String>,
    /// `<trip_id>:<notification_type>` for reminder sends, enforced unique.
    pub dedupe_key: Option<String>,
    pub created_at: NaiveDateTime,
    pub sent_at: Option<NaiveDateTime>,
    pub failed_at: Option<NaiveDateTime>,
    pub delivered_at: Option<NaiveDateTime>,
}

/// Data required to open a new ledger entry. Entries always start `pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDeliveryRecord {
    pub trip_id: Option<String>,
    pub user_id: Option<String>,
    pub recipient: String,
    pub channel: String,
    pub notification_type: String,
    pub content: String,
    pub dedupe_key: Option<String>,
}

/// Grouped ledger count used by the statistics aggregation.
#[derive(Debug, Clone, FromRow)]
pub struct DeliveryCountRow {
    pub notification_type: String,
    pub channel: String,
    pub status: String,
    pub count: i64,
}
