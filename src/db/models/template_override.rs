use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Operator-provided replacement for a compiled-in message body, scoped to a
/// (notification type, channel) pair.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TemplateOverride {
    pub id: String,
    pub notification_type: String,
    pub channel: String,
    pub body: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
