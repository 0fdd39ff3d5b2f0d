use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreateDeliveryRecord, DeliveryCountRow, DeliveryRecord, DeliveryStatus};
use crate::error::{AppError, AppResult};

const RECORD_COLUMNS: &str = r#"
    id,
    trip_id,
    user_id,
    recipient,
    channel,
    notification_type,
    content,
    status,
    provider_ref,
    error_message,
    dedupe_key,
    created_at,
    sent_at,
    failed_at,
    delivered_at
"#;

/// Optional filters for listing the ledger.
#[derive(Debug, Clone, Default)]
pub struct DeliveryFilter {
    pub notification_type: Option<String>,
    pub channel: Option<String>,
    pub status: Option<String>,
    pub trip_id: Option<String>,
}

/// Repository for the delivery ledger (`notification_deliveries`).
///
/// Implementation notes:
/// - Status transitions are single conditional UPDATEs (`... AND status = 'pending'`),
///   so a terminal record can never be overwritten.
/// - Reminder entries carry a `dedupe_key` backed by a UNIQUE index; inserting
///   uses `ON CONFLICT DO NOTHING` so concurrent scanners cannot both claim a
///   (trip, reminder type) pair.
pub struct DeliveryRecordRepository;

impl DeliveryRecordRepository {
    /// Open a new `pending` ledger entry.
    pub async fn create(
        pool: &SqlitePool,
        record: CreateDeliveryRecord,
    ) -> AppResult<DeliveryRecord> {
        Self::insert(pool, record, false).await?.ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("ledger insert returned no row"))
        })
    }

    /// Open a new `pending` entry unless one with the same `dedupe_key` exists.
    ///
    /// Returns `None` when the key was already claimed.
    pub async fn create_if_absent(
        pool: &SqlitePool,
        record: CreateDeliveryRecord,
    ) -> AppResult<Option<DeliveryRecord>> {
        if record.dedupe_key.is_none() {
            return Err(AppError::Internal(anyhow::anyhow!(
                "create_if_absent requires a dedupe key"
            )));
        }
        Self::insert(pool, record, true).await
    }

    async fn insert(
        pool: &SqlitePool,
        record: CreateDeliveryRecord,
        skip_on_conflict: bool,
    ) -> AppResult<Option<DeliveryRecord>> {
        let on_conflict = if skip_on_conflict {
            "ON CONFLICT (dedupe_key) DO NOTHING"
        } else {
            ""
        };
        let sql = format!(
            r#"
            INSERT INTO notification_deliveries (
                id, trip_id, user_id, recipient, channel, notification_type,
                content, status, dedupe_key, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
            {on_conflict}
            RETURNING {RECORD_COLUMNS}
            "#
        );

        sqlx::query_as::<_, DeliveryRecord>(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(record.trip_id)
            .bind(record.user_id)
            .bind(record.recipient)
            .bind(record.channel)
            .bind(record.notification_type)
            .bind(record.content)
            .bind(record.dedupe_key)
            .bind(Utc::now().naive_utc())
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Transition `pending -> sent`, recording the provider reference if any.
    pub async fn mark_sent(
        pool: &SqlitePool,
        id: &str,
        provider_ref: Option<&str>,
    ) -> AppResult<DeliveryRecord> {
        let sql = format!(
            r#"
            UPDATE notification_deliveries
            SET status = 'sent', sent_at = ?, provider_ref = ?
            WHERE id = ? AND status = 'pending'
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, DeliveryRecord>(&sql)
            .bind(Utc::now().naive_utc())
            .bind(provider_ref)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        match row {
            Some(row) => Ok(row),
            None => Err(Self::transition_error(pool, id, DeliveryStatus::Sent).await),
        }
    }

    /// Transition `pending -> failed` with the error text.
    pub async fn mark_failed(
        pool: &SqlitePool,
        id: &str,
        error_message: &str,
    ) -> AppResult<DeliveryRecord> {
        let sql = format!(
            r#"
            UPDATE notification_deliveries
            SET status = 'failed', failed_at = ?, error_message = ?
            WHERE id = ? AND status = 'pending'
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, DeliveryRecord>(&sql)
            .bind(Utc::now().naive_utc())
            .bind(error_message)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        match row {
            Some(row) => Ok(row),
            None => Err(Self::transition_error(pool, id, DeliveryStatus::Failed).await),
        }
    }

    async fn transition_error(pool: &SqlitePool, id: &str, target: DeliveryStatus) -> AppError {
        match Self::find_by_id(pool, id).await {
            Ok(Some(current)) => AppError::InvalidTransition(format!(
                "delivery {} is '{}', cannot move to '{}'",
                id,
                current.status,
                target.as_str()
            )),
            Ok(None) => AppError::NotFound(format!("delivery {}", id)),
            Err(e) => e,
        }
    }

    /// Apply a provider delivery receipt to a `sent` record.
    ///
    /// Only `Delivered` and `Failed` are meaningful here. Returns `None` if no
    /// `sent` record carries this provider reference.
    pub async fn apply_provider_status(
        pool: &SqlitePool,
        provider_ref: &str,
        status: DeliveryStatus,
        error_message: Option<&str>,
    ) -> AppResult<Option<DeliveryRecord>> {
        let sql = match status {
            DeliveryStatus::Delivered => format!(
                r#"
                UPDATE notification_deliveries
                SET status = 'delivered', delivered_at = ?
                WHERE provider_ref = ? AND status = 'sent'
                RETURNING {RECORD_COLUMNS}
                "#
            ),
            // The gateway accepted the message, so `sent_at` stays the one
            // terminal timestamp; `failed_at` is reserved for failed sends.
            DeliveryStatus::Failed => format!(
                r#"
                UPDATE notification_deliveries
                SET status = 'failed', error_message = COALESCE(?, 'undelivered')
                WHERE provider_ref = ? AND status = 'sent'
                RETURNING {RECORD_COLUMNS}
                "#
            ),
            other => {
                return Err(AppError::BadRequest(format!(
                    "provider status '{}' cannot be applied",
                    other.as_str()
                )))
            }
        };

        let query = sqlx::query_as::<_, DeliveryRecord>(&sql);
        let query = if status == DeliveryStatus::Failed {
            query.bind(error_message)
        } else {
            query.bind(Utc::now().naive_utc())
        };

        let row = query
            .bind(provider_ref)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<DeliveryRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM notification_deliveries WHERE id = ?");
        sqlx::query_as::<_, DeliveryRecord>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn find_by_provider_ref(
        pool: &SqlitePool,
        provider_ref: &str,
    ) -> AppResult<Option<DeliveryRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM notification_deliveries WHERE provider_ref = ? LIMIT 1"
        );
        sqlx::query_as::<_, DeliveryRecord>(&sql)
            .bind(provider_ref)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)
    }

    /// List entries (newest first) with optional filters and pagination.
    pub async fn list(
        pool: &SqlitePool,
        filter: &DeliveryFilter,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<DeliveryRecord>> {
        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM notification_deliveries
            WHERE (? IS NULL OR notification_type = ?)
              AND (? IS NULL OR channel = ?)
              AND (? IS NULL OR status = ?)
              AND (? IS NULL OR trip_id = ?)
            ORDER BY created_at DESC
            LIMIT ?
            OFFSET ?
            "#
        );

        sqlx::query_as::<_, DeliveryRecord>(&sql)
            .bind(&filter.notification_type)
            .bind(&filter.notification_type)
            .bind(&filter.channel)
            .bind(&filter.channel)
            .bind(&filter.status)
            .bind(&filter.status)
            .bind(&filter.trip_id)
            .bind(&filter.trip_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Count entries with optional filters.
    pub async fn count(pool: &SqlitePool, filter: &DeliveryFilter) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM notification_deliveries
            WHERE (? IS NULL OR notification_type = ?)
              AND (? IS NULL OR channel = ?)
              AND (? IS NULL OR status = ?)
              AND (? IS NULL OR trip_id = ?)
            "#,
        )
        .bind(&filter.notification_type)
        .bind(&filter.notification_type)
        .bind(&filter.channel)
        .bind(&filter.channel)
        .bind(&filter.status)
        .bind(&filter.status)
        .bind(&filter.trip_id)
        .bind(&filter.trip_id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(count)
    }

    /// Counts grouped by (type, channel, status) for entries created in
    /// `[from, until)`. Either bound may be open.
    pub async fn grouped_counts(
        pool: &SqlitePool,
        from: Option<NaiveDateTime>,
        until: Option<NaiveDateTime>,
    ) -> AppResult<Vec<DeliveryCountRow>> {
        sqlx::query_as::<_, DeliveryCountRow>(
            r#"
            SELECT notification_type, channel, status, COUNT(*) AS count
            FROM notification_deliveries
            WHERE (? IS NULL OR created_at >= ?)
              AND (? IS NULL OR created_at < ?)
            GROUP BY notification_type, channel, status
            "#,
        )
        .bind(from)
        .bind(from)
        .bind(until)
        .bind(until)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }
}
