use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::TemplateOverride;
use crate::error::{AppError, AppResult};

pub struct TemplateOverrideRepository;

impl TemplateOverrideRepository {
    /// Active overrides for a (type, channel) pair in creation order.
    ///
    /// More than one row here means the table is inconsistent; callers take the
    /// first and report the rest.
    pub async fn find_active(
        pool: &SqlitePool,
        notification_type: &str,
        channel: &str,
    ) -> AppResult<Vec<TemplateOverride>> {
        sqlx::query_as::<_, TemplateOverride>(
            r#"
            SELECT id, notification_type, channel, body, is_active, created_at, updated_at
            FROM template_overrides
            WHERE notification_type = ? AND channel = ? AND is_active = 1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(notification_type)
        .bind(channel)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn list(pool: &SqlitePool, include_inactive: bool) -> AppResult<Vec<TemplateOverride>> {
        sqlx::query_as::<_, TemplateOverride>(
            r#"
            SELECT id, notification_type, channel, body, is_active, created_at, updated_at
            FROM template_overrides
            WHERE (? = 1 OR is_active = 1)
            ORDER BY notification_type ASC, channel ASC, created_at ASC, rowid ASC
            "#,
        )
        .bind(include_inactive)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Make `body` the single active override for the pair. Previously active
    /// rows are kept (inactive) for audit.
    pub async fn upsert(
        pool: &SqlitePool,
        notification_type: &str,
        channel: &str,
        body: &str,
    ) -> AppResult<TemplateOverride> {
        let now = Utc::now().naive_utc();
        let mut tx = pool.begin().await.map_err(AppError::Database)?;

        sqlx::query(
            r#"
            UPDATE template_overrides
            SET is_active = 0, updated_at = ?
            WHERE notification_type = ? AND channel = ? AND is_active = 1
            "#,
        )
        .bind(now)
        .bind(notification_type)
        .bind(channel)
        .execute(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        let created = sqlx::query_as::<_, TemplateOverride>(
            r#"
            INSERT INTO template_overrides (
                id, notification_type, channel, body, is_active, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, 1, ?, ?)
            RETURNING id, notification_type, channel, body, is_active, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(notification_type)
        .bind(channel)
        .bind(body)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        tx.commit().await.map_err(AppError::Database)?;

        Ok(created)
    }

    /// Deactivate an override. Returns `None` if it does not exist.
    pub async fn deactivate(pool: &SqlitePool, id: &str) -> AppResult<Option<TemplateOverride>> {
        sqlx::query_as::<_, TemplateOverride>(
            r#"
            UPDATE template_overrides
            SET is_active = 0, updated_at = ?
            WHERE id = ?
            RETURNING id, notification_type, channel, body, is_active, created_at, updated_at
            "#,
        )
        .bind(Utc::now().naive_utc())
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }
}
