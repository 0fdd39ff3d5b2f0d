use chrono::NaiveDateTime;
use sqlx::SqlitePool;

use crate::db::models::{PersonContact, Trip, ACTIVE_TRIP_STATUSES};
use crate::error::{AppError, AppResult};

/// Read-only access to the dispatch platform's trip data.
pub struct TripRepository;

impl TripRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Trip>> {
        sqlx::query_as::<_, Trip>(
            r#"
            SELECT id, scheduled_pickup, pickup_address, dropoff_address,
                   status, driver_id, contact_phone
            FROM trips
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Active trips with a pickup in `[start, end)` that have no ledger entry
    /// of `notification_type` yet, earliest first.
    pub async fn find_reminder_candidates(
        pool: &SqlitePool,
        start: NaiveDateTime,
        end: NaiveDateTime,
        notification_type: &str,
        require_driver: bool,
    ) -> AppResult<Vec<Trip>> {
        let status_params = vec!["?"; ACTIVE_TRIP_STATUSES.len()].join(", ");
        let sql = format!(
            r#"
            SELECT t.id, t.scheduled_pickup, t.pickup_address, t.dropoff_address,
                   t.status, t.driver_id, t.contact_phone
            FROM trips t
            WHERE t.status IN ({status_params})
              AND t.scheduled_pickup >= ?
              AND t.scheduled_pickup < ?
              AND (? = 0 OR t.driver_id IS NOT NULL)
              AND NOT EXISTS (
                  SELECT 1 FROM notification_deliveries d
                  WHERE d.trip_id = t.id AND d.notification_type = ?
              )
            ORDER BY t.scheduled_pickup ASC, t.id ASC
            "#
        );

        let mut query = sqlx::query_as::<_, Trip>(&sql);
        for status in ACTIVE_TRIP_STATUSES {
            query = query.bind(status);
        }

        query
            .bind(start)
            .bind(end)
            .bind(require_driver)
            .bind(notification_type)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    /// The passenger flagged primary on the trip, if any.
    pub async fn primary_passenger(
        pool: &SqlitePool,
        trip_id: &str,
    ) -> AppResult<Option<PersonContact>> {
        sqlx::query_as::<_, PersonContact>(
            r#"
            SELECT u.id AS user_id, u.first_name, u.last_name, u.phone
            FROM trip_passengers tp
            JOIN users u ON u.id = tp.user_id
            WHERE tp.trip_id = ? AND tp.is_primary = 1
            ORDER BY u.id ASC
            LIMIT 1
            "#,
        )
        .bind(trip_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn driver_contact(
        pool: &SqlitePool,
        driver_id: &str,
    ) -> AppResult<Option<PersonContact>> {
        sqlx::query_as::<_, PersonContact>(
            r#"
            SELECT u.id AS user_id, u.first_name, u.last_name, u.phone
            FROM drivers d
            JOIN users u ON u.id = d.user_id
            WHERE d.id = ?
            "#,
        )
        .bind(driver_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }
}
