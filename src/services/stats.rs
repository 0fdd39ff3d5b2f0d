use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::{DeliveryCountRow, DeliveryRecordRepository, DeliveryStatus};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub total: i64,
    pub pending: i64,
    pub sent: i64,
    pub delivered: i64,
    pub failed: i64,
    pub by_type: BTreeMap<String, i64>,
    pub by_channel: BTreeMap<String, i64>,
}

pub struct StatsAggregator;

impl StatsAggregator {
    /// Ledger totals for entries created between `start` and `end` (both
    /// inclusive, UTC calendar dates). Either bound may be omitted.
    pub async fn summarize(
        pool: &SqlitePool,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> AppResult<DeliveryStats> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(AppError::BadRequest(format!(
                    "start date {} is after end date {}",
                    s, e
                )));
            }
        }

        let from = start.map(start_of_day);
        let until = end.map(|d| start_of_day(d) + Duration::days(1));
        let rows = DeliveryRecordRepository::grouped_counts(pool, from, until).await?;

        Ok(fold_counts(&rows))
    }
}

fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(chrono::NaiveTime::MIN)
}

pub fn fold_counts(rows: &[DeliveryCountRow]) -> DeliveryStats {
    let mut stats = DeliveryStats::default();
    for row in rows {
        stats.total += row.count;
        match DeliveryStatus::from_str(&row.status) {
            Some(DeliveryStatus::Pending) => stats.pending += row.count,
            Some(DeliveryStatus::Sent) => stats.sent += row.count,
            Some(DeliveryStatus::Delivered) => stats.delivered += row.count,
            Some(DeliveryStatus::Failed) => stats.failed += row.count,
            None => tracing::warn!("Unknown delivery status '{}' in ledger", row.status),
        }
        *stats.by_type.entry(row.notification_type.clone()).or_insert(0) += row.count;
        *stats.by_channel.entry(row.channel.clone()).or_insert(0) += row.count;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CreateDeliveryRecord;
    use crate::test_support::memory_pool;

    async fn ledger_entry(pool: &SqlitePool, notification_type: &str, created: &str) -> String {
        let record = DeliveryRecordRepository::create(
            pool,
            CreateDeliveryRecord {
                trip_id: None,
                user_id: None,
                recipient: "+15551234567".to_string(),
                channel: "sms".to_string(),
                notification_type: notification_type.to_string(),
                content: "hello".to_string(),
                dedupe_key: None,
            },
        )
        .await
        .unwrap();
        sqlx::query("UPDATE notification_deliveries SET created_at = ? WHERE id = ?")
            .bind(NaiveDateTime::parse_from_str(created, "%Y-%m-%d %H:%M:%S").unwrap())
            .bind(&record.id)
            .execute(pool)
            .await
            .unwrap();
        record.id
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    #[tokio::test]
    async fn summarize_range_counts_statuses() {
        let pool = memory_pool().await;
        let a = ledger_entry(&pool, "reminder_24h", "2026-10-10 08:00:00").await;
        let b = ledger_entry(&pool, "reminder_1h", "2026-10-11 12:00:00").await;
        let c = ledger_entry(&pool, "reminder_1h", "2026-10-12 23:59:59").await;
        ledger_entry(&pool, "reminder_1h", "2026-10-13 00:00:00").await;
        ledger_entry(&pool, "reminder_1h", "2026-10-09 23:00:00").await;

        DeliveryRecordRepository::mark_sent(&pool, &a, Some("SM1")).await.unwrap();
        DeliveryRecordRepository::mark_sent(&pool, &b, Some("SM2")).await.unwrap();
        DeliveryRecordRepository::mark_failed(&pool, &c, "boom").await.unwrap();

        let stats = StatsAggregator::summarize(&pool, Some(day(10)), Some(day(12)))
            .await
            .unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.by_channel.get("sms"), Some(&3));
        assert_eq!(stats.by_type.get("reminder_1h"), Some(&2));
        assert_eq!(stats.by_type.get("reminder_24h"), Some(&1));

        let all = StatsAggregator::summarize(&pool, None, None).await.unwrap();
        assert_eq!(all.total, 5);
        assert_eq!(all.pending, 2);
    }

    #[tokio::test]
    async fn inverted_range_is_rejected() {
        let pool = memory_pool().await;
        let err = StatsAggregator::summarize(&pool, Some(day(12)), Some(day(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn fold_empty() {
        assert_eq!(fold_counts(&[]), DeliveryStats::default());
    }
}
