use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::{NotificationType, Recipient, Trip, TripRepository};
use crate::error::{AppError, AppResult};
use crate::services::dispatcher::{DispatchRequest, NotificationDispatcher};

/// The three scheduled reminder passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    /// Every trip on tomorrow's calendar day, to the passenger.
    DayAhead,
    /// Trips 60 to 120 minutes out, to the passenger.
    HourAhead,
    /// Assigned trips 30 to 60 minutes out, to the driver.
    DriverPreArrival,
}

impl ReminderKind {
    pub const ALL: [ReminderKind; 3] = [
        ReminderKind::DayAhead,
        ReminderKind::HourAhead,
        ReminderKind::DriverPreArrival,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReminderKind::DayAhead => "24h",
            ReminderKind::HourAhead => "1h",
            ReminderKind::DriverPreArrival => "driver_pre_arrival",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "24h" | "day_ahead" => Some(ReminderKind::DayAhead),
            "1h" | "hour_ahead" => Some(ReminderKind::HourAhead),
            "driver_pre_arrival" | "driver" | "30min" => Some(ReminderKind::DriverPreArrival),
            _ => None,
        }
    }

    pub fn notification_type(self) -> NotificationType {
        match self {
            ReminderKind::DayAhead => NotificationType::Reminder24h,
            ReminderKind::HourAhead => NotificationType::Reminder1h,
            ReminderKind::DriverPreArrival => NotificationType::Reminder30min,
        }
    }

    fn notifies_driver(self) -> bool {
        self == ReminderKind::DriverPreArrival
    }
}

impl std::fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open `[start, end)` window in UTC for a scan at `now`.
///
/// The day-ahead window is tomorrow's calendar day in the service area's
/// zone (23 or 25 hours long on DST change days); the others are rolling
/// offsets from `now`.
pub fn reminder_window(
    kind: ReminderKind,
    now: DateTime<Utc>,
    tz: Tz,
) -> (NaiveDateTime, NaiveDateTime) {
    let now_utc = now.naive_utc();
    match kind {
        ReminderKind::DayAhead => {
            let tomorrow = now.with_timezone(&tz).date_naive() + Duration::days(1);
            (
                start_of_day_utc(tz, tomorrow),
                start_of_day_utc(tz, tomorrow + Duration::days(1)),
            )
        }
        ReminderKind::HourAhead => (
            now_utc + Duration::minutes(60),
            now_utc + Duration::minutes(120),
        ),
        ReminderKind::DriverPreArrival => (
            now_utc + Duration::minutes(30),
            now_utc + Duration::minutes(60),
        ),
    }
}

/// First instant of `date` in `tz`, as naive UTC. Zones that skip midnight
/// start the day at the first local time that exists.
fn start_of_day_utc(tz: Tz, date: NaiveDate) -> NaiveDateTime {
    let midnight = date.and_time(NaiveTime::MIN);
    (0..=2)
        .find_map(|hours| {
            tz.from_local_datetime(&(midnight + Duration::hours(hours)))
                .earliest()
        })
        .map(|dt| dt.naive_utc())
        .unwrap_or(midnight)
}

/// Template variables describing a trip, with times in the service area's zone.
pub fn trip_variables(
    trip: &Trip,
    tz: Tz,
    patient: Option<&str>,
    driver: Option<&str>,
) -> HashMap<String, String> {
    let pickup = tz.from_utc_datetime(&trip.scheduled_pickup);

    let mut vars = HashMap::new();
    vars.insert("date".to_string(), pickup.format("%A, %B %-d").to_string());
    vars.insert("time".to_string(), pickup.format("%-I:%M %p").to_string());
    vars.insert("pickup".to_string(), trip.pickup_address.clone());
    vars.insert("dropoff".to_string(), trip.dropoff_address.clone());
    if let Some(patient) = patient.filter(|p| !p.is_empty()) {
        vars.insert("patient".to_string(), patient.to_string());
    }
    if let Some(driver) = driver.filter(|d| !d.is_empty()) {
        vars.insert("driver".to_string(), driver.to_string());
    }
    vars
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanError {
    pub trip_id: String,
    pub message: String,
}

/// Result of one scan pass. Per-trip failures are collected here instead of
/// aborting the pass.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub kind: ReminderKind,
    pub sent: usize,
    pub failed: usize,
    /// Trips without any usable contact number.
    pub skipped: usize,
    /// Trips another scan claimed between candidate lookup and insert.
    pub already_handled: usize,
    pub errors: Vec<ScanError>,
}

impl ScanSummary {
    fn new(kind: ReminderKind) -> Self {
        Self {
            kind,
            sent: 0,
            failed: 0,
            skipped: 0,
            already_handled: 0,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, trip_id: &str, message: String) {
        self.failed += 1;
        self.errors.push(ScanError {
            trip_id: trip_id.to_string(),
            message,
        });
    }
}

enum TripResult {
    Sent,
    Failed(String),
    NoContact,
    AlreadyHandled,
}

/// Finds trips due for a reminder and sends each one at most once.
#[derive(Clone)]
pub struct ReminderScanner {
    dispatcher: NotificationDispatcher,
    tz: Tz,
}

impl ReminderScanner {
    pub fn new(dispatcher: NotificationDispatcher, tz: Tz) -> Self {
        Self { dispatcher, tz }
    }

    fn pool(&self) -> &SqlitePool {
        self.dispatcher.pool()
    }

    /// Run one pass for `kind` as of `now`. Trips are handled one at a time.
    pub async fn scan(&self, kind: ReminderKind, now: DateTime<Utc>) -> AppResult<ScanSummary> {
        let notification_type = kind.notification_type();
        let (start, end) = reminder_window(kind, now, self.tz);

        let trips = TripRepository::find_reminder_candidates(
            self.pool(),
            start,
            end,
            notification_type.as_str(),
            kind.notifies_driver(),
        )
        .await?;

        tracing::debug!(
            "{} reminder scan: {} candidate trip(s) in [{}, {})",
            kind,
            trips.len(),
            start,
            end
        );

        let mut summary = ScanSummary::new(kind);
        for trip in &trips {
            match self.remind(kind, trip).await {
                Ok(TripResult::Sent) => summary.sent += 1,
                Ok(TripResult::Failed(message)) => summary.fail(&trip.id, message),
                Ok(TripResult::NoContact) => {
                    tracing::debug!("Trip {} has no usable contact, skipping {}", trip.id, kind);
                    summary.skipped += 1;
                }
                Ok(TripResult::AlreadyHandled) => summary.already_handled += 1,
                Err(e) => {
                    tracing::error!("{} reminder for trip {} failed: {}", kind, trip.id, e);
                    summary.fail(&trip.id, e.to_string());
                }
            }
        }

        tracing::info!(
            "{} reminder scan done: sent={} failed={} skipped={} already_handled={}",
            kind,
            summary.sent,
            summary.failed,
            summary.skipped,
            summary.already_handled
        );

        Ok(summary)
    }

    /// Run every reminder kind in order. A kind whose candidate lookup fails
    /// does not prevent the others.
    pub async fn scan_all(&self, now: DateTime<Utc>) -> Vec<AppResult<ScanSummary>> {
        let mut results = Vec::with_capacity(ReminderKind::ALL.len());
        for kind in ReminderKind::ALL {
            results.push(self.scan(kind, now).await);
        }
        results
    }

    async fn remind(&self, kind: ReminderKind, trip: &Trip) -> AppResult<TripResult> {
        let primary = TripRepository::primary_passenger(self.pool(), &trip.id).await?;
        let patient_name = primary.as_ref().map(|p| p.display_name());

        let (recipient, driver_name) = if kind.notifies_driver() {
            let driver_id = trip.driver_id.as_deref().ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!("trip {} has no driver", trip.id))
            })?;
            let driver = TripRepository::driver_contact(self.pool(), driver_id).await?;
            let name = driver.as_ref().map(|d| d.first_name.clone());
            (driver.and_then(|d| d.recipient()), name)
        } else {
            (trip.passenger_recipient(primary.as_ref()), None)
        };

        let Some(Recipient { user_id, phone, .. }) = recipient else {
            return Ok(TripResult::NoContact);
        };

        let notification_type = kind.notification_type();
        let request = DispatchRequest::sms(notification_type, phone)
            .variables(trip_variables(
                trip,
                self.tz,
                patient_name.as_deref(),
                driver_name.as_deref(),
            ))
            .trip(trip.id.clone())
            .user(user_id);
        let dedupe_key = format!("{}:{}", trip.id, notification_type.as_str());

        Ok(match self.dispatcher.send_once(request, dedupe_key).await? {
            None => TripResult::AlreadyHandled,
            Some(outcome) if outcome.success => TripResult::Sent,
            Some(outcome) => TripResult::Failed(
                outcome
                    .error
                    .unwrap_or_else(|| "delivery failed".to_string()),
            ),
        })
    }
}
