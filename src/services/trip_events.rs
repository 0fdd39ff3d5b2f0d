use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::db::{NotificationType, TripRepository};
use crate::error::{AppError, AppResult};
use crate::services::dispatcher::{DeliveryOutcome, DispatchRequest, NotificationDispatcher};
use crate::services::reminders::trip_variables;

/// Trip lifecycle changes that notify the passenger immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripEvent {
    BookingConfirmed,
    BookingUpdated,
    BookingCancelled,
    DriverAssigned,
    DriverEnRoute,
    DriverArrived,
    TripStarted,
    TripCompleted,
}

impl TripEvent {
    pub fn notification_type(self) -> NotificationType {
        match self {
            TripEvent::BookingConfirmed => NotificationType::BookingConfirmation,
            TripEvent::BookingUpdated => NotificationType::BookingUpdated,
            TripEvent::BookingCancelled => NotificationType::BookingCancelled,
            TripEvent::DriverAssigned => NotificationType::DriverAssigned,
            TripEvent::DriverEnRoute => NotificationType::DriverEnRoute,
            TripEvent::DriverArrived => NotificationType::DriverArrived,
            TripEvent::TripStarted => NotificationType::TripStarted,
            TripEvent::TripCompleted => NotificationType::TripCompleted,
        }
    }
}

/// Send the passenger notification for `event` on a trip.
///
/// Returns `Ok(None)` when the trip has no usable contact number. Delivery
/// failures come back as an unsuccessful outcome so the caller's status
/// change is never rolled back by a messaging problem.
pub async fn notify_trip_event(
    dispatcher: &NotificationDispatcher,
    tz: Tz,
    trip_id: &str,
    event: TripEvent,
) -> AppResult<Option<DeliveryOutcome>> {
    let pool = dispatcher.pool();
    let trip = TripRepository::find_by_id(pool, trip_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("trip {}", trip_id)))?;

    let primary = TripRepository::primary_passenger(pool, &trip.id).await?;
    let Some(recipient) = trip.passenger_recipient(primary.as_ref()) else {
        tracing::info!("Trip {} has no usable contact, not sending {:?}", trip.id, event);
        return Ok(None);
    };

    let driver_name = match trip.driver_id.as_deref() {
        Some(driver_id) => TripRepository::driver_contact(pool, driver_id)
            .await?
            .map(|d| d.first_name),
        None => None,
    };

    let variables = trip_variables(
        &trip,
        tz,
        primary.as_ref().map(|p| p.display_name()).as_deref(),
        driver_name.as_deref(),
    );
    let request = DispatchRequest::sms(event.notification_type(), recipient.phone)
        .variables(variables)
        .trip(trip.id.clone())
        .user(recipient.user_id);

    dispatcher.send(request).await.map(Some)
}
