use serde::{Deserialize, Serialize};

/// Every message this service knows how to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    BookingConfirmation,
    BookingUpdated,
    BookingCancelled,
    DriverAssigned,
    DriverEnRoute,
    DriverArrived,
    TripStarted,
    TripCompleted,
    #[serde(rename = "reminder_24h")]
    Reminder24h,
    #[serde(rename = "reminder_1h")]
    Reminder1h,
    #[serde(rename = "reminder_30min")]
    Reminder30min,
    PaymentReceived,
    PaymentFailed,
    InvoiceSent,
    InvoiceOverdue,
    WillCallReminder,
    StandingOrderCreated,
    DocumentExpiring,
}

impl NotificationType {
    pub const ALL: [NotificationType; 18] = [
        NotificationType::BookingConfirmation,
        NotificationType::BookingUpdated,
        NotificationType::BookingCancelled,
        NotificationType::DriverAssigned,
        NotificationType::DriverEnRoute,
        NotificationType::DriverArrived,
        NotificationType::TripStarted,
        NotificationType::TripCompleted,
        NotificationType::Reminder24h,
        NotificationType::Reminder1h,
        NotificationType::Reminder30min,
        NotificationType::PaymentReceived,
        NotificationType::PaymentFailed,
        NotificationType::InvoiceSent,
        NotificationType::InvoiceOverdue,
        NotificationType::WillCallReminder,
        NotificationType::StandingOrderCreated,
        NotificationType::DocumentExpiring,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationType::BookingConfirmation => "booking_confirmation",
            NotificationType::BookingUpdated => "booking_updated",
            NotificationType::BookingCancelled => "booking_cancelled",
            NotificationType::DriverAssigned => "driver_assigned",
            NotificationType::DriverEnRoute => "driver_en_route",
            NotificationType::DriverArrived => "driver_arrived",
            NotificationType::TripStarted => "trip_started",
            NotificationType::TripCompleted => "trip_completed",
            NotificationType::Reminder24h => "reminder_24h",
            NotificationType::Reminder1h => "reminder_1h",
            NotificationType::Reminder30min => "reminder_30min",
            NotificationType::PaymentReceived => "payment_received",
            NotificationType::PaymentFailed => "payment_failed",
            NotificationType::InvoiceSent => "invoice_sent",
            NotificationType::InvoiceOverdue => "invoice_overdue",
            NotificationType::WillCallReminder => "will_call_reminder",
            NotificationType::StandingOrderCreated => "standing_order_created",
            NotificationType::DocumentExpiring => "document_expiring",
        }
    }

    /// Convert from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        let needle = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|t| t.as_str() == needle)
    }

    /// Reminder types are the ones driven by the window scanner and
    /// deduplicated per trip.
    pub fn is_reminder(self) -> bool {
        matches!(
            self,
            NotificationType::Reminder24h
                | NotificationType::Reminder1h
                | NotificationType::Reminder30min
        )
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for NotificationType {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_str(value).ok_or_else(|| format!("Invalid notification type: {}", value))
    }
}

/// Outbound delivery channel. Only SMS has a provider today; the ledger,
/// templates and gateway registry are all keyed by channel so another one can
/// be added without touching their storage.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Sms,
}

impl Channel {
    pub const ALL: [Channel; 1] = [Channel::Sms];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Sms => "sms",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sms" => Some(Channel::Sms),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Channel {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_str(value).ok_or_else(|| format!("Invalid channel: {}", value))
    }
}
