use std::collections::HashMap;

use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::{Channel, NotificationType, TemplateOverrideRepository};
use crate::error::AppResult;

/// Compiled-in message body for a notification type.
///
/// The match is exhaustive, so every type always has a default.
pub fn default_template(notification_type: NotificationType) -> &'static str {
    match notification_type {
        NotificationType::BookingConfirmation => {
            "Your ride is booked for {date} at {time}. Pickup: {pickup}. Drop-off: {dropoff}."
        }
        NotificationType::BookingUpdated => {
            "Your ride has been updated. New pickup: {date} at {time} from {pickup}."
        }
        NotificationType::BookingCancelled => {
            "Your ride on {date} at {time} has been cancelled. Call us if you need to rebook."
        }
        NotificationType::DriverAssigned => {
            "{driver} will be your driver for your ride on {date} at {time}."
        }
        NotificationType::DriverEnRoute => "{driver} is on the way to {pickup}.",
        NotificationType::DriverArrived => "{driver} has arrived at {pickup}.",
        NotificationType::TripStarted => "Your ride to {dropoff} has started.",
        NotificationType::TripCompleted => {
            "You have arrived at {dropoff}. Thank you for riding with us!"
        }
        NotificationType::Reminder24h => {
            "Reminder: you have a ride tomorrow, {date} at {time}, from {pickup}."
        }
        NotificationType::Reminder1h => {
            "Reminder: your ride is scheduled for {time} today. Pickup: {pickup}."
        }
        NotificationType::Reminder30min => {
            "Upcoming pickup at {time}: {patient} at {pickup}, going to {dropoff}."
        }
        NotificationType::PaymentReceived => "Payment of {amount} received. Thank you!",
        NotificationType::PaymentFailed => {
            "We could not process your payment of {amount}. Please update your payment method."
        }
        NotificationType::InvoiceSent => {
            "Invoice {invoice_number} for {amount} has been sent. Due {due_date}."
        }
        NotificationType::InvoiceOverdue => {
            "Invoice {invoice_number} for {amount} is overdue. Please contact billing."
        }
        NotificationType::WillCallReminder => {
            "When you are ready for your return ride from {pickup}, call {dispatch_phone}."
        }
        NotificationType::StandingOrderCreated => {
            "Your recurring ride from {pickup} to {dropoff} is scheduled starting {date} at {time}."
        }
        NotificationType::DocumentExpiring => {
            "Your {document} expires on {date}. Please upload a renewed copy."
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplateSource {
    Default,
    Override { id: String },
}

/// The effective template for a (type, channel) pair.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedTemplate {
    pub body: String,
    pub source: TemplateSource,
    /// Number of active overrides beyond the one that was picked. Non-zero
    /// means the override table is inconsistent.
    pub ignored_overrides: usize,
}

pub struct TemplateResolver;

impl TemplateResolver {
    /// Active override if present, else the compiled-in default.
    ///
    /// With several active overrides the earliest created wins and the
    /// conflict is logged.
    pub async fn resolve(
        pool: &SqlitePool,
        notification_type: NotificationType,
        channel: Channel,
    ) -> AppResult<ResolvedTemplate> {
        let mut active =
            TemplateOverrideRepository::find_active(pool, notification_type.as_str(), channel.as_str())
                .await?;

        if active.is_empty() {
            return Ok(ResolvedTemplate {
                body: default_template(notification_type).to_string(),
                source: TemplateSource::Default,
                ignored_overrides: 0,
            });
        }

        let ignored = active.len() - 1;
        let chosen = active.remove(0);
        if ignored > 0 {
            tracing::warn!(
                "{} active template overrides for ({}, {}); using {} and ignoring {:?}",
                ignored + 1,
                notification_type,
                channel,
                chosen.id,
                active.iter().map(|o| o.id.as_str()).collect::<Vec<_>>()
            );
        }

        Ok(ResolvedTemplate {
            body: chosen.body,
            source: TemplateSource::Override { id: chosen.id },
            ignored_overrides: ignored,
        })
    }
}

/// Fill `{key}` placeholders from `variables`.
///
/// Keys without a value stay in the output as literal `{key}` text.
pub fn render(template: &str, variables: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        result.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];

        let replaced = after_open.find('}').and_then(|close| {
            let key = &after_open[..close];
            if key.contains('{') {
                return None;
            }
            variables.get(key).map(|value| (value, close))
        });

        match replaced {
            Some((value, close)) => {
                result.push_str(value);
                rest = &after_open[close + 1..];
            }
            None => {
                result.push('{');
                rest = after_open;
            }
        }
    }

    result.push_str(rest);
    result
}

/// A template body with `{{key}}` spellings folded to `{key}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTemplate {
    pub body: String,
    /// Placeholder names the body references, in order of first use.
    pub placeholders: Vec<String>,
}

impl NormalizedTemplate {
    /// Referenced placeholders that nothing fills for `notification_type`.
    pub fn unknown_for(&self, notification_type: NotificationType) -> Vec<String> {
        let known = known_placeholders(notification_type);
        self.placeholders
            .iter()
            .filter(|name| !known.contains(name))
            .cloned()
            .collect()
    }
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Fold `{{key}}` into `{key}` and collect the placeholder names used.
///
/// Braces that do not enclose a plain identifier are left as they are.
pub fn normalize_template(body: &str) -> NormalizedTemplate {
    let mut out = String::with_capacity(body.len());
    let mut placeholders: Vec<String> = Vec::new();
    let mut rest = body;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];

        let found = match tail.strip_prefix("{{") {
            Some(inner) => inner.find("}}").map(|end| (&inner[..end], end + 4)),
            None => tail[1..].find('}').map(|end| (&tail[1..=end], end + 2)),
        };

        match found.filter(|(name, _)| is_placeholder_name(name)) {
            Some((name, consumed)) => {
                out.push('{');
                out.push_str(name);
                out.push('}');
                if !placeholders.iter().any(|p| p == name) {
                    placeholders.push(name.to_string());
                }
                rest = &tail[consumed..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    NormalizedTemplate {
        body: out,
        placeholders,
    }
}

/// Names a body for `notification_type` may use: the ones in its default
/// template plus the trip details every trip-driven sender fills.
pub fn known_placeholders(notification_type: NotificationType) -> Vec<String> {
    let mut known = normalize_template(default_template(notification_type)).placeholders;
    for info in trip_placeholders() {
        let name = info.name.trim_matches(|c| c == '{' || c == '}');
        if !known.iter().any(|k| k == name) {
            known.push(name.to_string());
        }
    }
    known
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaceholderInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub example: &'static str,
}

/// Placeholders filled by the trip-driven senders.
pub fn trip_placeholders() -> Vec<PlaceholderInfo> {
    vec![
        PlaceholderInfo {
            name: "{date}",
            description: "Pickup date in the service area's time zone",
            example: "Tuesday, October 20",
        },
        PlaceholderInfo {
            name: "{time}",
            description: "Pickup time in the service area's time zone",
            example: "3:00 PM",
        },
        PlaceholderInfo {
            name: "{pickup}",
            description: "Pickup address",
            example: "12 Elm St",
        },
        PlaceholderInfo {
            name: "{dropoff}",
            description: "Drop-off address",
            example: "City Clinic",
        },
        PlaceholderInfo {
            name: "{patient}",
            description: "Primary passenger's name",
            example: "Ada Lovelace",
        },
        PlaceholderInfo {
            name: "{driver}",
            description: "Assigned driver's first name",
            example: "Dan",
        },
    ]
}
