use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Trip statuses in which the pickup is still expected, so reminders apply.
/// Everything else (pending, en route, completed, cancelled, ...) is ignored.
pub const ACTIVE_TRIP_STATUSES: [&str; 2] = ["confirmed", "assigned"];

/// Read-only view of a trip as stored by the dispatch platform.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Trip {
    pub id: String,
    /// Scheduled pickup, stored as UTC.
    pub scheduled_pickup: NaiveDateTime,
    pub pickup_address: String,
    pub dropoff_address: String,
    pub status: String,
    pub driver_id: Option<String>,
    /// Booking contact number, used when the primary passenger has no phone.
    pub contact_phone: Option<String>,
}

impl Trip {
    /// Resolve the passenger-facing recipient: the primary passenger's phone,
    /// falling back to the booking contact phone. `None` means there is no
    /// usable number at all.
    pub fn passenger_recipient(&self, primary: Option<&PersonContact>) -> Option<Recipient> {
        if let Some(person) = primary {
            if let Some(phone) = usable_phone(person.phone.as_deref()) {
                return Some(Recipient {
                    user_id: Some(person.user_id.clone()),
                    name: person.display_name(),
                    phone,
                });
            }
        }

        usable_phone(self.contact_phone.as_deref()).map(|phone| Recipient {
            user_id: primary.map(|p| p.user_id.clone()),
            name: primary.map(|p| p.display_name()).unwrap_or_default(),
            phone,
        })
    }
}

/// A user (passenger or driver) joined with their contact details.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PersonContact {
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

impl PersonContact {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }

    /// Recipient for this person if they have a usable phone.
    pub fn recipient(&self) -> Option<Recipient> {
        usable_phone(self.phone.as_deref()).map(|phone| Recipient {
            user_id: Some(self.user_id.clone()),
            name: self.display_name(),
            phone,
        })
    }
}

/// Who a notification is addressed to. `phone` is the raw stored value; the
/// dispatcher normalizes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: Option<String>,
    pub name: String,
    pub phone: String,
}

fn usable_phone(phone: Option<&str>) -> Option<String> {
    phone
        .map(str::trim)
        .filter(|p| p.chars().any(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trip(contact_phone: Option<&str>) -> Trip {
        Trip {
            id: "trip-1".to_string(),
            scheduled_pickup: chrono::NaiveDate::from_ymd_opt(2026, 10, 20)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            pickup_address: "12 Elm St".to_string(),
            dropoff_address: "City Clinic".to_string(),
            status: "confirmed".to_string(),
            driver_id: None,
            contact_phone: contact_phone.map(str::to_string),
        }
    }

    fn person(phone: Option<&str>) -> PersonContact {
        PersonContact {
            user_id: "user-1".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            phone: phone.map(str::to_string),
        }
    }

    #[test]
    fn primary_passenger_phone_wins() {
        let p = person(Some("(555) 123-4567"));
        let r = trip(Some("555-000-0000")).passenger_recipient(Some(&p)).unwrap();
        assert_eq!(r.phone, "(555) 123-4567");
        assert_eq!(r.user_id.as_deref(), Some("user-1"));
        assert_eq!(r.name, "Ada Lovelace");
    }

    #[test]
    fn falls_back_to_booking_contact() {
        let p = person(Some("  "));
        let r = trip(Some("555-000-0000")).passenger_recipient(Some(&p)).unwrap();
        assert_eq!(r.phone, "555-000-0000");
        assert_eq!(r.user_id.as_deref(), Some("user-1"));

        let r = trip(Some("555-000-0000")).passenger_recipient(None).unwrap();
        assert_eq!(r.user_id, None);
    }

    #[test]
    fn no_contact_at_all() {
        assert!(trip(None).passenger_recipient(Some(&person(None))).is_none());
        assert!(trip(Some("n/a")).passenger_recipient(None).is_none());
    }
}
