pub mod dispatcher;
pub mod gateway;
pub mod init;
pub mod phone;
pub mod reminders;
pub mod stats;
pub mod templates;
pub mod trip_events;
pub mod webhooks;
