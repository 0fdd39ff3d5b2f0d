pub mod delivery_record_repository;
pub mod template_override_repository;
pub mod trip_repository;

pub use delivery_record_repository::{DeliveryFilter, DeliveryRecordRepository};
pub use template_override_repository::TemplateOverrideRepository;
pub use trip_repository::TripRepository;
