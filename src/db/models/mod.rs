//! Database models split into separate files.
//! Individual model modules are re-exported so callers can simply
//! `use crate::db::models::*;`.

pub mod delivery_record;
pub mod notification_type;
pub mod template_override;
pub mod trip;

pub use self::delivery_record::*;
pub use self::notification_type::*;
pub use self::template_override::*;
pub use self::trip::*;
