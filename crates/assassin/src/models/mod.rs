//! Domain models
//!
//! Typed views over the coordination tables plus the request payloads of the
//! administrative surface.

use chrono::{DateTime, Utc};
use serde::Serializer;

pub mod task;

pub use task::*;

/// Timestamp layout used by the admin API and alert texts
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Serialize a UTC timestamp as `YYYY-MM-DD HH:MM:SS`
pub fn serialize_timestamp<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.format(TIMESTAMP_FORMAT).to_string())
}
