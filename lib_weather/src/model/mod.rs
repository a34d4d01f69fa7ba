//! # Data Model
//!
//! The [`Reading`] data unit and the shapes derived from it (inbound payloads,
//! projected query results).

/// The validated reading and its wire helpers.
pub mod reading;

pub use reading::{
    parse_calendar_day, parse_date, Field, ProjectedReading, Reading, ReadingPayload, DATE_FORMAT,
    HUMIDITY_RANGE, TEMPERATURE_RANGE,
};
