use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{FormatError, IngestError, QueryError, ValidationError};

/// Valid temperature range, inclusive on both ends.
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = -100.0..=100.0;
/// Valid relative humidity range, inclusive on both ends.
pub const HUMIDITY_RANGE: RangeInclusive<f64> = 0.0..=100.0;

/// Date layout used by batch files and URL path/query parameters.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// # Reading
///
/// One validated environmental sample. The date is a calendar day; on the wire
/// it is rendered as midnight UTC (`2023-01-01T00:00:00Z`).
///
/// The fields are private so a `Reading` can only come out of [`Reading::new`]
/// (or a conversion built on it). Anything holding a `Reading` holds a value
/// that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    #[serde(serialize_with = "midnight_utc::serialize")]
    date: NaiveDate,
    temperature: f64,
    humidity: f64,
}

impl Reading {
    /// Builds a reading, rejecting out-of-range (or NaN) temperature and humidity.
    pub fn new(date: NaiveDate, temperature: f64, humidity: f64) -> Result<Self, ValidationError> {
        if !TEMPERATURE_RANGE.contains(&temperature) {
            return Err(ValidationError::TemperatureOutOfRange(temperature));
        }
        if !HUMIDITY_RANGE.contains(&humidity) {
            return Err(ValidationError::HumidityOutOfRange(humidity));
        }
        Ok(Self {
            date,
            temperature,
            humidity,
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    /// Keeps `date` plus the requested fields. An empty list keeps everything.
    pub fn project(&self, fields: &[Field]) -> ProjectedReading {
        let keep = |field: Field| fields.is_empty() || fields.contains(&field);
        ProjectedReading {
            date: self.date,
            temperature: keep(Field::Temperature).then_some(self.temperature),
            humidity: keep(Field::Humidity).then_some(self.humidity),
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} temperature={} humidity={}",
            self.date.format(DATE_FORMAT),
            self.temperature,
            self.humidity
        )
    }
}

/// # Reading Payload
///
/// The unvalidated shape submitted over HTTP. `date` accepts either an RFC 3339
/// timestamp or a bare `YYYY-MM-DD`; the time of day is discarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingPayload {
    #[serde(default)]
    pub date: Option<String>,
    pub temperature: f64,
    pub humidity: f64,
}

impl TryFrom<ReadingPayload> for Reading {
    type Error = IngestError;

    fn try_from(payload: ReadingPayload) -> Result<Self, Self::Error> {
        let raw = payload
            .date
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ValidationError::MissingDate)?;
        let date = parse_calendar_day(raw)?;
        Ok(Reading::new(date, payload.temperature, payload.humidity)?)
    }
}

/// Parses a strict `YYYY-MM-DD` date: four-digit year, zero-padded month and
/// day, no sign.
pub fn parse_date(value: &str) -> Result<NaiveDate, FormatError> {
    let invalid = || FormatError::Date {
        value: value.to_string(),
    };
    if !has_date_shape(value) {
        return Err(invalid());
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| invalid())
}

fn has_date_shape(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}

/// Parses either `YYYY-MM-DD` or an RFC 3339 timestamp into its calendar day.
///
/// The day is taken as written in the timestamp's own offset, so
/// `2023-01-01T23:00:00-05:00` is 2023-01-01.
pub fn parse_calendar_day(value: &str) -> Result<NaiveDate, FormatError> {
    if let Ok(date) = parse_date(value) {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.date_naive())
        .map_err(|_| FormatError::Date {
            value: value.to_string(),
        })
}

/// A field that can be projected in query results. `date` is always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Temperature,
    Humidity,
}

impl Field {
    pub const ALL: [Field; 2] = [Field::Temperature, Field::Humidity];

    /// Column / JSON key name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Temperature => "temperature",
            Field::Humidity => "humidity",
        }
    }

    /// Parses a comma separated list such as `"temperature, humidity"`.
    ///
    /// `date` is accepted and ignored; blank entries are skipped.
    pub fn parse_list(raw: &str) -> Result<Vec<Field>, QueryError> {
        let mut fields = Vec::new();
        for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if name == "date" {
                continue;
            }
            let field = name.parse::<Field>()?;
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        Ok(fields)
    }
}

impl FromStr for Field {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "temperature" => Ok(Field::Temperature),
            "humidity" => Ok(Field::Humidity),
            other => Err(QueryError::UnknownField(other.to_string())),
        }
    }
}

/// A stored reading with only the requested fields filled in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectedReading {
    #[serde(with = "midnight_utc")]
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
}

/// Serde glue rendering a calendar day as midnight UTC.
pub mod midnight_utc {
    use super::*;

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        let midnight = date.and_time(chrono::NaiveTime::MIN).and_utc();
        serializer.serialize_str(&midnight.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_calendar_day(&raw).map_err(serde::de::Error::custom)
    }
}
