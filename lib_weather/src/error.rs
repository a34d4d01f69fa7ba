//! # Error Taxonomy
//!
//! Ingestion errors ([`FormatError`], [`ValidationError`], persistence and
//! cancellation) propagate to whoever invoked ingestion, wrapped in
//! [`IngestError`] with the 1-based line number when they came from a batch.
//!
//! [`DeliveryError`] and queue saturation stay inside the broadcast hub and
//! never fail an ingestion call.

use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

/// A malformed batch line or submitted date.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {
    #[error("expected 3 whitespace-separated fields (date, temperature, humidity), found {found}")]
    FieldCount { found: usize },
    #[error("invalid date {value:?}, expected YYYY-MM-DD")]
    Date { value: String },
    #[error("invalid temperature {value:?}")]
    Temperature { value: String },
    #[error("invalid humidity {value:?}")]
    Humidity { value: String },
    #[error("line is not valid UTF-8")]
    Encoding,
    #[error("line longer than {max} bytes")]
    LineTooLong { max: usize },
}

/// A reading that parsed but breaks the reading invariant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("date is required")]
    MissingDate,
    #[error("temperature {0} outside valid range (-100 to 100)")]
    TemperatureOutOfRange(f64),
    #[error("humidity {0} outside valid range (0 to 100)")]
    HumidityOutOfRange(f64),
}

/// Failures of the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (pool exhausted, connection refused...).
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store was reached but refused the statement.
    #[error("store rejected the operation: {0}")]
    Rejected(String),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// # Ingestion Error
///
/// Everything that can stop a batch or a single submission.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{}{source}", line_prefix(.line))]
    Format {
        line: Option<usize>,
        source: FormatError,
    },

    #[error("{}{source}", line_prefix(.line))]
    Validation {
        line: Option<usize>,
        source: ValidationError,
    },

    #[error("{}failed to persist reading: {source}", line_prefix(.line))]
    Persistence {
        line: Option<usize>,
        source: StoreError,
    },

    /// Stopped on request, not on bad data.
    #[error("ingestion cancelled before line {line}")]
    Cancelled { line: usize },

    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),
}

fn line_prefix(line: &Option<usize>) -> String {
    line.map(|n| format!("line {n}: ")).unwrap_or_default()
}

impl IngestError {
    /// Tags the error with a line number unless it already carries one.
    pub fn with_line(self, at: usize) -> Self {
        match self {
            IngestError::Format { line, source } => IngestError::Format {
                line: line.or(Some(at)),
                source,
            },
            IngestError::Validation { line, source } => IngestError::Validation {
                line: line.or(Some(at)),
                source,
            },
            IngestError::Persistence { line, source } => IngestError::Persistence {
                line: line.or(Some(at)),
                source,
            },
            other => other,
        }
    }

    /// The 1-based line the error refers to, when it came from a batch.
    pub fn line(&self) -> Option<usize> {
        match self {
            IngestError::Format { line, .. }
            | IngestError::Validation { line, .. }
            | IngestError::Persistence { line, .. } => *line,
            IngestError::Cancelled { line } => Some(*line),
            IngestError::Io(_) => None,
        }
    }

    /// True when the caller can fix the input and retry.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IngestError::Format { .. } | IngestError::Validation { .. }
        )
    }
}

impl From<FormatError> for IngestError {
    fn from(source: FormatError) -> Self {
        IngestError::Format { line: None, source }
    }
}

impl From<ValidationError> for IngestError {
    fn from(source: ValidationError) -> Self {
        IngestError::Validation { line: None, source }
    }
}

impl From<StoreError> for IngestError {
    fn from(source: StoreError) -> Self {
        IngestError::Persistence { line: None, source }
    }
}

/// A failed write to one live subscriber. Contained by the hub.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("subscriber connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// The hub has shut down; it accepts no registrations or broadcasts.
    #[error("broadcast hub is stopped")]
    Stopped,
}

/// Query validation and read-path failures.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unknown field {0:?}, expected temperature or humidity")]
    UnknownField(String),
    #[error("end date {to} cannot be before start date {from}")]
    InvalidRange { from: NaiveDate, to: NaiveDate },
    #[error("date range may not exceed {max_days} days (got {days})")]
    RangeTooLong { days: i64, max_days: i64 },
    #[error("invalid pagination: {0}")]
    InvalidPagination(String),
    #[error("query failed: {0}")]
    Store(#[from] StoreError),
}

impl QueryError {
    pub fn is_client_error(&self) -> bool {
        !matches!(self, QueryError::Store(_))
    }
}
