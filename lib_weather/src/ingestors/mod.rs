//! # Ingestors Module
//!
//! The front door for readings entering the system.
//!
//! - **`parser`**: the line-oriented batch format, as a lazy cancellable
//!   sequence of validated readings.
//! - **`coordinator`**: drives the parser into the store for batches, and
//!   handles single submissions (validate, store, then broadcast).

/// Line-oriented reading parser.
pub mod parser;
/// Batch and single-reading ingestion.
pub mod coordinator;

pub use coordinator::IngestCoordinator;
pub use parser::{parse_line, parse_stream, ReadingLines, MAX_LINE_BYTES};
