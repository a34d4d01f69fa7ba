//! # lib_weather
//!
//! Ingestion, storage and real-time distribution of environmental readings
//! (date, temperature, humidity).
//!
//! Readings enter through a line-oriented batch file or single submissions,
//! are persisted idempotently by calendar date, and every single submission is
//! fanned out to live WebSocket subscribers through the broadcast hub.
//!
//! Modules are folder-gated:
//! - `connections` enables the PostgreSQL store.
//! - `server` enables the axum router and the WebSocket transport.

pub mod core;
pub mod connections;
pub mod error;
pub mod ingestors;
pub mod model;
pub mod query;

#[cfg(feature = "server")]
pub mod api;

// Re-export the types most callers touch.
pub use crate::core::{BroadcastHub, Hub, HubConfig, HubSnapshot, SubscriberId, SubscriberSink};
pub use connections::{MemoryStore, QueryOptions, Store};
pub use error::{
    DeliveryError, FormatError, HubError, IngestError, QueryError, StoreError, ValidationError,
};
pub use ingestors::{IngestCoordinator, ReadingLines};
pub use model::{Field, ProjectedReading, Reading, ReadingPayload};
pub use query::{QueryParams, QueryService};
