//! # HTTP Surface
//!
//! The axum router over the ingestion coordinator, the query service and the
//! broadcast hub.

/// Handler error type and its JSON rendering.
pub mod error;
/// Routes, handlers and shared state.
pub mod routes;

pub use error::AppError;
pub use routes::{router, AppState};
