//! # Connections Module
//!
//! The persistent store behind ingestion and queries. The core only sees the
//! [`Store`] capability; PostgreSQL and in-memory implementations sit behind it.

/// The store contract and its query options.
pub mod store;

/// In-memory store used for `store = memory` and tests.
pub mod memory;

/// PostgreSQL store built on a deadpool connection pool.
#[cfg(feature = "connections")]
pub mod db_postgres;

pub use memory::MemoryStore;
pub use store::{QueryOptions, Store};

#[cfg(feature = "connections")]
pub use db_postgres::PgStore;
