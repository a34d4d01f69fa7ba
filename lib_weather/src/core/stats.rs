//! # Hub Counters
//!
//! Lock-free counters shared between the hub handle (which counts drops and
//! rejections on the caller's side) and the control loop (which counts
//! deliveries and failed writes).
//!
//! `Ordering::Relaxed` throughout: the counters are observational and no other
//! memory operation is synchronized through them.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct HubStats {
    subscribers: AtomicUsize,
    delivered: AtomicU64,
    dropped: AtomicU64,
    failed_writes: AtomicU64,
    rejected: AtomicU64,
}

/// A point-in-time copy of the hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubSnapshot {
    /// Subscribers currently registered.
    pub subscribers: usize,
    /// Successful per-subscriber writes.
    pub delivered: u64,
    /// Readings dropped because the pending-delivery queue was full.
    pub dropped: u64,
    /// Per-subscriber writes that failed or timed out.
    pub failed_writes: u64,
    /// Registrations and broadcasts refused after shutdown.
    pub rejected: u64,
}

impl HubStats {
    pub(crate) fn set_subscribers(&self, n: usize) {
        self.subscribers.store(n, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_write(&self) {
        self.failed_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            subscribers: self.subscribers.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
