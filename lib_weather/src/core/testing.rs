//! Scripted sinks and small helpers shared by the hub and session tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use super::sink::SubscriberSink;
use crate::error::DeliveryError;
use crate::model::Reading;

pub(crate) fn reading(day: u32) -> Reading {
    let date = NaiveDate::from_ymd_opt(2023, 1, day).unwrap();
    Reading::new(date, 20.0 + day as f64, 50.0).unwrap()
}

/// Polls `check` until it holds, failing the test after two seconds.
pub(crate) async fn eventually(check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A sink that forwards payloads to a channel and can be told to misbehave.
#[derive(Default)]
pub(crate) struct ScriptedSink {
    texts: Option<mpsc::UnboundedSender<String>>,
    fail: AtomicBool,
    hang: AtomicBool,
    fail_pings: AtomicBool,
    writes: AtomicUsize,
    pings: AtomicUsize,
    closes: AtomicUsize,
}

impl ScriptedSink {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            texts: Some(tx),
            ..Self::default()
        };
        (Arc::new(sink), rx)
    }

    pub(crate) fn fail_writes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub(crate) fn hang_writes(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_pings(&self) {
        self.fail_pings.store(true, Ordering::SeqCst);
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(crate) fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl SubscriberSink for ScriptedSink {
    fn send_text<'a>(&'a self, payload: &'a str) -> BoxFuture<'a, Result<(), DeliveryError>> {
        Box::pin(async move {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(DeliveryError::Closed);
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            if let Some(tx) = &self.texts {
                let _ = tx.send(payload.to_string());
            }
            Ok(())
        })
    }

    fn send_ping(&self) -> BoxFuture<'_, Result<(), DeliveryError>> {
        Box::pin(async move {
            if self.fail_pings.load(Ordering::SeqCst) {
                return Err(DeliveryError::Closed);
            }
            self.pings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.closes.fetch_add(1, Ordering::SeqCst);
        })
    }
}
