//! # In-Memory Store
//!
//! A [`Store`] over a date-keyed `BTreeMap`. It backs the server's
//! `store = memory` mode and every test that needs a store.
//!
//! Writes can be switched to fail with [`MemoryStore::set_unavailable`] to
//! exercise the persistence-failure paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use chrono::NaiveDate;

use super::store::{QueryOptions, Store};
use crate::error::StoreError;
use crate::model::{ProjectedReading, Reading};

#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<NaiveDate, Reading>>,
    unavailable: AtomicBool,
    insert_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Number of `insert_or_replace` calls seen, failed ones included.
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::Relaxed)
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The stored reading for a day, if any.
    pub fn get(&self, date: NaiveDate) -> Option<Reading> {
        self.rows.read().ok()?.get(&date).copied()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("memory store switched off".to_string()));
        }
        Ok(())
    }

    fn select(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        options: &QueryOptions,
    ) -> Result<Vec<ProjectedReading>, StoreError> {
        self.check_available()?;
        if to < from {
            return Ok(Vec::new());
        }
        let rows = self.rows.read().map_err(|_| poisoned())?;
        let fields = options.projected_fields();
        let page = rows
            .range(from..=to)
            .skip(usize::try_from(options.offset).unwrap_or(usize::MAX))
            .take(options.limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX)))
            .map(|(_, reading)| reading.project(fields))
            .collect();
        Ok(page)
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".to_string())
}

impl Store for MemoryStore {
    async fn insert_or_replace(&self, reading: &Reading) -> Result<(), StoreError> {
        self.insert_calls.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        let mut rows = self.rows.write().map_err(|_| poisoned())?;
        rows.insert(reading.date(), *reading);
        Ok(())
    }

    async fn find_by_date(
        &self,
        date: NaiveDate,
        options: &QueryOptions,
    ) -> Result<Vec<ProjectedReading>, StoreError> {
        self.select(date, date, options)
    }

    async fn find_by_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        options: &QueryOptions,
    ) -> Result<Vec<ProjectedReading>, StoreError> {
        self.select(from, to, options)
    }
}
