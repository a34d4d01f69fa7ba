use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::StoreError;
use crate::model::{Field, ProjectedReading, Reading};

/// Projection and paging for a read. Results are always ordered by date ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Fields to return besides `date`. Empty means all of them.
    pub fields: Vec<Field>,
    pub limit: Option<u64>,
    pub offset: u64,
}

impl QueryOptions {
    /// The effective projection: the requested fields, or every field.
    pub fn projected_fields(&self) -> &[Field] {
        if self.fields.is_empty() {
            &Field::ALL
        } else {
            &self.fields
        }
    }
}

/// # Store
///
/// Upsert-by-date persistence and date-ordered reads.
///
/// `insert_or_replace` fully replaces any existing reading for the same
/// calendar day. Range reads are inclusive on both ends.
pub trait Store: Send + Sync + 'static {
    fn insert_or_replace(
        &self,
        reading: &Reading,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn find_by_date(
        &self,
        date: NaiveDate,
        options: &QueryOptions,
    ) -> impl Future<Output = Result<Vec<ProjectedReading>, StoreError>> + Send;

    fn find_by_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        options: &QueryOptions,
    ) -> impl Future<Output = Result<Vec<ProjectedReading>, StoreError>> + Send;
}

impl<S: Store> Store for Arc<S> {
    fn insert_or_replace(
        &self,
        reading: &Reading,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).insert_or_replace(reading)
    }

    fn find_by_date(
        &self,
        date: NaiveDate,
        options: &QueryOptions,
    ) -> impl Future<Output = Result<Vec<ProjectedReading>, StoreError>> + Send {
        (**self).find_by_date(date, options)
    }

    fn find_by_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        options: &QueryOptions,
    ) -> impl Future<Output = Result<Vec<ProjectedReading>, StoreError>> + Send {
        (**self).find_by_range(from, to, options)
    }
}
