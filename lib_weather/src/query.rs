//! # Query Service
//!
//! Validates point and range reads and translates request parameters into
//! [`QueryOptions`] for the store.

use chrono::NaiveDate;
use serde::Deserialize;

use crate::connections::{QueryOptions, Store};
use crate::error::QueryError;
use crate::model::{Field, ProjectedReading};

/// Longest span a range query may cover, in days.
pub const MAX_RANGE_DAYS: i64 = 365;

/// Projection and paging parameters as they arrive on a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct QueryParams {
    /// Comma separated field names; `date` is always returned.
    pub fields: Option<String>,
    /// 1-based page number. Only meaningful with `limit`.
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl QueryParams {
    pub fn to_options(&self) -> Result<QueryOptions, QueryError> {
        let fields = match self.fields.as_deref() {
            Some(raw) => Field::parse_list(raw)?,
            None => Vec::new(),
        };

        let page = self.page.unwrap_or(1);
        if page == 0 {
            return Err(QueryError::InvalidPagination("page starts at 1".to_string()));
        }
        if self.limit == Some(0) {
            return Err(QueryError::InvalidPagination("limit must be positive".to_string()));
        }
        let offset = match self.limit {
            Some(limit) => (page - 1)
                .checked_mul(limit)
                .ok_or_else(|| QueryError::InvalidPagination("page out of range".to_string()))?,
            None => 0,
        };

        Ok(QueryOptions {
            fields,
            limit: self.limit,
            offset,
        })
    }
}

pub struct QueryService<S> {
    store: S,
}

impl<S: Store> QueryService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The reading stored for one calendar day, projected.
    pub async fn by_date(
        &self,
        date: NaiveDate,
        params: &QueryParams,
    ) -> Result<Vec<ProjectedReading>, QueryError> {
        let options = params.to_options()?;
        Ok(self.store.find_by_date(date, &options).await?)
    }

    /// Readings in `[from, to]`, ordered by date.
    pub async fn by_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        params: &QueryParams,
    ) -> Result<Vec<ProjectedReading>, QueryError> {
        validate_range(from, to)?;
        let options = params.to_options()?;
        Ok(self.store.find_by_range(from, to, &options).await?)
    }
}

pub fn validate_range(from: NaiveDate, to: NaiveDate) -> Result<(), QueryError> {
    if to < from {
        return Err(QueryError::InvalidRange { from, to });
    }
    let days = (to - from).num_days();
    if days > MAX_RANGE_DAYS {
        return Err(QueryError::RangeTooLong {
            days,
            max_days: MAX_RANGE_DAYS,
        });
    }
    Ok(())
}
