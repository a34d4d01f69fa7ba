//! # Ingestion Coordinator
//!
//! The two ways readings enter the system:
//!
//! - **Batch** ([`IngestCoordinator::ingest_batch`]): a file is parsed line by
//!   line and every reading is upserted as it is produced. The first failure
//!   aborts the batch; rows stored before it stay stored. Batch readings are
//!   not broadcast.
//! - **Single** ([`IngestCoordinator::ingest_one`]): one submitted payload is
//!   validated, upserted, and only after a successful write handed to the hub.
//!   A hub that is stopped or saturated never fails the submission.

use std::path::Path;
use std::time::Instant;

use tokio::fs::File;
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::parser::parse_stream;
use crate::connections::Store;
use crate::core::Hub;
use crate::error::IngestError;
use crate::model::{Reading, ReadingPayload};

pub struct IngestCoordinator<S, H> {
    store: S,
    hub: H,
}

impl<S: Store, H: Hub> IngestCoordinator<S, H> {
    pub fn new(store: S, hub: H) -> Self {
        Self { store, hub }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn hub(&self) -> &H {
        &self.hub
    }

    /// Ingests a batch file. Returns the number of readings stored.
    pub async fn ingest_batch(
        &self,
        path: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<usize, IngestError> {
        let path = path.as_ref();
        let file = File::open(path).await.map_err(|e| {
            warn!(path = %path.display(), error = %e, "cannot open batch file");
            IngestError::Io(e)
        })?;
        info!(path = %path.display(), "batch ingestion started");
        self.ingest_batch_from_reader(BufReader::new(file), cancel).await
    }

    /// Ingests a batch from any buffered reader.
    pub async fn ingest_batch_from_reader<R>(
        &self,
        reader: R,
        cancel: &CancellationToken,
    ) -> Result<usize, IngestError>
    where
        R: AsyncBufRead + Unpin,
    {
        let started = Instant::now();
        let result = parse_stream(reader, cancel, |reading| async move {
            self.store
                .insert_or_replace(&reading)
                .await
                .map_err(IngestError::from)
        })
        .await;

        match &result {
            Ok(stored) => info!(stored, elapsed = ?started.elapsed(), "batch ingestion complete"),
            Err(e @ IngestError::Cancelled { .. }) => info!(reason = %e, "batch ingestion cancelled"),
            Err(e) => warn!(line = ?e.line(), error = %e, "batch ingestion aborted"),
        }
        result
    }

    /// Validates, stores and broadcasts one submitted reading.
    ///
    /// Returns the reading as stored, date normalized to its calendar day.
    pub async fn ingest_one(&self, payload: ReadingPayload) -> Result<Reading, IngestError> {
        let reading = Reading::try_from(payload)?;

        if let Err(e) = self.store.insert_or_replace(&reading).await {
            warn!(date = %reading.date(), error = %e, "failed to store reading");
            return Err(e.into());
        }
        debug!(%reading, "reading stored");

        if let Err(e) = self.hub.broadcast(reading) {
            debug!(date = %reading.date(), error = %e, "reading stored but not broadcast");
        }
        Ok(reading)
    }
}
