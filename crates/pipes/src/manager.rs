//! Pipe manager: the caller-facing entry point of the core.
//!
//! Each request allocates a pipe, binds one end to a transfer task, queues
//! the task on the serialized worker and hands the other end back right
//! away. Nothing here blocks on the device.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use protocol::{Catalog, DeviceSession, Identifier, OperationCode};
use thiserror::Error;
use tracing::debug;

use crate::channel::{pipe, PipeReader, PipeWriter};
use crate::config::Config;
use crate::task::{ImportTask, StagingSettings, ThumbnailTask, UploadTask};
use crate::worker::{PipeStats, SerializedWorker};

/// Errors returned synchronously to a requesting caller.
#[derive(Debug, Error)]
pub enum PipeError {
    /// The manager has been shut down.
    #[error("pipe manager is shut down")]
    ShutDown,

    /// The worker queue has no free slot.
    #[error("worker queue is full ({capacity} tasks)")]
    QueueFull { capacity: usize },

    /// The worker thread could not be started.
    #[error("failed to start pipe worker: {0}")]
    WorkerSpawn(io::Error),

    /// Lock poisoned during operation.
    #[error("lock poisoned: {context}")]
    LockPoisoned { context: String },
}

impl From<PipeError> for io::Error {
    fn from(err: PipeError) -> Self {
        match err {
            PipeError::WorkerSpawn(e) => e,
            PipeError::QueueFull { .. } => io::Error::new(io::ErrorKind::WouldBlock, err),
            other => io::Error::other(other),
        }
    }
}

/// Facade turning device transfers into blocking pipe endpoints.
pub struct PipeManager {
    /// Worker running every device operation.
    worker: SerializedWorker,
    /// Catalog updated by uploads.
    catalog: Arc<dyn Catalog>,
    /// Staging settings handed to upload tasks.
    staging: StagingSettings,
    /// Chunk capacity of each pipe.
    channel_capacity: usize,
    /// Bound on the shutdown drain wait.
    shutdown_timeout: Duration,
}

impl PipeManager {
    /// Creates a manager and starts its worker thread.
    pub fn new(catalog: Arc<dyn Catalog>, config: &Config) -> Result<Self, PipeError> {
        let worker = SerializedWorker::spawn(config.worker.queue_capacity)?;
        Ok(Self {
            worker,
            catalog,
            staging: StagingSettings {
                dir: config.transfer.staging_dir.clone(),
                copy_buffer_size: config.transfer.copy_buffer_size,
            },
            channel_capacity: config.transfer.channel_capacity,
            shutdown_timeout: config.worker.shutdown_timeout(),
        })
    }

    /// Starts reading an object.
    ///
    /// Returns the reading end; it yields the object's bytes, then
    /// end-of-data, or an error if the device transfer fails.
    pub fn begin_read(
        &self,
        session: DeviceSession,
        identifier: Identifier,
    ) -> Result<PipeReader, PipeError> {
        let (reader, writer) = pipe(self.channel_capacity);
        self.worker
            .submit(Box::new(ImportTask::new(session, identifier, writer)))?;
        Ok(reader)
    }

    /// Starts uploading a replacement for a placeholder object.
    ///
    /// Returns the writing end. The caller writes the new content and calls
    /// [`PipeWriter::close`]; the commit happens afterwards on the worker.
    /// Commit failures are logged and counted in [`PipeManager::stats`], they
    /// are not reported through the pipe.
    ///
    /// # Arguments
    /// * `session` - Device session holding the placeholder.
    /// * `identifier` - Placeholder object and the document mirroring it.
    /// * `operations` - Operations recorded in the catalog for the new object.
    pub fn begin_write(
        &self,
        session: DeviceSession,
        identifier: Identifier,
        operations: Vec<OperationCode>,
    ) -> Result<PipeWriter, PipeError> {
        let (reader, writer) = pipe(self.channel_capacity);
        let task = UploadTask::new(
            session,
            Arc::clone(&self.catalog),
            identifier,
            operations,
            reader,
            self.staging.clone(),
        );
        self.worker.submit(Box::new(task))?;
        Ok(writer)
    }

    /// Starts reading an object's thumbnail.
    pub fn begin_read_thumbnail(
        &self,
        session: DeviceSession,
        identifier: Identifier,
    ) -> Result<PipeReader, PipeError> {
        let (reader, writer) = pipe(self.channel_capacity);
        self.worker
            .submit(Box::new(ThumbnailTask::new(session, identifier, writer)))?;
        Ok(reader)
    }

    /// Stops accepting requests and waits for queued work to finish.
    ///
    /// Returns `true` if every queued and running task finished within the
    /// configured shutdown timeout.
    pub async fn shutdown(&self) -> bool {
        debug!(timeout_ms = self.shutdown_timeout.as_millis() as u64, "Shutting down pipe manager");
        self.worker.shutdown(self.shutdown_timeout).await
    }

    /// Whether [`PipeManager::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.worker.is_shut_down()
    }

    /// Returns task counters.
    pub fn stats(&self) -> PipeStats {
        self.worker.stats()
    }
}
