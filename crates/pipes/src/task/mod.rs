//! Transfer tasks run by the serialized worker.
//!
//! Every task owns one end of a pipe and the [`Identifier`] it operates on.
//! The caller holds the other end. Tasks never report failure to the caller
//! that queued them: read tasks signal it through the pipe, uploads only
//! log it.

pub mod import;
pub mod thumbnail;
pub mod upload;

use std::fmt;

use protocol::{CatalogError, DeviceError, Identifier};
use thiserror::Error;
use tracing::warn;

use crate::channel::PipeWriter;

pub use import::ImportTask;
pub use thumbnail::ThumbnailTask;
pub use upload::{StagingSettings, UploadTask};

/// Errors that end a transfer task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The device client reported a failure.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// The catalog reported a failure.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The pipe to the caller failed or was closed with an error.
    #[error("channel error: {0}")]
    Channel(std::io::Error),

    /// The staging file could not be created, written or read.
    #[error("staging file error: {0}")]
    Staging(std::io::Error),
}

/// Which transfer a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Device object to caller.
    Import,
    /// Device thumbnail to caller.
    Thumbnail,
    /// Caller bytes to a new device object.
    Upload,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskKind::Import => "import",
            TaskKind::Thumbnail => "thumbnail",
            TaskKind::Upload => "upload",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a task inside the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Built, not yet submitted.
    Created,
    /// Waiting in the worker queue.
    Queued,
    /// Being executed by the worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error or a panic.
    Failed,
}

impl TaskState {
    /// Whether moving from `self` to `next` follows the task lifecycle.
    pub fn can_advance_to(self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Created, TaskState::Queued)
                | (TaskState::Queued, TaskState::Running)
                | (TaskState::Running, TaskState::Completed)
                | (TaskState::Running, TaskState::Failed)
        )
    }
}

/// A unit of device work bound to one pipe and one identifier.
pub trait TransferTask: Send {
    /// The transfer this task performs.
    fn kind(&self) -> TaskKind;

    /// The object and document the task operates on.
    fn identifier(&self) -> &Identifier;

    /// Performs the transfer. Called exactly once, on the worker thread.
    fn run(self: Box<Self>) -> Result<(), TaskError>;
}

/// Closes `writer` with an error, logging if even the error cannot be delivered.
pub(crate) fn fail_writer(writer: PipeWriter, message: String) {
    if let Err(e) = writer.close_with_error(message) {
        warn!(error = %e, "Failed to report transfer error to reader");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_transitions() {
        assert!(TaskState::Created.can_advance_to(TaskState::Queued));
        assert!(TaskState::Queued.can_advance_to(TaskState::Running));
        assert!(TaskState::Running.can_advance_to(TaskState::Completed));
        assert!(TaskState::Running.can_advance_to(TaskState::Failed));

        assert!(!TaskState::Created.can_advance_to(TaskState::Running));
        assert!(!TaskState::Queued.can_advance_to(TaskState::Completed));
        assert!(!TaskState::Completed.can_advance_to(TaskState::Running));
        assert!(!TaskState::Failed.can_advance_to(TaskState::Queued));
    }

    #[test]
    fn test_task_kind_display() {
        assert_eq!(TaskKind::Import.to_string(), "import");
        assert_eq!(TaskKind::Thumbnail.to_string(), "thumbnail");
        assert_eq!(TaskKind::Upload.to_string(), "upload");
    }

    #[test]
    fn test_task_error_display() {
        let err = TaskError::from(DeviceError::Protocol("stall".to_string()));
        assert_eq!(err.to_string(), "device error: protocol error: stall");

        let err = TaskError::from(CatalogError::NoParent("doc".to_string()));
        assert_eq!(err.to_string(), "catalog error: document has no parent: doc");
    }
}
