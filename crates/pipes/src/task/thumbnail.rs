//! Writes a device thumbnail into a pipe.

use std::io::Write;

use protocol::{DeviceSession, Identifier};
use tracing::debug;

use super::{fail_writer, TaskError, TaskKind, TransferTask};
use crate::channel::PipeWriter;

/// Copies a remote object's thumbnail to the caller's reading end.
pub struct ThumbnailTask {
    session: DeviceSession,
    identifier: Identifier,
    writer: PipeWriter,
}

impl ThumbnailTask {
    /// Creates a task writing the thumbnail into `writer`.
    pub fn new(session: DeviceSession, identifier: Identifier, writer: PipeWriter) -> Self {
        Self {
            session,
            identifier,
            writer,
        }
    }
}

impl TransferTask for ThumbnailTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Thumbnail
    }

    fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    fn run(self: Box<Self>) -> Result<(), TaskError> {
        let ThumbnailTask {
            session,
            identifier,
            mut writer,
        } = *self;

        let thumbnail = match session.get_thumbnail(identifier.device_id, identifier.object_handle)
        {
            Ok(bytes) => bytes,
            Err(e) => {
                fail_writer(writer, format!("failed to fetch thumbnail: {e}"));
                return Err(e.into());
            }
        };

        writer.write_all(&thumbnail).map_err(TaskError::Channel)?;
        writer.close().map_err(TaskError::Channel)?;
        debug!(bytes = thumbnail.len(), "Thumbnail written to reader");
        Ok(())
    }
}
