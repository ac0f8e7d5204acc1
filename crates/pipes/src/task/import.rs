//! Streams a device object into a pipe.

use protocol::{DeviceSession, Identifier};
use tracing::debug;

use super::{fail_writer, TaskError, TaskKind, TransferTask};
use crate::channel::PipeWriter;

/// Copies a remote object's bytes to the caller's reading end.
pub struct ImportTask {
    session: DeviceSession,
    identifier: Identifier,
    writer: PipeWriter,
}

impl ImportTask {
    /// Creates a task writing the object's bytes into `writer`.
    pub fn new(session: DeviceSession, identifier: Identifier, writer: PipeWriter) -> Self {
        Self {
            session,
            identifier,
            writer,
        }
    }
}

impl TransferTask for ImportTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Import
    }

    fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    fn run(self: Box<Self>) -> Result<(), TaskError> {
        let ImportTask {
            session,
            identifier,
            mut writer,
        } = *self;

        match session.stream_object(identifier.device_id, identifier.object_handle, &mut writer) {
            Ok(()) => {
                writer.close().map_err(TaskError::Channel)?;
                debug!("Object streamed to reader");
                Ok(())
            }
            Err(e) => {
                fail_writer(writer, format!("failed to stream object: {e}"));
                Err(e.into())
            }
        }
    }
}
