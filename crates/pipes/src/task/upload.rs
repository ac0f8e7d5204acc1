//! Uploads caller bytes as a replacement device object.
//!
//! The upload replaces a placeholder object that already exists on the
//! device. The caller's bytes are first drained into a staging file so the
//! final size is known before the object is created, which MTP requires.
//!
//! Commit sequence, after the pipe is drained:
//! 1. read the placeholder's info
//! 2. delete the placeholder
//! 3. create the new object with the placeholder's info and the real size
//! 4. re-read the new object's info
//! 5. re-point the catalog document at the new object
//!
//! The staging file is removed on every exit path, including panics.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use protocol::{Catalog, DeviceSession, Identifier, OperationCode};
use tempfile::TempPath;
use tracing::{debug, info, warn};

use super::{TaskError, TaskKind, TransferTask};
use crate::channel::PipeReader;

/// Default size of the buffer used to drain the pipe (32KB).
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Prefix of staging file names.
const STAGING_PREFIX: &str = "mtp";

/// Suffix of staging file names.
const STAGING_SUFFIX: &str = ".tmp";

/// Where and how uploads are staged.
#[derive(Debug, Clone)]
pub struct StagingSettings {
    /// Scratch directory for staging files. Created on demand.
    pub dir: PathBuf,
    /// Size of the pipe drain buffer.
    pub copy_buffer_size: usize,
}

impl StagingSettings {
    /// Creates settings staging into `dir` with the default buffer size.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
        }
    }
}

/// Drains the caller's writing end and commits the bytes to the device.
pub struct UploadTask {
    session: DeviceSession,
    catalog: Arc<dyn Catalog>,
    identifier: Identifier,
    operations: Vec<OperationCode>,
    reader: PipeReader,
    staging: StagingSettings,
}

impl UploadTask {
    /// Creates an upload task.
    ///
    /// # Arguments
    /// * `session` - Device session used for the commit.
    /// * `catalog` - Catalog updated once the new object exists.
    /// * `identifier` - Placeholder object and the document mirroring it.
    /// * `operations` - Operations recorded for the new object.
    /// * `reader` - Consuming end of the caller's pipe.
    /// * `staging` - Staging directory and buffer size.
    pub fn new(
        session: DeviceSession,
        catalog: Arc<dyn Catalog>,
        identifier: Identifier,
        operations: Vec<OperationCode>,
        reader: PipeReader,
        staging: StagingSettings,
    ) -> Self {
        Self {
            session,
            catalog,
            identifier,
            operations,
            reader,
            staging,
        }
    }

    /// Creates the new object from the staged bytes and updates the catalog.
    fn commit(&self, staged: &Path) -> Result<u32, TaskError> {
        let Identifier {
            device_id,
            object_handle,
            document_id,
        } = &self.identifier;

        let placeholder = self.session.get_object_info(*device_id, *object_handle)?;
        self.session.delete_object(*device_id, *object_handle)?;

        let size = fs::metadata(staged).map_err(TaskError::Staging)?.len();
        let target = placeholder.with_compressed_size(size);

        let mut source = File::open(staged).map_err(TaskError::Staging)?;
        let new_handle = self
            .session
            .create_object(*device_id, &target, &mut source)?;
        drop(source);

        let new_info = self.session.get_object_info(*device_id, new_handle)?;
        let parent = self.catalog.get_parent_identifier(document_id)?;
        self.catalog.update_object(
            document_id,
            *device_id,
            &parent.document_id,
            &self.operations,
            &new_info,
        )?;

        info!(
            new_handle = new_handle,
            size = size,
            parent = %parent.document_id,
            "Upload committed"
        );
        Ok(new_handle)
    }
}

impl TransferTask for UploadTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Upload
    }

    fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    fn run(mut self: Box<Self>) -> Result<(), TaskError> {
        let staged = stage(&mut self.reader, &self.staging)?;
        let result = self.commit(&staged).map(|_| ());

        if let Err(e) = staged.close() {
            warn!(error = %e, "Failed to remove staging file");
        }
        result
    }
}

/// Drains `reader` into a fresh staging file and closes its write handle.
///
/// The returned path deletes the file when dropped. On error the partial
/// file is deleted before returning.
fn stage(reader: &mut PipeReader, settings: &StagingSettings) -> Result<TempPath, TaskError> {
    fs::create_dir_all(&settings.dir).map_err(TaskError::Staging)?;

    let mut staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(STAGING_SUFFIX)
        .tempfile_in(&settings.dir)
        .map_err(TaskError::Staging)?;

    let copied = drain(reader, staging.as_file_mut(), settings.copy_buffer_size)?;
    staging.as_file_mut().flush().map_err(TaskError::Staging)?;
    debug!(bytes = copied, path = ?staging.path(), "Upload staged");

    Ok(staging.into_temp_path())
}

/// Copies everything from `reader` to `out`, failing on any channel error.
fn drain(reader: &mut PipeReader, out: &mut File, buffer_size: usize) -> Result<u64, TaskError> {
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut total = 0u64;

    loop {
        let bytes = reader.read(&mut buffer).map_err(TaskError::Channel)?;
        reader.check_error().map_err(TaskError::Channel)?;
        if bytes == 0 {
            break;
        }
        out.write_all(&buffer[..bytes]).map_err(TaskError::Staging)?;
        total += bytes as u64;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{pipe, ChannelError};
    use tempfile::TempDir;

    fn staged_files(dir: &Path) -> usize {
        match fs::read_dir(dir) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    #[test]
    fn test_stage_copies_all_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let mut settings = StagingSettings::new(temp_dir.path().join("staging"));
        settings.copy_buffer_size = 3;

        let (mut reader, mut writer) = pipe(8);
        writer.write_all(b"hello world").unwrap();
        writer.close().unwrap();

        let staged = stage(&mut reader, &settings).unwrap();
        assert_eq!(fs::read(&staged).unwrap(), b"hello world");
        assert!(staged
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(STAGING_PREFIX));

        staged.close().unwrap();
        assert_eq!(staged_files(&settings.dir), 0);
    }

    #[test]
    fn test_stage_empty_payload() {
        let temp_dir = TempDir::new().unwrap();
        let settings = StagingSettings::new(temp_dir.path());

        let (mut reader, writer) = pipe(1);
        writer.close().unwrap();

        let staged = stage(&mut reader, &settings).unwrap();
        assert_eq!(fs::metadata(&staged).unwrap().len(), 0);
    }

    #[test]
    fn test_stage_aborts_on_writer_error() {
        let temp_dir = TempDir::new().unwrap();
        let settings = StagingSettings::new(temp_dir.path());

        let (mut reader, mut writer) = pipe(4);
        writer.write_all(b"partial").unwrap();
        writer.close_with_error("caller aborted").unwrap();

        let err = stage(&mut reader, &settings).unwrap_err();
        match err {
            TaskError::Channel(io) => assert_eq!(
                ChannelError::from_io(&io),
                Some(&ChannelError::Remote("caller aborted".to_string()))
            ),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(staged_files(temp_dir.path()), 0);
    }

    #[test]
    fn test_stage_aborts_on_detached_writer() {
        let temp_dir = TempDir::new().unwrap();
        let settings = StagingSettings::new(temp_dir.path());

        let (mut reader, mut writer) = pipe(4);
        writer.write_all(b"abc").unwrap();
        drop(writer);

        assert!(matches!(
            stage(&mut reader, &settings),
            Err(TaskError::Channel(_))
        ));
        assert_eq!(staged_files(temp_dir.path()), 0);
    }
}
