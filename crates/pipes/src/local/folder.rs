//! Directory-backed device client.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<device_id>/<handle>.bin    object bytes
//! <root>/<device_id>/<handle>.json   ObjectInfo
//! <root>/<device_id>/<handle>.thumb  thumbnail (optional)
//! <root>/<device_id>/next_handle     next handle to allocate
//! ```
//!
//! Handles only ever grow, so a deleted handle is never handed out again.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;

use protocol::{DeviceClient, DeviceError, ObjectInfo, Result};
use tracing::{debug, warn};

const DATA_EXTENSION: &str = "bin";
const INFO_EXTENSION: &str = "json";
const THUMB_EXTENSION: &str = "thumb";
const COUNTER_FILE: &str = "next_handle";

/// A [`DeviceClient`] storing objects as plain files.
#[derive(Debug, Clone)]
pub struct FolderDevice {
    root: PathBuf,
}

impl FolderDevice {
    /// Creates a device rooted at `root`. The directory need not exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Stores an object with the handle recorded in `info`.
    ///
    /// The stored size is taken from `data`, not from `info`.
    pub fn add_object(&self, device_id: u32, info: &ObjectInfo, data: &[u8]) -> Result<()> {
        let handle = info.object_handle;
        fs::create_dir_all(self.device_dir(device_id))?;
        fs::write(self.path(device_id, handle, DATA_EXTENSION), data)?;
        let stored = info.clone().with_compressed_size(data.len() as u64);
        self.write_info(device_id, &stored)?;

        let counter = self.read_counter(device_id)?;
        if handle >= counter {
            self.write_counter(device_id, handle.saturating_add(1))?;
        }
        Ok(())
    }

    /// Attaches a thumbnail to an existing object.
    pub fn set_thumbnail(&self, device_id: u32, object_handle: u32, thumbnail: &[u8]) -> Result<()> {
        let mut info = self.get_object_info(device_id, object_handle)?;
        fs::write(self.path(device_id, object_handle, THUMB_EXTENSION), thumbnail)?;
        info.thumb_compressed_size = thumbnail.len() as u64;
        self.write_info(device_id, &info)
    }

    /// Whether an object with this handle exists.
    pub fn contains(&self, device_id: u32, object_handle: u32) -> bool {
        self.path(device_id, object_handle, INFO_EXTENSION).is_file()
    }

    fn device_dir(&self, device_id: u32) -> PathBuf {
        self.root.join(device_id.to_string())
    }

    fn path(&self, device_id: u32, object_handle: u32, extension: &str) -> PathBuf {
        self.device_dir(device_id)
            .join(format!("{object_handle}.{extension}"))
    }

    fn write_info(&self, device_id: u32, info: &ObjectInfo) -> Result<()> {
        let json = serde_json::to_vec_pretty(info)?;
        fs::write(self.path(device_id, info.object_handle, INFO_EXTENSION), json)?;
        Ok(())
    }

    fn open(&self, device_id: u32, object_handle: u32, extension: &str) -> Result<File> {
        File::open(self.path(device_id, object_handle, extension)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                not_found(device_id, object_handle, extension)
            } else {
                DeviceError::Io(e)
            }
        })
    }

    fn counter_path(&self, device_id: u32) -> PathBuf {
        self.device_dir(device_id).join(COUNTER_FILE)
    }

    /// Next handle recorded for the device, 0 if none was recorded yet.
    fn read_counter(&self, device_id: u32) -> Result<u32> {
        match fs::read_to_string(self.counter_path(device_id)) {
            Ok(text) => text.trim().parse::<u32>().map_err(|e| {
                DeviceError::Protocol(format!("corrupt handle counter for device {device_id}: {e}"))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write_counter(&self, device_id: u32, next: u32) -> Result<()> {
        fs::write(self.counter_path(device_id), next.to_string())?;
        Ok(())
    }

    /// Reserves a handle above every handle the device has ever used.
    fn allocate_handle(&self, device_id: u32) -> Result<u32> {
        let exhausted = || DeviceError::Protocol("object handles exhausted".to_string());
        let above_stored = self.max_handle(device_id)?.checked_add(1).ok_or_else(exhausted)?;
        let handle = self.read_counter(device_id)?.max(above_stored);
        self.write_counter(device_id, handle.checked_add(1).ok_or_else(exhausted)?)?;
        Ok(handle)
    }

    /// Highest handle currently stored on the device, 0 if none.
    fn max_handle(&self, device_id: u32) -> Result<u32> {
        let entries = match fs::read_dir(self.device_dir(device_id)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut max = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(INFO_EXTENSION) {
                continue;
            }
            if let Some(handle) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
            {
                max = max.max(handle);
            }
        }
        Ok(max)
    }
}

fn not_found(device_id: u32, object_handle: u32, extension: &str) -> DeviceError {
    if extension == THUMB_EXTENSION {
        DeviceError::NoThumbnail {
            device_id,
            object_handle,
        }
    } else {
        DeviceError::ObjectNotFound {
            device_id,
            object_handle,
        }
    }
}

impl DeviceClient for FolderDevice {
    fn stream_object(
        &self,
        device_id: u32,
        object_handle: u32,
        sink: &mut dyn Write,
    ) -> Result<()> {
        let mut file = self.open(device_id, object_handle, DATA_EXTENSION)?;
        let copied = io::copy(&mut file, sink)?;
        debug!(device_id, object_handle, bytes = copied, "Object streamed");
        Ok(())
    }

    fn get_thumbnail(&self, device_id: u32, object_handle: u32) -> Result<Vec<u8>> {
        if !self.contains(device_id, object_handle) {
            return Err(not_found(device_id, object_handle, INFO_EXTENSION));
        }
        let mut file = self.open(device_id, object_handle, THUMB_EXTENSION)?;
        let mut thumbnail = Vec::new();
        file.read_to_end(&mut thumbnail)?;
        Ok(thumbnail)
    }

    fn get_object_info(&self, device_id: u32, object_handle: u32) -> Result<ObjectInfo> {
        let file = self.open(device_id, object_handle, INFO_EXTENSION)?;
        let info: ObjectInfo = serde_json::from_reader(io::BufReader::new(file))?;
        Ok(info)
    }

    fn delete_object(&self, device_id: u32, object_handle: u32) -> Result<()> {
        if !self.contains(device_id, object_handle) {
            return Err(not_found(device_id, object_handle, INFO_EXTENSION));
        }
        for extension in [DATA_EXTENSION, INFO_EXTENSION, THUMB_EXTENSION] {
            match fs::remove_file(self.path(device_id, object_handle, extension)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(device_id, object_handle, "Object deleted");
        Ok(())
    }

    fn create_object(
        &self,
        device_id: u32,
        info: &ObjectInfo,
        source: &mut dyn Read,
    ) -> Result<u32> {
        fs::create_dir_all(self.device_dir(device_id))?;
        let handle = self.allocate_handle(device_id)?;

        let data_path = self.path(device_id, handle, DATA_EXTENSION);
        let mut file = File::create(&data_path)?;
        let copied = io::copy(source, &mut file)?;
        file.sync_all()?;
        drop(file);

        if copied != info.compressed_size {
            if let Err(e) = fs::remove_file(&data_path) {
                warn!(error = %e, path = ?data_path, "Failed to remove short object");
            }
            return Err(DeviceError::Protocol(format!(
                "declared size {} but received {} bytes",
                info.compressed_size, copied
            )));
        }

        let stored = ObjectInfo {
            thumb_compressed_size: 0,
            ..info.clone()
        }
        .with_object_handle(handle);
        self.write_info(device_id, &stored)?;

        debug!(device_id, object_handle = handle, bytes = copied, "Object created");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn device_with_object() -> (TempDir, FolderDevice) {
        let temp_dir = TempDir::new().unwrap();
        let device = FolderDevice::new(temp_dir.path());
        let info = ObjectInfo::new(42, 0x10001, 0, "photo.jpg");
        device.add_object(1, &info, b"0123456789").unwrap();
        (temp_dir, device)
    }

    #[test]
    fn test_stream_object() {
        let (_dir, device) = device_with_object();

        let mut sink = Vec::new();
        device.stream_object(1, 42, &mut sink).unwrap();
        assert_eq!(sink, b"0123456789");
    }

    #[test]
    fn test_add_object_records_size() {
        let (_dir, device) = device_with_object();

        let info = device.get_object_info(1, 42).unwrap();
        assert_eq!(info.compressed_size, 10);
        assert_eq!(info.name, "photo.jpg");
    }

    #[test]
    fn test_missing_object() {
        let (_dir, device) = device_with_object();

        let mut sink = Vec::new();
        assert!(matches!(
            device.stream_object(1, 7, &mut sink),
            Err(DeviceError::ObjectNotFound {
                device_id: 1,
                object_handle: 7
            })
        ));
        assert!(matches!(
            device.get_object_info(2, 42),
            Err(DeviceError::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn test_thumbnail() {
        let (_dir, device) = device_with_object();

        assert!(matches!(
            device.get_thumbnail(1, 42),
            Err(DeviceError::NoThumbnail { .. })
        ));
        assert!(matches!(
            device.get_thumbnail(1, 99),
            Err(DeviceError::ObjectNotFound { .. })
        ));

        device.set_thumbnail(1, 42, b"thumb").unwrap();
        assert_eq!(device.get_thumbnail(1, 42).unwrap(), b"thumb");
        assert_eq!(device.get_object_info(1, 42).unwrap().thumb_compressed_size, 5);
    }

    #[test]
    fn test_delete_object() {
        let (_dir, device) = device_with_object();
        device.set_thumbnail(1, 42, b"thumb").unwrap();

        device.delete_object(1, 42).unwrap();
        assert!(!device.contains(1, 42));
        assert!(matches!(
            device.delete_object(1, 42),
            Err(DeviceError::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn test_create_object_allocates_next_handle() {
        let (_dir, device) = device_with_object();

        let info = ObjectInfo::new(0, 0x10001, 0, "new.txt").with_compressed_size(5);
        let handle = device
            .create_object(1, &info, &mut &b"hello"[..])
            .unwrap();
        assert_eq!(handle, 43);

        let stored = device.get_object_info(1, handle).unwrap();
        assert_eq!(stored.object_handle, 43);
        assert_eq!(stored.compressed_size, 5);
        assert_eq!(stored.name, "new.txt");

        let mut sink = Vec::new();
        device.stream_object(1, handle, &mut sink).unwrap();
        assert_eq!(sink, b"hello");
    }

    #[test]
    fn test_create_object_on_empty_device() {
        let temp_dir = TempDir::new().unwrap();
        let device = FolderDevice::new(temp_dir.path().join("fresh"));

        let info = ObjectInfo::new(0, 1, 0, "empty");
        let handle = device.create_object(3, &info, &mut io::empty()).unwrap();
        assert_eq!(handle, 1);
        assert_eq!(device.get_object_info(3, 1).unwrap().compressed_size, 0);
    }

    #[test]
    fn test_create_object_rejects_size_mismatch() {
        let (_dir, device) = device_with_object();

        let info = ObjectInfo::new(0, 1, 0, "short").with_compressed_size(100);
        let err = device
            .create_object(1, &info, &mut &b"abc"[..])
            .unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(_)));
        assert!(!device.contains(1, 43));
        assert!(!device.path(1, 43, DATA_EXTENSION).exists());
    }

    #[test]
    fn test_deleted_handles_are_not_reused() {
        let (_dir, device) = device_with_object();

        let info = ObjectInfo::new(0, 1, 0, "first").with_compressed_size(1);
        let first = device.create_object(1, &info, &mut &b"a"[..]).unwrap();
        assert_eq!(first, 43);
        device.delete_object(1, first).unwrap();
        device.delete_object(1, 42).unwrap();

        let second = device.create_object(1, &info, &mut &b"b"[..]).unwrap();
        assert_eq!(second, 44);
    }

    #[test]
    fn test_add_object_raises_next_handle() {
        let (_dir, device) = device_with_object();
        device
            .add_object(1, &ObjectInfo::new(90, 1, 0, "manual"), b"")
            .unwrap();
        device.delete_object(1, 90).unwrap();

        let info = ObjectInfo::new(0, 1, 0, "next");
        assert_eq!(device.create_object(1, &info, &mut io::empty()).unwrap(), 91);
    }
}
