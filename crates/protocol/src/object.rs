//! Object metadata and MTP operation codes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Object format code for undefined (opaque) objects.
pub const FORMAT_UNDEFINED: u16 = 0x3000;

/// An MTP operation code a document may support.
///
/// Hosts pass the set of supported operations when requesting an upload so
/// the catalog can record what the device allows on the new object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationCode(pub u16);

impl OperationCode {
    pub const GET_OBJECT_INFO: Self = Self(0x1008);
    pub const GET_OBJECT: Self = Self(0x1009);
    pub const GET_THUMB: Self = Self(0x100A);
    pub const DELETE_OBJECT: Self = Self(0x100B);
    pub const SEND_OBJECT: Self = Self(0x100D);
}

impl fmt::Display for OperationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl From<u16> for OperationCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

/// Metadata describing a remote object.
///
/// Mirrors the fields of an MTP ObjectInfo dataset that the pipe core and
/// catalog care about. Only `compressed_size` is ever rewritten by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Object handle on the device.
    pub object_handle: u32,
    /// Storage the object lives in.
    pub storage_id: u32,
    /// Object format code.
    pub format: u16,
    /// Handle of the parent object (0 for storage root).
    pub parent: u32,
    /// File name.
    pub name: String,
    /// Size of the object's data in bytes.
    pub compressed_size: u64,
    /// Size of the thumbnail in bytes (0 if none).
    #[serde(default)]
    pub thumb_compressed_size: u64,
    /// Last modification time, seconds since the Unix epoch.
    #[serde(default)]
    pub date_modified: i64,
}

impl ObjectInfo {
    /// Creates metadata for an undefined-format object with zero size.
    pub fn new(object_handle: u32, storage_id: u32, parent: u32, name: impl Into<String>) -> Self {
        Self {
            object_handle,
            storage_id,
            format: FORMAT_UNDEFINED,
            parent,
            name: name.into(),
            compressed_size: 0,
            thumb_compressed_size: 0,
            date_modified: 0,
        }
    }

    /// Returns a copy with the data size replaced.
    pub fn with_compressed_size(mut self, size: u64) -> Self {
        self.compressed_size = size;
        self
    }

    /// Returns a copy with the object handle replaced.
    pub fn with_object_handle(mut self, handle: u32) -> Self {
        self.object_handle = handle;
        self
    }
}
