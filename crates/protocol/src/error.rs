//! Error types for the protocol crate.

use thiserror::Error;

/// Errors reported by a device client.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The object handle does not exist on the device.
    #[error("object not found: device {device_id}, handle {object_handle}")]
    ObjectNotFound {
        /// Device that was queried.
        device_id: u32,
        /// Missing object handle.
        object_handle: u32,
    },

    /// The object has no thumbnail.
    #[error("no thumbnail for object: device {device_id}, handle {object_handle}")]
    NoThumbnail {
        /// Device that was queried.
        device_id: u32,
        /// Object handle without a thumbnail.
        object_handle: u32,
    },

    /// The device is not connected or has gone away.
    #[error("device not available: {0}")]
    Unavailable(u32),

    /// The device answered with a protocol-level failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Object metadata could not be encoded or decoded.
    #[error("invalid object info: {0}")]
    InvalidObjectInfo(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// No entry for the document id.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// The document has no parent (it is a root).
    #[error("document has no parent: {0}")]
    NoParent(String),

    /// The catalog could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),

    /// Lock poisoned during operation.
    #[error("lock poisoned: {context}")]
    LockPoisoned { context: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

impl From<serde_json::Error> for DeviceError {
    fn from(err: serde_json::Error) -> Self {
        DeviceError::InvalidObjectInfo(err.to_string())
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Storage(err.to_string())
    }
}
