//! Addressing for remote objects and their catalog documents.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Immutable address of a remote object and the local document mirroring it.
///
/// The device id and object handle select the object on the device, the
/// document id selects the matching catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    /// Device the object lives on.
    pub device_id: u32,
    /// Object handle assigned by the device.
    pub object_handle: u32,
    /// Catalog document id.
    pub document_id: String,
}

impl Identifier {
    /// Creates a new identifier.
    pub fn new(device_id: u32, object_handle: u32, document_id: impl Into<String>) -> Self {
        Self {
            device_id,
            object_handle,
            document_id: document_id.into(),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}",
            self.document_id, self.device_id, self.object_handle
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_new() {
        let id = Identifier::new(1, 42, "doc-7");
        assert_eq!(id.device_id, 1);
        assert_eq!(id.object_handle, 42);
        assert_eq!(id.document_id, "doc-7");
    }

    #[test]
    fn test_identifier_display() {
        let id = Identifier::new(3, 17, "root");
        assert_eq!(id.to_string(), "root@3:17");
    }

    #[test]
    fn test_identifier_json_shape() {
        let id = Identifier::new(1, 2, "doc");
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json["device_id"], 1);
        assert_eq!(json["object_handle"], 2);
        assert_eq!(json["document_id"], "doc");
    }
}
