//! Device-transfer-protocol client interface.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::Result;
use crate::object::ObjectInfo;

/// Shared handle to an open device session.
///
/// The pipe core clones this into every task it queues; all calls through it
/// happen on the core's single worker thread.
pub type DeviceSession = Arc<dyn DeviceClient>;

/// Capability interface for a device speaking an MTP-like transfer protocol.
///
/// Implementations are not required to tolerate concurrent calls. Callers
/// must serialize access, which the pipe core does by construction.
pub trait DeviceClient: Send + Sync {
    /// Streams the bytes of an object into `sink`.
    ///
    /// Bytes already written to `sink` stay written if the transfer fails
    /// part way through.
    ///
    /// # Arguments
    /// * `device_id` - Device holding the object.
    /// * `object_handle` - Object to read.
    /// * `sink` - Destination for the object's bytes.
    fn stream_object(&self, device_id: u32, object_handle: u32, sink: &mut dyn Write)
        -> Result<()>;

    /// Fetches the thumbnail of an object as a single buffer.
    fn get_thumbnail(&self, device_id: u32, object_handle: u32) -> Result<Vec<u8>>;

    /// Fetches the metadata of an object.
    fn get_object_info(&self, device_id: u32, object_handle: u32) -> Result<ObjectInfo>;

    /// Deletes an object.
    fn delete_object(&self, device_id: u32, object_handle: u32) -> Result<()>;

    /// Creates a new object from `info`, uploading its bytes from `source`.
    ///
    /// # Returns
    /// The handle the device assigned to the new object.
    fn create_object(&self, device_id: u32, info: &ObjectInfo, source: &mut dyn Read)
        -> Result<u32>;
}
