//! Document catalog interface.

use crate::error::CatalogError;
use crate::identifier::Identifier;
use crate::object::{ObjectInfo, OperationCode};

/// Persistent mapping from document ids to remote objects and their hierarchy.
pub trait Catalog: Send + Sync {
    /// Returns the identifier of the parent of `document_id`.
    fn get_parent_identifier(&self, document_id: &str) -> Result<Identifier, CatalogError>;

    /// Points `document_id` at the object described by `info`.
    ///
    /// # Arguments
    /// * `document_id` - Document to update.
    /// * `device_id` - Device holding the object.
    /// * `parent_document_id` - Document id of the parent.
    /// * `operations` - Operations the device supports on the object.
    /// * `info` - Metadata of the object the document now refers to.
    fn update_object(
        &self,
        document_id: &str,
        device_id: u32,
        parent_document_id: &str,
        operations: &[OperationCode],
        info: &ObjectInfo,
    ) -> Result<(), CatalogError>;
}
