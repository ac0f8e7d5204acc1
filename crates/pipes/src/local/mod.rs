//! Filesystem-backed collaborators.
//!
//! [`FolderDevice`] plays the role of a connected device and [`JsonCatalog`]
//! the role of the document catalog, so the pipe core can run end to end
//! without hardware.

pub mod catalog;
pub mod folder;

pub use catalog::{CatalogEntry, JsonCatalog};
pub use folder::FolderDevice;
