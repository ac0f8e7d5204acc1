//! JSON-file document catalog.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use protocol::{Catalog, CatalogError, Identifier, ObjectInfo, OperationCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One catalog document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Device holding the object.
    pub device_id: u32,
    /// Object the document refers to.
    pub object_handle: u32,
    /// Parent document id, empty for a root.
    #[serde(default)]
    pub parent_document_id: String,
    /// Operations supported on the object.
    #[serde(default)]
    pub operations: Vec<OperationCode>,
    /// Last known object metadata.
    pub info: ObjectInfo,
}

impl CatalogEntry {
    /// Creates an entry for the object described by `info`.
    pub fn new(device_id: u32, parent_document_id: impl Into<String>, info: ObjectInfo) -> Self {
        Self {
            device_id,
            object_handle: info.object_handle,
            parent_document_id: parent_document_id.into(),
            operations: Vec::new(),
            info,
        }
    }
}

/// A [`Catalog`] persisted as one JSON map of document id to entry.
///
/// Every change is written through to disk before the call returns.
pub struct JsonCatalog {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, CatalogEntry>>,
}

impl JsonCatalog {
    /// Opens the catalog at `path`, starting empty if the file is missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = ?path, documents = entries.len(), "Catalog opened");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Adds or replaces a document.
    pub fn insert(
        &self,
        document_id: impl Into<String>,
        entry: CatalogEntry,
    ) -> Result<(), CatalogError> {
        let mut entries = self.lock()?;
        self.store(&mut entries, document_id.into(), entry)
    }

    /// Returns a copy of a document's entry.
    pub fn get(&self, document_id: &str) -> Result<Option<CatalogEntry>, CatalogError> {
        Ok(self.lock()?.get(document_id).cloned())
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, CatalogEntry>>, CatalogError> {
        self.entries
            .lock()
            .map_err(|_| CatalogError::LockPoisoned {
                context: "catalog entries".to_string(),
            })
    }

    /// Applies one change, on disk first. `entries` is untouched on failure.
    fn store(
        &self,
        entries: &mut BTreeMap<String, CatalogEntry>,
        document_id: String,
        entry: CatalogEntry,
    ) -> Result<(), CatalogError> {
        let mut next = entries.clone();
        next.insert(document_id, entry);
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    /// Replaces the backing file with the given entries.
    fn persist(&self, entries: &BTreeMap<String, CatalogEntry>) -> Result<(), CatalogError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut file = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(file.as_file_mut(), entries)?;
        file.as_file_mut().flush()?;
        file.persist(&self.path)
            .map_err(|e| CatalogError::Storage(format!("failed to replace catalog: {}", e.error)))?;
        Ok(())
    }
}

impl Catalog for JsonCatalog {
    fn get_parent_identifier(&self, document_id: &str) -> Result<Identifier, CatalogError> {
        let entries = self.lock()?;
        let entry = entries
            .get(document_id)
            .ok_or_else(|| CatalogError::DocumentNotFound(document_id.to_string()))?;

        if entry.parent_document_id.is_empty() {
            return Err(CatalogError::NoParent(document_id.to_string()));
        }

        let parent_id = &entry.parent_document_id;
        let identifier = match entries.get(parent_id) {
            Some(parent) => Identifier::new(parent.device_id, parent.object_handle, parent_id),
            // Uncatalogued parents are storage roots; address them by the handle the device reports.
            None => Identifier::new(entry.device_id, entry.info.parent, parent_id),
        };
        Ok(identifier)
    }

    fn update_object(
        &self,
        document_id: &str,
        device_id: u32,
        parent_document_id: &str,
        operations: &[OperationCode],
        info: &ObjectInfo,
    ) -> Result<(), CatalogError> {
        let mut entries = self.lock()?;
        let entry = CatalogEntry {
            device_id,
            object_handle: info.object_handle,
            parent_document_id: parent_document_id.to_string(),
            operations: operations.to_vec(),
            info: info.clone(),
        };
        self.store(&mut entries, document_id.to_string(), entry)?;

        debug!(
            document_id,
            object_handle = info.object_handle,
            "Catalog document updated"
        );
        Ok(())
    }
}
