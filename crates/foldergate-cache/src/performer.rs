//! Mutation executors.
//!
//! Each mutation is routed through the registry to the owning backend and
//! runs inside that backend's write transaction. The performer knows nothing
//! about caching; the orchestrator applies the invalidation cascades around
//! these calls.

use std::sync::Arc;

use foldergate_core::{Folder, StorageType};
use foldergate_storage::{DynFolderStorage, StorageError, StorageParameters, in_transaction};
use tracing::debug;

use crate::registry::StorageRegistry;

/// Upper bound for parent walks; deeper chains are treated as cycles.
const MAX_PATH_DEPTH: usize = 256;

pub struct FolderPerformer {
    registry: Arc<StorageRegistry>,
}

impl FolderPerformer {
    pub fn new(registry: Arc<StorageRegistry>) -> Self {
        Self { registry }
    }

    /// The backend a new folder goes to: the content type's designated
    /// backend if it accepts children of the parent, otherwise the parent's
    /// own backend.
    pub fn storage_for_new(&self, folder: &Folder) -> Result<DynFolderStorage, StorageError> {
        let parent_id = folder
            .parent_id
            .as_deref()
            .ok_or_else(|| StorageError::invalid_folder("a new folder needs a parent"))?;

        if let Some(content_type) = &folder.content_type {
            if let Ok(storage) = self
                .registry
                .resolve_by_content_type(&folder.tree_id, content_type)
            {
                if storage.folder_type().serves_parent_id(parent_id) {
                    return Ok(storage);
                }
            }
        }
        self.registry.resolve(&folder.tree_id, parent_id)
    }

    pub async fn create(
        &self,
        folder: &Folder,
        params: &StorageParameters,
    ) -> Result<String, StorageError> {
        if folder.name.trim().is_empty() {
            return Err(StorageError::invalid_folder("folder name must not be empty"));
        }
        let storage = self.storage_for_new(folder)?;
        let prepared = storage
            .prepare_folder(&folder.tree_id, folder.clone(), params)
            .await?;

        let id = in_transaction(storage.as_ref(), params, true, || {
            storage.create_folder(&prepared, params)
        })
        .await?;
        debug!(
            tree_id = %folder.tree_id,
            folder_id = %id,
            backend = storage.backend_name(),
            "folder created"
        );
        Ok(id)
    }

    /// Returns the folder's ID after the update.
    pub async fn update(
        &self,
        folder: &Folder,
        params: &StorageParameters,
    ) -> Result<String, StorageError> {
        let storage = self.registry.resolve(&folder.tree_id, &folder.id)?;
        if let Some(parent_id) = folder.parent_id.as_deref() {
            if !storage.folder_type().serves_parent_id(parent_id) {
                return Err(StorageError::invalid_folder(format!(
                    "{} cannot move {} below {parent_id}",
                    storage.backend_name(),
                    folder.id
                )));
            }
        }

        let id = in_transaction(storage.as_ref(), params, true, || {
            storage.update_folder(folder, params)
        })
        .await?;
        debug!(
            tree_id = %folder.tree_id,
            folder_id = %folder.id,
            new_id = %id,
            backend = storage.backend_name(),
            "folder updated"
        );
        Ok(id)
    }

    pub async fn delete(
        &self,
        tree_id: &str,
        folder_id: &str,
        params: &StorageParameters,
    ) -> Result<(), StorageError> {
        let storage = self.registry.resolve(tree_id, folder_id)?;
        in_transaction(storage.as_ref(), params, true, || {
            storage.delete_folder(tree_id, folder_id, params)
        })
        .await?;
        debug!(tree_id, folder_id, backend = storage.backend_name(), "folder deleted");
        Ok(())
    }

    pub async fn clear(
        &self,
        tree_id: &str,
        folder_id: &str,
        params: &StorageParameters,
    ) -> Result<(), StorageError> {
        let storage = self.registry.resolve(tree_id, folder_id)?;
        in_transaction(storage.as_ref(), params, true, || {
            storage.clear_folder(tree_id, folder_id, params)
        })
        .await
    }

    /// IDs from the folder itself up to the tree root, read from the
    /// backends.
    pub async fn path_to_root(
        &self,
        tree_id: &str,
        folder_id: &str,
        params: &StorageParameters,
    ) -> Result<Vec<String>, StorageError> {
        let mut path = Vec::new();
        let mut current = Some(folder_id.to_string());

        while let Some(id) = current {
            if path.len() >= MAX_PATH_DEPTH {
                return Err(StorageError::unexpected(format!(
                    "path of {folder_id} in tree {tree_id} exceeds {MAX_PATH_DEPTH} levels"
                )));
            }
            let storage = self.registry.resolve(tree_id, &id)?;
            let folder = in_transaction(storage.as_ref(), params, false, || {
                storage.get_folder(tree_id, &id, StorageType::Working, params)
            })
            .await?;
            current = folder.parent_id;
            path.push(id);
        }
        Ok(path)
    }
}
