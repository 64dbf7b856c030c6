//! Storage traits for the folder storage abstraction layer.
//!
//! This module defines the contract every folder backend implements, plus the
//! [`FolderType`] predicate the registry uses to route a folder ID to its
//! owning backend.

use std::sync::Arc;

use async_trait::async_trait;
use foldergate_core::{ContentType, Folder, SortableId, StorageType};
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::params::StorageParameters;

/// Priority of a storage backend.
///
/// The caching orchestrator runs at [`StoragePriority::Highest`]; only
/// backends below that level may be registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoragePriority {
    Low,
    #[default]
    Normal,
    High,
    Highest,
}

/// Decides which trees and folder IDs a backend is responsible for.
pub trait FolderType: Send + Sync {
    /// Whether the backend claims a whole tree.
    fn serves_tree_id(&self, tree_id: &str) -> bool;

    /// Whether the backend owns the folder with this ID.
    fn serves_folder_id(&self, folder_id: &str) -> bool;

    /// Whether the backend can own children of the given parent.
    fn serves_parent_id(&self, parent_id: &str) -> bool {
        self.serves_folder_id(parent_id)
    }
}

/// Serves every tree and every folder ID.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyFolderType;

impl FolderType for AnyFolderType {
    fn serves_tree_id(&self, _tree_id: &str) -> bool {
        true
    }

    fn serves_folder_id(&self, _folder_id: &str) -> bool {
        true
    }
}

/// The main storage trait that all folder storage backends implement.
///
/// Implementations must be thread-safe (`Send + Sync`). A backend owns its
/// transaction boundary: callers ask it to start a transaction, and only if
/// it reports that one was started do they commit or roll it back.
///
/// # Example
///
/// ```ignore
/// use foldergate_storage::{FolderStorage, StorageParameters};
///
/// async fn name_of(storage: &dyn FolderStorage, params: &StorageParameters) -> StorageResult<String> {
///     let folder = storage.get_folder("0", "10", StorageType::Working, params).await?;
///     Ok(folder.name)
/// }
/// ```
#[async_trait]
pub trait FolderStorage: Send + Sync {
    // ==================== Metadata ====================

    /// Routing predicate used by the registry.
    fn folder_type(&self) -> &dyn FolderType;

    fn priority(&self) -> StoragePriority {
        StoragePriority::Normal
    }

    /// Content types this backend is the designated home for. An empty list
    /// makes the backend the general fallback of its tree.
    fn supported_content_types(&self) -> Vec<ContentType>;

    /// Short name used in logs and [`StorageError::Backend`].
    fn backend_name(&self) -> &'static str;

    // ==================== Transactions ====================

    /// Opens a transaction on `params` unless one is already open.
    ///
    /// Returns `true` only if this call started a new transaction, in which
    /// case the caller must commit or roll it back.
    async fn start_transaction(
        &self,
        params: &StorageParameters,
        modify: bool,
    ) -> Result<bool, StorageError>;

    async fn commit_transaction(&self, params: &StorageParameters) -> Result<(), StorageError>;

    /// Rolls back the open transaction. Never fails; problems are logged.
    async fn rollback(&self, params: &StorageParameters);

    // ==================== Reads ====================

    /// Loads a single folder.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::FolderNotFound` if the folder does not exist.
    async fn get_folder(
        &self,
        tree_id: &str,
        folder_id: &str,
        storage_type: StorageType,
        params: &StorageParameters,
    ) -> Result<Folder, StorageError>;

    /// Loads several folders. Unknown IDs are skipped rather than failing
    /// the batch.
    async fn get_folders(
        &self,
        tree_id: &str,
        folder_ids: &[String],
        storage_type: StorageType,
        params: &StorageParameters,
    ) -> Result<Vec<Folder>, StorageError> {
        let mut folders = Vec::with_capacity(folder_ids.len());
        for folder_id in folder_ids {
            match self.get_folder(tree_id, folder_id, storage_type, params).await {
                Ok(folder) => folders.push(folder),
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(folders)
    }

    async fn contains_folder(
        &self,
        tree_id: &str,
        folder_id: &str,
        storage_type: StorageType,
        params: &StorageParameters,
    ) -> Result<bool, StorageError> {
        match self.get_folder(tree_id, folder_id, storage_type, params).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Lists the children of `parent_id` this backend knows about, sorted.
    async fn get_subfolders(
        &self,
        tree_id: &str,
        parent_id: &str,
        params: &StorageParameters,
    ) -> Result<Vec<SortableId>, StorageError>;

    // ==================== Mutations ====================

    /// Creates a folder and returns its ID. A non-empty `folder.id` is used
    /// as-is; otherwise the backend assigns one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if the ID is taken.
    async fn create_folder(
        &self,
        folder: &Folder,
        params: &StorageParameters,
    ) -> Result<String, StorageError>;

    /// Updates (and possibly moves) a folder. Returns the folder's ID after
    /// the update, which may differ from `folder.id` for backends that encode
    /// the path in the ID.
    async fn update_folder(
        &self,
        folder: &Folder,
        params: &StorageParameters,
    ) -> Result<String, StorageError>;

    /// Deletes a folder and its descendants.
    async fn delete_folder(
        &self,
        tree_id: &str,
        folder_id: &str,
        params: &StorageParameters,
    ) -> Result<(), StorageError>;

    /// Removes the folder's content but keeps the folder itself.
    async fn clear_folder(
        &self,
        tree_id: &str,
        folder_id: &str,
        params: &StorageParameters,
    ) -> Result<(), StorageError>;

    // ==================== Optional operations ====================

    /// The default folder of a content type in this tree.
    async fn default_folder_id(
        &self,
        tree_id: &str,
        content_type: &ContentType,
        _params: &StorageParameters,
    ) -> Result<String, StorageError> {
        Err(StorageError::no_storage_for_content_type(
            tree_id,
            content_type.as_str(),
        ))
    }

    /// IDs of folders modified after `since`.
    async fn modified_folder_ids(
        &self,
        _tree_id: &str,
        _since: OffsetDateTime,
        _params: &StorageParameters,
    ) -> Result<Vec<String>, StorageError> {
        Ok(Vec::new())
    }

    /// IDs of folders deleted after `since`.
    async fn deleted_folder_ids(
        &self,
        _tree_id: &str,
        _since: OffsetDateTime,
        _params: &StorageParameters,
    ) -> Result<Vec<String>, StorageError> {
        Ok(Vec::new())
    }

    /// Gives the backend a chance to complete a folder before it is created,
    /// e.g. by assigning defaults.
    async fn prepare_folder(
        &self,
        _tree_id: &str,
        folder: Folder,
        _params: &StorageParameters,
    ) -> Result<Folder, StorageError> {
        Ok(folder)
    }

    /// Repairs structural inconsistencies of the tree.
    async fn check_consistency(
        &self,
        _tree_id: &str,
        _params: &StorageParameters,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    /// Brings back a previously deleted folder.
    async fn restore(
        &self,
        _tree_id: &str,
        _folder_id: &str,
        _params: &StorageParameters,
    ) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Whether two handles point at the same backend instance.
pub fn same_storage(a: &Arc<dyn FolderStorage>, b: &Arc<dyn FolderStorage>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
