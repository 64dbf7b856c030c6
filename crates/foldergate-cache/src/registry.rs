//! Backend registry
//!
//! Resolves which storage backend owns a folder, either by folder ID within a
//! tree or by content type. Backends registered under [`ALL_TREES`] form a
//! generic list that is consulted before the tree-specific ones.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use foldergate_core::ContentType;
use foldergate_storage::{DynFolderStorage, StorageError, StoragePriority, same_storage};
use tracing::{debug, info, warn};

/// Tree ID wildcard for backends that serve every tree.
pub const ALL_TREES: &str = "*";

/// Error type for registry operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("Content type {content_type} in tree {tree_id} is already served by {existing}")]
    ContentTypeTaken {
        tree_id: String,
        content_type: String,
        existing: &'static str,
    },

    #[error("Tree {tree_id} already has general backend {existing}")]
    GeneralTaken {
        tree_id: String,
        existing: &'static str,
    },

    #[error("Backend {backend} is already registered for tree {tree_id}")]
    AlreadyRegistered {
        tree_id: String,
        backend: &'static str,
    },
}

#[derive(Default)]
struct TreeStorages {
    /// Registration order is resolution order
    storages: Vec<DynFolderStorage>,
    by_content_type: HashMap<ContentType, DynFolderStorage>,
    general: Option<DynFolderStorage>,
}

impl TreeStorages {
    fn contains(&self, storage: &DynFolderStorage) -> bool {
        self.storages.iter().any(|s| same_storage(s, storage))
    }

    fn is_empty(&self) -> bool {
        self.storages.is_empty()
    }
}

/// Registry of folder storage backends.
///
/// Shared as `Arc<StorageRegistry>` between the orchestrator, the fetch
/// executor and the mutation performer.
#[derive(Default)]
pub struct StorageRegistry {
    generic: ArcSwap<Vec<DynFolderStorage>>,
    trees: DashMap<String, TreeStorages>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend for `tree_id` (or [`ALL_TREES`]).
    ///
    /// Returns `Ok(false)` for a backend running at
    /// [`StoragePriority::Highest`], which is reserved for the caching
    /// orchestrator. A content type conflict leaves the registry exactly as it
    /// was before the call.
    pub fn register(&self, tree_id: &str, storage: DynFolderStorage) -> Result<bool, RegistryError> {
        let name = storage.backend_name();
        if storage.priority() == StoragePriority::Highest {
            warn!(tree_id, backend = name, "refusing to register a backend with highest priority");
            return Ok(false);
        }

        if tree_id == ALL_TREES {
            return self.register_generic(storage).map(|()| true);
        }

        let mut entry = self.trees.entry(tree_id.to_string()).or_default();
        let result = Self::register_in_tree(tree_id, &mut entry, storage);
        let empty = entry.is_empty();
        drop(entry);
        if result.is_err() && empty {
            self.trees.remove_if(tree_id, |_, t| t.is_empty());
        }
        result?;

        info!(tree_id, backend = name, "registered folder storage");
        Ok(true)
    }

    fn register_generic(&self, storage: DynFolderStorage) -> Result<(), RegistryError> {
        let name = storage.backend_name();
        if self.generic.load().iter().any(|s| same_storage(s, &storage)) {
            return Err(RegistryError::AlreadyRegistered {
                tree_id: ALL_TREES.to_string(),
                backend: name,
            });
        }
        self.generic.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&storage));
            next
        });
        info!(backend = name, "registered generic folder storage");
        Ok(())
    }

    fn register_in_tree(
        tree_id: &str,
        tree: &mut TreeStorages,
        storage: DynFolderStorage,
    ) -> Result<(), RegistryError> {
        let name = storage.backend_name();
        if tree.contains(&storage) {
            return Err(RegistryError::AlreadyRegistered {
                tree_id: tree_id.to_string(),
                backend: name,
            });
        }

        let content_types = storage.supported_content_types();
        if content_types.is_empty() {
            if let Some(existing) = &tree.general {
                return Err(RegistryError::GeneralTaken {
                    tree_id: tree_id.to_string(),
                    existing: existing.backend_name(),
                });
            }
            tree.general = Some(Arc::clone(&storage));
        } else {
            let mut added: Vec<ContentType> = Vec::with_capacity(content_types.len());
            for content_type in content_types {
                if let Some(existing) = tree.by_content_type.get(&content_type) {
                    let err = RegistryError::ContentTypeTaken {
                        tree_id: tree_id.to_string(),
                        content_type: content_type.to_string(),
                        existing: existing.backend_name(),
                    };
                    for undo in &added {
                        tree.by_content_type.remove(undo);
                    }
                    return Err(err);
                }
                debug!(tree_id, backend = name, content_type = %content_type, "content type associated");
                tree.by_content_type
                    .insert(content_type.clone(), Arc::clone(&storage));
                added.push(content_type);
            }
        }

        tree.storages.push(storage);
        Ok(())
    }

    /// Removes a backend and every association it holds. Returns whether it
    /// was registered.
    pub fn unregister(&self, tree_id: &str, storage: &DynFolderStorage) -> bool {
        let name = storage.backend_name();
        if tree_id == ALL_TREES {
            let before = self.generic.load().len();
            self.generic.rcu(|current| {
                current
                    .iter()
                    .filter(|s| !same_storage(s, storage))
                    .cloned()
                    .collect::<Vec<_>>()
            });
            let removed = self.generic.load().len() < before;
            if removed {
                info!(backend = name, "unregistered generic folder storage");
            }
            return removed;
        }

        let Some(mut tree) = self.trees.get_mut(tree_id) else {
            return false;
        };
        let before = tree.storages.len();
        tree.storages.retain(|s| !same_storage(s, storage));
        if tree.storages.len() == before {
            return false;
        }
        tree.by_content_type.retain(|_, s| !same_storage(s, storage));
        if tree.general.as_ref().is_some_and(|g| same_storage(g, storage)) {
            tree.general = None;
        }
        drop(tree);
        self.trees.remove_if(tree_id, |_, t| t.is_empty());

        info!(tree_id, backend = name, "unregistered folder storage");
        true
    }

    /// The backend owning `folder_id` in `tree_id`.
    ///
    /// A generic backend that claims the whole tree makes the tree
    /// unresolvable; callers get [`StorageError::NoStorageForId`] just as for
    /// an ID nobody serves.
    pub fn resolve(&self, tree_id: &str, folder_id: &str) -> Result<DynFolderStorage, StorageError> {
        let generic = self.generic.load();
        if let Some(owner) = generic
            .iter()
            .find(|s| s.folder_type().serves_tree_id(tree_id))
        {
            debug!(tree_id, folder_id, backend = owner.backend_name(), "tree owned by generic backend");
            return Err(StorageError::no_storage_for_id(tree_id, folder_id));
        }

        self.trees
            .get(tree_id)
            .and_then(|tree| {
                tree.storages
                    .iter()
                    .find(|s| s.folder_type().serves_folder_id(folder_id))
                    .cloned()
            })
            .ok_or_else(|| StorageError::no_storage_for_id(tree_id, folder_id))
    }

    pub fn resolve_by_content_type(
        &self,
        tree_id: &str,
        content_type: &ContentType,
    ) -> Result<DynFolderStorage, StorageError> {
        self.trees
            .get(tree_id)
            .and_then(|tree| tree.by_content_type.get(content_type).cloned())
            .ok_or_else(|| StorageError::no_storage_for_content_type(tree_id, content_type.as_str()))
    }

    pub fn general_storage(&self, tree_id: &str) -> Option<DynFolderStorage> {
        self.trees.get(tree_id).and_then(|tree| tree.general.clone())
    }

    /// Every backend of the tree, tree-specific ones first, followed by
    /// generic backends that claim the tree.
    pub fn storages_for_tree(&self, tree_id: &str) -> Vec<DynFolderStorage> {
        let mut storages = self
            .trees
            .get(tree_id)
            .map(|tree| tree.storages.clone())
            .unwrap_or_default();
        storages.extend(
            self.generic
                .load()
                .iter()
                .filter(|s| s.folder_type().serves_tree_id(tree_id))
                .cloned(),
        );
        storages
    }

    /// Backends of the tree that may own a child of `parent_id`.
    pub fn storages_for_parent(&self, tree_id: &str, parent_id: &str) -> Vec<DynFolderStorage> {
        self.trees
            .get(tree_id)
            .map(|tree| {
                tree.storages
                    .iter()
                    .filter(|s| s.folder_type().serves_parent_id(parent_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_registered(&self, tree_id: &str, storage: &DynFolderStorage) -> bool {
        if tree_id == ALL_TREES {
            return self.generic.load().iter().any(|s| same_storage(s, storage));
        }
        self.trees
            .get(tree_id)
            .is_some_and(|tree| tree.contains(storage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foldergate_core::Folder;
    use foldergate_db_memory::{IdPattern, InMemoryFolderStorage};

    fn native() -> DynFolderStorage {
        InMemoryFolderStorage::builder("native", "0")
            .content_type("calendar")
            .content_type("contacts")
            .build_shared()
    }

    fn mail() -> DynFolderStorage {
        InMemoryFolderStorage::builder("mail", "0")
            .id_pattern(IdPattern::path("mail/"))
            .attach_to("1")
            .content_type("mail")
            .build_shared()
    }

    #[test]
    fn test_resolve_by_folder_id_in_registration_order() {
        let registry = StorageRegistry::new();
        let native = native();
        let mail = mail();
        assert!(registry.register("0", Arc::clone(&native)).unwrap());
        assert!(registry.register("0", Arc::clone(&mail)).unwrap());

        let owner = registry.resolve("0", "10").unwrap();
        assert!(same_storage(&owner, &native));
        let owner = registry.resolve("0", "mail/INBOX").unwrap();
        assert!(same_storage(&owner, &mail));

        let err = registry.resolve("0", "odd:id").err().unwrap();
        assert!(matches!(err, StorageError::NoStorageForId { .. }));
        let err = registry.resolve("5", "10").err().unwrap();
        assert!(err.is_no_storage());
    }

    #[test]
    fn test_highest_priority_is_rejected() {
        let registry = StorageRegistry::new();
        let storage: DynFolderStorage = InMemoryFolderStorage::builder("greedy", "0")
            .priority(StoragePriority::Highest)
            .build_shared();
        assert!(!registry.register("0", Arc::clone(&storage)).unwrap());
        assert!(!registry.is_registered("0", &storage));
    }

    #[test]
    fn test_content_type_conflict_rolls_back_partial_associations() {
        let registry = StorageRegistry::new();
        registry.register("0", mail()).unwrap();

        let clash: DynFolderStorage = InMemoryFolderStorage::builder("clash", "0")
            .content_type("tasks")
            .content_type("mail")
            .build_shared();
        let err = registry.register("0", Arc::clone(&clash)).unwrap_err();
        assert!(matches!(err, RegistryError::ContentTypeTaken { existing: "mail", .. }));

        assert!(!registry.is_registered("0", &clash));
        assert!(
            registry
                .resolve_by_content_type("0", &ContentType::from("tasks"))
                .is_err()
        );
        let owner = registry
            .resolve_by_content_type("0", &ContentType::from("mail"))
            .unwrap();
        assert_eq!(owner.backend_name(), "mail");
    }

    #[test]
    fn test_backend_without_content_types_is_general_fallback() {
        let registry = StorageRegistry::new();
        let plain: DynFolderStorage = InMemoryFolderStorage::builder("plain", "0").build_shared();
        registry.register("0", Arc::clone(&plain)).unwrap();
        assert!(same_storage(&registry.general_storage("0").unwrap(), &plain));

        let second: DynFolderStorage = InMemoryFolderStorage::builder("second", "0").build_shared();
        let err = registry.register("0", second).unwrap_err();
        assert!(matches!(err, RegistryError::GeneralTaken { .. }));
    }

    #[test]
    fn test_generic_backend_claiming_tree_blocks_resolution() {
        let registry = StorageRegistry::new();
        registry.register("7", native()).unwrap();
        let generic: DynFolderStorage = InMemoryFolderStorage::builder("virtual", "7")
            .id_pattern(IdPattern::Any)
            .build_shared();
        registry.register(ALL_TREES, Arc::clone(&generic)).unwrap();

        let err = registry.resolve("7", "10").err().unwrap();
        assert!(matches!(err, StorageError::NoStorageForId { .. }));
        assert_eq!(registry.storages_for_tree("7").len(), 2);

        assert!(registry.unregister(ALL_TREES, &generic));
        assert!(registry.resolve("7", "10").is_ok());
    }

    #[test]
    fn test_unregister_removes_associations() {
        let registry = StorageRegistry::new();
        let native = native();
        registry.register("0", Arc::clone(&native)).unwrap();
        assert!(registry.unregister("0", &native));
        assert!(!registry.unregister("0", &native));

        assert!(
            registry
                .resolve_by_content_type("0", &ContentType::from("calendar"))
                .is_err()
        );
        assert!(registry.storages_for_tree("0").is_empty());
        // Registering again after removal works
        assert!(registry.register("0", native).unwrap());
    }

    #[test]
    fn test_storages_for_parent_uses_attach_points() {
        let registry = StorageRegistry::new();
        let native: DynFolderStorage = InMemoryFolderStorage::builder("native", "0")
            .content_type("calendar")
            .with_folder(Folder::new("0", "1", "private").with_parent("0"))
            .build_shared();
        registry.register("0", native).unwrap();
        registry.register("0", mail()).unwrap();

        let names: Vec<&str> = registry
            .storages_for_parent("0", "1")
            .iter()
            .map(|s| s.backend_name())
            .collect();
        assert_eq!(names, vec!["native", "mail"]);

        let names: Vec<&str> = registry
            .storages_for_parent("0", "mail/INBOX")
            .iter()
            .map(|s| s.backend_name())
            .collect();
        assert_eq!(names, vec!["mail"]);
    }
}
