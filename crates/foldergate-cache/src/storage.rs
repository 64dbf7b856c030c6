//! Caching folder storage.
//!
//! [`CacheFolderStorage`] exposes the same [`FolderStorage`] surface as a
//! plain backend. Reads go through the two-tier cache and fall back to the
//! owning backend; mutations are delegated to the [`FolderPerformer`] and
//! followed by the invalidation cascade for the affected folders.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use foldergate_core::{
    ContentType, ContextId, Folder, REAL_TREE_ID, ROOT_ID, SessionId, SortableId, StorageType,
    UserId, is_virtual_tree,
};
use foldergate_storage::{
    AnyFolderType, DynFolderStorage, FolderStorage, FolderType, StorageError, StorageParameters,
    StoragePriority, in_transaction,
};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::cache::{LocalCacheService, TwoTierCache};
use crate::config::FolderCacheConfig;
use crate::fetch::ParallelFetcher;
use crate::performer::FolderPerformer;
use crate::registry::StorageRegistry;

/// Read-through, invalidating cache in front of the registered backends.
pub struct CacheFolderStorage {
    registry: Arc<StorageRegistry>,
    cache: Arc<TwoTierCache>,
    fetcher: ParallelFetcher,
    performer: FolderPerformer,
    folder_type: AnyFolderType,
}

impl CacheFolderStorage {
    pub fn new(registry: Arc<StorageRegistry>, config: &FolderCacheConfig) -> Self {
        let global = Arc::new(LocalCacheService::new(config.cache.global_ttl()));
        let cache = Arc::new(TwoTierCache::new(global, &config.cache));
        Self::with_cache(registry, cache, config.fetch.parallel)
    }

    pub fn with_cache(
        registry: Arc<StorageRegistry>,
        cache: Arc<TwoTierCache>,
        parallel: bool,
    ) -> Self {
        Self {
            fetcher: ParallelFetcher::new(Arc::clone(&registry), Arc::clone(&cache), parallel),
            performer: FolderPerformer::new(Arc::clone(&registry)),
            registry,
            cache,
            folder_type: AnyFolderType,
        }
    }

    pub fn registry(&self) -> &Arc<StorageRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<TwoTierCache> {
        &self.cache
    }

    pub fn performer(&self) -> &FolderPerformer {
        &self.performer
    }

    /// Loads a folder from its backend, bypassing the cache.
    async fn load_from_backend(
        &self,
        tree_id: &str,
        folder_id: &str,
        storage_type: StorageType,
        params: &StorageParameters,
    ) -> Result<Folder, StorageError> {
        let storage = self.registry.resolve(tree_id, folder_id)?;
        in_transaction(storage.as_ref(), params, false, || {
            storage.get_folder(tree_id, folder_id, storage_type, params)
        })
        .await
    }

    /// Loads a folder from its backend and caches it.
    async fn reload(
        &self,
        tree_id: &str,
        folder_id: &str,
        params: &StorageParameters,
    ) -> Result<Folder, StorageError> {
        let folder = self
            .load_from_backend(tree_id, folder_id, StorageType::Working, params)
            .await?;
        self.cache.put(&folder, params).await;
        Ok(folder)
    }

    /// Drops a folder from the cache, optionally together with its ancestors.
    pub async fn remove_from_cache(
        &self,
        tree_id: &str,
        folder_id: &str,
        cascade: bool,
        params: &StorageParameters,
    ) {
        if cascade {
            self.cache
                .remove_cascade(tree_id, folder_id, params, &self.performer)
                .await;
        } else {
            self.cache.remove_single(tree_id, folder_id, params).await;
        }
    }

    /// Clears the private tier of every session of the user.
    pub fn clear_user_cache(&self, user_id: UserId, context_id: ContextId) -> usize {
        self.cache.drop_all_for_user(user_id, context_id)
    }

    /// Drops the private tier of a session that has ended.
    pub fn end_session(&self, session_id: &SessionId) -> bool {
        self.cache.end_session(session_id)
    }

    /// Children of `folder`, from its own listing or from the backends.
    async fn child_ids(
        &self,
        folder: &Folder,
        params: &StorageParameters,
    ) -> Result<Vec<String>, StorageError> {
        match &folder.subfolder_ids {
            Some(ids) => Ok(ids.clone()),
            None => Ok(self
                .get_subfolders(&folder.tree_id, &folder.id, params)
                .await?
                .into_iter()
                .map(|child| child.id)
                .collect()),
        }
    }

    /// IDs of every folder below `folder`, breadth first.
    async fn descendant_ids(
        &self,
        folder: &Folder,
        params: &StorageParameters,
    ) -> Result<Vec<String>, StorageError> {
        let tree_id = folder.tree_id.as_str();
        let mut seen = HashSet::from([folder.id.clone()]);
        let mut pending: VecDeque<String> = self.child_ids(folder, params).await?.into();
        let mut found = Vec::new();

        while let Some(id) = pending.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            match self
                .get_folder(tree_id, &id, StorageType::Working, params)
                .await
            {
                Ok(child) => pending.extend(self.child_ids(&child, params).await?),
                Err(err) if err.is_not_found() || err.is_no_storage() => {}
                Err(err) => return Err(err),
            }
            found.push(id);
        }
        Ok(found)
    }

    /// Merges a change listing across every backend of the tree.
    async fn changed_ids(
        &self,
        tree_id: &str,
        since: OffsetDateTime,
        deleted: bool,
        params: &StorageParameters,
    ) -> Result<Vec<String>, StorageError> {
        let work: Vec<(DynFolderStorage, ())> = self
            .registry
            .storages_for_tree(tree_id)
            .into_iter()
            .map(|s| (s, ()))
            .collect();
        let tree = tree_id.to_string();
        let mut ids = self
            .fetcher
            .fan_out(work, params, move |storage, (), params| {
                let tree = tree.clone();
                async move {
                    in_transaction(storage.as_ref(), &params, false, || async {
                        if deleted {
                            storage.deleted_folder_ids(&tree, since, &params).await
                        } else {
                            storage.modified_folder_ids(&tree, since, &params).await
                        }
                    })
                    .await
                }
            })
            .await?;
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}

#[async_trait]
impl FolderStorage for CacheFolderStorage {
    fn folder_type(&self) -> &dyn FolderType {
        &self.folder_type
    }

    fn priority(&self) -> StoragePriority {
        StoragePriority::Highest
    }

    fn supported_content_types(&self) -> Vec<ContentType> {
        Vec::new()
    }

    fn backend_name(&self) -> &'static str {
        "cache"
    }

    // Backends drive their own transactions around every delegated call.
    async fn start_transaction(
        &self,
        _params: &StorageParameters,
        _modify: bool,
    ) -> Result<bool, StorageError> {
        Ok(false)
    }

    async fn commit_transaction(&self, _params: &StorageParameters) -> Result<(), StorageError> {
        Ok(())
    }

    async fn rollback(&self, _params: &StorageParameters) {}

    async fn get_folder(
        &self,
        tree_id: &str,
        folder_id: &str,
        storage_type: StorageType,
        params: &StorageParameters,
    ) -> Result<Folder, StorageError> {
        if storage_type == StorageType::Backup {
            return self
                .load_from_backend(tree_id, folder_id, storage_type, params)
                .await;
        }
        if let Some(hit) = self.cache.get(tree_id, folder_id, params).await {
            return Ok(hit);
        }
        self.reload(tree_id, folder_id, params).await
    }

    async fn get_folders(
        &self,
        tree_id: &str,
        folder_ids: &[String],
        storage_type: StorageType,
        params: &StorageParameters,
    ) -> Result<Vec<Folder>, StorageError> {
        if storage_type == StorageType::Backup {
            let mut folders = Vec::with_capacity(folder_ids.len());
            for folder_id in folder_ids {
                match self
                    .load_from_backend(tree_id, folder_id, storage_type, params)
                    .await
                {
                    Ok(folder) => folders.push(folder),
                    Err(err) if err.is_not_found() => continue,
                    Err(err) => return Err(err),
                }
            }
            return Ok(folders);
        }

        let mut found: HashMap<String, Folder> = HashMap::with_capacity(folder_ids.len());
        let mut misses: Vec<String> = Vec::new();
        for folder_id in folder_ids {
            if found.contains_key(folder_id) || misses.contains(folder_id) {
                continue;
            }
            match self.cache.get(tree_id, folder_id, params).await {
                Some(hit) => {
                    found.insert(folder_id.clone(), hit);
                }
                None => misses.push(folder_id.clone()),
            }
        }

        if !misses.is_empty() {
            let loaded = self
                .fetcher
                .fetch(tree_id, &misses, storage_type, params)
                .await?;
            found.extend(loaded.into_iter().map(|f| (f.id.clone(), f)));
        }

        Ok(folder_ids
            .iter()
            .filter_map(|id| found.get(id).cloned())
            .collect())
    }

    async fn contains_folder(
        &self,
        tree_id: &str,
        folder_id: &str,
        storage_type: StorageType,
        params: &StorageParameters,
    ) -> Result<bool, StorageError> {
        if storage_type == StorageType::Working
            && self.cache.get(tree_id, folder_id, params).await.is_some()
        {
            return Ok(true);
        }
        let storage = self.registry.resolve(tree_id, folder_id)?;
        in_transaction(storage.as_ref(), params, false, || {
            storage.contains_folder(tree_id, folder_id, storage_type, params)
        })
        .await
    }

    async fn get_subfolders(
        &self,
        tree_id: &str,
        parent_id: &str,
        params: &StorageParameters,
    ) -> Result<Vec<SortableId>, StorageError> {
        let parent = self
            .get_folder(tree_id, parent_id, StorageType::Working, params)
            .await?;
        if let Some(ids) = parent.subfolder_ids {
            // The parent's own order is authoritative; the index is the rank.
            return Ok(ids
                .into_iter()
                .enumerate()
                .map(|(index, id)| SortableId::new(id, "", Some(index as i32)))
                .collect());
        }

        let storages = self.registry.storages_for_parent(tree_id, parent_id);
        match storages.len() {
            0 => Err(StorageError::no_storage_for_id(tree_id, parent_id)),
            1 => {
                let storage = &storages[0];
                in_transaction(storage.as_ref(), params, false, || {
                    storage.get_subfolders(tree_id, parent_id, params)
                })
                .await
            }
            _ => {
                let work: Vec<(DynFolderStorage, ())> =
                    storages.into_iter().map(|s| (s, ())).collect();
                let tree = tree_id.to_string();
                let parent = parent_id.to_string();
                let mut children = self
                    .fetcher
                    .fan_out(work, params, move |storage, (), params| {
                        let tree = tree.clone();
                        let parent = parent.clone();
                        async move {
                            in_transaction(storage.as_ref(), &params, false, || {
                                storage.get_subfolders(&tree, &parent, &params)
                            })
                            .await
                        }
                    })
                    .await?;
                children.sort();
                Ok(children)
            }
        }
    }

    async fn create_folder(
        &self,
        folder: &Folder,
        params: &StorageParameters,
    ) -> Result<String, StorageError> {
        let tree_id = folder.tree_id.as_str();
        let id = self.performer.create(folder, params).await?;

        self.reload(tree_id, &id, params).await?;
        if let Some(parent_id) = folder.parent_id.as_deref() {
            self.cache.remove_single(tree_id, parent_id, params).await;
            self.reload(tree_id, parent_id, params).await?;
        }
        info!(tree_id, folder_id = %id, "folder created");
        Ok(id)
    }

    async fn update_folder(
        &self,
        folder: &Folder,
        params: &StorageParameters,
    ) -> Result<String, StorageError> {
        let tree_id = folder.tree_id.as_str();
        let old_parent = self
            .get_folder(tree_id, &folder.id, StorageType::Working, params)
            .await?
            .parent_id;

        let new_id = self.performer.update(folder, params).await?;

        let moved = folder.parent_id.is_some() && folder.parent_id != old_parent;
        let renamed = new_id != folder.id;
        self.cache.remove_single(tree_id, &folder.id, params).await;
        if renamed {
            // Descendants were re-keyed along with the folder.
            self.cache.remove_nested(tree_id, &folder.id, params).await;
        }
        let mut refresh: Vec<String> = Vec::new();
        if moved || renamed {
            if let Some(old) = old_parent.as_deref() {
                self.cache.remove_single(tree_id, old, params).await;
                refresh.push(old.to_string());
            }
        }

        let updated = self.reload(tree_id, &new_id, params).await?;
        if moved {
            if let Some(new_parent) = updated.parent_id.as_deref() {
                if old_parent.as_deref() != Some(new_parent) {
                    self.cache.remove_single(tree_id, new_parent, params).await;
                    refresh.push(new_parent.to_string());
                }
            }
        }
        for parent_id in &refresh {
            self.reload(tree_id, parent_id, params).await?;
        }

        debug!(tree_id, folder_id = %folder.id, new_id = %new_id, moved, "folder updated");
        Ok(new_id)
    }

    async fn delete_folder(
        &self,
        tree_id: &str,
        folder_id: &str,
        params: &StorageParameters,
    ) -> Result<(), StorageError> {
        let snapshot = self
            .get_folder(tree_id, folder_id, StorageType::Working, params)
            .await?;
        let real_parent = if is_virtual_tree(tree_id) {
            match self
                .get_folder(REAL_TREE_ID, folder_id, StorageType::Working, params)
                .await
            {
                Ok(real) => real.parent_id,
                Err(err) if err.is_not_found() || err.is_no_storage() => None,
                Err(err) => return Err(err),
            }
        } else {
            None
        };
        let descendants = match self.descendant_ids(&snapshot, params).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(
                    tree_id,
                    folder_id,
                    error = %err,
                    "subtree listing failed, only path-nested descendants will be invalidated"
                );
                Vec::new()
            }
        };

        self.performer.delete(tree_id, folder_id, params).await?;

        self.cache
            .remove_tiered(tree_id, folder_id, snapshot.global, params)
            .await;
        for id in &descendants {
            self.cache.remove_single(tree_id, id, params).await;
        }
        self.cache.remove_nested(tree_id, folder_id, params).await;
        if let Some(real_parent) = real_parent.as_deref().filter(|p| *p != ROOT_ID) {
            self.cache
                .remove_single(REAL_TREE_ID, real_parent, params)
                .await;
        }
        if let Some(parent_id) = snapshot.parent_id.as_deref().filter(|p| *p != ROOT_ID) {
            self.cache.remove_single(tree_id, parent_id, params).await;
            self.reload(tree_id, parent_id, params).await?;
        }
        info!(
            tree_id,
            folder_id,
            cacheable = snapshot.cacheable,
            descendants = descendants.len(),
            "folder deleted"
        );
        Ok(())
    }

    async fn clear_folder(
        &self,
        tree_id: &str,
        folder_id: &str,
        params: &StorageParameters,
    ) -> Result<(), StorageError> {
        self.performer.clear(tree_id, folder_id, params).await
    }

    async fn default_folder_id(
        &self,
        tree_id: &str,
        content_type: &ContentType,
        params: &StorageParameters,
    ) -> Result<String, StorageError> {
        let storage = self.registry.resolve_by_content_type(tree_id, content_type)?;
        in_transaction(storage.as_ref(), params, false, || {
            storage.default_folder_id(tree_id, content_type, params)
        })
        .await
    }

    async fn modified_folder_ids(
        &self,
        tree_id: &str,
        since: OffsetDateTime,
        params: &StorageParameters,
    ) -> Result<Vec<String>, StorageError> {
        self.changed_ids(tree_id, since, false, params).await
    }

    async fn deleted_folder_ids(
        &self,
        tree_id: &str,
        since: OffsetDateTime,
        params: &StorageParameters,
    ) -> Result<Vec<String>, StorageError> {
        self.changed_ids(tree_id, since, true, params).await
    }

    async fn prepare_folder(
        &self,
        tree_id: &str,
        mut folder: Folder,
        params: &StorageParameters,
    ) -> Result<Folder, StorageError> {
        folder.tree_id = tree_id.to_string();
        let storage = self.performer.storage_for_new(&folder)?;
        storage.prepare_folder(tree_id, folder, params).await
    }

    async fn check_consistency(
        &self,
        tree_id: &str,
        params: &StorageParameters,
    ) -> Result<(), StorageError> {
        for storage in self.registry.storages_for_tree(tree_id) {
            debug!(tree_id, backend = storage.backend_name(), "checking consistency");
            in_transaction(storage.as_ref(), params, true, || {
                storage.check_consistency(tree_id, params)
            })
            .await?;
        }
        // Repairs may have re-parented anything, so cached structure is suspect.
        self.cache.invalidate_context(params.context_id()).await;
        self.cache
            .drop_all_for_user(params.user_id(), params.context_id());
        Ok(())
    }

    async fn restore(
        &self,
        tree_id: &str,
        folder_id: &str,
        params: &StorageParameters,
    ) -> Result<(), StorageError> {
        let storage = self.registry.resolve(tree_id, folder_id)?;
        in_transaction(storage.as_ref(), params, true, || {
            storage.restore(tree_id, folder_id, params)
        })
        .await?;
        self.cache
            .remove_cascade(tree_id, folder_id, params, &self.performer)
            .await;
        info!(tree_id, folder_id, "folder restored");
        Ok(())
    }
}
