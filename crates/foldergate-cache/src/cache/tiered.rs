use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use foldergate_core::{
    ContextId, Folder, REAL_TREE_ID, Session, SessionId, UserId, is_virtual_tree,
};
use foldergate_storage::StorageParameters;
use tracing::{debug, warn};

use super::key::CacheKey;
use super::service::{FolderCacheService, LocalCacheService};
use super::session::SessionFolderCache;
use crate::config::CacheSettings;
use crate::performer::FolderPerformer;

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct TieredCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub global_entries: usize,
    pub sessions: usize,
    pub session_entries: usize,
}

impl TieredCacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Global tier plus one private tier per session.
///
/// A folder's `global` flag picks the tier on `put`; lookups try the global
/// tier first and then the caller's own session tier.
pub struct TwoTierCache {
    global: Arc<dyn FolderCacheService>,
    sessions: DashMap<SessionId, Arc<SessionFolderCache>>,
    enabled: bool,
    session_ttl: Duration,
    session_capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    // evictions of session caches that were already dropped
    retired_evictions: AtomicU64,
}

impl TwoTierCache {
    pub fn new(global: Arc<dyn FolderCacheService>, settings: &CacheSettings) -> Self {
        Self {
            global,
            sessions: DashMap::new(),
            enabled: settings.enabled,
            session_ttl: settings.session_ttl(),
            session_capacity: settings.session_capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            retired_evictions: AtomicU64::new(0),
        }
    }

    /// Both tiers in memory.
    pub fn local(settings: &CacheSettings) -> Self {
        Self::new(Arc::new(LocalCacheService::new(settings.global_ttl())), settings)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn session_cache(&self, session: &Session) -> Arc<SessionFolderCache> {
        let entry = self.sessions.entry(session.id.clone()).or_insert_with(|| {
            debug!(session_id = %session.id, "creating session folder cache");
            Arc::new(SessionFolderCache::new(
                session,
                self.session_ttl,
                self.session_capacity,
            ))
        });
        Arc::clone(entry.value())
    }

    fn existing_session_cache(&self, params: &StorageParameters) -> Option<Arc<SessionFolderCache>> {
        let session = params.session()?;
        self.sessions
            .get(&session.id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// A copy of the cached folder, or `None` on a miss.
    pub async fn get(
        &self,
        tree_id: &str,
        folder_id: &str,
        params: &StorageParameters,
    ) -> Option<Folder> {
        if !self.enabled {
            return None;
        }

        let key = CacheKey::global(params.context_id(), tree_id, folder_id);
        let found = match self.global.get(&key).await {
            Some(shared) => Some(Folder::clone(&shared)),
            None => self
                .existing_session_cache(params)
                .and_then(|cache| cache.get(tree_id, folder_id)),
        };

        match &found {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(tree_id, folder_id, "folder cache hit");
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(tree_id, folder_id, "folder cache miss");
            }
        }
        found
    }

    /// Stores a copy of a cacheable folder in the tier its `global` flag
    /// selects. Private folders are dropped when there is no session.
    pub async fn put(&self, folder: &Folder, params: &StorageParameters) {
        if !self.enabled || !folder.cacheable {
            return;
        }
        if folder.global {
            let key = CacheKey::global(params.context_id(), &folder.tree_id, &folder.id);
            self.global.put_in_group(key, folder.clone()).await;
            return;
        }
        match params.session() {
            Some(session) => self.session_cache(session).put(folder.clone()),
            None => debug!(
                tree_id = %folder.tree_id,
                folder_id = %folder.id,
                "no session, private folder not cached"
            ),
        }
    }

    async fn remove_from_tiers(
        &self,
        tree_id: &str,
        folder_id: &str,
        global: Option<bool>,
        params: &StorageParameters,
    ) {
        if global != Some(false) {
            let key = CacheKey::global(params.context_id(), tree_id, folder_id);
            self.global.remove_from_group(&key).await;
        }
        if global != Some(true) {
            if let Some(cache) = self.existing_session_cache(params) {
                cache.remove(tree_id, folder_id);
            }
        }
    }

    /// Removes the folder from whichever tier holds it. For a virtual tree the
    /// same ID under the real tree goes too.
    pub async fn remove_single(&self, tree_id: &str, folder_id: &str, params: &StorageParameters) {
        self.remove_from_tiers(tree_id, folder_id, None, params).await;
        if is_virtual_tree(tree_id) {
            self.remove_from_tiers(REAL_TREE_ID, folder_id, None, params)
                .await;
        }
    }

    /// Like [`remove_single`](Self::remove_single) but only touches the tier
    /// selected by `global`.
    pub async fn remove_tiered(
        &self,
        tree_id: &str,
        folder_id: &str,
        global: bool,
        params: &StorageParameters,
    ) {
        self.remove_from_tiers(tree_id, folder_id, Some(global), params)
            .await;
        if is_virtual_tree(tree_id) {
            self.remove_from_tiers(REAL_TREE_ID, folder_id, Some(global), params)
                .await;
        }
    }

    /// Removes every entry whose ID is path-nested below `folder_id`, i.e.
    /// starts with `{folder_id}/`. Covers the global tier of the context and
    /// the caller's session tier.
    pub async fn remove_nested(
        &self,
        tree_id: &str,
        folder_id: &str,
        params: &StorageParameters,
    ) -> usize {
        let prefix = format!("{folder_id}/");
        let mirror = is_virtual_tree(tree_id);
        let matches = |key: &CacheKey| {
            (key.tree_id == tree_id || (mirror && key.tree_id == REAL_TREE_ID))
                && key.folder_id.starts_with(&prefix)
        };

        let mut removed = self
            .global
            .remove_matching(params.context_id(), &matches)
            .await;
        if let Some(cache) = self.existing_session_cache(params) {
            removed += cache.remove_matching(&matches);
        }
        debug!(tree_id, folder_id, removed, "nested entries invalidated");
        removed
    }

    /// Removes the folder and every ancestor up to the root.
    ///
    /// If the path cannot be resolved only the folder itself is removed, and
    /// ancestors may stay stale until they are next invalidated or expire.
    pub async fn remove_cascade(
        &self,
        tree_id: &str,
        folder_id: &str,
        params: &StorageParameters,
        performer: &FolderPerformer,
    ) {
        match performer.path_to_root(tree_id, folder_id, params).await {
            Ok(path) => {
                debug!(tree_id, folder_id, depth = path.len(), "cascade invalidation");
                for id in &path {
                    self.remove_single(tree_id, id, params).await;
                }
            }
            Err(err) => {
                warn!(
                    tree_id,
                    folder_id,
                    error = %err,
                    "path resolution failed, invalidating single folder"
                );
                self.remove_single(tree_id, folder_id, params).await;
            }
        }
    }

    /// Clears the private tier of every live session of the user.
    pub fn drop_all_for_user(&self, user_id: UserId, context_id: ContextId) -> usize {
        let mut cleared = 0;
        for entry in self.sessions.iter() {
            if entry.belongs_to(user_id, context_id) {
                cleared += entry.clear();
            }
        }
        debug!(user_id, context_id, cleared, "dropped private folders of user");
        cleared
    }

    /// Drops the whole global tier of a context.
    pub async fn invalidate_context(&self, context_id: ContextId) -> usize {
        self.global.invalidate_group(context_id).await
    }

    /// Forgets a session's private tier.
    pub fn end_session(&self, session_id: &SessionId) -> bool {
        match self.sessions.remove(session_id) {
            Some((_, cache)) => {
                self.retire(&cache);
                true
            }
            None => false,
        }
    }

    fn retire(&self, cache: &SessionFolderCache) {
        self.retired_evictions
            .fetch_add(cache.evictions(), Ordering::Relaxed);
    }

    /// Drops expired entries of both tiers, then every session cache left
    /// empty. Returns the number of entries dropped.
    pub fn purge_expired(&self) -> usize {
        let global = self.global.cleanup_expired();
        let private: usize = self
            .sessions
            .iter()
            .map(|entry| entry.purge_expired())
            .sum();

        let before = self.sessions.len();
        self.sessions.retain(|_, cache| {
            if cache.is_empty() {
                self.retire(cache);
                false
            } else {
                true
            }
        });
        let dropped_sessions = before.saturating_sub(self.sessions.len());
        if dropped_sessions > 0 {
            debug!(dropped_sessions, "idle session folder caches dropped");
        }
        global + private
    }

    pub fn stats(&self) -> TieredCacheStats {
        let mut stats = TieredCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.global.evictions()
                + self.retired_evictions.load(Ordering::Relaxed),
            global_entries: self.global.len(),
            ..Default::default()
        };
        for entry in self.sessions.iter() {
            stats.sessions += 1;
            stats.session_entries += entry.len();
            stats.evictions += entry.evictions();
        }
        stats
    }
}
