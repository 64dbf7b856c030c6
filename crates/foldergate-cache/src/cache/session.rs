use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use foldergate_core::{ContextId, Folder, Session, SessionId, UserId};

use super::CachedEntry;
use super::key::CacheKey;

/// Private folder cache of one session.
///
/// Bounded: when full, expired entries are purged first and then the oldest
/// entry makes room.
pub struct SessionFolderCache {
    session_id: SessionId,
    context_id: ContextId,
    user_id: UserId,
    entries: DashMap<CacheKey, CachedEntry>,
    ttl: Duration,
    capacity: usize,
    evictions: AtomicU64,
}

impl SessionFolderCache {
    pub fn new(session: &Session, ttl: Duration, capacity: usize) -> Self {
        Self {
            session_id: session.id.clone(),
            context_id: session.context_id,
            user_id: session.user_id,
            entries: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn belongs_to(&self, user_id: UserId, context_id: ContextId) -> bool {
        self.user_id == user_id && self.context_id == context_id
    }

    fn key(&self, tree_id: &str, folder_id: &str) -> CacheKey {
        CacheKey::private(self.context_id, self.user_id, tree_id, folder_id)
    }

    /// A copy of the cached folder, if present and not expired.
    pub fn get(&self, tree_id: &str, folder_id: &str) -> Option<Folder> {
        let key = self.key(tree_id, folder_id);
        let expired = match self.entries.get(&key) {
            Some(entry) if !entry.is_expired() => return Some(Folder::clone(&entry.folder)),
            Some(_) => true,
            None => false,
        };
        if expired && self.entries.remove_if(&key, |_, e| e.is_expired()).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    pub fn put(&self, folder: Folder) {
        let key = self.key(&folder.tree_id, &folder.id);
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.make_room();
        }
        self.entries.insert(key, CachedEntry::new(folder, self.ttl));
    }

    fn make_room(&self) {
        if self.purge_expired() > 0 && self.entries.len() < self.capacity {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.cached_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            if self.entries.remove(&key).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn remove(&self, tree_id: &str, folder_id: &str) -> bool {
        self.entries
            .remove(&self.key(tree_id, folder_id))
            .is_some()
    }

    /// Drops every entry whose key matches and returns how many went.
    pub fn remove_matching(&self, matches: impl Fn(&CacheKey) -> bool) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            if matches(key) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn purge_expired(&self) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if entry.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}
