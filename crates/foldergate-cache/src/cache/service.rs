//! Global-tier cache service.
//!
//! The trait abstracts the store behind the global tier so a shared,
//! networked cache can replace the local one without touching the
//! orchestrator. Keys are grouped by context ID; a group is the unit of bulk
//! invalidation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use foldergate_core::{ContextId, Folder};
use tracing::debug;

use super::CachedEntry;
use super::key::CacheKey;

/// Key/value store with group-based bulk invalidation.
#[async_trait]
pub trait FolderCacheService: Send + Sync {
    /// Returns `None` if the entry doesn't exist or has expired.
    async fn get(&self, key: &CacheKey) -> Option<Arc<Folder>>;

    /// Stores `folder` under `key` in the key's group, replacing any previous
    /// entry.
    async fn put_in_group(&self, key: CacheKey, folder: Folder);

    /// Returns whether an entry was removed.
    async fn remove_from_group(&self, key: &CacheKey) -> bool;

    /// Drops every entry of the group and returns how many there were.
    async fn invalidate_group(&self, group: ContextId) -> usize;

    /// Drops the entries of the group whose key matches.
    async fn remove_matching(
        &self,
        group: ContextId,
        matches: &(dyn for<'k> Fn(&'k CacheKey) -> bool + Sync),
    ) -> usize;

    /// Number of entries currently held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries dropped because they expired.
    fn evictions(&self) -> u64 {
        0
    }

    /// Clean up expired entries.
    ///
    /// Default implementation is a no-op (for stores with native TTL).
    fn cleanup_expired(&self) -> usize {
        0
    }
}

/// Local in-memory cache service: one DashMap per context group.
pub struct LocalCacheService {
    groups: DashMap<ContextId, DashMap<CacheKey, CachedEntry>>,
    ttl: Duration,
    evictions: AtomicU64,
}

impl LocalCacheService {
    pub fn new(ttl: Duration) -> Self {
        Self {
            groups: DashMap::new(),
            ttl,
            evictions: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[async_trait]
impl FolderCacheService for LocalCacheService {
    async fn get(&self, key: &CacheKey) -> Option<Arc<Folder>> {
        let group = self.groups.get(&key.group())?;
        let expired = match group.get(key) {
            Some(entry) if !entry.is_expired() => return Some(Arc::clone(&entry.folder)),
            Some(_) => true,
            None => false,
        };
        if expired && group.remove_if(key, |_, e| e.is_expired()).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    async fn put_in_group(&self, key: CacheKey, folder: Folder) {
        let entry = CachedEntry::new(folder, self.ttl);
        self.groups
            .entry(key.group())
            .or_default()
            .insert(key, entry);
    }

    async fn remove_from_group(&self, key: &CacheKey) -> bool {
        self.groups
            .get(&key.group())
            .is_some_and(|group| group.remove(key).is_some())
    }

    async fn invalidate_group(&self, group: ContextId) -> usize {
        let removed = self
            .groups
            .remove(&group)
            .map(|(_, entries)| entries.len())
            .unwrap_or(0);
        debug!(context_id = group, removed, "cache group invalidated");
        removed
    }

    async fn remove_matching(
        &self,
        group: ContextId,
        matches: &(dyn for<'k> Fn(&'k CacheKey) -> bool + Sync),
    ) -> usize {
        let Some(entries) = self.groups.get(&group) else {
            return 0;
        };
        let mut removed = 0;
        entries.retain(|key, _| {
            if matches(key) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    fn len(&self) -> usize {
        self.groups.iter().map(|group| group.len()).sum()
    }

    fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        for group in self.groups.iter() {
            group.retain(|_, entry| {
                if entry.is_expired() {
                    removed += 1;
                    false
                } else {
                    true
                }
            });
        }
        self.groups.retain(|_, group| !group.is_empty());

        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: &str) -> Folder {
        Folder::new("0", id, format!("folder {id}")).with_parent("1")
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let cache = LocalCacheService::new(Duration::from_secs(60));
        let key = CacheKey::global(1, "0", "10");

        assert!(cache.get(&key).await.is_none());
        cache.put_in_group(key.clone(), folder("10")).await;
        assert_eq!(cache.get(&key).await.unwrap().id, "10");
        assert_eq!(cache.len(), 1);

        assert!(cache.remove_from_group(&key).await);
        assert!(!cache.remove_from_group(&key).await);
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_group_only_touches_that_context() {
        let cache = LocalCacheService::new(Duration::from_secs(60));
        cache.put_in_group(CacheKey::global(1, "0", "10"), folder("10")).await;
        cache.put_in_group(CacheKey::global(1, "0", "11"), folder("11")).await;
        cache.put_in_group(CacheKey::global(2, "0", "10"), folder("10")).await;

        assert_eq!(cache.invalidate_group(1).await, 2);
        assert!(cache.get(&CacheKey::global(1, "0", "10")).await.is_none());
        assert!(cache.get(&CacheKey::global(2, "0", "10")).await.is_some());
    }

    #[tokio::test]
    async fn test_remove_matching_stays_within_group() {
        let cache = LocalCacheService::new(Duration::from_secs(60));
        cache.put_in_group(CacheKey::global(1, "0", "mail/INBOX"), folder("a")).await;
        cache.put_in_group(CacheKey::global(1, "0", "mail/INBOX/Receipts"), folder("b")).await;
        cache.put_in_group(CacheKey::global(2, "0", "mail/INBOX/Receipts"), folder("c")).await;

        let below_inbox = |key: &CacheKey| key.folder_id.starts_with("mail/INBOX/");
        assert_eq!(cache.remove_matching(1, &below_inbox).await, 1);
        assert_eq!(cache.remove_matching(3, &below_inbox).await, 0);
        assert!(cache.get(&CacheKey::global(1, "0", "mail/INBOX")).await.is_some());
        assert!(cache.get(&CacheKey::global(2, "0", "mail/INBOX/Receipts")).await.is_some());
    }

    #[tokio::test]
    async fn test_expired_entries_are_not_returned() {
        let cache = LocalCacheService::new(Duration::from_millis(10));
        let key = CacheKey::global(1, "0", "10");
        cache.put_in_group(key.clone(), folder("10")).await;
        cache.put_in_group(CacheKey::global(1, "0", "11"), folder("11")).await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.evictions(), 2);
        assert!(cache.is_empty());
    }
}
