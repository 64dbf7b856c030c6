//! Two-tier folder cache.
//!
//! ## Architecture
//!
//! - **Global tier**: a [`FolderCacheService`] keyed by (context, tree,
//!   folder), shared by every session of a context. The context ID is the
//!   cache group, so a whole context can be dropped in one call.
//! - **Session tier**: one bounded, TTL-evicting [`SessionFolderCache`] per
//!   session for folders whose representation differs between users.
//!
//! ## Lookup
//!
//! ```text
//! get → global tier → session tier → miss (caller loads from the backend)
//! ```
//!
//! Hits are handed out as clones; the cached instance never leaves the cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use foldergate_core::Folder;

pub mod key;
pub mod service;
pub mod session;
pub mod tiered;

pub use key::CacheKey;
pub use service::{FolderCacheService, LocalCacheService};
pub use session::SessionFolderCache;
pub use tiered::{TieredCacheStats, TwoTierCache};

/// Cached folder with expiration.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub folder: Arc<Folder>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(folder: Folder, ttl: Duration) -> Self {
        Self {
            folder: Arc::new(folder),
            cached_at: Instant::now(),
            ttl,
        }
    }

    /// Check if this entry has expired.
    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}
