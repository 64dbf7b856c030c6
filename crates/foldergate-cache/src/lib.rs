//! # foldergate-cache
//!
//! Read-through, invalidating folder cache in front of pluggable folder
//! storage backends.
//!
//! - [`StorageRegistry`] resolves the backend owning a folder ID or a content
//!   type within a tree.
//! - [`TwoTierCache`] keeps folders shared by a whole context apart from
//!   per-session ones and hands out clones only.
//! - [`ParallelFetcher`] fans batch reads out to one task per backend.
//! - [`CacheFolderStorage`] ties them together behind the [`FolderStorage`]
//!   trait and applies the invalidation cascades after every mutation.
//!
//! ## Example
//!
//! ```ignore
//! let registry = Arc::new(StorageRegistry::new());
//! registry.register("0", native)?;
//! registry.register("0", mail)?;
//!
//! let config = config::loader::load_config(None)?;
//! let folders = CacheFolderStorage::new(registry, &config);
//! let calendar = folders.get_folder("0", "10", StorageType::Working, &params).await?;
//! ```

pub mod cache;
pub mod config;
pub mod fetch;
pub mod observability;
pub mod performer;
pub mod registry;
pub mod storage;

pub use cache::{CacheKey, FolderCacheService, LocalCacheService, SessionFolderCache, TwoTierCache};
pub use config::FolderCacheConfig;
pub use fetch::ParallelFetcher;
pub use foldergate_storage::FolderStorage;
pub use performer::FolderPerformer;
pub use registry::{ALL_TREES, RegistryError, StorageRegistry};
pub use storage::CacheFolderStorage;
