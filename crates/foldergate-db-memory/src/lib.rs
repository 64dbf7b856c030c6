//! In-memory folder storage backend for foldergate.
//!
//! This crate provides an in-memory implementation of the `FolderStorage`
//! trait from `foldergate-storage`, using papaya lock-free HashMap for
//! concurrent access. It serves as the reference backend for tests and for
//! deployments that keep a folder slice purely in memory.
//!
//! # Example
//!
//! ```ignore
//! use foldergate_db_memory::{IdPattern, InMemoryFolderStorage};
//!
//! let mail = InMemoryFolderStorage::builder("mail", "0")
//!     .id_pattern(IdPattern::path("mail/"))
//!     .attach_to("1")
//!     .content_type("mail")
//!     .build_shared();
//! registry.register("0", mail)?;
//! ```

pub mod factory;
pub mod storage;
pub mod transaction;

pub use factory::{IdPattern, MemoryStorageBuilder, MemoryStorageOptions, create_folder_storage};
pub use foldergate_storage::{FolderStorage, StorageError};
pub use storage::{InMemoryFolderStorage, StorageKey};
pub use transaction::{MemoryStorageStats, TrashEntry};
