//! # foldergate-storage
//!
//! Storage abstraction layer for foldergate.
//!
//! The main trait is [`FolderStorage`], the contract every folder backend
//! (native, mail, virtual, ...) implements and that the caching
//! orchestrator itself exposes. Backends own their transaction boundaries:
//! [`FolderStorage::start_transaction`] reports whether a new transaction was
//! opened, and [`TransactionScope`] pairs that with commit or rollback on
//! every exit path.
//!
//! ## Example
//!
//! ```ignore
//! use foldergate_storage::{FolderStorage, StorageParameters, in_transaction};
//!
//! async fn load(storage: &dyn FolderStorage, params: &StorageParameters) -> StorageResult<Folder> {
//!     in_transaction(storage, params, false, || {
//!         storage.get_folder("0", "10", StorageType::Working, params)
//!     })
//!     .await
//! }
//! ```

mod error;
mod params;
mod traits;
mod transaction;

pub use error::{ErrorCategory, StorageError};
pub use params::StorageParameters;
pub use traits::{AnyFolderType, FolderStorage, FolderType, StoragePriority, same_storage};
pub use transaction::{TransactionScope, in_transaction};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared storage trait object.
pub type DynFolderStorage = std::sync::Arc<dyn FolderStorage>;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{ErrorCategory, StorageError};
    pub use crate::params::StorageParameters;
    pub use crate::traits::{FolderStorage, FolderType, StoragePriority};
    pub use crate::transaction::{TransactionScope, in_transaction};
    pub use crate::{DynFolderStorage, StorageResult};
    pub use foldergate_core::{ContentType, Folder, SortableId, StorageType};
}
