//! Storage error types for the folder storage abstraction layer.
//!
//! Every failure surfaced by a backend, the registry or the caching
//! orchestrator is a [`StorageError`]; callers inspect [`StorageError::category`]
//! rather than matching on backend-specific details.

use std::fmt;

/// Errors that can occur during folder storage operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// No registered backend serves the folder ID in the given tree.
    #[error("No folder storage for folder {folder_id} in tree {tree_id}")]
    NoStorageForId {
        /// The tree that was searched.
        tree_id: String,
        /// The folder ID no backend claimed.
        folder_id: String,
    },

    /// No registered backend handles the content type in the given tree.
    #[error("No folder storage for content type {content_type} in tree {tree_id}")]
    NoStorageForContentType {
        /// The tree that was searched.
        tree_id: String,
        /// The content type no backend claimed.
        content_type: String,
    },

    /// The requested folder does not exist.
    #[error("Folder not found: {tree_id}/{folder_id}")]
    FolderNotFound {
        /// The tree of the missing folder.
        tree_id: String,
        /// The ID of the missing folder.
        folder_id: String,
    },

    /// Attempted to create a folder that already exists.
    #[error("Folder already exists: {tree_id}/{folder_id}")]
    AlreadyExists {
        /// The tree of the existing folder.
        tree_id: String,
        /// The ID of the existing folder.
        folder_id: String,
    },

    /// The folder data is invalid.
    #[error("Invalid folder: {message}")]
    InvalidFolder {
        /// Description of why the folder is invalid.
        message: String,
    },

    /// Starting, committing or rolling back a backend transaction failed.
    #[error("Transaction error: {message}")]
    Transaction {
        /// Description of the transaction error.
        message: String,
    },

    /// A backend operation failed.
    #[error("Backend {backend} failed: {message}")]
    Backend {
        /// Name of the failing backend.
        backend: String,
        /// Description of the failure.
        message: String,
    },

    /// Any other failure, e.g. a fan-out task that panicked or was aborted.
    #[error("Unexpected error: {message}")]
    Unexpected {
        /// Description of the failure.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `NoStorageForId` error.
    #[must_use]
    pub fn no_storage_for_id(tree_id: impl Into<String>, folder_id: impl Into<String>) -> Self {
        Self::NoStorageForId {
            tree_id: tree_id.into(),
            folder_id: folder_id.into(),
        }
    }

    /// Creates a new `NoStorageForContentType` error.
    #[must_use]
    pub fn no_storage_for_content_type(
        tree_id: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self::NoStorageForContentType {
            tree_id: tree_id.into(),
            content_type: content_type.into(),
        }
    }

    /// Creates a new `FolderNotFound` error.
    #[must_use]
    pub fn folder_not_found(tree_id: impl Into<String>, folder_id: impl Into<String>) -> Self {
        Self::FolderNotFound {
            tree_id: tree_id.into(),
            folder_id: folder_id.into(),
        }
    }

    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(tree_id: impl Into<String>, folder_id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            tree_id: tree_id.into(),
            folder_id: folder_id.into(),
        }
    }

    /// Creates a new `InvalidFolder` error.
    #[must_use]
    pub fn invalid_folder(message: impl Into<String>) -> Self {
        Self::InvalidFolder {
            message: message.into(),
        }
    }

    /// Creates a new `Transaction` error.
    #[must_use]
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Creates a new `Backend` error.
    #[must_use]
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Unexpected` error.
    #[must_use]
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a folder not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FolderNotFound { .. })
    }

    /// Returns `true` if no backend could be resolved for the request.
    #[must_use]
    pub fn is_no_storage(&self) -> bool {
        matches!(
            self,
            Self::NoStorageForId { .. } | Self::NoStorageForContentType { .. }
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoStorageForId { .. } => ErrorCategory::Configuration,
            Self::NoStorageForContentType { .. } => ErrorCategory::Configuration,
            Self::FolderNotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyExists { .. } => ErrorCategory::Conflict,
            Self::InvalidFolder { .. } => ErrorCategory::Validation,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Backend { .. } => ErrorCategory::Backend,
            Self::Unexpected { .. } => ErrorCategory::Unexpected,
        }
    }
}

impl From<foldergate_core::IdError> for StorageError {
    fn from(err: foldergate_core::IdError) -> Self {
        Self::invalid_folder(err.to_string())
    }
}

/// Categories of storage errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Registry could not resolve a backend (deployment/configuration issue).
    Configuration,
    /// Folder not found.
    NotFound,
    /// Conflict (folder already exists).
    Conflict,
    /// Validation error.
    Validation,
    /// Transaction-related error.
    Transaction,
    /// A backend operation failed.
    Backend,
    /// Anything else.
    Unexpected,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Validation => write!(f, "validation"),
            Self::Transaction => write!(f, "transaction"),
            Self::Backend => write!(f, "backend"),
            Self::Unexpected => write!(f, "unexpected"),
        }
    }
}
