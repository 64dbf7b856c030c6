use std::sync::Arc;

use foldergate_core::{ContentType, Folder};
use foldergate_storage::{DynFolderStorage, FolderType, StoragePriority};

use crate::InMemoryFolderStorage;

/// How a backend recognises and assigns folder IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdPattern {
    /// Decimal IDs, assigned from a counter.
    Numeric,
    /// Path-encoded IDs below `root`, e.g. `mail/INBOX/Sent`. A child's ID is
    /// its parent's ID plus `/name`, so renames and moves change the ID of
    /// the folder and of everything below it.
    Path { root: String },
    /// Any ID; new IDs come from a counter.
    Any,
}

impl IdPattern {
    pub fn path(root: impl Into<String>) -> Self {
        Self::Path { root: root.into() }
    }

    pub(crate) fn matches(&self, folder_id: &str) -> bool {
        match self {
            Self::Numeric => !folder_id.is_empty() && folder_id.bytes().all(|b| b.is_ascii_digit()),
            Self::Path { root } => folder_id.starts_with(root.as_str()) && folder_id.len() > root.len(),
            Self::Any => true,
        }
    }
}

/// Storage-specific configuration options.
#[derive(Debug, Clone)]
pub struct MemoryStorageOptions {
    pub name: &'static str,
    pub tree_id: String,
    pub id_pattern: IdPattern,
    /// Foreign folders this backend hangs its top-level folders under.
    pub attach_parents: Vec<String>,
    pub content_types: Vec<ContentType>,
    pub priority: StoragePriority,
    /// Fill `subfolder_ids` on every load.
    pub lists_subfolders: bool,
    /// Whether folders are marked `global` on load.
    pub global: bool,
}

impl MemoryStorageOptions {
    pub fn new(name: &'static str, tree_id: impl Into<String>) -> Self {
        Self {
            name,
            tree_id: tree_id.into(),
            id_pattern: IdPattern::Numeric,
            attach_parents: Vec::new(),
            content_types: Vec::new(),
            priority: StoragePriority::Normal,
            lists_subfolders: true,
            global: true,
        }
    }
}

/// Builder for [`InMemoryFolderStorage`].
///
/// ```ignore
/// let mail = InMemoryFolderStorage::builder("mail", "0")
///     .id_pattern(IdPattern::path("mail/"))
///     .attach_to("1")
///     .content_type("mail")
///     .build();
/// ```
#[derive(Debug)]
pub struct MemoryStorageBuilder {
    options: MemoryStorageOptions,
    seed: Vec<Folder>,
}

impl MemoryStorageBuilder {
    pub(crate) fn new(name: &'static str, tree_id: impl Into<String>) -> Self {
        Self {
            options: MemoryStorageOptions::new(name, tree_id),
            seed: Vec::new(),
        }
    }

    pub fn id_pattern(mut self, pattern: IdPattern) -> Self {
        self.options.id_pattern = pattern;
        self
    }

    pub fn attach_to(mut self, parent_id: impl Into<String>) -> Self {
        self.options.attach_parents.push(parent_id.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<ContentType>) -> Self {
        self.options.content_types.push(content_type.into());
        self
    }

    pub fn priority(mut self, priority: StoragePriority) -> Self {
        self.options.priority = priority;
        self
    }

    pub fn lists_subfolders(mut self, enabled: bool) -> Self {
        self.options.lists_subfolders = enabled;
        self
    }

    /// Folders of this backend are per-user and go to the session tier.
    pub fn private(mut self) -> Self {
        self.options.global = false;
        self
    }

    pub fn with_folder(mut self, folder: Folder) -> Self {
        self.seed.push(folder);
        self
    }

    pub fn build(self) -> InMemoryFolderStorage {
        let storage = InMemoryFolderStorage::with_options(self.options);
        for folder in self.seed {
            storage.seed(folder);
        }
        storage
    }

    pub fn build_shared(self) -> Arc<InMemoryFolderStorage> {
        Arc::new(self.build())
    }
}

/// Routing predicate derived from the options.
#[derive(Debug, Clone)]
pub(crate) struct MemoryFolderType {
    tree_id: String,
    pattern: IdPattern,
    attach_parents: Vec<String>,
}

impl MemoryFolderType {
    pub(crate) fn from_options(options: &MemoryStorageOptions) -> Self {
        Self {
            tree_id: options.tree_id.clone(),
            pattern: options.id_pattern.clone(),
            attach_parents: options.attach_parents.clone(),
        }
    }

    pub(crate) fn is_attach_parent(&self, folder_id: &str) -> bool {
        self.attach_parents.iter().any(|p| p == folder_id)
    }
}

impl FolderType for MemoryFolderType {
    fn serves_tree_id(&self, tree_id: &str) -> bool {
        self.tree_id == tree_id
    }

    fn serves_folder_id(&self, folder_id: &str) -> bool {
        self.pattern.matches(folder_id)
    }

    fn serves_parent_id(&self, parent_id: &str) -> bool {
        self.pattern.matches(parent_id) || self.is_attach_parent(parent_id)
    }
}

/// Creates a shareable in-memory folder storage.
pub fn create_folder_storage(options: MemoryStorageOptions) -> DynFolderStorage {
    Arc::new(InMemoryFolderStorage::with_options(options))
}
