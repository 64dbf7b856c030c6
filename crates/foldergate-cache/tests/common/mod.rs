#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use foldergate_cache::{CacheFolderStorage, FolderCacheConfig, StorageRegistry};
use foldergate_core::{ContentType, Folder, Session, SortableId, StorageType};
use foldergate_db_memory::{IdPattern, InMemoryFolderStorage};
use foldergate_storage::{
    DynFolderStorage, FolderStorage, FolderType, StorageError, StorageParameters, StoragePriority,
};
use time::OffsetDateTime;

/// Native folders of the real tree:
///
/// ```text
/// 0 root
/// └── 1 private
///     ├── 10 Calendar (calendar)
///     ├── 11 Contacts (contacts)
///     └── mail/INBOX (mail backend)
///         └── mail/INBOX/Receipts
/// ```
pub fn native_storage(lists_subfolders: bool) -> Arc<InMemoryFolderStorage> {
    InMemoryFolderStorage::builder("native", "0")
        .content_type("calendar")
        .content_type("contacts")
        .lists_subfolders(lists_subfolders)
        .with_folder(Folder::new("0", "0", "root"))
        .with_folder(Folder::new("0", "1", "private").with_parent("0"))
        .with_folder(
            Folder::new("0", "10", "Calendar")
                .with_parent("1")
                .with_content_type("calendar"),
        )
        .with_folder(
            Folder::new("0", "11", "Contacts")
                .with_parent("1")
                .with_content_type("contacts"),
        )
        .build_shared()
}

/// Per-user mail folders hanging below native folder 1.
pub fn mail_storage(lists_subfolders: bool) -> Arc<InMemoryFolderStorage> {
    InMemoryFolderStorage::builder("mail", "0")
        .id_pattern(IdPattern::path("mail/"))
        .attach_to("1")
        .content_type("mail")
        .lists_subfolders(lists_subfolders)
        .private()
        .with_folder(
            Folder::new("0", "mail/INBOX", "INBOX")
                .with_parent("1")
                .with_content_type("mail"),
        )
        .with_folder(
            Folder::new("0", "mail/INBOX/Receipts", "Receipts")
                .with_parent("mail/INBOX")
                .with_content_type("mail"),
        )
        .build_shared()
}

/// A virtual tree "1" mirroring native folders 1 and 10.
pub fn shared_view_storage() -> Arc<InMemoryFolderStorage> {
    InMemoryFolderStorage::builder("shared-view", "1")
        .with_folder(Folder::new("1", "0", "root"))
        .with_folder(Folder::new("1", "1", "private").with_parent("0"))
        .with_folder(Folder::new("1", "10", "Calendar").with_parent("1"))
        .build_shared()
}

pub struct Fixture {
    pub native: Arc<InMemoryFolderStorage>,
    pub mail: Arc<InMemoryFolderStorage>,
    pub view: Arc<InMemoryFolderStorage>,
    pub registry: Arc<StorageRegistry>,
    pub folders: CacheFolderStorage,
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(true, FolderCacheConfig::default())
    }

    pub fn build(lists_subfolders: bool, config: FolderCacheConfig) -> Self {
        Self::build_with(lists_subfolders, config, |mail| mail as DynFolderStorage)
    }

    /// Lets a test put a wrapper such as [`FailingStorage`] in front of the
    /// mail backend.
    pub fn build_with(
        lists_subfolders: bool,
        config: FolderCacheConfig,
        wrap_mail: impl FnOnce(Arc<InMemoryFolderStorage>) -> DynFolderStorage,
    ) -> Self {
        let native = native_storage(lists_subfolders);
        let mail = mail_storage(lists_subfolders);
        let view = shared_view_storage();
        let registry = Arc::new(StorageRegistry::new());
        registry.register("0", native.clone()).unwrap();
        registry.register("0", wrap_mail(mail.clone())).unwrap();
        registry.register("1", view.clone()).unwrap();
        let folders = CacheFolderStorage::new(Arc::clone(&registry), &config);
        Self {
            native,
            mail,
            view,
            registry,
            folders,
        }
    }

    pub fn reset_stats(&self) {
        self.native.reset_stats();
        self.mail.reset_stats();
        self.view.reset_stats();
    }
}

pub fn session_params(context_id: i32, user_id: i32) -> StorageParameters {
    StorageParameters::for_session(Arc::new(Session::new(context_id, user_id)))
}

pub fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Wraps an in-memory backend and injects failures and latency.
pub struct FailingStorage {
    inner: Arc<InMemoryFolderStorage>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub fail_consistency: AtomicBool,
    pub panic_on_read: AtomicBool,
    read_delay: Duration,
}

impl FailingStorage {
    pub fn new(inner: Arc<InMemoryFolderStorage>) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_consistency: AtomicBool::new(false),
            panic_on_read: AtomicBool::new(false),
            read_delay: Duration::ZERO,
        }
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn failing_reads(self) -> Self {
        self.fail_reads.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_writes(self) -> Self {
        self.fail_writes.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_consistency(self) -> Self {
        self.fail_consistency.store(true, Ordering::SeqCst);
        self
    }

    /// Batch reads panic after the inner backend has opened its transaction.
    pub fn panicking_reads(self) -> Self {
        self.panic_on_read.store(true, Ordering::SeqCst);
        self
    }

    pub fn shared(self) -> DynFolderStorage {
        Arc::new(self)
    }

    async fn before_read(&self) -> Result<(), StorageError> {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::backend(self.inner.backend_name(), "injected read failure"));
        }
        Ok(())
    }

    fn before_write(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::backend(self.inner.backend_name(), "injected write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl FolderStorage for FailingStorage {
    fn folder_type(&self) -> &dyn FolderType {
        self.inner.folder_type()
    }

    fn priority(&self) -> StoragePriority {
        self.inner.priority()
    }

    fn supported_content_types(&self) -> Vec<ContentType> {
        self.inner.supported_content_types()
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    async fn start_transaction(
        &self,
        params: &StorageParameters,
        modify: bool,
    ) -> Result<bool, StorageError> {
        self.inner.start_transaction(params, modify).await
    }

    async fn commit_transaction(&self, params: &StorageParameters) -> Result<(), StorageError> {
        self.inner.commit_transaction(params).await
    }

    async fn rollback(&self, params: &StorageParameters) {
        self.inner.rollback(params).await
    }

    async fn get_folder(
        &self,
        tree_id: &str,
        folder_id: &str,
        storage_type: StorageType,
        params: &StorageParameters,
    ) -> Result<Folder, StorageError> {
        self.before_read().await?;
        self.inner
            .get_folder(tree_id, folder_id, storage_type, params)
            .await
    }

    async fn get_folders(
        &self,
        tree_id: &str,
        folder_ids: &[String],
        storage_type: StorageType,
        params: &StorageParameters,
    ) -> Result<Vec<Folder>, StorageError> {
        self.before_read().await?;
        if self.panic_on_read.load(Ordering::SeqCst) {
            panic!("{} blew up mid-batch", self.inner.backend_name());
        }
        self.inner
            .get_folders(tree_id, folder_ids, storage_type, params)
            .await
    }

    async fn get_subfolders(
        &self,
        tree_id: &str,
        parent_id: &str,
        params: &StorageParameters,
    ) -> Result<Vec<SortableId>, StorageError> {
        self.before_read().await?;
        self.inner.get_subfolders(tree_id, parent_id, params).await
    }

    async fn create_folder(
        &self,
        folder: &Folder,
        params: &StorageParameters,
    ) -> Result<String, StorageError> {
        // Write first so a rollback has something to undo
        let id = self.inner.create_folder(folder, params).await?;
        self.before_write()?;
        Ok(id)
    }

    async fn update_folder(
        &self,
        folder: &Folder,
        params: &StorageParameters,
    ) -> Result<String, StorageError> {
        let id = self.inner.update_folder(folder, params).await?;
        self.before_write()?;
        Ok(id)
    }

    async fn delete_folder(
        &self,
        tree_id: &str,
        folder_id: &str,
        params: &StorageParameters,
    ) -> Result<(), StorageError> {
        self.inner.delete_folder(tree_id, folder_id, params).await?;
        self.before_write()
    }

    async fn clear_folder(
        &self,
        tree_id: &str,
        folder_id: &str,
        params: &StorageParameters,
    ) -> Result<(), StorageError> {
        self.before_write()?;
        self.inner.clear_folder(tree_id, folder_id, params).await
    }

    async fn modified_folder_ids(
        &self,
        tree_id: &str,
        since: OffsetDateTime,
        params: &StorageParameters,
    ) -> Result<Vec<String>, StorageError> {
        self.before_read().await?;
        self.inner.modified_folder_ids(tree_id, since, params).await
    }

    async fn check_consistency(
        &self,
        tree_id: &str,
        params: &StorageParameters,
    ) -> Result<(), StorageError> {
        self.before_write()?;
        if self.fail_consistency.load(Ordering::SeqCst) {
            return Err(StorageError::backend(
                self.inner.backend_name(),
                "injected consistency failure",
            ));
        }
        self.inner.check_consistency(tree_id, params).await
    }
}
