//! Transaction scoping around backend calls.

use std::future::Future;

use tracing::{debug, warn};

use crate::error::StorageError;
use crate::params::StorageParameters;
use crate::traits::FolderStorage;

/// A backend transaction opened on a set of parameters.
///
/// If the backend reported that it did not start a new transaction (one was
/// already open on `params`), commit and rollback are no-ops and the outer
/// owner stays responsible.
pub struct TransactionScope<'a> {
    storage: &'a dyn FolderStorage,
    params: &'a StorageParameters,
    started: bool,
    finished: bool,
}

impl<'a> TransactionScope<'a> {
    pub async fn begin(
        storage: &'a dyn FolderStorage,
        params: &'a StorageParameters,
        modify: bool,
    ) -> Result<TransactionScope<'a>, StorageError> {
        let started = storage.start_transaction(params, modify).await?;
        if started {
            debug!(backend = storage.backend_name(), modify, "transaction started");
        }
        Ok(Self {
            storage,
            params,
            started,
            finished: false,
        })
    }

    /// Whether this scope opened the transaction.
    pub fn started(&self) -> bool {
        self.started
    }

    /// Commits. A failed commit is rolled back before the error is returned.
    pub async fn commit(mut self) -> Result<(), StorageError> {
        self.finished = true;
        if !self.started {
            return Ok(());
        }
        if let Err(err) = self.storage.commit_transaction(self.params).await {
            warn!(
                backend = self.storage.backend_name(),
                error = %err,
                "commit failed, rolling back"
            );
            self.storage.rollback(self.params).await;
            return Err(err);
        }
        Ok(())
    }

    pub async fn rollback(mut self) {
        self.finished = true;
        if self.started {
            debug!(backend = self.storage.backend_name(), "transaction rolled back");
            self.storage.rollback(self.params).await;
        }
    }

    /// Commits on `Ok`, rolls back on `Err`, and passes the result through.
    pub async fn finish<T>(self, result: Result<T, StorageError>) -> Result<T, StorageError> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                self.rollback().await;
                Err(err)
            }
        }
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.started && !self.finished {
            warn!(
                backend = self.storage.backend_name(),
                "transaction scope dropped without commit or rollback"
            );
        }
    }
}

/// Runs `op` inside a transaction of `storage`.
pub async fn in_transaction<T, F, Fut>(
    storage: &dyn FolderStorage,
    params: &StorageParameters,
    modify: bool,
    op: F,
) -> Result<T, StorageError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let scope = TransactionScope::begin(storage, params, modify).await?;
    let result = op().await;
    scope.finish(result).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use foldergate_core::{ContentType, Folder, SortableId, StorageType};

    use super::*;
    use crate::traits::{AnyFolderType, FolderType};

    #[derive(Default)]
    struct CountingStorage {
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
        fail_commit: bool,
    }

    const KEY: &str = "counting.tx";

    #[async_trait]
    impl FolderStorage for CountingStorage {
        fn folder_type(&self) -> &dyn FolderType {
            &AnyFolderType
        }

        fn supported_content_types(&self) -> Vec<ContentType> {
            Vec::new()
        }

        fn backend_name(&self) -> &'static str {
            "counting"
        }

        async fn start_transaction(
            &self,
            params: &StorageParameters,
            _modify: bool,
        ) -> Result<bool, StorageError> {
            Ok(params.put_state_if_absent(KEY, ()))
        }

        async fn commit_transaction(&self, params: &StorageParameters) -> Result<(), StorageError> {
            if self.fail_commit {
                return Err(StorageError::transaction("disk full"));
            }
            params.take_state::<()>(KEY);
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback(&self, params: &StorageParameters) {
            params.take_state::<()>(KEY);
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
        }

        async fn get_folder(
            &self,
            tree_id: &str,
            folder_id: &str,
            _storage_type: StorageType,
            _params: &StorageParameters,
        ) -> Result<Folder, StorageError> {
            Err(StorageError::folder_not_found(tree_id, folder_id))
        }

        async fn get_subfolders(
            &self,
            _tree_id: &str,
            _parent_id: &str,
            _params: &StorageParameters,
        ) -> Result<Vec<SortableId>, StorageError> {
            Ok(Vec::new())
        }

        async fn create_folder(
            &self,
            folder: &Folder,
            _params: &StorageParameters,
        ) -> Result<String, StorageError> {
            Ok(folder.id.clone())
        }

        async fn update_folder(
            &self,
            folder: &Folder,
            _params: &StorageParameters,
        ) -> Result<String, StorageError> {
            Ok(folder.id.clone())
        }

        async fn delete_folder(
            &self,
            _tree_id: &str,
            _folder_id: &str,
            _params: &StorageParameters,
        ) -> Result<(), StorageError> {
            Ok(())
        }

        async fn clear_folder(
            &self,
            _tree_id: &str,
            _folder_id: &str,
            _params: &StorageParameters,
        ) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_commit_on_success() {
        let storage = CountingStorage::default();
        let params = StorageParameters::new(1, 1);

        let value = in_transaction(&storage, &params, true, || async { Ok(5) })
            .await
            .unwrap();

        assert_eq!(value, 5);
        assert_eq!(storage.commits.load(Ordering::SeqCst), 1);
        assert_eq!(storage.rollbacks.load(Ordering::SeqCst), 0);
        assert!(!params.has_state(KEY));
    }

    #[tokio::test]
    async fn test_rollback_on_error() {
        let storage = CountingStorage::default();
        let params = StorageParameters::new(1, 1);

        let result: Result<(), _> = in_transaction(&storage, &params, true, || async {
            Err(StorageError::backend("counting", "boom"))
        })
        .await;

        assert!(matches!(result, Err(StorageError::Backend { .. })));
        assert_eq!(storage.commits.load(Ordering::SeqCst), 0);
        assert_eq!(storage.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nested_scope_leaves_outer_transaction_open() {
        let storage = CountingStorage::default();
        let params = StorageParameters::new(1, 1);

        let outer = TransactionScope::begin(&storage, &params, false).await.unwrap();
        assert!(outer.started());

        let inner = TransactionScope::begin(&storage, &params, false).await.unwrap();
        assert!(!inner.started());
        inner.commit().await.unwrap();
        assert_eq!(storage.commits.load(Ordering::SeqCst), 0);

        outer.commit().await.unwrap();
        assert_eq!(storage.commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back() {
        let storage = CountingStorage {
            fail_commit: true,
            ..Default::default()
        };
        let params = StorageParameters::new(1, 1);

        let err = in_transaction(&storage, &params, true, || async { Ok(()) })
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Transaction { .. }));
        assert_eq!(storage.rollbacks.load(Ordering::SeqCst), 1);
    }
}
