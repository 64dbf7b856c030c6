//! Parallel fetch executor.
//!
//! Batch reads are grouped by owning backend and fanned out with one task per
//! backend. Every task works on forked [`StorageParameters`], so each backend
//! gets a transaction of its own. The executor waits for every task before
//! deciding: one failure fails the whole batch and no result is kept.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use foldergate_core::{Folder, StorageType};
use foldergate_storage::{
    DynFolderStorage, StorageError, StorageParameters, in_transaction, same_storage,
};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::TwoTierCache;
use crate::registry::StorageRegistry;

pub struct ParallelFetcher {
    registry: Arc<StorageRegistry>,
    cache: Arc<TwoTierCache>,
    parallel: bool,
}

impl ParallelFetcher {
    pub fn new(registry: Arc<StorageRegistry>, cache: Arc<TwoTierCache>, parallel: bool) -> Self {
        Self {
            registry,
            cache,
            parallel,
        }
    }

    /// Groups `folder_ids` by owning backend, preserving first-seen order.
    fn partition(
        &self,
        tree_id: &str,
        folder_ids: &[String],
    ) -> Result<Vec<(DynFolderStorage, Vec<String>)>, StorageError> {
        let mut groups: Vec<(DynFolderStorage, Vec<String>)> = Vec::new();
        for folder_id in folder_ids {
            let storage = self.registry.resolve(tree_id, folder_id)?;
            match groups.iter_mut().find(|(s, _)| same_storage(s, &storage)) {
                Some((_, ids)) => {
                    if !ids.contains(folder_id) {
                        ids.push(folder_id.clone());
                    }
                }
                None => groups.push((storage, vec![folder_id.clone()])),
            }
        }
        Ok(groups)
    }

    /// Loads `folder_ids` from their backends and caches what is cacheable.
    ///
    /// Returns one copy per input ID in input order; IDs a backend does not
    /// know are left out.
    pub async fn fetch(
        &self,
        tree_id: &str,
        folder_ids: &[String],
        storage_type: StorageType,
        params: &StorageParameters,
    ) -> Result<Vec<Folder>, StorageError> {
        if folder_ids.is_empty() {
            return Ok(Vec::new());
        }
        let groups = self.partition(tree_id, folder_ids)?;
        debug!(tree_id, ids = folder_ids.len(), backends = groups.len(), "batch fetch");

        let tree = tree_id.to_string();
        let loaded = self
            .fan_out(groups, params, move |storage, ids, params| {
                let tree = tree.clone();
                async move {
                    in_transaction(storage.as_ref(), &params, false, || {
                        storage.get_folders(&tree, &ids, storage_type, &params)
                    })
                    .await
                }
            })
            .await?;

        let by_id: HashMap<String, Folder> =
            loaded.into_iter().map(|f| (f.id.clone(), f)).collect();
        for folder in by_id.values() {
            self.cache.put(folder, params).await;
        }
        Ok(folder_ids
            .iter()
            .filter_map(|id| by_id.get(id).cloned())
            .collect())
    }

    /// Runs `op` once per work item and concatenates the results.
    ///
    /// A single item (or a disabled fan-out) runs on the caller's task with
    /// the caller's parameters. Otherwise every item gets its own task and
    /// forked parameters. All tasks are awaited; the first failure observed
    /// is returned and every result is discarded.
    ///
    /// A task that panics counts as failed. Whatever it left open on its
    /// forked parameters is rolled back on the backend it ran against.
    pub async fn fan_out<A, T, F, Fut>(
        &self,
        work: Vec<(DynFolderStorage, A)>,
        params: &StorageParameters,
        op: F,
    ) -> Result<Vec<T>, StorageError>
    where
        A: Send + 'static,
        T: Send + 'static,
        F: Fn(DynFolderStorage, A, StorageParameters) -> Fut,
        Fut: Future<Output = Result<Vec<T>, StorageError>> + Send + 'static,
    {
        if work.len() <= 1 || !self.parallel {
            let mut results = Vec::new();
            for (storage, arg) in work {
                results.extend(op(storage, arg, params.clone()).await?);
            }
            return Ok(results);
        }

        let mut join_set = JoinSet::new();
        for (storage, arg) in work {
            let backend = storage.backend_name();
            let forked = params.fork();
            let task = op(Arc::clone(&storage), arg, forked.clone());
            join_set.spawn(async move {
                // The inner task isolates a panic so its transaction can be undone.
                let outcome = match tokio::spawn(task).await {
                    Ok(outcome) => outcome,
                    Err(join_err) => {
                        if forked.has_open_state() {
                            warn!(backend, error = %join_err, "fan-out task aborted, rolling back");
                            storage.rollback(&forked).await;
                        }
                        Err(StorageError::unexpected(format!(
                            "{backend} fan-out task did not complete: {join_err}"
                        )))
                    }
                };
                (backend, outcome)
            });
        }

        let mut results = Vec::new();
        let mut first_error: Option<StorageError> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(items))) => results.extend(items),
                Ok((backend, Err(err))) => {
                    warn!(backend, error = %err, "fan-out task failed");
                    first_error.get_or_insert(err);
                }
                Err(join_err) => {
                    warn!(error = %join_err, "fan-out task did not complete");
                    first_error.get_or_insert(StorageError::unexpected(format!(
                        "fan-out task did not complete: {join_err}"
                    )));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(results),
        }
    }
}
