use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use foldergate_core::{ContentType, Folder, ROOT_ID, SortableId, StorageType, validate_folder_id};
use foldergate_storage::{
    FolderStorage, FolderType, StorageError, StorageParameters, StoragePriority, StorageResult,
};
use papaya::HashMap as PapayaHashMap;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::factory::{IdPattern, MemoryFolderType, MemoryStorageBuilder, MemoryStorageOptions};
use crate::transaction::{Journal, MemoryStorageStats, StatsCounters, TrashEntry, UndoEntry};

pub type StorageKey = String; // Format: "treeId/folderId"

pub(crate) fn make_storage_key(tree_id: &str, folder_id: &str) -> StorageKey {
    format!("{tree_id}/{folder_id}")
}

/// In-memory folder storage backend using papaya lock-free HashMap.
///
/// This storage implementation provides:
/// - Lock-free concurrent access via papaya::HashMap
/// - Numeric or path-encoded folder IDs
/// - Soft delete into a trash map, with restore and `Backup` reads
/// - Undo-journal transactions bound to [`StorageParameters`]
#[derive(Debug)]
pub struct InMemoryFolderStorage {
    options: MemoryStorageOptions,
    folder_type: MemoryFolderType,
    /// Live folders
    pub(crate) data: Arc<PapayaHashMap<StorageKey, Folder>>,
    /// Deleted folders, kept for restore and change listing
    pub(crate) trash: Arc<PapayaHashMap<StorageKey, TrashEntry>>,
    id_counter: AtomicU64,
    stats: StatsCounters,
    tx_key: String,
}

impl InMemoryFolderStorage {
    pub fn builder(name: &'static str, tree_id: impl Into<String>) -> MemoryStorageBuilder {
        MemoryStorageBuilder::new(name, tree_id)
    }

    pub fn with_options(options: MemoryStorageOptions) -> Self {
        Self {
            folder_type: MemoryFolderType::from_options(&options),
            tx_key: format!("foldergate.memory.{}", options.name),
            options,
            data: Arc::new(PapayaHashMap::new()),
            trash: Arc::new(PapayaHashMap::new()),
            id_counter: AtomicU64::new(1),
            stats: StatsCounters::default(),
        }
    }

    pub fn options(&self) -> &MemoryStorageOptions {
        &self.options
    }

    /// Inserts a folder directly, outside of any transaction.
    pub fn seed(&self, folder: Folder) {
        if let Ok(n) = folder.id.parse::<u64>() {
            self.id_counter.fetch_max(n + 1, Ordering::SeqCst);
        }
        let key = make_storage_key(&folder.tree_id, &folder.id);
        self.data.pin().insert(key, folder);
    }

    /// Raw stored state of a live folder, without load bookkeeping.
    pub fn peek(&self, tree_id: &str, folder_id: &str) -> Option<Folder> {
        self.data
            .pin()
            .get(&make_storage_key(tree_id, folder_id))
            .cloned()
    }

    pub fn is_trashed(&self, tree_id: &str, folder_id: &str) -> bool {
        self.trash
            .pin()
            .contains_key(&make_storage_key(tree_id, folder_id))
    }

    pub fn len(&self) -> usize {
        self.data.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MemoryStorageStats {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    fn journal(&self, params: &StorageParameters) -> Option<Arc<Journal>> {
        params.state::<Journal>(&self.tx_key)
    }

    fn check_tree(&self, tree_id: &str) -> StorageResult<()> {
        if self.folder_type.serves_tree_id(tree_id) {
            Ok(())
        } else {
            Err(StorageError::invalid_folder(format!(
                "{} does not serve tree {tree_id}",
                self.options.name
            )))
        }
    }

    fn is_local(&self, folder_id: &str) -> bool {
        self.folder_type.serves_folder_id(folder_id)
    }

    fn live_in_tree(&self, tree_id: &str) -> Vec<Folder> {
        let guard = self.data.pin();
        guard
            .iter()
            .filter(|(_, f)| f.tree_id == tree_id)
            .map(|(_, f)| f.clone())
            .collect()
    }

    fn children_of(&self, tree_id: &str, parent_id: &str) -> Vec<Folder> {
        let guard = self.data.pin();
        guard
            .iter()
            .filter(|(_, f)| f.tree_id == tree_id && f.parent_id.as_deref() == Some(parent_id))
            .map(|(_, f)| f.clone())
            .collect()
    }

    fn descendants(&self, tree_id: &str, folder_id: &str) -> Vec<Folder> {
        let mut found = Vec::new();
        let mut queue = VecDeque::from([folder_id.to_string()]);
        while let Some(next) = queue.pop_front() {
            for child in self.children_of(tree_id, &next) {
                queue.push_back(child.id.clone());
                found.push(child);
            }
        }
        found
    }

    fn sorted_children(&self, tree_id: &str, parent_id: &str) -> Vec<SortableId> {
        let mut children: Vec<SortableId> = self
            .children_of(tree_id, parent_id)
            .iter()
            .map(Folder::sortable_id)
            .collect();
        children.sort();
        children
    }

    /// Completes a stored folder into what callers get to see.
    fn present(&self, mut folder: Folder) -> Folder {
        StatsCounters::bump(&self.stats.folders_loaded);
        folder.global = self.options.global;
        if self.options.lists_subfolders {
            let ids = self
                .sorted_children(&folder.tree_id, &folder.id)
                .into_iter()
                .map(|s| s.id)
                .collect();
            folder.subfolder_ids = Some(ids);
        }
        folder
    }

    fn next_id(&self, tree_id: &str, parent_id: &str, name: &str) -> StorageResult<String> {
        match &self.options.id_pattern {
            IdPattern::Path { root } => {
                if name.is_empty() || name.contains('/') {
                    return Err(StorageError::invalid_folder(format!(
                        "invalid {} folder name '{name}'",
                        self.options.name
                    )));
                }
                if self.is_local(parent_id) {
                    Ok(format!("{parent_id}/{name}"))
                } else {
                    Ok(format!("{root}{name}"))
                }
            }
            IdPattern::Numeric | IdPattern::Any => loop {
                let id = self.id_counter.fetch_add(1, Ordering::SeqCst).to_string();
                let key = make_storage_key(tree_id, &id);
                if !self.data.pin().contains_key(&key) && !self.trash.pin().contains_key(&key) {
                    return Ok(id);
                }
            },
        }
    }

    /// Runs a write against the live maps.
    ///
    /// With an open transaction the undo records go to its journal. Without
    /// one the write autocommits, and a failing write is undone on the spot.
    fn write<T>(
        &self,
        params: &StorageParameters,
        op: impl FnOnce(&mut Writer<'_>) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let journal = self.journal(params);
        if let Some(journal) = &journal {
            if !journal.is_modify() {
                return Err(StorageError::transaction(format!(
                    "{} transaction is read-only",
                    self.options.name
                )));
            }
        }

        let mut writer = Writer {
            storage: self,
            undo: Vec::new(),
        };
        let result = op(&mut writer);
        let undo = writer.undo;

        match (journal, &result) {
            (Some(journal), _) => journal.record(undo),
            (None, Err(_)) => self.replay_undo(undo),
            (None, Ok(_)) => {}
        }
        if result.is_ok() {
            StatsCounters::bump(&self.stats.writes);
        }
        result
    }

    fn replay_undo(&self, undo: Vec<UndoEntry>) {
        let data = self.data.pin();
        let trash = self.trash.pin();
        for entry in undo.into_iter().rev() {
            match entry.live {
                Some(folder) => {
                    data.insert(entry.key.clone(), folder);
                }
                None => {
                    data.remove(&entry.key);
                }
            }
            match entry.trashed {
                Some(trashed) => {
                    trash.insert(entry.key, trashed);
                }
                None => {
                    trash.remove(&entry.key);
                }
            }
        }
    }

    fn touch_local(&self, w: &mut Writer<'_>, tree_id: &str, folder_id: &str) {
        let key = make_storage_key(tree_id, folder_id);
        if let Some(mut folder) = w.live(&key) {
            folder.touch();
            w.put_live(key, folder);
        }
    }

    /// The new parent must exist locally or be one of the attach points.
    fn check_parent(&self, w: &Writer<'_>, tree_id: &str, parent_id: &str) -> StorageResult<()> {
        if self.is_local(parent_id) {
            if w.live(&make_storage_key(tree_id, parent_id)).is_none() {
                return Err(StorageError::folder_not_found(tree_id, parent_id));
            }
            Ok(())
        } else if self.folder_type.is_attach_parent(parent_id) {
            Ok(())
        } else {
            Err(StorageError::invalid_folder(format!(
                "parent {parent_id} is outside of {}",
                self.options.name
            )))
        }
    }

    fn rekey_descendants(&self, w: &mut Writer<'_>, tree_id: &str, old_id: &str, new_id: &str) {
        for mut child in self.descendants(tree_id, old_id) {
            let old_key = make_storage_key(tree_id, &child.id);
            if child.id.starts_with(&format!("{old_id}/")) {
                child.id = format!("{new_id}{}", &child.id[old_id.len()..]);
            }
            if let Some(parent) = child.parent_id.take() {
                let rewritten = if parent == old_id || parent.starts_with(&format!("{old_id}/")) {
                    format!("{new_id}{}", &parent[old_id.len()..])
                } else {
                    parent
                };
                child.parent_id = Some(rewritten);
            }
            w.remove_live(&old_key);
            w.put_live(make_storage_key(tree_id, &child.id), child);
        }
    }
}

/// Write access to the live and trash maps that records undo state.
struct Writer<'a> {
    storage: &'a InMemoryFolderStorage,
    undo: Vec<UndoEntry>,
}

impl Writer<'_> {
    fn live(&self, key: &StorageKey) -> Option<Folder> {
        self.storage.data.pin().get(key).cloned()
    }

    fn trashed(&self, key: &StorageKey) -> Option<TrashEntry> {
        self.storage.trash.pin().get(key).cloned()
    }

    fn capture(&mut self, key: &StorageKey) {
        let entry = UndoEntry {
            key: key.clone(),
            live: self.live(key),
            trashed: self.trashed(key),
        };
        self.undo.push(entry);
    }

    fn put_live(&mut self, key: StorageKey, folder: Folder) {
        self.capture(&key);
        self.storage.data.pin().insert(key, folder);
    }

    fn remove_live(&mut self, key: &StorageKey) {
        self.capture(key);
        self.storage.data.pin().remove(key);
    }

    fn put_trash(&mut self, key: StorageKey, entry: TrashEntry) {
        self.capture(&key);
        self.storage.trash.pin().insert(key, entry);
    }

    fn remove_trash(&mut self, key: &StorageKey) {
        self.capture(key);
        self.storage.trash.pin().remove(key);
    }
}

#[async_trait]
impl FolderStorage for InMemoryFolderStorage {
    fn folder_type(&self) -> &dyn FolderType {
        &self.folder_type
    }

    fn priority(&self) -> StoragePriority {
        self.options.priority
    }

    fn supported_content_types(&self) -> Vec<ContentType> {
        self.options.content_types.clone()
    }

    fn backend_name(&self) -> &'static str {
        self.options.name
    }

    async fn start_transaction(
        &self,
        params: &StorageParameters,
        modify: bool,
    ) -> StorageResult<bool> {
        if let Some(open) = self.journal(params) {
            if modify {
                open.upgrade();
            }
            return Ok(false);
        }
        let started = params.put_state_if_absent(&self.tx_key, Journal::new(modify));
        if started {
            StatsCounters::bump(&self.stats.started);
        }
        Ok(started)
    }

    async fn commit_transaction(&self, params: &StorageParameters) -> StorageResult<()> {
        match params.take_state::<Journal>(&self.tx_key) {
            Some(journal) => {
                let discarded = journal.drain().len();
                StatsCounters::bump(&self.stats.committed);
                debug!(backend = self.options.name, writes = discarded, "committed");
                Ok(())
            }
            None => Err(StorageError::transaction(format!(
                "no open {} transaction",
                self.options.name
            ))),
        }
    }

    async fn rollback(&self, params: &StorageParameters) {
        match params.take_state::<Journal>(&self.tx_key) {
            Some(journal) => {
                let undo = journal.drain();
                debug!(backend = self.options.name, undone = undo.len(), "rolling back");
                self.replay_undo(undo);
                StatsCounters::bump(&self.stats.rolled_back);
            }
            None => warn!(backend = self.options.name, "rollback without open transaction"),
        }
    }

    async fn get_folder(
        &self,
        tree_id: &str,
        folder_id: &str,
        storage_type: StorageType,
        _params: &StorageParameters,
    ) -> StorageResult<Folder> {
        let key = make_storage_key(tree_id, folder_id);
        let stored = match storage_type {
            StorageType::Working => self.data.pin().get(&key).cloned(),
            StorageType::Backup => self.trash.pin().get(&key).map(|t| t.folder.clone()),
        };
        stored
            .map(|folder| self.present(folder))
            .ok_or_else(|| StorageError::folder_not_found(tree_id, folder_id))
    }

    async fn get_subfolders(
        &self,
        tree_id: &str,
        parent_id: &str,
        _params: &StorageParameters,
    ) -> StorageResult<Vec<SortableId>> {
        Ok(self.sorted_children(tree_id, parent_id))
    }

    async fn create_folder(
        &self,
        folder: &Folder,
        params: &StorageParameters,
    ) -> StorageResult<String> {
        let tree_id = folder.tree_id.as_str();
        self.check_tree(tree_id)?;
        let parent_id = folder
            .parent_id
            .clone()
            .ok_or_else(|| StorageError::invalid_folder("a new folder needs a parent"))?;
        if folder.name.trim().is_empty() {
            return Err(StorageError::invalid_folder("folder name must not be empty"));
        }
        let id = if folder.id.is_empty() {
            self.next_id(tree_id, &parent_id, &folder.name)?
        } else {
            validate_folder_id(&folder.id)?;
            folder.id.clone()
        };
        if !self.is_local(&id) {
            return Err(StorageError::invalid_folder(format!(
                "{id} is not a {} folder id",
                self.options.name
            )));
        }

        self.write(params, |w| {
            let key = make_storage_key(tree_id, &id);
            if w.live(&key).is_some() {
                return Err(StorageError::already_exists(tree_id, &id));
            }
            self.check_parent(w, tree_id, &parent_id)?;

            let mut stored = folder.clone();
            stored.id = id.clone();
            stored.subfolder_ids = None;
            stored.touch();
            if w.trashed(&key).is_some() {
                w.remove_trash(&key);
            }
            w.put_live(key, stored);
            self.touch_local(w, tree_id, &parent_id);
            Ok(id.clone())
        })
    }

    async fn update_folder(
        &self,
        folder: &Folder,
        params: &StorageParameters,
    ) -> StorageResult<String> {
        let tree_id = folder.tree_id.as_str();
        self.check_tree(tree_id)?;

        self.write(params, |w| {
            let old_key = make_storage_key(tree_id, &folder.id);
            let existing = w
                .live(&old_key)
                .ok_or_else(|| StorageError::folder_not_found(tree_id, &folder.id))?;
            if existing.is_root() && folder.parent_id.is_some() {
                return Err(StorageError::invalid_folder("the root folder cannot be moved"));
            }

            let new_parent = folder.parent_id.clone().or_else(|| existing.parent_id.clone());
            let moved = new_parent != existing.parent_id;
            if let (true, Some(target)) = (moved, new_parent.as_deref()) {
                let below_self = target == folder.id
                    || self
                        .descendants(tree_id, &folder.id)
                        .iter()
                        .any(|d| d.id == target);
                if below_self {
                    return Err(StorageError::invalid_folder(format!(
                        "cannot move {} below itself",
                        folder.id
                    )));
                }
                self.check_parent(w, tree_id, target)?;
            }

            let renamed = folder.name != existing.name;
            let new_id = match (&self.options.id_pattern, new_parent.as_deref()) {
                (IdPattern::Path { .. }, Some(parent)) if moved || renamed => {
                    self.next_id(tree_id, parent, &folder.name)?
                }
                _ => folder.id.clone(),
            };
            let new_key = make_storage_key(tree_id, &new_id);
            if new_id != folder.id && w.live(&new_key).is_some() {
                return Err(StorageError::already_exists(tree_id, &new_id));
            }

            let mut updated = existing.clone();
            updated.id = new_id.clone();
            updated.name = folder.name.clone();
            updated.parent_id = new_parent.clone();
            updated.content_type = folder.content_type.clone().or(existing.content_type.clone());
            updated.rank = folder.rank;
            updated.cacheable = folder.cacheable;
            updated.subfolder_ids = None;
            updated.touch();

            if new_id != folder.id {
                self.rekey_descendants(w, tree_id, &folder.id, &new_id);
                w.remove_live(&old_key);
            }
            w.put_live(new_key, updated);

            if moved {
                if let Some(old_parent) = existing.parent_id.as_deref() {
                    self.touch_local(w, tree_id, old_parent);
                }
                if let Some(parent) = new_parent.as_deref() {
                    self.touch_local(w, tree_id, parent);
                }
            }
            Ok(new_id.clone())
        })
    }

    async fn delete_folder(
        &self,
        tree_id: &str,
        folder_id: &str,
        params: &StorageParameters,
    ) -> StorageResult<()> {
        self.check_tree(tree_id)?;
        self.write(params, |w| {
            let key = make_storage_key(tree_id, folder_id);
            let folder = w
                .live(&key)
                .ok_or_else(|| StorageError::folder_not_found(tree_id, folder_id))?;
            if folder.is_root() {
                return Err(StorageError::invalid_folder("the root folder cannot be deleted"));
            }

            let deleted_at = OffsetDateTime::now_utc();
            let mut doomed = self.descendants(tree_id, folder_id);
            doomed.push(folder.clone());
            for victim in doomed {
                let victim_key = make_storage_key(tree_id, &victim.id);
                w.remove_live(&victim_key);
                w.put_trash(
                    victim_key,
                    TrashEntry {
                        folder: victim,
                        deleted_at,
                    },
                );
            }
            if let Some(parent) = folder.parent_id.as_deref() {
                self.touch_local(w, tree_id, parent);
            }
            Ok(())
        })
    }

    async fn clear_folder(
        &self,
        tree_id: &str,
        folder_id: &str,
        params: &StorageParameters,
    ) -> StorageResult<()> {
        self.check_tree(tree_id)?;
        self.write(params, |w| {
            let key = make_storage_key(tree_id, folder_id);
            if w.live(&key).is_none() {
                return Err(StorageError::folder_not_found(tree_id, folder_id));
            }
            self.touch_local(w, tree_id, folder_id);
            Ok(())
        })
    }

    async fn default_folder_id(
        &self,
        tree_id: &str,
        content_type: &ContentType,
        _params: &StorageParameters,
    ) -> StorageResult<String> {
        self.live_in_tree(tree_id)
            .iter()
            .filter(|f| f.content_type.as_ref() == Some(content_type))
            .map(Folder::sortable_id)
            .min()
            .map(|s| s.id)
            .ok_or_else(|| StorageError::no_storage_for_content_type(tree_id, content_type.as_str()))
    }

    async fn modified_folder_ids(
        &self,
        tree_id: &str,
        since: OffsetDateTime,
        _params: &StorageParameters,
    ) -> StorageResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .live_in_tree(tree_id)
            .into_iter()
            .filter(|f| f.last_modified.is_some_and(|at| at > since))
            .map(|f| f.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn deleted_folder_ids(
        &self,
        tree_id: &str,
        since: OffsetDateTime,
        _params: &StorageParameters,
    ) -> StorageResult<Vec<String>> {
        let guard = self.trash.pin();
        let mut ids: Vec<String> = guard
            .iter()
            .filter(|(_, t)| t.folder.tree_id == tree_id && t.deleted_at > since)
            .map(|(_, t)| t.folder.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn prepare_folder(
        &self,
        tree_id: &str,
        mut folder: Folder,
        _params: &StorageParameters,
    ) -> StorageResult<Folder> {
        folder.tree_id = tree_id.to_string();
        if folder.content_type.is_none() {
            folder.content_type = self.options.content_types.first().cloned();
        }
        Ok(folder)
    }

    async fn check_consistency(
        &self,
        tree_id: &str,
        params: &StorageParameters,
    ) -> StorageResult<()> {
        self.check_tree(tree_id)?;
        let folders = self.live_in_tree(tree_id);
        let known: HashSet<&str> = folders.iter().map(|f| f.id.as_str()).collect();
        let fallback = if known.contains(ROOT_ID) {
            Some(ROOT_ID.to_string())
        } else {
            self.options.attach_parents.first().cloned()
        };

        let orphans: Vec<Folder> = folders
            .iter()
            .filter(|f| {
                f.parent_id
                    .as_deref()
                    .is_some_and(|p| self.is_local(p) && !known.contains(p))
            })
            .cloned()
            .collect();
        if orphans.is_empty() {
            return Ok(());
        }

        self.write(params, |w| {
            for mut orphan in orphans {
                let Some(target) = fallback.clone() else {
                    warn!(
                        backend = self.options.name,
                        tree_id,
                        folder_id = %orphan.id,
                        "orphaned folder has nowhere to go"
                    );
                    continue;
                };
                warn!(
                    backend = self.options.name,
                    tree_id,
                    folder_id = %orphan.id,
                    missing_parent = ?orphan.parent_id,
                    new_parent = %target,
                    "re-parenting orphaned folder"
                );
                orphan.parent_id = Some(target);
                orphan.touch();
                w.put_live(make_storage_key(tree_id, &orphan.id), orphan);
            }
            Ok(())
        })
    }

    async fn restore(
        &self,
        tree_id: &str,
        folder_id: &str,
        params: &StorageParameters,
    ) -> StorageResult<()> {
        self.check_tree(tree_id)?;
        self.write(params, |w| {
            let key = make_storage_key(tree_id, folder_id);
            let entry = w
                .trashed(&key)
                .ok_or_else(|| StorageError::folder_not_found(tree_id, folder_id))?;
            if w.live(&key).is_some() {
                return Err(StorageError::already_exists(tree_id, folder_id));
            }
            if let Some(parent) = entry.folder.parent_id.as_deref() {
                if self.is_local(parent) && w.live(&make_storage_key(tree_id, parent)).is_none() {
                    return Err(StorageError::invalid_folder(format!(
                        "parent {parent} of {folder_id} no longer exists"
                    )));
                }
            }

            // Everything trashed by the same delete below this folder comes back too.
            let batch: Vec<TrashEntry> = {
                let guard = self.trash.pin();
                guard
                    .iter()
                    .filter(|(_, t)| t.folder.tree_id == tree_id && t.deleted_at == entry.deleted_at)
                    .map(|(_, t)| t.clone())
                    .collect()
            };
            let mut revive = vec![entry.folder.clone()];
            let mut queue = VecDeque::from([folder_id.to_string()]);
            while let Some(parent) = queue.pop_front() {
                for child in batch
                    .iter()
                    .filter(|t| t.folder.parent_id.as_deref() == Some(parent.as_str()))
                {
                    queue.push_back(child.folder.id.clone());
                    revive.push(child.folder.clone());
                }
            }

            for mut folder in revive {
                let revive_key = make_storage_key(tree_id, &folder.id);
                folder.touch();
                w.remove_trash(&revive_key);
                w.put_live(revive_key, folder);
            }
            if let Some(parent) = entry.folder.parent_id.as_deref() {
                self.touch_local(w, tree_id, parent);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foldergate_storage::in_transaction;

    fn native() -> InMemoryFolderStorage {
        InMemoryFolderStorage::builder("native", "0")
            .content_type("calendar")
            .with_folder(Folder::new("0", "0", "root"))
            .with_folder(Folder::new("0", "1", "private").with_parent("0"))
            .with_folder(
                Folder::new("0", "10", "Calendar")
                    .with_parent("1")
                    .with_content_type("calendar"),
            )
            .build()
    }

    fn mail() -> InMemoryFolderStorage {
        InMemoryFolderStorage::builder("mail", "0")
            .id_pattern(IdPattern::path("mail/"))
            .attach_to("1")
            .content_type("mail")
            .with_folder(
                Folder::new("0", "mail/INBOX", "INBOX")
                    .with_parent("1")
                    .with_content_type("mail"),
            )
            .build()
    }

    fn params() -> StorageParameters {
        StorageParameters::new(1, 42)
    }

    #[tokio::test]
    async fn test_storage_basic_operations() {
        let storage = native();
        let params = params();

        let folder = storage
            .get_folder("0", "1", StorageType::Working, &params)
            .await
            .unwrap();
        assert_eq!(folder.name, "private");
        assert_eq!(folder.subfolder_ids, Some(vec!["10".to_string()]));

        let new = Folder::new("0", "", "Tasks").with_parent("1");
        let id = storage.create_folder(&new, &params).await.unwrap();
        assert_eq!(id, "11", "counter continues after the highest seeded id");

        let parent = storage
            .get_folder("0", "1", StorageType::Working, &params)
            .await
            .unwrap();
        assert_eq!(
            parent.subfolder_ids,
            Some(vec!["10".to_string(), "11".to_string()])
        );
        assert_eq!(storage.stats().writes, 1);
    }

    #[tokio::test]
    async fn test_storage_conflicts_and_not_found() {
        let storage = native();
        let params = params();

        let err = storage
            .get_folder("0", "99", StorageType::Working, &params)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let dup = Folder::new("0", "10", "Again").with_parent("1");
        let err = storage.create_folder(&dup, &params).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));

        let orphan = Folder::new("0", "", "Lost").with_parent("77");
        let err = storage.create_folder(&orphan, &params).await.unwrap_err();
        assert!(err.is_not_found());

        let err = storage.delete_folder("0", "0", &params).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidFolder { .. }));
    }

    #[tokio::test]
    async fn test_path_ids_follow_renames() {
        let storage = mail();
        let params = params();

        let sub = Folder::new("0", "", "Receipts").with_parent("mail/INBOX");
        let sub_id = storage.create_folder(&sub, &params).await.unwrap();
        assert_eq!(sub_id, "mail/INBOX/Receipts");

        let mut inbox = storage
            .get_folder("0", "mail/INBOX", StorageType::Working, &params)
            .await
            .unwrap();
        inbox.name = "Archive".into();
        let new_id = storage.update_folder(&inbox, &params).await.unwrap();

        assert_eq!(new_id, "mail/Archive");
        assert!(storage.peek("0", "mail/INBOX").is_none());
        let moved_child = storage.peek("0", "mail/Archive/Receipts").unwrap();
        assert_eq!(moved_child.parent_id.as_deref(), Some("mail/Archive"));
    }

    #[tokio::test]
    async fn test_move_below_itself_is_rejected() {
        let storage = native();
        let params = params();

        let mut private = storage
            .get_folder("0", "1", StorageType::Working, &params)
            .await
            .unwrap();
        private.parent_id = Some("10".into());
        let err = storage.update_folder(&private, &params).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidFolder { .. }));
    }

    #[tokio::test]
    async fn test_delete_moves_subtree_to_trash_and_restore_brings_it_back() {
        let storage = native();
        let params = params();
        storage
            .create_folder(&Folder::new("0", "20", "Nested").with_parent("10"), &params)
            .await
            .unwrap();

        storage.delete_folder("0", "10", &params).await.unwrap();
        assert!(storage.peek("0", "10").is_none());
        assert!(storage.is_trashed("0", "20"));

        let backup = storage
            .get_folder("0", "10", StorageType::Backup, &params)
            .await
            .unwrap();
        assert_eq!(backup.name, "Calendar");

        storage.restore("0", "10", &params).await.unwrap();
        assert!(storage.peek("0", "10").is_some());
        assert!(storage.peek("0", "20").is_some());
        assert!(!storage.is_trashed("0", "20"));
    }

    #[tokio::test]
    async fn test_transaction_rollback() {
        let storage = native();
        let params = params();

        let result: StorageResult<()> = in_transaction(&storage, &params, true, || async {
            storage
                .create_folder(&Folder::new("0", "30", "Doomed").with_parent("1"), &params)
                .await?;
            storage.delete_folder("0", "10", &params).await?;
            Err(StorageError::backend("native", "late failure"))
        })
        .await;

        assert!(result.is_err());
        assert!(storage.peek("0", "30").is_none());
        assert!(storage.peek("0", "10").is_some());
        assert!(!storage.is_trashed("0", "10"));
        let stats = storage.stats();
        assert_eq!(stats.transactions_started, 1);
        assert_eq!(stats.transactions_rolled_back, 1);
    }

    #[tokio::test]
    async fn test_read_only_transaction_rejects_writes() {
        let storage = native();
        let params = params();

        assert!(storage.start_transaction(&params, false).await.unwrap());
        let err = storage
            .clear_folder("0", "10", &params)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Transaction { .. }));

        // A nested modify request upgrades the open transaction
        assert!(!storage.start_transaction(&params, true).await.unwrap());
        storage.clear_folder("0", "10", &params).await.unwrap();
        storage.commit_transaction(&params).await.unwrap();
    }

    #[tokio::test]
    async fn test_check_consistency_reparents_orphans() {
        let storage = native();
        storage.seed(Folder::new("0", "50", "Stray").with_parent("49"));
        let params = params();

        storage.check_consistency("0", &params).await.unwrap();

        let stray = storage.peek("0", "50").unwrap();
        assert_eq!(stray.parent_id.as_deref(), Some(ROOT_ID));
    }

    #[tokio::test]
    async fn test_default_folder_and_change_listing() {
        let storage = native();
        let params = params();
        let before = OffsetDateTime::now_utc() - time::Duration::seconds(1);

        let id = storage
            .default_folder_id("0", &ContentType::from("calendar"), &params)
            .await
            .unwrap();
        assert_eq!(id, "10");
        let err = storage
            .default_folder_id("0", &ContentType::from("contacts"), &params)
            .await
            .unwrap_err();
        assert!(err.is_no_storage());

        storage
            .create_folder(&Folder::new("0", "12", "Notes").with_parent("1"), &params)
            .await
            .unwrap();
        storage.delete_folder("0", "10", &params).await.unwrap();

        let modified = storage
            .modified_folder_ids("0", before, &params)
            .await
            .unwrap();
        assert_eq!(modified, vec!["1".to_string(), "12".to_string()]);
        let deleted = storage.deleted_folder_ids("0", before, &params).await.unwrap();
        assert_eq!(deleted, vec!["10".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_creates() {
        use tokio::task::JoinSet;

        let storage = Arc::new(native());
        let mut join_set = JoinSet::new();

        for i in 0..20 {
            let storage_clone = Arc::clone(&storage);
            join_set.spawn(async move {
                let params = StorageParameters::new(1, 42);
                let folder = Folder::new("0", "", format!("folder-{i}")).with_parent("1");
                storage_clone.create_folder(&folder, &params).await
            });
        }

        let mut ids = HashSet::new();
        while let Some(result) = join_set.join_next().await {
            ids.insert(result.unwrap().unwrap());
        }

        assert_eq!(ids.len(), 20);
        assert_eq!(storage.len(), 23);
    }
}
