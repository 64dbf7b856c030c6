use std::fmt;

use foldergate_core::{ContextId, UserId};

/// Key of a cached folder.
///
/// Global-tier keys leave `user_id` empty; the session-scoped variant carries
/// the user. Either way the context ID is the key's group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub context_id: ContextId,
    pub user_id: Option<UserId>,
    pub tree_id: String,
    pub folder_id: String,
}

impl CacheKey {
    pub fn global(context_id: ContextId, tree_id: &str, folder_id: &str) -> Self {
        Self {
            context_id,
            user_id: None,
            tree_id: tree_id.to_string(),
            folder_id: folder_id.to_string(),
        }
    }

    pub fn private(context_id: ContextId, user_id: UserId, tree_id: &str, folder_id: &str) -> Self {
        Self {
            context_id,
            user_id: Some(user_id),
            tree_id: tree_id.to_string(),
            folder_id: folder_id.to_string(),
        }
    }

    pub fn group(&self) -> ContextId {
        self.context_id
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.user_id {
            Some(user) => write!(f, "{}:{}:{}:{}", self.context_id, user, self.tree_id, self.folder_id),
            None => write!(f, "{}:*:{}:{}", self.context_id, self.tree_id, self.folder_id),
        }
    }
}
