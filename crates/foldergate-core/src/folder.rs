use crate::content_type::ContentType;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use time::OffsetDateTime;

/// ID of the root folder of every tree.
pub const ROOT_ID: &str = "0";

/// ID of the canonical structural tree. Every other tree is a derived view
/// whose folders mirror folders of this tree.
pub const REAL_TREE_ID: &str = "0";

pub fn is_virtual_tree(tree_id: &str) -> bool {
    tree_id != REAL_TREE_ID
}

/// A folder as loaded from a storage backend.
///
/// Folders are plain values. Caches hand out clones, never their own
/// instance, so a caller may freely modify what it receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    #[serde(rename = "treeId")]
    pub tree_id: String,
    /// `None` only for the root of a tree.
    #[serde(rename = "parentId", skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<String>,
    pub name: String,
    /// Ordered child IDs, or `None` when the backend did not resolve them.
    #[serde(rename = "subfolderIds", skip_serializing_if = "Option::is_none", default)]
    pub subfolder_ids: Option<Vec<String>>,
    #[serde(rename = "contentType", skip_serializing_if = "Option::is_none", default)]
    pub content_type: Option<ContentType>,
    pub cacheable: bool,
    /// Same representation for every user of the context; selects the
    /// shared cache tier instead of the session tier.
    pub global: bool,
    #[serde(
        rename = "lastModified",
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub last_modified: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rank: Option<i32>,
}

impl Folder {
    pub fn new(tree_id: impl Into<String>, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tree_id: tree_id.into(),
            parent_id: None,
            name: name.into(),
            subfolder_ids: None,
            content_type: None,
            cacheable: true,
            global: true,
            last_modified: None,
            rank: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<ContentType>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_subfolders(mut self, ids: Vec<String>) -> Self {
        self.subfolder_ids = Some(ids);
        self
    }

    pub fn with_rank(mut self, rank: i32) -> Self {
        self.rank = Some(rank);
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn global(mut self, global: bool) -> Self {
        self.global = global;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn touch(&mut self) {
        self.last_modified = Some(OffsetDateTime::now_utc());
    }

    pub fn sortable_id(&self) -> SortableId {
        SortableId {
            id: self.id.clone(),
            name: self.name.clone(),
            rank: self.rank,
        }
    }
}

/// A child reference returned by subfolder listings.
///
/// Ordering: explicit rank first (ranked entries before unranked ones), then
/// case-insensitive name, then ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortableId {
    pub id: String,
    pub name: String,
    pub rank: Option<i32>,
}

impl SortableId {
    pub fn new(id: impl Into<String>, name: impl Into<String>, rank: Option<i32>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rank,
        }
    }
}

impl Ord for SortableId {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_rank = match (self.rank, other.rank) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_rank
            .then_with(|| {
                self.name
                    .to_lowercase()
                    .cmp(&other.name.to_lowercase())
            })
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for SortableId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
