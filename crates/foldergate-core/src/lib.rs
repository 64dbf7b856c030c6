pub mod content_type;
pub mod folder;
pub mod id;
pub mod session;

pub use content_type::{ContentType, StorageType};
pub use folder::{Folder, REAL_TREE_ID, ROOT_ID, SortableId, is_virtual_tree};
pub use id::{IdError, generate_session_id, validate_folder_id};
pub use session::{ContextId, Session, SessionId, UserId};
