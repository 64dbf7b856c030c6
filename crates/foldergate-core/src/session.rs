use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

pub type ContextId = i32;
pub type UserId = i32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An authenticated user session within a context (tenant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub context_id: ContextId,
    pub user_id: UserId,
    pub created_at: OffsetDateTime,
}

impl Session {
    pub fn new(context_id: ContextId, user_id: UserId) -> Self {
        Self::with_id(crate::id::generate_session_id(), context_id, user_id)
    }

    pub fn with_id(id: impl Into<String>, context_id: ContextId, user_id: UserId) -> Self {
        Self {
            id: SessionId::new(id),
            context_id,
            user_id,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}
