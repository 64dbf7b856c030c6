use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("Folder ID must not be empty")]
    Empty,
    #[error("Folder ID contains invalid character {0:?}")]
    InvalidCharacter(char),
}

pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Folder IDs are opaque to the cache, but they end up inside cache keys and
/// log lines, so whitespace and control characters are rejected.
pub fn validate_folder_id(id: &str) -> Result<(), IdError> {
    if id.is_empty() {
        return Err(IdError::Empty);
    }
    match id.chars().find(|c| c.is_whitespace() || c.is_control()) {
        Some(c) => Err(IdError::InvalidCharacter(c)),
        None => Ok(()),
    }
}
