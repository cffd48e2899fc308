//! Conversation Storage Abstraction
//!
//! Information Hiding:
//! - Storage backend implementation details hidden behind trait
//! - Conversations are addressed by file name; where those files live is the
//!   backend's business
//! - Each storage implementation encapsulates its own data structures and protocols

use crate::core::message::Turn;
use async_trait::async_trait;
use std::time::SystemTime;
use thiserror::Error;

pub mod filesystem;
pub mod memory;

/// Prefix shared by every conversation log file
pub const FILE_PREFIX: &str = "conversation-";
/// Extension shared by every conversation log file
pub const FILE_EXTENSION: &str = ".json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("conversation '{0}' not found")]
    NotFound(String),

    #[error("'{0}' is not a conversation file name")]
    InvalidName(String),

    #[error("conversation '{file_name}' is not a valid turn array: {source}")]
    Malformed {
        file_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize conversation: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("storage I/O error on '{target}': {source}")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(target: impl Into<String>, source: std::io::Error) -> Self {
        StorageError::Io {
            target: target.into(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Directory entry of a stored conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationFile {
    pub file_name: String,
    pub modified: SystemTime,
}

/// True for names shaped like `conversation-*.json`
pub fn is_conversation_file(file_name: &str) -> bool {
    file_name.starts_with(FILE_PREFIX) && file_name.ends_with(FILE_EXTENSION)
}

/// Reject anything that is not a bare `conversation-*.json` name, so a
/// caller-supplied name can never address a path outside the logs directory
pub fn validate_file_name(file_name: &str) -> StorageResult<()> {
    let bare = !file_name.contains(['/', '\\']) && !file_name.contains("..");
    if bare && is_conversation_file(file_name) {
        Ok(())
    } else {
        Err(StorageError::InvalidName(file_name.to_string()))
    }
}

/// Trait defining conversation storage interface
/// Implementations can use different backends (memory, file)
#[async_trait]
pub trait ConversationStorage: Send + Sync {
    /// Write the full log, replacing whatever was stored under this name
    async fn save(&self, file_name: &str, turns: &[Turn]) -> StorageResult<()>;

    /// Load a log; fails with `Malformed` if the content is not a turn array
    async fn load(&self, file_name: &str) -> StorageResult<Vec<Turn>>;

    /// List every conversation file, in no particular order
    async fn list(&self) -> StorageResult<Vec<ConversationFile>>;

    /// Move a log to a new name. Never overwrites an existing target.
    async fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Check if a conversation file exists
    async fn exists(&self, file_name: &str) -> StorageResult<bool>;

    /// Human-readable location of a file, for operator messages
    fn describe(&self, file_name: &str) -> String {
        file_name.to_string()
    }
}
