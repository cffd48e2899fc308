//! In-Memory Conversation Storage
//!
//! Information Hiding:
//! - HashMap storage structure hidden from users
//! - Thread-safe access via RwLock hidden behind async interface
//! - Suitable for testing and ephemeral sessions

use super::{
    is_conversation_file, ConversationFile, ConversationStorage, StorageError, StorageResult,
};
use crate::core::message::Turn;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredFile {
    body: String,
    modified: SystemTime,
}

/// In-memory storage keeping the serialized JSON of each conversation
/// Data is lost when process terminates
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    files: Arc<RwLock<HashMap<String, StoredFile>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw file content, bypassing serialization
    pub async fn insert_raw(&self, file_name: &str, body: impl Into<String>) {
        self.files.write().await.insert(
            file_name.to_string(),
            StoredFile {
                body: body.into(),
                modified: SystemTime::now(),
            },
        );
    }

    /// Override the modification time of a stored file
    pub async fn touch(&self, file_name: &str, modified: SystemTime) {
        if let Some(file) = self.files.write().await.get_mut(file_name) {
            file.modified = modified;
        }
    }

    pub async fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ConversationStorage for InMemoryStorage {
    async fn save(&self, file_name: &str, turns: &[Turn]) -> StorageResult<()> {
        let body = serde_json::to_string_pretty(turns).map_err(StorageError::Serialize)?;
        self.insert_raw(file_name, body).await;
        tracing::debug!(
            "[InMemoryStorage] Saved {} turns to '{}'",
            turns.len(),
            file_name
        );
        Ok(())
    }

    async fn load(&self, file_name: &str) -> StorageResult<Vec<Turn>> {
        let files = self.files.read().await;
        let file = files
            .get(file_name)
            .ok_or_else(|| StorageError::NotFound(file_name.to_string()))?;

        serde_json::from_str(&file.body).map_err(|source| StorageError::Malformed {
            file_name: file_name.to_string(),
            source,
        })
    }

    async fn list(&self) -> StorageResult<Vec<ConversationFile>> {
        let files = self.files.read().await;
        Ok(files
            .iter()
            .filter(|(name, _)| is_conversation_file(name))
            .map(|(name, file)| ConversationFile {
                file_name: name.clone(),
                modified: file.modified,
            })
            .collect())
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let mut files = self.files.write().await;
        if files.contains_key(to) {
            return Err(StorageError::io(
                to,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "target already exists"),
            ));
        }
        let file = files
            .remove(from)
            .ok_or_else(|| StorageError::NotFound(from.to_string()))?;
        files.insert(to.to_string(), file);
        tracing::debug!("[InMemoryStorage] Renamed '{}' -> '{}'", from, to);
        Ok(())
    }

    async fn exists(&self, file_name: &str) -> StorageResult<bool> {
        Ok(self.files.read().await.contains_key(file_name))
    }
}
