//! File System Conversation Storage
//!
//! Information Hiding:
//! - File paths and JSON serialization format hidden from users
//! - Directory structure management hidden behind interface
//! - Persistence mechanism independent of storage trait users

use super::{
    is_conversation_file, validate_file_name, ConversationFile, ConversationStorage, StorageError,
    StorageResult,
};
use crate::core::message::Turn;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// File system storage - each conversation is a pretty-printed JSON array
/// Files are stored as {base_path}/conversation-<id>[-<slug>].json
pub struct FileSystemStorage {
    base_path: PathBuf,
}

impl FileSystemStorage {
    pub async fn new(base_path: PathBuf) -> StorageResult<Self> {
        // Create base directory if it doesn't exist
        fs::create_dir_all(&base_path)
            .await
            .map_err(|e| StorageError::io(base_path.display().to_string(), e))?;

        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn file_path(&self, file_name: &str) -> StorageResult<PathBuf> {
        validate_file_name(file_name)?;
        Ok(self.base_path.join(file_name))
    }
}

#[async_trait]
impl ConversationStorage for FileSystemStorage {
    async fn save(&self, file_name: &str, turns: &[Turn]) -> StorageResult<()> {
        let path = self.file_path(file_name)?;
        let json = serde_json::to_string_pretty(turns).map_err(StorageError::Serialize)?;

        fs::write(&path, json)
            .await
            .map_err(|e| StorageError::io(path.display().to_string(), e))?;

        tracing::debug!(
            "[FileSystemStorage] Saved {} turns to {:?}",
            turns.len(),
            path
        );
        Ok(())
    }

    async fn load(&self, file_name: &str) -> StorageResult<Vec<Turn>> {
        let path = self.file_path(file_name)?;

        let json = match fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(file_name.to_string()))
            }
            Err(e) => return Err(StorageError::io(path.display().to_string(), e)),
        };

        let turns: Vec<Turn> =
            serde_json::from_str(&json).map_err(|source| StorageError::Malformed {
                file_name: file_name.to_string(),
                source,
            })?;

        tracing::debug!(
            "[FileSystemStorage] Loaded {} turns from {:?}",
            turns.len(),
            path
        );
        Ok(turns)
    }

    async fn list(&self) -> StorageResult<Vec<ConversationFile>> {
        let base = self.base_path.display().to_string();
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| StorageError::io(base.clone(), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(base.clone(), e))?
        {
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_conversation_file(&file_name) {
                continue;
            }

            let metadata = entry
                .metadata()
                .await
                .map_err(|e| StorageError::io(file_name.clone(), e))?;
            let modified = metadata
                .modified()
                .map_err(|e| StorageError::io(file_name.clone(), e))?;

            files.push(ConversationFile {
                file_name,
                modified,
            });
        }

        tracing::debug!("[FileSystemStorage] Listed {} conversations", files.len());
        Ok(files)
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let source = self.file_path(from)?;
        let target = self.file_path(to)?;

        if !fs::try_exists(&source)
            .await
            .map_err(|e| StorageError::io(from, e))?
        {
            return Err(StorageError::NotFound(from.to_string()));
        }
        if fs::try_exists(&target)
            .await
            .map_err(|e| StorageError::io(to, e))?
        {
            return Err(StorageError::io(
                to,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "target already exists"),
            ));
        }

        fs::rename(&source, &target)
            .await
            .map_err(|e| StorageError::io(from, e))?;

        tracing::debug!("[FileSystemStorage] Renamed {:?} -> {:?}", source, target);
        Ok(())
    }

    async fn exists(&self, file_name: &str) -> StorageResult<bool> {
        fs::try_exists(self.file_path(file_name)?)
            .await
            .map_err(|e| StorageError::io(file_name, e))
    }

    fn describe(&self, file_name: &str) -> String {
        self.base_path.join(file_name).display().to_string()
    }
}
