//! Conversation storage trait and implementations

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use branch_manager::ConversationState;
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Conversation already exists: {0}")]
    AlreadyExists(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Conversation storage trait
#[async_trait]
pub trait ConversationStorage: Send + Sync {
    /// Load a conversation
    async fn load(&self, conversation_id: &str) -> Result<ConversationState>;

    /// Save a conversation, replacing any previous copy
    async fn save(&self, state: &ConversationState) -> Result<()>;

    /// Save a conversation that must not exist yet
    async fn create(&self, state: &ConversationState) -> Result<()> {
        if self.exists(&state.conversation_id).await {
            return Err(StorageError::AlreadyExists(state.conversation_id.clone()));
        }
        self.save(state).await
    }

    async fn exists(&self, conversation_id: &str) -> bool;

    async fn delete(&self, conversation_id: &str) -> Result<()>;
}

/// One pretty-printed JSON file per conversation.
#[derive(Clone, Debug)]
pub struct FileConversationStorage {
    base_path: PathBuf,
}

impl FileConversationStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn conversation_path(&self, conversation_id: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", conversation_id))
    }
}

#[async_trait]
impl ConversationStorage for FileConversationStorage {
    async fn load(&self, conversation_id: &str) -> Result<ConversationState> {
        let path = self.conversation_path(conversation_id);
        if !path.exists() {
            return Err(StorageError::NotFound(conversation_id.to_string()));
        }

        let contents = fs::read_to_string(&path).await?;
        let state: ConversationState = serde_json::from_str(&contents)?;
        tracing::debug!(
            conversation_id = %conversation_id,
            messages = state.messages.len(),
            branches = state.branches.len(),
            "FileConversationStorage: loaded"
        );
        Ok(state)
    }

    async fn save(&self, state: &ConversationState) -> Result<()> {
        fs::create_dir_all(&self.base_path).await?;

        let path = self.conversation_path(&state.conversation_id);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(state)?;

        // Write then rename so a crash never leaves a truncated file.
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, &path).await?;

        tracing::debug!(
            conversation_id = %state.conversation_id,
            path = %path.display(),
            "FileConversationStorage: saved"
        );
        Ok(())
    }

    async fn exists(&self, conversation_id: &str) -> bool {
        self.conversation_path(conversation_id).exists()
    }

    async fn delete(&self, conversation_id: &str) -> Result<()> {
        let path = self.conversation_path(conversation_id);
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branch_manager::{BranchConfig, BranchId, Conversation, CreateBranchRequest, Message};
    use tempfile::tempdir;

    fn sample() -> ConversationState {
        let conversation = Conversation::new("sample");
        conversation
            .append_message(&BranchId::main(), Message::user("u1", "hello"))
            .unwrap();
        conversation
            .append_message(&BranchId::main(), Message::ai("a1", "gpt", "hi"))
            .unwrap();
        conversation.create_branch(&CreateBranchRequest::single("main", "a1"));
        conversation.to_state()
    }

    #[tokio::test]
    async fn test_file_storage_save_and_load() {
        let dir = tempdir().unwrap();
        let storage = FileConversationStorage::new(dir.path());

        let state = sample();
        storage.save(&state).await.unwrap();

        let loaded = storage.load("sample").await.unwrap();
        assert_eq!(loaded.messages, state.messages);
        assert_eq!(loaded.branches.len(), 2);

        let restored = Conversation::from_state(loaded, BranchConfig::default());
        assert_eq!(restored.display_context(&BranchId::main()).len(), 2);
    }

    #[tokio::test]
    async fn test_file_storage_not_found() {
        let dir = tempdir().unwrap();
        let storage = FileConversationStorage::new(dir.path());

        let result = storage.load("nonexistent").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_file_storage_creates_missing_directory() {
        let dir = tempdir().unwrap();
        let storage = FileConversationStorage::new(dir.path().join("nested").join("store"));

        storage.save(&sample()).await.unwrap();
        assert!(storage.exists("sample").await);
    }

    #[tokio::test]
    async fn test_file_storage_create_refuses_existing() {
        let dir = tempdir().unwrap();
        let storage = FileConversationStorage::new(dir.path());

        storage.create(&sample()).await.unwrap();
        let result = storage.create(&Conversation::new("sample").to_state()).await;
        assert!(matches!(result, Err(StorageError::AlreadyExists(id)) if id == "sample"));

        let kept = storage.load("sample").await.unwrap();
        assert_eq!(kept.branches.len(), 2);
    }

    #[tokio::test]
    async fn test_file_storage_delete() {
        let dir = tempdir().unwrap();
        let storage = FileConversationStorage::new(dir.path());

        storage.save(&sample()).await.unwrap();
        assert!(storage.exists("sample").await);

        storage.delete("sample").await.unwrap();
        assert!(!storage.exists("sample").await);
        storage.delete("sample").await.unwrap();
    }
}
