//! Cachekeeper - interactive agent sessions with prompt-cache aware logs
//!
//! The conversation is kept as an append-only turn log with exactly one
//! transient cache breakpoint on the newest assistant turn, persisted as one
//! JSON file per conversation.

mod config;
pub mod core;
pub mod storage;
pub mod tools;
pub mod utils;

pub mod cli;
pub mod session;

pub use crate::config::{AgentConfig, LLMConfig, LoggingConfig, Settings, StorageConfig, ToolsConfig};

pub use crate::core::llm::AnthropicClient;
pub use crate::core::message::{ContentPart, Role, Turn, TurnContent};
pub use crate::core::{GenerationOutcome, Generator, TitleGenerator, Usage};
pub use crate::session::{
    Collaborators, Conversation, ConversationIdentity, ConversationRecord, MessageStore,
    SessionCoordinator,
};
