mod settings;

pub use settings::{AgentConfig, LLMConfig, LoggingConfig, Settings, StorageConfig, ToolsConfig};
