//! Model-facing types and the collaborator traits the session drives

pub mod llm;
pub mod message;

use anyhow::Result;
use async_trait::async_trait;
use message::Turn;
use serde::{Deserialize, Serialize};

/// Token accounting reported by the remote endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
    }
}

/// Everything one remote exchange produced
#[derive(Debug, Clone, Default)]
pub struct GenerationOutcome {
    /// Final assistant/tool turns, in order, each with a provider id
    pub turns: Vec<Turn>,
    pub steps: usize,
    pub step_ceiling_reached: bool,
    pub usage: Usage,
}

/// Remote text generation over the whole conversation
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, history: &[Turn]) -> Result<GenerationOutcome>;
}

/// Short conversation title. Never fails: falls back to a placeholder.
#[async_trait]
pub trait TitleGenerator: Send + Sync {
    async fn summarize(&self, turns: &[Turn], current_title: Option<&str>) -> String;
}
