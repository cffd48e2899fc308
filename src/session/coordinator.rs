//! Session Coordinator - one interactive conversation loop
//!
//! Information Hiding:
//! - The exchange state machine is internal; callers only `run` it
//! - Terminal input, remote generation, titles and storage are injected
//!   collaborators, so the loop runs the same against test doubles
//! - Exchanges are strictly sequential: the store is only touched after the
//!   full result batch has arrived

use super::identity::{ConversationIdentity, ConversationRecord};
use super::store::MessageStore;
use crate::config::AgentConfig;
use crate::core::message::Role;
use crate::core::{GenerationOutcome, Generator, TitleGenerator};
use crate::storage::ConversationStorage;
use crate::utils;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

const CONTINUE_INPUT: &str = "continue";

/// Source of operator input. `None` means the input stream ended.
#[async_trait]
pub trait InputSource: Send {
    async fn read_line(&mut self, prompt: &str) -> Result<Option<String>>;
}

/// Per-exchange states of the loop
#[derive(Debug, Clone)]
pub enum ExchangeState {
    Idle,
    AwaitingInput,
    InFlight,
    Reconciling(GenerationOutcome),
    Persisted { step_ceiling_reached: bool },
    Closed,
}

impl ExchangeState {
    fn name(&self) -> &'static str {
        match self {
            ExchangeState::Idle => "Idle",
            ExchangeState::AwaitingInput => "AwaitingInput",
            ExchangeState::InFlight => "InFlight",
            ExchangeState::Reconciling(_) => "Reconciling",
            ExchangeState::Persisted { .. } => "Persisted",
            ExchangeState::Closed => "Closed",
        }
    }
}

pub fn default_system_prompt(agent_name: &str) -> String {
    format!(
        "You are {name}, a friendly personal assistant with full access to the user's \
         terminal through the executeCommand tool.\n\n\
         - Solve problems step by step and explain what you are doing in plain terms.\n\
         - Ask a clarifying question when a request is ambiguous.\n\
         - Warn before risky or destructive operations and suggest safer alternatives.\n\
         - Build on what was discussed earlier in the conversation.\n\
         - Be honest when you do not know something.",
        name = agent_name
    )
}

/// The log and identity of the conversation being driven
pub struct Conversation {
    pub store: MessageStore,
    pub record: ConversationRecord,
    pub resumed: bool,
}

impl Conversation {
    /// Fresh conversation: new id, system prompt carrying the permanent marker
    pub fn start(
        identity: &ConversationIdentity,
        system_prompt: impl Into<String>,
        timestamp: &str,
    ) -> Self {
        Self {
            store: MessageStore::with_system_prompt(system_prompt),
            record: identity.create(timestamp),
            resumed: false,
        }
    }

    /// Load a stored conversation, repairing its identity if needed
    pub async fn resume(
        storage: &dyn ConversationStorage,
        identity: &ConversationIdentity,
        file_name: &str,
        fallback_timestamp: &str,
    ) -> Result<Self> {
        let turns = storage
            .load(file_name)
            .await
            .with_context(|| format!("Failed to load conversation '{}'", file_name))?;
        let (store, report) = MessageStore::from_turns(turns);
        if report.removed > 0 {
            tracing::info!(
                "[Session] Removed {} stray cache markers from '{}'",
                report.removed,
                file_name
            );
        }
        let record = identity.resolve(file_name, fallback_timestamp).await;

        Ok(Self {
            store,
            record,
            resumed: true,
        })
    }
}

/// External collaborators of the loop
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn ConversationStorage>,
    pub generator: Arc<dyn Generator>,
    pub titles: Arc<dyn TitleGenerator>,
}

pub struct SessionCoordinator {
    store: MessageStore,
    record: ConversationRecord,
    resumed: bool,
    identity: ConversationIdentity,
    collaborators: Collaborators,
    agent: AgentConfig,
    state: ExchangeState,
    user_queries: usize,
    continue_pending: bool,
    title_due: bool,
    exchange_started: Option<Instant>,
}

impl SessionCoordinator {
    pub fn new(conversation: Conversation, collaborators: Collaborators, agent: AgentConfig) -> Self {
        Self {
            store: conversation.store,
            record: conversation.record,
            resumed: conversation.resumed,
            identity: ConversationIdentity::new(collaborators.storage.clone()),
            collaborators,
            agent,
            state: ExchangeState::Idle,
            user_queries: 0,
            continue_pending: false,
            title_due: false,
            exchange_started: None,
        }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn record(&self) -> &ConversationRecord {
        &self.record
    }

    pub fn state(&self) -> &ExchangeState {
        &self.state
    }

    /// Drive the loop until it closes. A failure that breaks the loop is
    /// reported after a best-effort final write of the log.
    pub async fn run(&mut self, input: &mut dyn InputSource) -> Result<()> {
        let result = self.drive(input).await;
        if let Err(e) = &result {
            tracing::error!("[Session {}] Loop ended with error: {:#}", self.record.id, e);
            if let Err(persist_error) = self.persist().await {
                tracing::error!(
                    "[Session {}] Final save failed: {:#}",
                    self.record.id,
                    persist_error
                );
            }
            self.state = ExchangeState::Closed;
        }
        result
    }

    async fn drive(&mut self, input: &mut dyn InputSource) -> Result<()> {
        loop {
            let current = std::mem::replace(&mut self.state, ExchangeState::Closed);
            let from = current.name();
            let next = match current {
                ExchangeState::Closed => return Ok(()),
                ExchangeState::Idle => self.idle(),
                ExchangeState::AwaitingInput => self.await_input(input).await?,
                ExchangeState::InFlight => self.in_flight().await?,
                ExchangeState::Reconciling(outcome) => self.reconcile(outcome).await?,
                ExchangeState::Persisted {
                    step_ceiling_reached,
                } => self.after_persist(step_ceiling_reached, input).await?,
            };
            tracing::trace!(
                "[Session {}] {} -> {}",
                self.record.id,
                from,
                next.name()
            );
            self.state = next;
        }
    }

    fn idle(&mut self) -> ExchangeState {
        if self.continue_pending {
            self.continue_pending = false;
            self.store.push_user(CONTINUE_INPUT);
            self.exchange_started = Some(Instant::now());
            return ExchangeState::InFlight;
        }
        ExchangeState::AwaitingInput
    }

    async fn await_input(&mut self, input: &mut dyn InputSource) -> Result<ExchangeState> {
        let Some(line) = input.read_line("You: ").await? else {
            self.persist().await?;
            return Ok(ExchangeState::Closed);
        };
        let line = line.trim();

        match line.to_lowercase().as_str() {
            "" => Ok(ExchangeState::AwaitingInput),
            "exit" => {
                utils::print_success(&format!(
                    "{}: Take care! Come back anytime.",
                    self.agent.name
                ));
                self.persist().await?;
                Ok(ExchangeState::Closed)
            }
            "save" => {
                self.persist().await?;
                utils::print_success(&format!(
                    "Conversation saved to {}",
                    self.collaborators.storage.describe(&self.record.file_name)
                ));
                Ok(ExchangeState::AwaitingInput)
            }
            "history" => {
                utils::print_info(&format!(
                    "Current conversation: {} messages",
                    self.store.len()
                ));
                utils::print_info(&format!("Conversation ID: {}", self.record.id));
                if !self.record.title.is_empty() {
                    utils::print_info(&format!("Title: {}", self.record.title));
                }
                utils::print_info(&format!(
                    "Resumed: {}",
                    if self.resumed { "Yes" } else { "No" }
                ));
                Ok(ExchangeState::AwaitingInput)
            }
            _ => {
                self.store.push_user(line);
                self.user_queries += 1;
                self.title_due =
                    self.agent.title_every > 0 && self.user_queries % self.agent.title_every == 0;
                self.exchange_started = Some(Instant::now());
                Ok(ExchangeState::InFlight)
            }
        }
    }

    async fn refresh_title(&mut self) {
        let current = Some(self.record.title.as_str()).filter(|t| !t.is_empty());
        let title = self
            .collaborators
            .titles
            .summarize(self.store.turns(), current)
            .await;
        utils::print_info(&format!("Conversation title: \"{}\"", title));
        self.record = self.identity.rename(&self.record, &title).await;
    }

    async fn in_flight(&mut self) -> Result<ExchangeState> {
        match self.collaborators.generator.generate(self.store.turns()).await {
            Ok(outcome) => Ok(ExchangeState::Reconciling(outcome)),
            Err(e) => {
                utils::print_error(&format!("Error talking to the model: {:#}", e));
                utils::print_info("Make sure ANTHROPIC_API_KEY is set in your environment or .env file");
                Err(e.context("Remote generation failed"))
            }
        }
    }

    async fn reconcile(&mut self, outcome: GenerationOutcome) -> Result<ExchangeState> {
        for turn in outcome.turns.iter().filter(|t| t.role == Role::Assistant) {
            for (_, _, args) in turn.tool_calls() {
                if let Some(command) = args["command"].as_str() {
                    utils::print_info(&format!("$ {}", command));
                }
            }
            let text = turn.spoken_text();
            if !text.trim().is_empty() {
                println!("\n{}: {}\n", self.agent.name, text.trim());
            }
        }

        let report = self.store.reconcile(outcome.turns, self.agent.enable_cache);
        self.persist().await?;

        // rename needs the file on disk, so the title follows the first write
        if std::mem::take(&mut self.title_due) {
            self.refresh_title().await;
            self.persist().await?;
        }

        let elapsed = self
            .exchange_started
            .take()
            .map(|started| started.elapsed().as_millis())
            .unwrap_or_default();
        tracing::info!(
            "[Session {}] Exchange done: {} new turns, {} steps, {}ms, tokens in={} out={} cache_write={} cache_read={}",
            self.record.id,
            report.appended,
            outcome.steps,
            elapsed,
            outcome.usage.input_tokens,
            outcome.usage.output_tokens,
            outcome.usage.cache_creation_input_tokens,
            outcome.usage.cache_read_input_tokens
        );

        Ok(ExchangeState::Persisted {
            step_ceiling_reached: outcome.step_ceiling_reached,
        })
    }

    async fn after_persist(
        &mut self,
        step_ceiling_reached: bool,
        input: &mut dyn InputSource,
    ) -> Result<ExchangeState> {
        if !step_ceiling_reached {
            return Ok(ExchangeState::Idle);
        }

        let prompt = format!(
            "Reached maximum steps ({}). Continue? (y/n): ",
            self.agent.max_steps
        );
        let answer = input.read_line(&prompt).await?.unwrap_or_default();
        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => {
                utils::print_info("Continuing...");
                self.continue_pending = true;
                Ok(ExchangeState::Idle)
            }
            _ => {
                utils::print_info("Stopped by user.");
                Ok(ExchangeState::Closed)
            }
        }
    }

    /// Full rewrite of the log under the current file name
    async fn persist(&mut self) -> Result<()> {
        self.collaborators
            .storage
            .save(&self.record.file_name, self.store.turns())
            .await
            .with_context(|| format!("Failed to save conversation '{}'", self.record.file_name))?;
        self.record.last_modified = Some(SystemTime::now());
        Ok(())
    }
}
