use anyhow::Result;
use cachekeeper::cli::{Cli, Commands, TerminalInput};
use cachekeeper::core::message::Role;
use cachekeeper::session::catalog::{self, ConversationSummary};
use cachekeeper::session::coordinator::default_system_prompt;
use cachekeeper::session::identity::conversation_timestamp;
use cachekeeper::session::InputSource;
use cachekeeper::storage::filesystem::FileSystemStorage;
use cachekeeper::storage::ConversationStorage;
use cachekeeper::tools::registry::ToolRegistry;
use cachekeeper::{
    utils, AnthropicClient, Collaborators, Conversation, ConversationIdentity, SessionCoordinator,
    Settings,
};
use chrono::{DateTime, Local, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::new()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level)),
        )
        .init();

    let cli = Cli::parse();

    let storage: Arc<dyn ConversationStorage> = Arc::new(
        FileSystemStorage::new(PathBuf::from(&settings.storage.logs_dir)).await?,
    );

    match cli.command {
        Commands::Chat { resume, new } => handle_chat(settings, storage, resume, new).await,
        Commands::List { limit } => {
            let limit = limit.unwrap_or(settings.storage.resume_candidates);
            handle_list(storage.as_ref(), limit).await
        }
        Commands::Show { conversation } => {
            handle_show(storage.as_ref(), &conversation, &settings.agent.name).await
        }
        Commands::Clean { file } => handle_clean(storage.as_ref(), file).await,
    }
}

async fn handle_chat(
    settings: Settings,
    storage: Arc<dyn ConversationStorage>,
    resume: Option<String>,
    new: bool,
) -> Result<()> {
    let api_key = match Settings::api_key() {
        Ok(key) => key,
        Err(e) => {
            utils::print_error(&e.to_string());
            utils::print_info("Set ANTHROPIC_API_KEY in your environment or .env file");
            return Err(e);
        }
    };

    let agent_name = settings.agent.name.clone();
    let identity = ConversationIdentity::new(storage.clone());
    let timestamp = conversation_timestamp(Utc::now());
    let mut input = TerminalInput::new();

    utils::print_header(&format!("{} is ready to help", agent_name));

    let selected = match (resume, new) {
        (Some(file), _) => Some(file),
        (None, true) => None,
        (None, false) => {
            select_conversation(
                storage.as_ref(),
                &mut input,
                settings.storage.resume_candidates,
            )
            .await?
        }
    };

    let conversation = match selected {
        Some(file) => {
            match Conversation::resume(storage.as_ref(), &identity, &file, &timestamp).await {
                Ok(conversation) => {
                    show_resume_context(&conversation, &agent_name);
                    conversation
                }
                Err(e) => {
                    utils::print_error(&format!("{:#}", e));
                    utils::print_warning("Starting a fresh conversation instead.");
                    Conversation::start(&identity, default_system_prompt(&agent_name), &timestamp)
                }
            }
        }
        None => {
            utils::print_success("Starting a fresh conversation. What would you like to work on?");
            Conversation::start(&identity, default_system_prompt(&agent_name), &timestamp)
        }
    };
    utils::print_info("Type 'exit' to quit, 'save' to save, 'history' for details\n");

    let tools = Arc::new(ToolRegistry::with_defaults(&settings.tools));
    let client = Arc::new(AnthropicClient::new(
        api_key,
        settings.llm.clone(),
        tools,
        settings.agent.max_steps,
    ));
    let collaborators = Collaborators {
        storage: storage.clone(),
        generator: client.clone(),
        titles: client,
    };

    let mut session = SessionCoordinator::new(conversation, collaborators, settings.agent);
    let result = session.run(&mut input).await;

    utils::print_success(&format!(
        "Conversation saved to {}",
        storage.describe(&session.record().file_name)
    ));
    result
}

async fn select_conversation(
    storage: &dyn ConversationStorage,
    input: &mut TerminalInput,
    limit: usize,
) -> Result<Option<String>> {
    let conversations = catalog::list_recent(storage, limit).await?;
    if conversations.is_empty() {
        utils::print_info("This looks like our first conversation!");
        return Ok(None);
    }

    utils::print_info("Previous conversations:");
    print_table(&conversations);

    let answer = input
        .read_line("Pick a number to continue, or press Enter to start fresh: ")
        .await?
        .unwrap_or_default();
    let choice = answer.trim();
    if choice.is_empty() {
        return Ok(None);
    }

    match choice
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|index| conversations.get(index))
    {
        Some(summary) => Ok(Some(summary.file_name.clone())),
        None => {
            utils::print_warning("That doesn't match a conversation, starting fresh.");
            Ok(None)
        }
    }
}

fn show_resume_context(conversation: &Conversation, agent_name: &str) {
    utils::print_success(&format!(
        "Loaded {} previous messages",
        conversation.store.len()
    ));
    if !conversation.record.title.is_empty() {
        utils::print_info(&format!("We were talking about: \"{}\"", conversation.record.title));
    }

    let recent: Vec<_> = conversation
        .store
        .recent(4)
        .iter()
        .filter(|turn| matches!(turn.role, Role::User | Role::Assistant))
        .collect();
    if recent.is_empty() {
        return;
    }

    utils::print_rule(50);
    for turn in recent {
        let text = turn.spoken_text();
        match turn.role {
            Role::User => println!("You: {}", text),
            _ => {
                let short: String = text.chars().take(100).collect();
                let ellipsis = if text.chars().count() > 100 { "..." } else { "" };
                println!("{}: {}{}", agent_name, short, ellipsis);
            }
        }
    }
    utils::print_rule(50);
}

fn print_table(conversations: &[ConversationSummary]) {
    utils::print_rule(80);
    println!(
        "{:>2} | {:<11} | {:<40} | {:>8} | {:>8}",
        "ID", "Last Chat", "Topic / Last Message", "Messages", "Commands"
    );
    utils::print_rule(80);
    for (index, summary) in conversations.iter().enumerate() {
        let modified: DateTime<Local> = summary.modified.into();
        let label: String = summary.label().chars().take(40).collect();
        println!(
            "{:>2} | {:<11} | {:<40} | {:>8} | {:>8}",
            index + 1,
            modified.format("%m/%d %H:%M"),
            label,
            summary.stats.message_count(),
            summary.stats.commands
        );
    }
    utils::print_rule(80);
}

async fn handle_list(storage: &dyn ConversationStorage, limit: usize) -> Result<()> {
    let conversations = catalog::list_recent(storage, limit).await?;
    if conversations.is_empty() {
        utils::print_info("No conversation logs found");
        return Ok(());
    }

    utils::print_header(&format!("{} recent conversations", conversations.len()));
    print_table(&conversations);
    for summary in &conversations {
        println!("  {}", storage.describe(&summary.file_name));
    }
    Ok(())
}

async fn handle_show(
    storage: &dyn ConversationStorage,
    conversation: &str,
    agent_name: &str,
) -> Result<()> {
    let details = catalog::details(storage, conversation).await?;
    let stats = &details.stats;

    utils::print_header(&format!("Conversation {}", details.file_name));
    if let Some(title) = &details.title {
        println!("Title:              {}", title);
    }
    println!("Total messages:     {}", stats.total);
    println!("User messages:      {}", stats.user);
    println!("Assistant messages: {}", stats.assistant);
    println!("System messages:    {}", stats.system);
    println!("Tool messages:      {}", stats.tool);
    println!("Commands executed:  {}", stats.commands);

    if details.recent.is_empty() {
        return Ok(());
    }
    utils::print_info("Recent messages:");
    utils::print_rule(60);
    for turn in &details.recent {
        match turn.role {
            Role::User => println!("You: {}", turn.text()),
            _ => println!("{}: {}", agent_name, turn.text()),
        }
    }
    utils::print_rule(60);
    Ok(())
}

async fn handle_clean(storage: &dyn ConversationStorage, file: Option<String>) -> Result<()> {
    if let Some(file) = file {
        let outcome = catalog::clean_one(storage, &file).await?;
        if outcome.rewritten {
            utils::print_success(&format!(
                "Cleaned {}: {} markers removed, {} preserved",
                file, outcome.removed, outcome.preserved
            ));
        } else {
            utils::print_info(&format!(
                "{} was already clean: {} markers preserved",
                file, outcome.preserved
            ));
        }
        return Ok(());
    }

    let report = catalog::clean_all(storage).await?;
    if report.files == 0 {
        utils::print_info("No conversation files found");
        return Ok(());
    }

    utils::print_header("Cache marker cleanup");
    println!("Files found:       {}", report.files);
    println!("Files processed:   {}", report.processed);
    println!("Files with errors: {}", report.errors);
    println!("Markers removed:   {}", report.removed);
    println!("Markers preserved: {}", report.preserved);
    if report.removed == 0 && report.processed > 0 {
        utils::print_success("All files were already clean");
    }
    Ok(())
}
