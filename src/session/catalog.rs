//! Conversation Catalog
//!
//! Listing of resumable conversations and bulk repair of cache markers across
//! stored logs. A malformed file is reported and skipped; it never aborts the
//! batch.

use super::identity::parse_file_name;
use super::policy;
use super::store::MessageStore;
use crate::core::message::{ContentPart, Role, Turn, TurnContent};
use crate::storage::{ConversationStorage, StorageError, FILE_EXTENSION};
use crate::tools::shell::COMMAND_TOOL_NAME;
use anyhow::Result;
use std::time::SystemTime;

const PREVIEW_CHARS: usize = 60;
const DETAIL_RECENT_TURNS: usize = 8;

/// Per-role counts for one conversation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversationStats {
    pub total: usize,
    pub system: usize,
    pub user: usize,
    pub assistant: usize,
    pub tool: usize,
    pub commands: usize,
}

impl ConversationStats {
    pub fn from_turns(turns: &[Turn]) -> Self {
        let mut stats = Self {
            total: turns.len(),
            ..Self::default()
        };
        for turn in turns {
            match turn.role {
                Role::System => stats.system += 1,
                Role::User => stats.user += 1,
                Role::Assistant => stats.assistant += 1,
                Role::Tool => {
                    stats.tool += 1;
                    if let TurnContent::Parts(parts) = &turn.content {
                        stats.commands += parts
                            .iter()
                            .filter(|part| {
                                matches!(part, ContentPart::ToolResult { tool_name, .. } if tool_name == COMMAND_TOOL_NAME)
                            })
                            .count();
                    }
                }
            }
        }
        stats
    }

    /// User and assistant turns, the count shown to the operator
    pub fn message_count(&self) -> usize {
        self.user + self.assistant
    }
}

/// One resume candidate
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub file_name: String,
    pub modified: SystemTime,
    pub title: Option<String>,
    pub preview: String,
    pub stats: ConversationStats,
}

impl ConversationSummary {
    /// Title if the file name carries one, else the last user message
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.preview)
    }
}

fn preview(turns: &[Turn]) -> String {
    turns
        .iter()
        .rev()
        .find(|turn| turn.role == Role::User)
        .map(|turn| turn.text().chars().take(PREVIEW_CHARS).collect())
        .unwrap_or_else(|| "No messages".to_string())
}

/// Most recently modified conversations first, at most `limit` of them
pub async fn list_recent(
    storage: &dyn ConversationStorage,
    limit: usize,
) -> Result<Vec<ConversationSummary>> {
    let mut files = storage.list().await?;
    files.sort_by(|a, b| b.modified.cmp(&a.modified));

    let mut summaries = Vec::new();
    for file in files.into_iter().take(limit) {
        let turns = match storage.load(&file.file_name).await {
            Ok(turns) => turns,
            Err(e) => {
                tracing::warn!("[Catalog] Skipping '{}': {}", file.file_name, e);
                continue;
            }
        };
        summaries.push(ConversationSummary {
            title: parse_file_name(&file.file_name).and_then(|(_, title)| title),
            preview: preview(&turns),
            stats: ConversationStats::from_turns(&turns),
            file_name: file.file_name,
            modified: file.modified,
        });
    }

    Ok(summaries)
}

/// Everything `show` prints for one conversation
#[derive(Debug, Clone)]
pub struct ConversationDetails {
    pub file_name: String,
    pub title: Option<String>,
    pub stats: ConversationStats,
    /// User and assistant turns among the last few of the log
    pub recent: Vec<Turn>,
}

/// Load one conversation for display. `identifier` is either a 1-based
/// position in the [`list_recent`] order or a file name, with or without
/// the `.json` extension.
pub async fn details(
    storage: &dyn ConversationStorage,
    identifier: &str,
) -> Result<ConversationDetails> {
    let file_name = match identifier.parse::<usize>() {
        Ok(position) => {
            let mut files = storage.list().await?;
            files.sort_by(|a, b| b.modified.cmp(&a.modified));
            position
                .checked_sub(1)
                .and_then(|index| files.into_iter().nth(index))
                .map(|file| file.file_name)
                .ok_or_else(|| StorageError::NotFound(identifier.to_string()))?
        }
        Err(_) if identifier.ends_with(FILE_EXTENSION) => identifier.to_string(),
        Err(_) => format!("{}{}", identifier, FILE_EXTENSION),
    };

    let turns = storage.load(&file_name).await?;
    let stats = ConversationStats::from_turns(&turns);
    let (store, _) = MessageStore::from_turns(turns);
    let recent = store
        .recent(DETAIL_RECENT_TURNS)
        .iter()
        .filter(|turn| matches!(turn.role, Role::User | Role::Assistant))
        .cloned()
        .collect();

    Ok(ConversationDetails {
        title: parse_file_name(&file_name).and_then(|(_, title)| title),
        file_name,
        stats,
        recent,
    })
}

/// Result of cleaning one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanOutcome {
    pub removed: usize,
    pub preserved: usize,
    pub rewritten: bool,
}

/// Totals across a bulk clean
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub files: usize,
    pub processed: usize,
    pub errors: usize,
    pub removed: usize,
    pub preserved: usize,
}

/// Normalize the cache markers of one stored conversation, rewriting it only
/// when something changed
pub async fn clean_one(
    storage: &dyn ConversationStorage,
    file_name: &str,
) -> Result<CleanOutcome, StorageError> {
    let mut turns = storage.load(file_name).await?;
    let report = policy::normalize(&mut turns);
    let rewritten = report.removed > 0;
    if rewritten {
        storage.save(file_name, &turns).await?;
        tracing::info!(
            "[Catalog] Cleaned '{}': {} removed, {} preserved",
            file_name,
            report.removed,
            report.preserved
        );
    }
    Ok(CleanOutcome {
        removed: report.removed,
        preserved: report.preserved,
        rewritten,
    })
}

/// Clean every stored conversation, in file name order
pub async fn clean_all(storage: &dyn ConversationStorage) -> Result<CleanReport> {
    let mut names: Vec<String> = storage
        .list()
        .await?
        .into_iter()
        .map(|file| file.file_name)
        .collect();
    names.sort();

    let mut report = CleanReport {
        files: names.len(),
        ..CleanReport::default()
    };
    for name in names {
        match clean_one(storage, &name).await {
            Ok(outcome) => {
                report.processed += 1;
                report.removed += outcome.removed;
                report.preserved += outcome.preserved;
            }
            Err(e) => {
                tracing::warn!("[Catalog] Skipping '{}': {}", name, e);
                report.errors += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryStorage;
    use std::time::Duration;

    fn assistant(id: &str) -> Turn {
        Turn::assistant(id, vec![ContentPart::text("ok")])
    }

    fn command_result(id: &str) -> Turn {
        Turn::tool(
            id,
            vec![ContentPart::ToolResult {
                tool_call_id: id.to_string(),
                tool_name: COMMAND_TOOL_NAME.to_string(),
                result: serde_json::json!({"success": true}),
                is_error: None,
            }],
        )
    }

    #[test]
    fn test_stats() {
        let turns = vec![
            Turn::system("sys"),
            Turn::user("ls"),
            assistant("a1"),
            command_result("t1"),
            assistant("a2"),
        ];

        let stats = ConversationStats::from_turns(&turns);

        assert_eq!(stats.total, 5);
        assert_eq!(stats.commands, 1);
        assert_eq!(stats.message_count(), 3);
    }

    #[tokio::test]
    async fn test_list_recent_orders_and_skips_malformed() {
        let storage = InMemoryStorage::new();
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        storage
            .save("conversation-2024-01-01T00-00-00-000Z.json", &[Turn::user("first question")])
            .await
            .unwrap();
        storage
            .save("conversation-2024-01-02T00-00-00-000Z-fix_bug.json", &[Turn::user("second")])
            .await
            .unwrap();
        storage.insert_raw("conversation-broken.json", "{oops").await;
        storage
            .touch("conversation-2024-01-01T00-00-00-000Z.json", base)
            .await;
        storage
            .touch(
                "conversation-2024-01-02T00-00-00-000Z-fix_bug.json",
                base + Duration::from_secs(60),
            )
            .await;
        storage
            .touch("conversation-broken.json", base + Duration::from_secs(120))
            .await;

        let summaries = list_recent(&storage, 10).await.unwrap();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].label(), "Fix Bug");
        assert_eq!(summaries[1].label(), "first question");
        assert_eq!(summaries[1].stats.message_count(), 1);

        assert_eq!(list_recent(&storage, 1).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_details_by_name_and_position() {
        let storage = InMemoryStorage::new();
        let mut turns = vec![Turn::system("sys")];
        for n in 0..5 {
            turns.push(Turn::user(format!("question {}", n)));
            turns.push(assistant(&format!("a{}", n)));
        }
        turns.push(command_result("t1"));
        storage
            .save("conversation-2024-01-02T00-00-00-000Z-fix_bug.json", &turns)
            .await
            .unwrap();

        let by_stem = details(&storage, "conversation-2024-01-02T00-00-00-000Z-fix_bug")
            .await
            .unwrap();
        let by_position = details(&storage, "1").await.unwrap();

        assert_eq!(by_stem.file_name, by_position.file_name);
        assert_eq!(by_stem.title.as_deref(), Some("Fix Bug"));
        assert_eq!(by_stem.stats.total, 12);
        assert_eq!(by_stem.stats.system, 1);
        assert_eq!(by_stem.stats.tool, 1);
        assert_eq!(by_stem.stats.commands, 1);
        // the last 8 turns minus the trailing tool turn
        assert_eq!(by_stem.recent.len(), 7);
        assert_eq!(by_stem.recent.last().unwrap().id.as_deref(), Some("a4"));

        assert!(details(&storage, "2").await.is_err());
        assert!(details(&storage, "0").await.is_err());
        assert!(details(&storage, "conversation-none").await.is_err());
    }

    #[tokio::test]
    async fn test_clean_all() {
        let storage = InMemoryStorage::new();
        storage
            .save(
                "conversation-a.json",
                &[
                    Turn::system("sys").with_cache_marker(),
                    assistant("a1").with_cache_marker(),
                    assistant("a2").with_cache_marker(),
                ],
            )
            .await
            .unwrap();
        storage
            .save(
                "conversation-b.json",
                &[Turn::system("sys").with_cache_marker(), assistant("b1")],
            )
            .await
            .unwrap();
        storage.insert_raw("conversation-c.json", "42").await;

        let report = clean_all(&storage).await.unwrap();

        assert_eq!(
            report,
            CleanReport { files: 3, processed: 2, errors: 1, removed: 1, preserved: 3 }
        );
        let cleaned = storage.load("conversation-a.json").await.unwrap();
        assert!(!cleaned[1].has_cache_marker());
        assert!(cleaned[2].has_cache_marker());

        let again = clean_one(&storage, "conversation-a.json").await.unwrap();
        assert!(!again.rewritten);
    }
}
