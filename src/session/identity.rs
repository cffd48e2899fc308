//! Conversation Identity
//!
//! Information Hiding:
//! - File naming scheme (`conversation-<timestamp>[-<slug>].json`) hidden here
//! - Repair of malformed ids and collision-safe renames go through storage,
//!   so a failed rename leaves the old, valid path in place

use crate::storage::{ConversationStorage, FILE_EXTENSION, FILE_PREFIX};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

fn timestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}-\d{3}Z$").expect("valid timestamp regex")
    })
}

fn titled_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}-\d{3}Z)(?:-(.+))?$")
            .expect("valid file name regex")
    })
}

/// Filesystem-safe ISO-8601 timestamp: `YYYY-MM-DDTHH-mm-ss-sssZ`
pub fn conversation_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}

pub fn is_valid_conversation_id(id: &str) -> bool {
    timestamp_pattern().is_match(id)
}

/// Lowercase, keep `[a-zA-Z0-9\s\-_]`, collapse whitespace runs to `_`
/// Leading and trailing whitespace is trimmed, never turned into `_`, so a
/// padded title maps to the same file name as the bare one.
pub fn slugify(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '_')
        .collect();
    kept.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Underscores back to spaces, first letter of every word uppercased.
/// Lossy: the original casing of the title is not recovered.
pub fn deslugify(slug: &str) -> String {
    let spaced = slug.replace('_', " ");
    let mut out = String::with_capacity(spaced.len());
    let mut at_word_start = true;
    for c in spaced.chars() {
        let is_word = c.is_alphanumeric() || c == '_';
        if is_word && at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !is_word;
    }
    out
}

/// Deterministic file name for an id and title
pub fn conversation_file_name(id: &str, title: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        format!("{}{}{}", FILE_PREFIX, id, FILE_EXTENSION)
    } else {
        format!("{}{}-{}{}", FILE_PREFIX, id, slug, FILE_EXTENSION)
    }
}

/// Split a file name into (id, title) if it follows the strict naming scheme
pub fn parse_file_name(file_name: &str) -> Option<(String, Option<String>)> {
    let stem = file_name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_EXTENSION)?;
    let captures = titled_name_pattern().captures(stem)?;
    let id = captures.get(1)?.as_str().to_string();
    let title = captures.get(2).map(|m| deslugify(m.as_str()));
    Some((id, title))
}

/// Durable identity of one conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRecord {
    pub id: String,
    pub title: String,
    pub file_name: String,
    pub last_modified: Option<SystemTime>,
}

/// Creates, resolves and renames conversation records against a storage backend
#[derive(Clone)]
pub struct ConversationIdentity {
    storage: Arc<dyn ConversationStorage>,
}

impl ConversationIdentity {
    pub fn new(storage: Arc<dyn ConversationStorage>) -> Self {
        Self { storage }
    }

    /// Fresh record with an empty title
    pub fn create(&self, fallback_timestamp: &str) -> ConversationRecord {
        ConversationRecord {
            id: fallback_timestamp.to_string(),
            title: String::new(),
            file_name: conversation_file_name(fallback_timestamp, ""),
            last_modified: None,
        }
    }

    /// Resolve the record for a selected file, repairing a malformed id.
    ///
    /// A valid name is returned as-is. A malformed one gets `fallback_timestamp`
    /// as its id and the file is moved to the matching deterministic name,
    /// unless that name is taken, in which case the old name is kept.
    pub async fn resolve(
        &self,
        selected_file_name: &str,
        fallback_timestamp: &str,
    ) -> ConversationRecord {
        if let Some((id, title)) = parse_file_name(selected_file_name) {
            return ConversationRecord {
                id,
                title: title.unwrap_or_default(),
                file_name: selected_file_name.to_string(),
                last_modified: None,
            };
        }

        let stem = selected_file_name
            .strip_prefix(FILE_PREFIX)
            .unwrap_or(selected_file_name);
        let stem = stem.strip_suffix(FILE_EXTENSION).unwrap_or(stem);
        let title = stem
            .rsplit_once('-')
            .map(|(_, slug)| deslugify(slug))
            .unwrap_or_default();

        tracing::warn!(
            "[ConversationIdentity] '{}' has a malformed id, repairing with '{}'",
            selected_file_name,
            fallback_timestamp
        );

        let current = ConversationRecord {
            id: fallback_timestamp.to_string(),
            title: title.clone(),
            file_name: selected_file_name.to_string(),
            last_modified: None,
        };
        let target = conversation_file_name(fallback_timestamp, &title);
        self.move_file(current, target, title).await
    }

    /// Rename the record for a new title. Returns the record unchanged when
    /// the path would not change, the current file is missing, or the target
    /// is already taken.
    pub async fn rename(&self, record: &ConversationRecord, new_title: &str) -> ConversationRecord {
        let target = conversation_file_name(&record.id, new_title);
        if target == record.file_name {
            return record.clone();
        }

        match self.storage.exists(&record.file_name).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(
                    "[ConversationIdentity] '{}' not written yet, keeping name",
                    record.file_name
                );
                return record.clone();
            }
            Err(e) => {
                tracing::warn!("[ConversationIdentity] Cannot check '{}': {}", record.file_name, e);
                return record.clone();
            }
        }

        self.move_file(record.clone(), target, new_title.to_string())
            .await
    }

    async fn move_file(
        &self,
        record: ConversationRecord,
        target: String,
        title: String,
    ) -> ConversationRecord {
        if target == record.file_name {
            return ConversationRecord { title, ..record };
        }

        match self.storage.exists(&target).await {
            Ok(false) => {}
            Ok(true) => {
                tracing::warn!(
                    "[ConversationIdentity] '{}' already exists, keeping '{}'",
                    target,
                    record.file_name
                );
                return record;
            }
            Err(e) => {
                tracing::warn!("[ConversationIdentity] Cannot check '{}': {}", target, e);
                return record;
            }
        }

        match self.storage.rename(&record.file_name, &target).await {
            Ok(()) => {
                tracing::info!(
                    "[ConversationIdentity] Renamed '{}' -> '{}'",
                    record.file_name,
                    target
                );
                ConversationRecord {
                    title,
                    file_name: target,
                    ..record
                }
            }
            Err(e) => {
                tracing::warn!(
                    "[ConversationIdentity] Rename of '{}' failed, keeping old name: {}",
                    record.file_name,
                    e
                );
                record
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Turn;
    use crate::storage::memory::InMemoryStorage;
    use chrono::TimeZone;

    const TS: &str = "2024-01-01T00-00-00-000Z";

    fn identity() -> (InMemoryStorage, ConversationIdentity) {
        let storage = InMemoryStorage::new();
        let identity = ConversationIdentity::new(Arc::new(storage.clone()));
        (storage, identity)
    }

    #[test]
    fn test_timestamp_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
            + chrono::Duration::milliseconds(42);
        let ts = conversation_timestamp(at);

        assert_eq!(ts, "2024-03-09T14-05-07-042Z");
        assert!(is_valid_conversation_id(&ts));
        assert!(!is_valid_conversation_id("bad"));
        assert!(!is_valid_conversation_id("2024-03-09T14:05:07.042Z"));
    }

    #[test]
    fn test_slug_round_trip_is_lossy() {
        assert_eq!(slugify("Fix Bug"), "fix_bug");
        assert_eq!(slugify("  Deploy   the API! (v2) "), "deploy_the_api_v2");
        assert_eq!(slugify("?!"), "");
        assert_eq!(deslugify("fix_bug"), "Fix Bug");
        assert_eq!(deslugify("deploy_the_api_v2"), "Deploy The Api V2");
    }

    #[test]
    fn test_slugify_trims_outer_whitespace() {
        assert_eq!(slugify("  Fix Bug\t\n"), "fix_bug");
        assert_eq!(
            conversation_file_name("2024-01-01T00-00-00-000Z", " Fix Bug "),
            conversation_file_name("2024-01-01T00-00-00-000Z", "Fix Bug")
        );
    }

    #[test]
    fn test_file_name_is_deterministic() {
        assert_eq!(
            conversation_file_name(TS, ""),
            "conversation-2024-01-01T00-00-00-000Z.json"
        );
        assert_eq!(
            conversation_file_name(TS, "Fix Bug"),
            "conversation-2024-01-01T00-00-00-000Z-fix_bug.json"
        );
    }

    #[test]
    fn test_parse_file_name() {
        assert_eq!(
            parse_file_name("conversation-2024-01-01T00-00-00-000Z-fix_bug.json"),
            Some((TS.to_string(), Some("Fix Bug".to_string())))
        );
        assert_eq!(
            parse_file_name("conversation-2024-01-01T00-00-00-000Z.json"),
            Some((TS.to_string(), None))
        );
        assert_eq!(parse_file_name("conversation-bad-id-My_Title.json"), None);
    }

    #[tokio::test]
    async fn test_rename_on_first_title() {
        let (storage, identity) = identity();
        let record = identity.create(TS);
        storage.save(&record.file_name, &[Turn::user("hi")]).await.unwrap();

        let renamed = identity.rename(&record, "Fix Bug").await;

        assert_eq!(renamed.title, "Fix Bug");
        assert_eq!(
            renamed.file_name,
            "conversation-2024-01-01T00-00-00-000Z-fix_bug.json"
        );
        assert_eq!(storage.file_names().await, vec![renamed.file_name.clone()]);

        let again = identity.rename(&renamed, "Fix Bug").await;
        assert_eq!(again, renamed);
    }

    #[tokio::test]
    async fn test_rename_skipped_when_target_exists() {
        let (storage, identity) = identity();
        let record = identity.create(TS);
        storage.save(&record.file_name, &[Turn::user("mine")]).await.unwrap();
        storage
            .save("conversation-2024-01-01T00-00-00-000Z-fix_bug.json", &[])
            .await
            .unwrap();

        let result = identity.rename(&record, "Fix Bug").await;

        assert_eq!(result, record);
        assert_eq!(storage.load(&record.file_name).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rename_before_first_save_keeps_record() {
        let (_storage, identity) = identity();
        let record = identity.create(TS);

        assert_eq!(identity.rename(&record, "Fix Bug").await, record);
    }

    #[tokio::test]
    async fn test_resolve_valid_name_is_untouched() {
        let (storage, identity) = identity();
        let name = "conversation-2023-05-06T07-08-09-010Z-Fix_Bug.json";
        storage.save(name, &[]).await.unwrap();

        let record = identity.resolve(name, TS).await;

        assert_eq!(record.id, "2023-05-06T07-08-09-010Z");
        assert_eq!(record.title, "Fix Bug");
        assert_eq!(record.file_name, name);
        assert_eq!(storage.file_names().await, vec![name.to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_repairs_malformed_id() {
        let (storage, identity) = identity();
        storage
            .save("conversation-bad-id-My_Title.json", &[Turn::user("hi")])
            .await
            .unwrap();

        let record = identity.resolve("conversation-bad-id-My_Title.json", TS).await;

        assert_eq!(record.id, TS);
        assert_eq!(record.title, "My Title");
        assert_eq!(
            record.file_name,
            "conversation-2024-01-01T00-00-00-000Z-my_title.json"
        );
        assert_eq!(storage.file_names().await, vec![record.file_name.clone()]);

        let again = identity.resolve(&record.file_name, "2030-01-01T00-00-00-000Z").await;
        assert_eq!(again.id, TS);
        assert_eq!(again.file_name, record.file_name);
    }

    #[tokio::test]
    async fn test_resolve_keeps_old_name_on_collision() {
        let (storage, identity) = identity();
        storage.save("conversation-oops.json", &[Turn::user("a")]).await.unwrap();
        storage
            .save("conversation-2024-01-01T00-00-00-000Z.json", &[])
            .await
            .unwrap();

        let record = identity.resolve("conversation-oops.json", TS).await;

        assert_eq!(record.id, TS);
        assert_eq!(record.title, "");
        assert_eq!(record.file_name, "conversation-oops.json");
    }
}
