//! Cache Breakpoint Policy
//!
//! Pure decision logic for where the transient cache breakpoint lives. The
//! most recent assistant turn is the only transient boundary; every older
//! assistant turn is demoted. System turns keep their permanent marker.

use crate::core::message::{Role, Turn};
use std::collections::HashSet;

/// Mutations reconciliation must apply for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMutations {
    /// Index into the existing turns whose marker must be removed
    pub strip_from: Option<usize>,
    /// Index into the batch of the turn that receives the new marker
    pub mark_on: Option<usize>,
}

/// Outcome of [`normalize`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub removed: usize,
    pub preserved: usize,
}

/// Decide which marker to demote and which incoming turn to promote.
///
/// `seen_ids` are the ids already in the store. A batch turn can only be
/// marked when it is the last turn of the batch, is an assistant turn, and
/// will actually be appended.
pub fn compute_mutations(
    existing: &[Turn],
    seen_ids: &HashSet<String>,
    batch: &[Turn],
    enable_cache: bool,
) -> CacheMutations {
    if !enable_cache {
        return CacheMutations::default();
    }

    let strip_from = existing
        .iter()
        .rposition(|turn| turn.role == Role::Assistant && turn.has_cache_marker());

    let mark_on = batch.split_last().and_then(|(last, earlier)| {
        let id = last.id.as_deref()?;
        let fresh = !seen_ids.contains(id)
            && !earlier.iter().any(|turn| turn.id.as_deref() == Some(id));
        (last.role == Role::Assistant && fresh).then_some(batch.len() - 1)
    });

    CacheMutations {
        strip_from,
        mark_on,
    }
}

/// Enforce the single-breakpoint layout on an arbitrary log: markers stay on
/// system turns and on the last assistant turn, and are removed elsewhere.
pub fn normalize(turns: &mut [Turn]) -> NormalizeReport {
    let last_assistant = turns.iter().rposition(|turn| turn.role == Role::Assistant);
    let mut report = NormalizeReport::default();

    for (index, turn) in turns.iter_mut().enumerate() {
        if !turn.has_cache_marker() {
            continue;
        }
        if turn.role == Role::System || Some(index) == last_assistant {
            report.preserved += 1;
            continue;
        }
        if turn.strip_cache_marker() {
            tracing::debug!("[CachePolicy] Removed stray cache marker at index {}", index);
            report.removed += 1;
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::ContentPart;

    fn assistant(id: &str) -> Turn {
        Turn::assistant(id, vec![ContentPart::text(format!("reply {}", id))])
    }

    fn tool(id: &str) -> Turn {
        Turn::tool(id, vec![])
    }

    #[test]
    fn test_marks_last_assistant_and_strips_previous() {
        let existing = vec![
            Turn::system("sys").with_cache_marker(),
            Turn::user("hi"),
            assistant("a1").with_cache_marker(),
            Turn::user("again"),
        ];
        let seen = HashSet::from(["a1".to_string()]);
        let batch = vec![assistant("a2"), tool("t1"), assistant("a3")];

        let mutations = compute_mutations(&existing, &seen, &batch, true);

        assert_eq!(mutations.strip_from, Some(2));
        assert_eq!(mutations.mark_on, Some(2));
    }

    #[test]
    fn test_system_marker_is_never_a_strip_target() {
        let existing = vec![Turn::system("sys").with_cache_marker()];
        let mutations = compute_mutations(&existing, &HashSet::new(), &[assistant("a1")], true);

        assert_eq!(mutations.strip_from, None);
        assert_eq!(mutations.mark_on, Some(0));
    }

    #[test]
    fn test_tool_only_batch_places_no_marker() {
        let existing = vec![assistant("a1").with_cache_marker()];
        let seen = HashSet::from(["a1".to_string()]);

        let mutations = compute_mutations(&existing, &seen, &[tool("t1")], true);

        assert_eq!(mutations.strip_from, Some(0));
        assert_eq!(mutations.mark_on, None);
    }

    #[test]
    fn test_duplicate_last_turn_is_not_marked() {
        let seen = HashSet::from(["a1".to_string()]);
        let mutations = compute_mutations(&[], &seen, &[assistant("a1")], true);
        assert_eq!(mutations.mark_on, None);

        let batch = vec![assistant("a2"), assistant("a2")];
        let mutations = compute_mutations(&[], &HashSet::new(), &batch, true);
        assert_eq!(mutations.mark_on, None);
    }

    #[test]
    fn test_unidentified_last_turn_is_not_marked() {
        let mut anonymous = assistant("x");
        anonymous.id = None;

        let mutations = compute_mutations(&[], &HashSet::new(), &[anonymous], true);
        assert_eq!(mutations.mark_on, None);
    }

    #[test]
    fn test_disabled_cache_changes_nothing() {
        let existing = vec![assistant("a1").with_cache_marker()];
        let mutations = compute_mutations(&existing, &HashSet::new(), &[assistant("a2")], false);
        assert_eq!(mutations, CacheMutations::default());
    }

    #[test]
    fn test_normalize_keeps_system_and_final_assistant() {
        let mut turns = vec![
            Turn::system("sys").with_cache_marker(),
            Turn::user("q1").with_cache_marker(),
            assistant("a1").with_cache_marker(),
            assistant("a2").with_cache_marker(),
            tool("t1"),
            assistant("a3").with_cache_marker(),
        ];

        let report = normalize(&mut turns);

        assert_eq!(report, NormalizeReport { removed: 3, preserved: 2 });
        assert!(turns[0].has_cache_marker());
        assert!(!turns[1].has_cache_marker());
        assert!(!turns[2].has_cache_marker());
        assert!(!turns[3].has_cache_marker());
        assert!(turns[5].has_cache_marker());
    }

    #[test]
    fn test_normalize_on_clean_log_is_a_no_op() {
        let mut turns = vec![Turn::system("sys").with_cache_marker(), assistant("a1")];
        let report = normalize(&mut turns);
        assert_eq!(report, NormalizeReport { removed: 0, preserved: 1 });
    }
}
