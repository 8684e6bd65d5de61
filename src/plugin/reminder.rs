//! Decides whether an idle session gets an init or update reminder

use super::context::project_name;
use super::state::RootState;
use std::path::Path;

const MAX_LISTED_FILES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderDecision {
    Skip(&'static str),
    NoTrigger,
    FireInit(String),
    FireUpdate(String),
}

/// Evaluate one root's state after git detection has refreshed it.
/// Records the fired signature / init flag as a side effect.
pub fn evaluate(
    state: &mut RootState,
    root: &Path,
    has_memory_bank: bool,
    plan_outputted: bool,
) -> ReminderDecision {
    if state.memory_bank_reviewed {
        return ReminderDecision::Skip("memory bank already reviewed");
    }

    if !has_memory_bank {
        if state.skip_init {
            return ReminderDecision::Skip("init skipped by user");
        }
        if state.init_reminder_fired {
            return ReminderDecision::Skip("init reminder already sent");
        }
        state.init_reminder_fired = true;
        return ReminderDecision::FireInit(init_text(root));
    }

    state.init_reminder_fired = false;

    let mut triggers = Vec::new();
    if state.has_new_requirement {
        triggers.push("- New requirement discussed");
    }
    if state.has_tech_decision {
        triggers.push("- Technical decision made");
    }
    if state.has_bug_fix {
        triggers.push("- Bug fix / lesson learned");
    }
    if !state.files_modified.is_empty() {
        triggers.push("- Code files changed");
    }

    if triggers.is_empty() {
        return ReminderDecision::NoTrigger;
    }
    if plan_outputted {
        return ReminderDecision::Skip("update plan already written");
    }

    let signature = state.signature();
    if state.last_synced_signature.as_deref() == Some(signature.as_str()) {
        return ReminderDecision::Skip("already synced");
    }
    if state.last_update_signature.as_deref() == Some(signature.as_str()) {
        return ReminderDecision::Skip("already reminded");
    }

    state.last_update_signature = Some(signature);
    ReminderDecision::FireUpdate(update_text(state, root, &triggers))
}

fn init_text(root: &Path) -> String {
    format!(
        "## [SYSTEM REMINDER - Memory Bank Init]\n\n\
         Project `{}` has no Memory Bank yet.\n\n\
         **Project path**: `{}`\n\n\
         Optional: run `/memory-bank-refresh` to enable project memory.\n\n\
         Note: this is an automatic reminder, not a user message.",
        project_name(root),
        root.display()
    )
}

fn update_text(state: &RootState, root: &Path, triggers: &[&str]) -> String {
    let files: Vec<String> = state
        .files_modified
        .iter()
        .map(|abs| abs.strip_prefix(root).unwrap_or(abs).display().to_string())
        .collect();

    let mut files_section = String::new();
    if !files.is_empty() {
        let listed: Vec<String> = files
            .iter()
            .take(MAX_LISTED_FILES)
            .map(|f| format!("- {}", f))
            .collect();
        files_section = format!("\n**Changed files**:\n{}", listed.join("\n"));
        if files.len() > MAX_LISTED_FILES {
            files_section.push_str(&format!("\n(+{} more)", files.len() - MAX_LISTED_FILES));
        }
        files_section.push('\n');
    }

    format!(
        "## [SYSTEM REMINDER - Memory Bank Update]\n\n\
         Changes detected this turn:{}\n\
         **Triggers**:\n{}\n\n\
         **Options**:\n\
         1. To update → reply \"update\" and write an update plan\n\
         2. To update and commit → reply \"update and commit\"\n\
         3. Not needed → reply \"skip\"",
        files_section,
        triggers.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn root() -> PathBuf {
        PathBuf::from("/proj")
    }

    #[test]
    fn test_init_fires_once() {
        let mut state = RootState::default();
        assert!(matches!(evaluate(&mut state, &root(), false, false), ReminderDecision::FireInit(_)));
        assert_eq!(
            evaluate(&mut state, &root(), false, false),
            ReminderDecision::Skip("init reminder already sent")
        );
    }

    #[test]
    fn test_skip_init_suppresses_init() {
        let mut state = RootState {
            skip_init: true,
            ..Default::default()
        };
        assert_eq!(evaluate(&mut state, &root(), false, false), ReminderDecision::Skip("init skipped by user"));
    }

    #[test]
    fn test_no_triggers() {
        let mut state = RootState::default();
        assert_eq!(evaluate(&mut state, &root(), true, false), ReminderDecision::NoTrigger);
    }

    #[test]
    fn test_same_signature_fires_once() {
        let mut state = RootState {
            has_bug_fix: true,
            files_modified: vec![root().join("src/a.rs")],
            ..Default::default()
        };
        let ReminderDecision::FireUpdate(text) = evaluate(&mut state, &root(), true, false) else {
            panic!("expected update reminder");
        };
        assert!(text.contains("- src/a.rs"));
        assert!(text.contains("Bug fix"));

        assert_eq!(evaluate(&mut state, &root(), true, false), ReminderDecision::Skip("already reminded"));

        state.has_tech_decision = true;
        assert!(matches!(evaluate(&mut state, &root(), true, false), ReminderDecision::FireUpdate(_)));
    }

    #[test]
    fn test_synced_signature_skips() {
        let mut state = RootState {
            has_new_requirement: true,
            ..Default::default()
        };
        state.last_synced_signature = Some(state.signature());
        assert_eq!(evaluate(&mut state, &root(), true, false), ReminderDecision::Skip("already synced"));
    }

    #[test]
    fn test_plan_and_review_suppress() {
        let mut state = RootState {
            has_new_requirement: true,
            ..Default::default()
        };
        assert_eq!(
            evaluate(&mut state, &root(), true, true),
            ReminderDecision::Skip("update plan already written")
        );
        state.memory_bank_reviewed = true;
        assert_eq!(
            evaluate(&mut state, &root(), true, false),
            ReminderDecision::Skip("memory bank already reviewed")
        );
    }

    #[test]
    fn test_file_list_truncated() {
        let mut state = RootState {
            files_modified: (0..8).map(|i| root().join(format!("src/f{}.rs", i))).collect(),
            ..Default::default()
        };
        let ReminderDecision::FireUpdate(text) = evaluate(&mut state, &root(), true, false) else {
            panic!("expected update reminder");
        };
        assert!(text.contains("- src/f4.rs"));
        assert!(!text.contains("- src/f5.rs"));
        assert!(text.contains("(+3 more)"));
    }
}
