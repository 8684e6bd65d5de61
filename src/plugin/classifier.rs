//! Keyword heuristics over chat messages
//!
//! Matching is approximate on purpose: a false positive costs one extra reminder.

use anyhow::Result;
use regex::Regex;

/// Flags raised by one user message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerSet {
    pub new_requirement: bool,
    pub tech_decision: bool,
    pub bug_fix: bool,
    /// "skip init": do not suggest creating a memory store
    pub skip_init: bool,
    /// "already reviewed": no update reminder needed
    pub reviewed: bool,
}

impl TriggerSet {
    pub fn any(&self) -> bool {
        self.new_requirement || self.tech_decision || self.bug_fix || self.skip_init || self.reviewed
    }
}

pub trait TriggerClassifier: Send + Sync {
    fn classify(&self, text: &str) -> TriggerSet;

    /// Whether an assistant message contains a memory update plan
    fn is_update_plan(&self, text: &str) -> bool;
}

pub struct KeywordClassifier {
    new_requirement: Regex,
    tech_decision: Regex,
    bug_fix: Regex,
    skip_init: Regex,
    reviewed: Regex,
    update_plan: Regex,
}

impl KeywordClassifier {
    pub fn new() -> Result<Self> {
        Ok(Self {
            new_requirement: Regex::new(r"新需求|new req|feature request|需要实现|要做一个")?,
            tech_decision: Regex::new(r"决定用|选择了|我们用|技术选型|architecture|决策")?,
            bug_fix: Regex::new(r"bug|修复|fix|问题|error|踩坑|教训")?,
            skip_init: Regex::new(r"跳过初始化|skip.?init")?,
            reviewed: Regex::new(r"memory.?bank.?reviewed|无需更新|不需要更新|已检查")?,
            update_plan: Regex::new(r"(?i)memory bank 更新计划|memory bank update plan")?,
        })
    }
}

impl TriggerClassifier for KeywordClassifier {
    fn classify(&self, text: &str) -> TriggerSet {
        let content = text.to_lowercase();
        let trimmed = content.trim();
        TriggerSet {
            new_requirement: self.new_requirement.is_match(&content),
            tech_decision: self.tech_decision.is_match(&content),
            bug_fix: self.bug_fix.is_match(&content),
            skip_init: self.skip_init.is_match(&content),
            reviewed: self.reviewed.is_match(&content) || trimmed == "跳过" || trimmed == "skip",
        }
    }

    fn is_update_plan(&self, text: &str) -> bool {
        self.update_plan.is_match(text)
    }
}

/// Messages the plugin posted itself, which must not feed the classifier
pub fn is_plugin_generated(variant: Option<&str>, content: &str) -> bool {
    variant == Some(super::host::PLUGIN_PROMPT_VARIANT)
        || content.contains("## [Memory Bank]")
        || content.contains("## [SYSTEM REMINDER - Memory Bank")
}
