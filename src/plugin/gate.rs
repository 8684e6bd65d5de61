//! The `tool.execute.before` write gate
//!
//! Layers run in a fixed order and the first one that blocks wins:
//! 1. memory-store guards (file type, shell writes)
//! 2. recovery gate (anchors unread since the last compaction)
//! 3. context gating (risky writes before the project context was read)
//! 4. doc-first gate (code writes before the memory store was consulted)
//!
//! Reads are observed before any layer runs so a read can satisfy a later write.

use super::anchors::{existing_anchors, is_anchor_path, touch_lru};
use super::config::GatingMode;
use super::host::{PromptRequest, ToolCall};
use super::paths::canonicalize_rel;
use super::risk::RiskLevel;
use super::write_targets::is_write_tool;
use super::{lock, MemoryBankPlugin};
use crate::install::AGENT_NAME;
use serde_json::json;
use thiserror::Error;

const PATTERNS_FILE: &str = "memory-bank/details/patterns.md";
const CODE_EXTENSIONS: &[&str] = &["py", "ts", "tsx", "js", "jsx", "go", "rs", "vue", "svelte"];
const WRITER_GUIDE: &str = "~/.config/opencode/skill/memory-bank/references/writer.md";

const CONTEXT_REMEDIATION: &str = "First run: read({ filePath: \"memory-bank/details/patterns.md\" })\n\
     Or call: proxy_task({ subagent_type: \"memory-reader\", ... })";

const DOC_FIRST_STEPS: &str = "**Step 1: check existing docs**\n\
     Search memory-bank/details/ for an existing requirement or design doc.\n\n\
     **Step 2: act on the result**\n\
     • **A related doc exists** → check it still describes the change; fix the doc before the code\n\
     • **No related doc** → record it first:\n  \
       - Bug fix / lesson → learnings/YYYY-MM-DD-xxx.md\n  \
       - New feature / requirement → requirements/REQ-xxx.md\n  \
       - Refactor / optimization → design/design-xxx.md\n  \
       - Small change → append to progress.md\n\n\
     Write those files directly under memory-bank/ with the write/edit tools.";

/// Why a tool call was refused; the message tells the agent how to proceed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("[Memory Bank Guard] Only .md files may be written under memory-bank/.\nTarget file: {target}\nUse a .md file name, or write the file outside memory-bank/.")]
    FileType { target: String },

    #[error("[Memory Bank Guard] Shell writes into memory-bank/ are not supported (target: {target}).\nUse the write/edit tools to change memory-bank/ files.")]
    ShellWrite { target: String },

    #[error(
        "[Memory Bank Gating] {risk}-risk {kind} detected, but the project context was not read this turn.\n{remediation}",
        remediation = CONTEXT_REMEDIATION
    )]
    Gating { risk: RiskLevel, kind: &'static str },

    #[error(
        "[Doc-First Gate] Check the related docs before writing code.\n\n{steps}\nConfirm the docs are right, then make the code change.",
        steps = DOC_FIRST_STEPS
    )]
    DocFirst,

    #[error("[Recovery Gate] Compaction detected. Before proceeding, read these anchor files:\n{}\nOr call: proxy_task({{ subagent_type: \"memory-reader\", ... }})", format_anchor_reads(.anchors))]
    Recovery { anchors: Vec<String> },
}

fn format_anchor_reads(anchors: &[String]) -> String {
    anchors
        .iter()
        .map(|p| format!("  read({{ filePath: \"{}\" }})", p))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_code_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower
        .rsplit_once('.')
        .is_some_and(|(_, ext)| CODE_EXTENSIONS.contains(&ext))
}

enum RecoveryOutcome {
    Clear,
    Cleared(&'static str),
    Blocked(Vec<String>),
}

impl MemoryBankPlugin {
    /// Inspect a tool call before it runs; an error aborts the call
    pub async fn tool_execute_before(&self, call: &ToolCall) -> Result<(), GateError> {
        let tool = call.tool_lower();
        let session = call.session_id.as_str();

        self.observe_reads(session, &tool, call).await;

        let targets = if is_write_tool(&tool) {
            self.targets.extract(&tool, &call.args)
        } else {
            Vec::new()
        };
        let store_targets: Vec<&String> = targets
            .iter()
            .filter(|t| self.paths.is_memory_bank_path(t))
            .collect();
        let command = if tool == "bash" {
            call.str_arg("command").unwrap_or_default()
        } else {
            ""
        };

        if let Some(target) = store_targets.iter().find(|t| !t.to_lowercase().ends_with(".md")) {
            self.log
                .warn("Memory Bank write blocked (non-.md file)", json!({ "session": session, "tool": tool, "target": target }))
                .await;
            return Err(GateError::FileType {
                target: target.to_string(),
            });
        }
        if let Some(target) = self.shell.memory_bank_write(command, &self.paths) {
            self.log
                .warn("Memory Bank shell write blocked", json!({ "session": session, "command": truncate(command, 200) }))
                .await;
            return Err(GateError::ShellWrite { target });
        }

        self.recovery_gate(session, &tool, &targets, command).await?;
        self.context_gate(session, &tool, &targets, !store_targets.is_empty(), command)
            .await?;
        self.doc_first_gate(session, &tool, &targets).await?;

        if !store_targets.is_empty() {
            self.writing_guide(session).await;
        }
        Ok(())
    }

    /// Record reads that make progress on recovery, anchor tracking and gating
    async fn observe_reads(&self, session: &str, tool: &str, call: &ToolCall) {
        let reader_called = tool == "proxy_task" && call.str_arg("subagent_type") == Some(AGENT_NAME);
        let read_target = if tool == "read" { call.read_target() } else { None };
        if read_target.is_none() && !reader_called {
            return;
        }

        let root = self.paths.root();
        let canonical = read_target.map(|t| canonicalize_rel(t, root)).unwrap_or_default();
        let mut cleared = None;
        let mut context_satisfied = false;
        {
            let mut registry = lock(&self.registry);
            let anchors = registry.anchors(session);
            match anchors.recovery.as_mut() {
                Some(recovery) => {
                    if !canonical.is_empty() && recovery.anchor_paths.contains(&canonical) {
                        recovery.read_files.insert(canonical.clone());
                        if recovery.all_read() {
                            anchors.recovery = None;
                            cleared = Some("all anchors read");
                        }
                    }
                    if reader_called && anchors.recovery.take().is_some() {
                        cleared = Some("memory-reader called");
                    }
                }
                None => {
                    if !canonical.is_empty() && is_anchor_path(&canonical) {
                        touch_lru(&mut anchors.anchors_lru, &canonical);
                    }
                }
            }

            if self.config.guard_mode != GatingMode::Off {
                let gating = registry.gating(session);
                if let Some(target) = read_target.filter(|t| self.paths.is_memory_bank_path(t)) {
                    gating.read_files.insert(target.to_string());
                    if canonical.to_lowercase() == PATTERNS_FILE {
                        gating.context_satisfied = true;
                        context_satisfied = true;
                    }
                }
                if reader_called {
                    gating.context_satisfied = true;
                    context_satisfied = true;
                }
            }
        }

        if let Some(reason) = cleared {
            self.log
                .info("Recovery Gate: cleared", json!({ "session": session, "reason": reason }))
                .await;
        }
        if context_satisfied {
            self.log
                .debug("Gating: context satisfied", json!({ "session": session, "tool": tool }))
                .await;
        }
    }

    async fn recovery_gate(
        &self,
        session: &str,
        tool: &str,
        targets: &[String],
        command: &str,
    ) -> Result<(), GateError> {
        let is_write = is_write_tool(tool);
        let is_shell_write = tool == "bash" && self.shell.is_likely_write(command);
        if !is_write && !is_shell_write {
            return Ok(());
        }
        if lock(&self.registry).anchors(session).recovery.is_none() {
            return Ok(());
        }

        let root = self.paths.root();
        let risk = if is_write {
            self.risk.assess(tool, targets, root)
        } else {
            RiskLevel::Medium
        };
        if risk == RiskLevel::Low {
            return Ok(());
        }

        let outcome = {
            let mut registry = lock(&self.registry);
            let anchors = registry.anchors(session);
            match anchors.recovery.as_mut() {
                None => RecoveryOutcome::Clear,
                Some(recovery) => {
                    let existing = existing_anchors(&recovery.anchor_paths, root);
                    if existing.is_empty() {
                        anchors.recovery = None;
                        RecoveryOutcome::Cleared("all anchor files removed")
                    } else {
                        if existing.len() != recovery.anchor_paths.len() {
                            recovery.anchor_paths = existing;
                        }
                        if recovery.all_read() {
                            anchors.recovery = None;
                            RecoveryOutcome::Cleared("remaining anchors all read")
                        } else {
                            RecoveryOutcome::Blocked(recovery.anchor_paths.clone())
                        }
                    }
                }
            }
        };

        match outcome {
            RecoveryOutcome::Clear => Ok(()),
            RecoveryOutcome::Cleared(reason) => {
                self.log
                    .info("Recovery Gate: cleared", json!({ "session": session, "reason": reason }))
                    .await;
                Ok(())
            }
            RecoveryOutcome::Blocked(anchors) => {
                self.log
                    .warn(
                        "Recovery Gate: write blocked",
                        json!({ "session": session, "tool": tool, "risk": risk.to_string(), "anchors": anchors }),
                    )
                    .await;
                Err(GateError::Recovery { anchors })
            }
        }
    }

    async fn context_gate(
        &self,
        session: &str,
        tool: &str,
        targets: &[String],
        writes_store: bool,
        command: &str,
    ) -> Result<(), GateError> {
        let mode = self.config.guard_mode;
        if mode == GatingMode::Off {
            return Ok(());
        }

        let (risk, kind) = if is_write_tool(tool) {
            if targets.is_empty() || writes_store {
                return Ok(());
            }
            (self.risk.assess(tool, targets, self.paths.root()), "write")
        } else if tool == "bash" && self.shell.is_likely_write(command) {
            (self.risk.assess_shell_write(command), "bash write")
        } else {
            return Ok(());
        };
        if risk == RiskLevel::Low {
            return Ok(());
        }

        let should_warn = {
            let mut registry = lock(&self.registry);
            let gating = registry.gating(session);
            if gating.context_satisfied {
                return Ok(());
            }
            if risk == RiskLevel::High && mode == GatingMode::Block {
                None
            } else if gating.warned_this_message {
                Some(false)
            } else {
                gating.warned_this_message = true;
                Some(true)
            }
        };

        match should_warn {
            None => {
                self.log
                    .warn(
                        "Gating: high-risk write blocked (context not read)",
                        json!({ "session": session, "tool": tool, "targets": targets }),
                    )
                    .await;
                Err(GateError::Gating { risk, kind })
            }
            Some(true) => {
                self.log
                    .warn(
                        "Gating: write warning (context not read)",
                        json!({ "session": session, "tool": tool, "risk": risk.to_string() }),
                    )
                    .await;
                let text = format!(
                    "## [Memory Bank Gating Warning]\n\n\
                     {} {} detected, but the project context was not read this turn.\n\n\
                     Suggested: `read({{ filePath: \"memory-bank/details/patterns.md\" }})`\n\n\
                     Or call: `proxy_task({{ subagent_type: \"memory-reader\", ... }})`",
                    capitalize(&format!("{}-risk", risk)),
                    kind
                );
                self.advise(session, text, "gating warning").await;
                Ok(())
            }
            Some(false) => Ok(()),
        }
    }

    async fn doc_first_gate(&self, session: &str, tool: &str, targets: &[String]) -> Result<(), GateError> {
        let mode = self.config.doc_first_mode;
        if mode == GatingMode::Off || !is_write_tool(tool) {
            return Ok(());
        }

        let has_code_file = targets
            .iter()
            .any(|t| !self.paths.is_memory_bank_path(t) && is_code_file(t));
        if !has_code_file {
            return Ok(());
        }

        {
            let mut registry = lock(&self.registry);
            let gating = registry.gating(session);
            if gating.doc_first_satisfied || gating.doc_first_warned || gating.warned_this_message {
                return Ok(());
            }
        }

        let root = self.paths.root();
        if !self.context.memory_bank_exists(root, false).await {
            let fire = {
                let mut registry = lock(&self.registry);
                let state = registry.root_state(session, root);
                !std::mem::replace(&mut state.init_reminder_fired, true)
            };
            if fire {
                self.log
                    .info("Doc-First Gate: no memory bank, sending init suggestion", json!({ "session": session }))
                    .await;
                let text = "## [Memory Bank] Project not enabled\n\n\
                            Code is being written, but this project has no Memory Bank yet.\n\n\
                            Run `/memory-bank-refresh` to initialize it and start a doc-first workflow.";
                self.advise(session, text.to_string(), "init suggestion").await;
            }
            return Ok(());
        }

        if mode == GatingMode::Block {
            self.log
                .warn(
                    "Doc-First Gate: code write blocked",
                    json!({ "session": session, "tool": tool, "targets": targets }),
                )
                .await;
            return Err(GateError::DocFirst);
        }

        lock(&self.registry).gating(session).doc_first_warned = true;
        self.log
            .info("Doc-First Gate: warning issued", json!({ "session": session, "tool": tool, "targets": targets }))
            .await;
        let text = format!("## ⚠️ [Doc-First] Check the related docs before writing code\n\n{}", DOC_FIRST_STEPS);
        self.advise(session, text, "doc-first warning").await;
        Ok(())
    }

    /// Point the agent at the writing rules once per turn and satisfy doc-first
    async fn writing_guide(&self, session: &str) {
        let first_this_turn = {
            let mut registry = lock(&self.registry);
            registry.gating(session).doc_first_satisfied = true;
            let meta = registry.meta(session);
            let key = format!("guide:{}", meta.gating_key());
            meta.notified.insert(key)
        };

        if first_this_turn {
            let text = format!(
                "## [Memory Bank Writing Guide]\n\n\
                 Writing to memory-bank/. Load the writing rules first:\n\
                 read({{ filePath: \"{}\" }})",
                WRITER_GUIDE
            );
            self.advise(session, text, "writing guide").await;
        }
        self.log
            .debug("Memory Bank write allowed", json!({ "session": session }))
            .await;
    }

    /// Post an advisory; failures are logged and swallowed
    pub(crate) async fn advise(&self, session: &str, text: String, what: &str) {
        if self.config.disabled {
            self.log
                .debug("Advisory suppressed, reminders disabled", json!({ "session": session, "what": what }))
                .await;
            return;
        }
        if let Err(e) = self.host.prompt(session, PromptRequest::advisory(text)).await {
            self.log
                .error(&format!("Failed to send {}", what), json!({ "error": e.to_string() }))
                .await;
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
