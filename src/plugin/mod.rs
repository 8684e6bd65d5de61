//! Host runtime plugin
//!
//! Injects the project's memory store into the agent's system context, tracks
//! per-session state from host events, and gates tool calls that write to the
//! project. [`MemoryBankPlugin`] is the single entry point a host adapter drives.

pub mod anchors;
pub mod classifier;
pub mod config;
pub mod context;
pub mod gate;
pub mod git;
pub mod host;
pub mod logger;
pub mod paths;
pub mod reminder;
pub mod risk;
pub mod shell;
pub mod state;
pub mod write_targets;

pub use config::{GatingMode, PluginConfig};
pub use gate::GateError;
pub use host::{HostClient, HostEvent, LogEntry, MessageInfo, PromptRequest, ToolCall};

use crate::Result;
use anchors::{anchor_block, current_focus, existing_anchors, required_anchors, ANCHOR_SENTINEL};
use classifier::{is_plugin_generated, KeywordClassifier, TriggerClassifier};
use context::{init_instruction, ContextBuilder, MEMORY_BANK_ENTRY, SENTINEL_OPEN};
use logger::PluginLogger;
use paths::{canonicalize_rel, MemoryBankPaths};
use reminder::ReminderDecision;
use risk::RiskRules;
use serde_json::{json, Value};
use shell::ShellRules;
use state::{RecoveryState, RootState, SessionRegistry};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use write_targets::WriteTargetExtractor;

/// Lock a std mutex, recovering the data if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MemoryBankPlugin {
    root: PathBuf,
    config: PluginConfig,
    host: Arc<dyn HostClient>,
    log: PluginLogger,
    context: ContextBuilder,
    classifier: Box<dyn TriggerClassifier>,
    registry: Mutex<SessionRegistry>,
    paths: MemoryBankPaths,
    targets: WriteTargetExtractor,
    risk: RiskRules,
    shell: ShellRules,
}

impl MemoryBankPlugin {
    pub fn new(root: impl Into<PathBuf>, config: PluginConfig, host: Arc<dyn HostClient>) -> Result<Self> {
        let root = root.into();
        Ok(Self {
            log: PluginLogger::new(Arc::clone(&host), config.debug),
            context: ContextBuilder::new(config.max_chars),
            classifier: Box::new(KeywordClassifier::new()?),
            registry: Mutex::new(SessionRegistry::new(&root)),
            paths: MemoryBankPaths::new(&root),
            targets: WriteTargetExtractor::new()?,
            risk: RiskRules::new()?,
            shell: ShellRules::new()?,
            root,
            config,
            host,
        })
    }

    /// Replace the keyword classifier
    pub fn with_classifier(mut self, classifier: Box<dyn TriggerClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_context_builder(mut self, context: ContextBuilder) -> Self {
        self.context = context;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Anchors that must still be read before risky writes, if recovery is armed
    pub fn recovery_anchors(&self, session_id: &str) -> Option<Vec<String>> {
        lock(&self.registry)
            .anchors(session_id)
            .recovery
            .as_ref()
            .map(|r| r.anchor_paths.clone())
    }

    pub fn compaction_count(&self, session_id: &str) -> u32 {
        lock(&self.registry).anchors(session_id).compaction_count
    }

    /// Snapshot of the reminder state for the plugin's root
    pub fn root_state(&self, session_id: &str) -> RootState {
        lock(&self.registry).root_state(session_id, &self.root).clone()
    }

    /// `experimental.chat.system.transform`: add the memory context once
    pub async fn system_transform(&self, system: &mut Vec<String>) {
        if system.iter().any(|s| s.contains(SENTINEL_OPEN)) {
            return;
        }
        match self.context.build(&self.root).await {
            Some(ctx) => {
                self.log
                    .debug(
                        "System context injected",
                        json!({ "chars": ctx.total_chars, "files": ctx.files.len(), "truncated": ctx.truncated }),
                    )
                    .await;
                system.push(ctx.text);
            }
            None => system.push(init_instruction(&self.root)),
        }
    }

    /// `experimental.session.compacting`: keep the context and arm recovery
    pub async fn session_compacting(&self, session_id: &str, context: &mut Vec<String>) {
        if !context.iter().any(|s| s.contains(SENTINEL_OPEN)) {
            match self.context.build(&self.root).await {
                Some(ctx) => context.push(ctx.text),
                None => {
                    context.push(init_instruction(&self.root));
                    return;
                }
            }
        }

        let (required, count) = {
            let mut registry = lock(&self.registry);
            let anchors = registry.anchors(session_id);
            (required_anchors(&anchors.anchors_lru), anchors.compaction_count)
        };
        let valid = existing_anchors(&required, &self.root);
        if valid.is_empty() {
            return;
        }

        if !context.iter().any(|s| s.contains(ANCHOR_SENTINEL)) {
            let focus = self
                .context
                .read_text_cached(&self.root.join(MEMORY_BANK_ENTRY))
                .await
                .and_then(|entry| current_focus(&entry));
            context.push(anchor_block(&valid, focus.as_deref(), count + 1));
        }

        let canonical: Vec<String> = valid
            .iter()
            .map(|p| canonicalize_rel(p, &self.root))
            .filter(|p| !p.is_empty())
            .collect();
        if canonical.is_empty() {
            return;
        }

        let compaction = {
            let mut registry = lock(&self.registry);
            let anchors = registry.anchors(session_id);
            anchors.recovery = Some(RecoveryState::new(canonical.clone()));
            anchors.compaction_count += 1;
            anchors.compaction_count
        };
        self.log
            .info(
                "Recovery Gate: armed after compaction",
                json!({ "session": session_id, "compaction": compaction, "anchors": canonical }),
            )
            .await;
    }

    /// Decode a raw host event and dispatch it; unknown events are ignored
    pub async fn handle_raw_event(&self, raw: &Value) {
        if let Some(event) = HostEvent::from_value(raw) {
            self.on_event(event).await;
        }
    }

    pub async fn on_event(&self, event: HostEvent) {
        match event {
            HostEvent::SessionCreated { session_id, parent_id } => {
                lock(&self.registry).session_created(&session_id, parent_id.clone());
                self.log
                    .info("Session created", json!({ "session": session_id, "parent": parent_id }))
                    .await;
            }
            HostEvent::SessionDeleted { session_id } => {
                lock(&self.registry).session_deleted(&session_id);
                self.log
                    .info("Session deleted", json!({ "session": session_id }))
                    .await;
            }
            HostEvent::MessageUpdated { session_id, message } => {
                self.on_message(&session_id, &message).await;
            }
            HostEvent::SessionIdle { session_id } => {
                if !self.config.idle_reminder {
                    return;
                }
                let pending = {
                    let mut registry = lock(&self.registry);
                    let meta = registry.meta(&session_id);
                    std::mem::replace(&mut meta.user_message_received, false)
                };
                if pending {
                    self.evaluate_reminder(&session_id).await;
                }
            }
        }
    }

    async fn on_message(&self, session_id: &str, message: &MessageInfo) {
        if is_plugin_generated(message.variant.as_deref(), &message.content) {
            self.log
                .debug("Skipping plugin-generated message", json!({ "session": session_id }))
                .await;
            return;
        }

        match message.role.as_str() {
            "user" => {
                let triggers = self.classifier.classify(&message.content);
                let key = {
                    let mut registry = lock(&self.registry);
                    let meta = registry.meta(session_id);
                    if meta.prompt_in_progress {
                        return;
                    }
                    let root = meta.last_active_root.clone();
                    let key = meta.message_key(message, Instant::now());
                    if key.is_some() {
                        meta.user_message_received = true;
                        meta.plan_outputted = false;
                    }
                    registry.root_state(session_id, &root).apply(&triggers);
                    key
                };
                if triggers.any() {
                    self.log
                        .debug(
                            "Triggers detected",
                            json!({
                                "session": session_id,
                                "newRequirement": triggers.new_requirement,
                                "techDecision": triggers.tech_decision,
                                "bugFix": triggers.bug_fix,
                                "skipInit": triggers.skip_init,
                                "reviewed": triggers.reviewed,
                            }),
                        )
                        .await;
                }
                self.log
                    .debug("User message keyed", json!({ "session": session_id, "key": key }))
                    .await;
            }
            "assistant" => {
                if self.classifier.is_update_plan(&message.content) {
                    lock(&self.registry).meta(session_id).plan_outputted = true;
                    self.log
                        .info("Update plan detected", json!({ "session": session_id }))
                        .await;
                }
            }
            _ => {}
        }
    }

    async fn evaluate_reminder(&self, session_id: &str) {
        if self.config.disabled {
            self.log
                .debug("Reminders disabled", json!({ "session": session_id }))
                .await;
            return;
        }
        if lock(&self.registry).meta(session_id).prompt_in_progress {
            return;
        }

        let root = self.root.as_path();
        let changes = git::detect_git_changes(root).await;
        if let Some(changes) = &changes {
            let mut registry = lock(&self.registry);
            let state = registry.root_state(session_id, root);
            state.files_modified = changes.modified_files.clone();
            if changes.memory_bank_updated {
                state.last_synced_signature = Some(state.signature());
            }
        }

        let has_memory_bank = self.context.memory_bank_exists(root, true).await;
        let decision = {
            let mut registry = lock(&self.registry);
            let plan_outputted = registry.meta(session_id).plan_outputted;
            reminder::evaluate(registry.root_state(session_id, root), root, has_memory_bank, plan_outputted)
        };

        let text = match decision {
            ReminderDecision::FireInit(text) | ReminderDecision::FireUpdate(text) => text,
            ReminderDecision::Skip(reason) => {
                self.log
                    .debug("Reminder skipped", json!({ "session": session_id, "reason": reason }))
                    .await;
                return;
            }
            ReminderDecision::NoTrigger => return,
        };

        lock(&self.registry).meta(session_id).prompt_in_progress = true;
        let sent = self.host.prompt(session_id, PromptRequest::advisory(text)).await;
        lock(&self.registry).meta(session_id).prompt_in_progress = false;

        match sent {
            Ok(()) => {
                self.log
                    .info("Reminder sent", json!({ "session": session_id, "root": root.display().to_string() }))
                    .await
            }
            Err(e) => {
                self.log
                    .error("Failed to send reminder", json!({ "session": session_id, "error": e.to_string() }))
                    .await
            }
        }
    }
}
