//! Host configuration patching
//!
//! Ensures `opencode.json` carries what the plugin needs without clobbering anything
//! else in the file:
//! - `permission.skill = "allow"`
//! - the plugin package, pinned to this version (after the plugin-list migrations)
//! - the `memory-reader` agent, merged field by field
//!
//! Also handles the optional key-trigger injection into `oh-my-opencode.json`.

use super::atomic::{atomic_write, UndoStack};
use super::error::InstallError;
use super::migrations::{run_plugin_migrations, MigrationContext};
use super::{StepReport, StepStatus, AGENT_NAME, INSTALLED_BY_KEY, PACKAGE_NAME};
use crate::models::KEY_TRIGGER_MARKER;
use crate::Result;
use serde_json::{json, Map, Value};
use std::path::Path;

/// Agent fields the installer owns; always overwritten
const OWNED_AGENT_FIELDS: &[&str] = &["mode", "prompt"];

const KEY_TRIGGER_TEXT: &str = "## Memory Bank Key Trigger

When a request touches project implementation, design decisions, or the history behind
them, consult the project Memory Bank first:
1. Read 1-3 relevant files under `memory-bank/details/` directly.
2. For evidence, conflicts, or cross-file questions, delegate to the `memory-reader` agent.
Answers grounded in the Memory Bank must cite the files they came from.";

/// Inputs for patching the host config
#[derive(Debug, Clone)]
pub struct PatchOptions<'a> {
    pub version: &'a str,
    pub model: Option<&'a str>,
    /// Installed skill directory, referenced by the agent prompt
    pub skill_dir: &'a Path,
    /// Plugin reference written by pre-package installers
    pub legacy_plugin_url: String,
}

impl PatchOptions<'_> {
    fn migration_context(&self) -> MigrationContext<'_> {
        MigrationContext {
            package: PACKAGE_NAME,
            version: self.version,
            legacy_plugin_url: &self.legacy_plugin_url,
        }
    }

    fn suggested_patch(&self) -> String {
        let patch = json!({
            "permission": { "skill": "allow" },
            "plugin": [self.migration_context().pinned()],
        });
        serde_json::to_string_pretty(&patch).unwrap_or_default()
    }

    fn agent_definition(&self) -> Map<String, Value> {
        let prompt = format!(
            "{{file:{}}}",
            self.skill_dir.join("references").join("reader.md").display()
        );
        let mut def = Map::new();
        def.insert(
            "description".into(),
            json!("Reads the project Memory Bank and answers with pointers to the files it used"),
        );
        def.insert("mode".into(), json!("subagent"));
        def.insert("prompt".into(), json!(prompt));
        def.insert(
            "tools".into(),
            json!({ "write": false, "edit": false, "bash": false }),
        );
        def
    }
}

/// Read a JSON config file; `None` when it does not exist
pub fn read_json_config(path: &Path, suggested_patch: &str) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| {
            InstallError::ConfigParse {
                path: path.to_path_buf(),
                message: e.to_string(),
                suggested_patch: suggested_patch.to_string(),
            }
            .into()
        })
}

fn write_json_config(path: &Path, value: &Value, undo: &mut UndoStack) -> Result<()> {
    let content = serde_json::to_string_pretty(value)? + "\n";
    atomic_write(path, content.as_bytes(), undo)?;
    Ok(())
}

/// Borrow `parent[key]` as an object, creating it when missing
fn object_member<'v>(
    parent: &'v mut Map<String, Value>,
    key: &str,
    path: &Path,
) -> Result<&'v mut Map<String, Value>> {
    let entry = parent
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    entry.as_object_mut().ok_or_else(|| {
        InstallError::ConfigShape {
            path: path.to_path_buf(),
            key: key.to_string(),
            expected: "an object",
        }
        .into()
    })
}

/// Apply every required change to a parsed config, returning the change lines
pub fn apply_host_config(config: &mut Value, opts: &PatchOptions, path: &Path) -> Result<Vec<String>> {
    let root = config.as_object_mut().ok_or_else(|| InstallError::ConfigShape {
        path: path.to_path_buf(),
        key: "<root>".to_string(),
        expected: "an object",
    })?;
    let mut changes = Vec::new();

    // permission.skill
    let permission = object_member(root, "permission", path)?;
    if permission.get("skill").and_then(Value::as_str) != Some("allow") {
        permission.insert("skill".into(), json!("allow"));
        changes.push("Added permission.skill = \"allow\"".to_string());
    }

    // plugin list
    let plugins = root
        .entry("plugin".to_string())
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| InstallError::ConfigShape {
            path: path.to_path_buf(),
            key: "plugin".to_string(),
            expected: "an array",
        })?;
    let ctx = opts.migration_context();
    changes.extend(run_plugin_migrations(plugins, &ctx));
    if !plugins.iter().any(|p| ctx.refers_to_package(p)) {
        plugins.push(json!(ctx.pinned()));
        changes.push(format!("Added plugin: {}", ctx.pinned()));
    }

    // agent definition
    let agents = object_member(root, "agent", path)?;
    if let Some(change) = merge_agent(agents, opts, path)? {
        changes.push(change);
    }

    Ok(changes)
}

fn merge_agent(
    agents: &mut Map<String, Value>,
    opts: &PatchOptions,
    path: &Path,
) -> Result<Option<String>> {
    let is_new = !agents.contains_key(AGENT_NAME);
    let agent = object_member(agents, AGENT_NAME, path)?;
    let mut touched: Vec<String> = Vec::new();

    for (key, value) in opts.agent_definition() {
        let owned = OWNED_AGENT_FIELDS.contains(&key.as_str());
        if !agent.contains_key(&key) || (owned && agent.get(&key) != Some(&value)) {
            touched.push(key.clone());
            agent.insert(key, value);
        }
    }

    if let Some(model) = opts.model {
        if agent.get("model").and_then(Value::as_str) != Some(model) {
            agent.insert("model".into(), json!(model));
            touched.push("model".to_string());
        }
    }

    if agent.get(INSTALLED_BY_KEY).and_then(Value::as_str) != Some(PACKAGE_NAME) {
        agent.insert(INSTALLED_BY_KEY.into(), json!(PACKAGE_NAME));
        touched.push(INSTALLED_BY_KEY.to_string());
    }

    Ok(if is_new {
        Some(format!("Added agent {}", AGENT_NAME))
    } else if touched.is_empty() {
        None
    } else {
        Some(format!("Updated agent {} ({})", AGENT_NAME, touched.join(", ")))
    })
}

/// Patch `opencode.json`, writing only when something changed
pub fn patch_host_config(
    path: &Path,
    opts: &PatchOptions,
    undo: &mut UndoStack,
) -> Result<StepReport> {
    let existing = read_json_config(path, &opts.suggested_patch())?;
    let existed = existing.is_some();
    let mut config = existing.unwrap_or_else(|| json!({}));

    let changes = apply_host_config(&mut config, opts, path)?;
    if changes.is_empty() {
        return Ok(StepReport::new(
            "Configuring opencode.json",
            StepStatus::AlreadyConfigured,
            "Already configured",
        ));
    }

    write_json_config(path, &config, undo)?;
    Ok(StepReport::new(
        "Configuring opencode.json",
        if existed { StepStatus::Updated } else { StepStatus::Created },
        changes.join(", "),
    ))
}

/// Append the key-trigger block to the orchestrator's prompt, if that config exists
pub fn inject_key_trigger(path: &Path, undo: &mut UndoStack) -> Result<StepReport> {
    const STEP: &str = "Injecting key trigger";
    let suggested = serde_json::to_string_pretty(&json!({
        "agents": { "Sisyphus": { "prompt_append": KEY_TRIGGER_TEXT } }
    }))?;

    let Some(mut config) = read_json_config(path, &suggested)? else {
        return Ok(StepReport::new(STEP, StepStatus::Skipped, "No oh-my-opencode.json found"));
    };

    let root = config.as_object_mut().ok_or_else(|| InstallError::ConfigShape {
        path: path.to_path_buf(),
        key: "<root>".to_string(),
        expected: "an object",
    })?;
    let agents = object_member(root, "agents", path)?;
    let sisyphus = object_member(agents, "Sisyphus", path)?;

    let current = sisyphus
        .get("prompt_append")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if current.contains(KEY_TRIGGER_MARKER) {
        return Ok(StepReport::new(STEP, StepStatus::AlreadyConfigured, "Key trigger present"));
    }

    let appended = if current.trim().is_empty() {
        KEY_TRIGGER_TEXT.to_string()
    } else {
        format!("{}\n\n{}", current.trim_end(), KEY_TRIGGER_TEXT)
    };
    sisyphus.insert("prompt_append".into(), json!(appended));

    write_json_config(path, &config, undo)?;
    Ok(StepReport::new(STEP, StepStatus::Updated, path.display().to_string()))
}
