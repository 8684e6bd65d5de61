use crate::models::hook::{HookInput, HookOutput};
use crate::plugin::context::ContextBuilder;
use crate::plugin::PluginConfig;
use crate::Result;
use clap::Subcommand;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

#[derive(Subcommand, Debug)]
pub enum HookCommands {
    /// Print memory context for a SessionStart hook
    #[command(name = "session-start")]
    SessionStart,
}

pub async fn run(cmd: HookCommands) -> Result<()> {
    match cmd {
        HookCommands::SessionStart => {
            let mut raw = String::new();
            // stdin may be closed or a terminal; an unreadable payload is treated as empty
            let _ = tokio::io::stdin().read_to_string(&mut raw).await;
            let root = resolve_root(&raw, std::env::var_os("CLAUDE_PROJECT_DIR").map(PathBuf::from))?;
            if let Some(output) = session_start(&root, PluginConfig::from_env().max_chars).await {
                println!("{}", serde_json::to_string(&output)?);
            }
            Ok(())
        }
    }
}

/// `CLAUDE_PROJECT_DIR`, then the payload's `cwd`, then the current directory
pub fn resolve_root(raw_input: &str, project_dir: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = project_dir.filter(|d| !d.as_os_str().is_empty()) {
        return Ok(dir);
    }
    let input: HookInput = if raw_input.trim().is_empty() {
        HookInput::default()
    } else {
        serde_json::from_str(raw_input).unwrap_or_default()
    };
    match input.cwd.filter(|c| !c.is_empty()) {
        Some(cwd) => Ok(PathBuf::from(cwd)),
        None => Ok(std::env::current_dir()?),
    }
}

pub async fn session_start(root: &Path, max_chars: usize) -> Option<HookOutput> {
    let builder = ContextBuilder::new(max_chars);
    builder
        .session_start_context(root)
        .await
        .map(HookOutput::session_start)
}
