//! Change detection through `git status --porcelain`

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

pub const GIT_TIMEOUT: Duration = Duration::from_secs(5);

const TRACKABLE_EXTENSIONS: &[&str] = &[
    "py", "ts", "tsx", "js", "jsx", "go", "rs", "md", "json", "yaml", "yml", "toml", "css",
    "scss", "html", "vue", "svelte",
];

const EXCLUDED_PREFIXES: &[&str] = &[
    "node_modules/",
    ".venv/",
    "venv/",
    "dist/",
    "build/",
    ".next/",
    ".nuxt/",
    "coverage/",
    ".pytest_cache/",
    "__pycache__/",
    ".git/",
    ".opencode/",
    ".claude/",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitChanges {
    /// Absolute paths of changed source files
    pub modified_files: Vec<PathBuf>,
    /// Any path under `memory-bank/` changed
    pub memory_bank_updated: bool,
}

fn is_trackable(rel: &str) -> bool {
    let ext = rel.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
    TRACKABLE_EXTENSIONS.contains(&ext)
        && !EXCLUDED_PREFIXES.iter().any(|prefix| rel.starts_with(prefix))
}

/// Parse porcelain v1 output (`XY path`, quoted paths, `old -> new` renames)
pub fn parse_porcelain(stdout: &str, root: &Path) -> GitChanges {
    let mut changes = GitChanges::default();

    for line in stdout.lines() {
        let line = line.trim_end_matches('\r');
        if line.chars().count() < 4 {
            continue;
        }
        let status = line.chars().next().unwrap_or(' ');
        let Some(mut payload) = line.get(3..) else {
            continue;
        };
        if payload.is_empty() {
            continue;
        }

        if payload.len() >= 2 && payload.starts_with('"') && payload.ends_with('"') {
            payload = &payload[1..payload.len() - 1];
        }
        if matches!(status, 'R' | 'C') {
            if let Some((_, renamed)) = payload.split_once(" -> ") {
                payload = renamed;
            }
        }
        let rel = payload.replace('\\', "/");

        if rel.starts_with("memory-bank/") {
            changes.memory_bank_updated = true;
            continue;
        }
        if is_trackable(&rel) {
            changes.modified_files.push(root.join(&rel));
        }
    }

    changes
}

/// `None` when `root` is not a git repository, git is missing, or it times out
pub async fn detect_git_changes(root: &Path) -> Option<GitChanges> {
    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(root)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(GIT_TIMEOUT, output).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, root = %root.display(), "git status failed to start");
            return None;
        }
        Err(_) => {
            tracing::debug!(root = %root.display(), "git status timed out");
            return None;
        }
    };

    if !output.status.success() {
        tracing::debug!(root = %root.display(), "git status exited non-zero (not a repo?)");
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Some(parse_porcelain(&stdout, root))
}
