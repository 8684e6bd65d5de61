//! Atomic file operations with an undo stack
//!
//! Every mutation made by an install run is recorded as an [`UndoAction`] so the
//! whole run can be reverted if a later step fails:
//! - overwriting a file backs it up to `<path>.backup` first (`Restore`)
//! - creating a file records its removal (`Remove`)
//! - creating a directory records removal of the top-most new directory (`RemoveDir`)
//!
//! Writes go to `<path>.tmp` and are renamed into place. A single rename is not a
//! true atomic replace on every platform; it is close enough for config files.

use anyhow::{Context, Result};
use colored::Colorize;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

const BACKUP_SUFFIX: &str = ".backup";
const TMP_SUFFIX: &str = ".tmp";

/// A single reversible filesystem change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoAction {
    /// Put the backup back over the original path
    Restore { path: PathBuf, backup: PathBuf },
    /// Delete a file that did not exist before
    Remove(PathBuf),
    /// Delete a directory tree that did not exist before
    RemoveDir(PathBuf),
}

impl UndoAction {
    pub fn path(&self) -> &Path {
        match self {
            UndoAction::Restore { path, .. } => path,
            UndoAction::Remove(path) | UndoAction::RemoveDir(path) => path,
        }
    }
}

/// Outcome of an atomic write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    /// Destination already held identical bytes; nothing was touched
    Unchanged,
}

impl WriteOutcome {
    pub fn changed(self) -> bool {
        self != WriteOutcome::Unchanged
    }
}

/// Append-only log of undo actions for one install run
#[derive(Debug, Default)]
pub struct UndoStack {
    actions: Vec<UndoAction>,
}

impl UndoStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: UndoAction) {
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[UndoAction] {
        &self.actions
    }

    /// Revert every recorded action, newest first.
    ///
    /// Best effort: a failing step is reported and the remaining steps still run.
    /// Returns the number of steps that failed.
    pub fn rollback(self) -> usize {
        println!();
        println!("{}", "Rolling back...".yellow());

        let mut failures = 0;
        for action in self.actions.iter().rev() {
            match revert(action) {
                Ok(Some(detail)) => println!("      {} {}", "→".dimmed(), detail),
                Ok(None) => {}
                Err(e) => {
                    failures += 1;
                    eprintln!(
                        "  {}",
                        format!("Rollback failed for {}: {:#}", action.path().display(), e).red()
                    );
                }
            }
        }
        failures
    }

    /// Delete `.backup` files once the run has fully succeeded
    pub fn cleanup_backups(&self) {
        for action in &self.actions {
            if let UndoAction::Restore { backup, .. } = action {
                if backup.exists() {
                    // Leftover backups are harmless
                    let _ = fs::remove_file(backup);
                }
            }
        }
    }
}

fn revert(action: &UndoAction) -> Result<Option<String>> {
    match action {
        UndoAction::Restore { path, backup } => {
            if !backup.exists() {
                return Ok(None);
            }
            fs::rename(backup, path)
                .with_context(|| format!("Failed to restore {}", path.display()))?;
            Ok(Some(format!("Restored {}", path.display())))
        }
        UndoAction::Remove(path) => {
            if !path.exists() {
                return Ok(None);
            }
            fs::remove_file(path)?;
            Ok(Some(format!("Removed {}", path.display())))
        }
        UndoAction::RemoveDir(path) => {
            if !path.exists() {
                return Ok(None);
            }
            fs::remove_dir_all(path)?;
            Ok(Some(format!("Removed directory {}", path.display())))
        }
    }
}

/// `<path><suffix>`, keeping the full original file name
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

pub fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, BACKUP_SUFFIX)
}

pub fn tmp_path(path: &Path) -> PathBuf {
    with_suffix(path, TMP_SUFFIX)
}

/// Create `dir` (and missing ancestors), recording removal of the top-most new one
pub fn ensure_dir(dir: &Path, undo: &mut UndoStack) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }

    let mut topmost_missing = dir.to_path_buf();
    let mut cursor = dir.parent();
    while let Some(parent) = cursor {
        if parent.as_os_str().is_empty() || parent.exists() {
            break;
        }
        topmost_missing = parent.to_path_buf();
        cursor = parent.parent();
    }

    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    undo.push(UndoAction::RemoveDir(topmost_missing));
    Ok(())
}

/// Write `content` to `path` via a temp file and rename, recording how to undo it
pub fn atomic_write(path: &Path, content: &[u8], undo: &mut UndoStack) -> Result<WriteOutcome> {
    let existed = path.exists();
    if existed {
        let current =
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        if current == content {
            return Ok(WriteOutcome::Unchanged);
        }
    }

    if let Some(parent) = path.parent() {
        ensure_dir(parent, undo)?;
    }

    if existed {
        let backup = backup_path(path);
        fs::copy(path, &backup)
            .with_context(|| format!("Failed to back up {}", path.display()))?;
        undo.push(UndoAction::Restore {
            path: path.to_path_buf(),
            backup,
        });
    } else {
        undo.push(UndoAction::Remove(path.to_path_buf()));
    }

    let tmp = tmp_path(path);
    let written = fs::write(&tmp, content).and_then(|_| fs::rename(&tmp, path));
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("Failed to write {}", path.display()));
    }

    Ok(if existed {
        WriteOutcome::Updated
    } else {
        WriteOutcome::Created
    })
}

/// Delete `path`, keeping a backup so the removal can be undone
pub fn atomic_remove(path: &Path, undo: &mut UndoStack) -> Result<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    let backup = backup_path(path);
    fs::rename(path, &backup)
        .with_context(|| format!("Failed to remove {}", path.display()))?;
    undo.push(UndoAction::Restore {
        path: path.to_path_buf(),
        backup,
    });
    Ok(true)
}

/// A copied file and its content hash, as recorded in the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopiedFile {
    pub path: PathBuf,
    pub sha256: String,
    pub outcome: WriteOutcome,
}

/// Recursively copy `src` into `dst`, one atomic write per file
pub fn atomic_copy_dir(src: &Path, dst: &Path, undo: &mut UndoStack) -> Result<Vec<CopiedFile>> {
    ensure_dir(dst, undo)?;

    let mut copied = Vec::new();
    for entry in walkdir::WalkDir::new(src)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
    {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("{} is outside {}", entry.path().display(), src.display()))?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            ensure_dir(&target, undo)?;
        } else if entry.file_type().is_file() {
            let content = fs::read(entry.path())
                .with_context(|| format!("Failed to read {}", entry.path().display()))?;
            let outcome = atomic_write(&target, &content, undo)?;
            copied.push(CopiedFile {
                path: target,
                sha256: sha256_hex(&content),
                outcome,
            });
        }
    }

    Ok(copied)
}

pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn leftovers(dir: &Path) -> Vec<PathBuf> {
        walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.path().to_path_buf())
            .filter(|p| {
                let name = p.to_string_lossy();
                name.ends_with(BACKUP_SUFFIX) || name.ends_with(TMP_SUFFIX)
            })
            .collect()
    }

    #[test]
    fn test_atomic_write_new_file_records_remove() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.json");
        let mut undo = UndoStack::new();

        let outcome = atomic_write(&path, b"{}", &mut undo).unwrap();

        assert_eq!(outcome, WriteOutcome::Created);
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
        assert_eq!(undo.actions(), &[UndoAction::Remove(path.clone())]);
    }

    #[test]
    fn test_atomic_write_existing_file_backs_up() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.json");
        fs::write(&path, "old").unwrap();
        let mut undo = UndoStack::new();

        let outcome = atomic_write(&path, b"new", &mut undo).unwrap();

        assert_eq!(outcome, WriteOutcome::Updated);
        assert_eq!(fs::read_to_string(backup_path(&path)).unwrap(), "old");
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_atomic_write_identical_content_is_noop() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.json");
        fs::write(&path, "same").unwrap();
        let mut undo = UndoStack::new();

        let outcome = atomic_write(&path, b"same", &mut undo).unwrap();

        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert!(undo.is_empty());
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn test_rollback_restores_and_removes_in_reverse() {
        let temp = TempDir::new().unwrap();
        let existing = temp.path().join("keep.txt");
        fs::write(&existing, "original").unwrap();
        let fresh = temp.path().join("nested/deeper/new.txt");
        let mut undo = UndoStack::new();

        atomic_write(&existing, b"changed", &mut undo).unwrap();
        atomic_write(&fresh, b"hello", &mut undo).unwrap();
        assert!(fresh.exists());

        let failures = undo.rollback();

        assert_eq!(failures, 0);
        assert_eq!(fs::read_to_string(&existing).unwrap(), "original");
        assert!(!temp.path().join("nested").exists());
        assert!(leftovers(temp.path()).is_empty());
    }

    #[test]
    fn test_rollback_continues_after_failed_step() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        let mut undo = UndoStack::new();
        atomic_write(&path, b"x", &mut undo).unwrap();
        // Restore whose target directory is gone cannot succeed
        let missing_dir = temp.path().join("gone");
        fs::create_dir(&missing_dir).unwrap();
        let backup = temp.path().join("b.backup");
        fs::write(&backup, "b").unwrap();
        undo.push(UndoAction::Restore {
            path: missing_dir.join("sub/b"),
            backup,
        });

        let failures = undo.rollback();

        assert_eq!(failures, 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_copy_dir_records_dir_and_hashes() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("references")).unwrap();
        fs::write(src.join("SKILL.md"), "# skill").unwrap();
        fs::write(src.join("references/reader.md"), "# reader").unwrap();
        let dst = temp.path().join("out/skill");
        let mut undo = UndoStack::new();

        let copied = atomic_copy_dir(&src, &dst, &mut undo).unwrap();

        assert_eq!(copied.len(), 2);
        assert!(dst.join("references/reader.md").exists());
        assert_eq!(undo.actions()[0], UndoAction::RemoveDir(temp.path().join("out")));
        let skill = copied.iter().find(|c| c.path.ends_with("SKILL.md")).unwrap();
        assert_eq!(skill.sha256, sha256_hex(b"# skill"));

        undo.rollback();
        assert!(!temp.path().join("out").exists());
    }

    #[test]
    fn test_atomic_remove_is_undoable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("legacy.ts");
        fs::write(&path, "legacy").unwrap();
        let mut undo = UndoStack::new();

        assert!(atomic_remove(&path, &mut undo).unwrap());
        assert!(!path.exists());

        undo.rollback();
        assert_eq!(fs::read_to_string(&path).unwrap(), "legacy");
    }

    #[test]
    fn test_cleanup_backups_after_success() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.json");
        fs::write(&path, "old").unwrap();
        let mut undo = UndoStack::new();
        atomic_write(&path, b"new", &mut undo).unwrap();

        undo.cleanup_backups();

        assert!(leftovers(temp.path()).is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }
}
