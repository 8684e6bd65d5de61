//! Resolving write targets against the memory store

use super::context::MEMORY_BANK_DIR;
use std::path::{Component, Path, PathBuf};

/// True on platforms whose default filesystems compare paths case-insensitively
pub const CASE_INSENSITIVE_FS: bool = cfg!(any(target_os = "macos", target_os = "windows"));

/// Collapse `.` and `..` without touching the filesystem
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Absolute, lexically normalized form of `target` relative to `root`
pub fn resolve(root: &Path, target: &str) -> PathBuf {
    let target = Path::new(target);
    if target.is_absolute() {
        normalize_lexical(target)
    } else {
        normalize_lexical(&root.join(target))
    }
}

fn fold_case(path: &Path) -> PathBuf {
    if CASE_INSENSITIVE_FS {
        PathBuf::from(path.to_string_lossy().to_lowercase())
    } else {
        path.to_path_buf()
    }
}

/// Project-relative, `/`-separated form used for anchor bookkeeping; empty when
/// the path lies outside the project
pub fn canonicalize_rel(raw: &str, root: &Path) -> String {
    let abs = resolve(root, raw);
    let root = normalize_lexical(root);
    let Ok(rel) = abs.strip_prefix(&root) else {
        return String::new();
    };
    let posix = rel.to_string_lossy().replace('\\', "/");
    if CASE_INSENSITIVE_FS {
        posix.to_lowercase()
    } else {
        posix
    }
}

/// Decides whether a path falls under `<root>/memory-bank`
#[derive(Debug, Clone)]
pub struct MemoryBankPaths {
    root: PathBuf,
    lexical_dir: PathBuf,
}

impl MemoryBankPaths {
    pub fn new(root: &Path) -> Self {
        let root = normalize_lexical(root);
        let lexical_dir = root.join(MEMORY_BANK_DIR);
        Self { root, lexical_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Symlink-resolved store directory, else its lexical form
    fn physical_dir(&self) -> PathBuf {
        std::fs::canonicalize(&self.lexical_dir).unwrap_or_else(|_| self.lexical_dir.clone())
    }

    /// Lexically under the store, or physically under it once symlinks resolve.
    /// Component-wise, so `memory-bank-notes.md` next to the store does not match.
    pub fn is_memory_bank_path(&self, target: &str) -> bool {
        let abs = resolve(&self.root, target);

        if fold_case(&abs).starts_with(fold_case(&self.lexical_dir)) {
            return true;
        }

        match physical_path(&abs) {
            Some(resolved) => fold_case(&resolved).starts_with(fold_case(&self.physical_dir())),
            None => false,
        }
    }
}

/// The path with symlinks resolved, or its resolved parent joined with the file
/// name when the file itself does not exist yet
fn physical_path(abs: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = std::fs::canonicalize(abs) {
        return Some(resolved);
    }
    let parent = std::fs::canonicalize(abs.parent()?).ok()?;
    Some(parent.join(abs.file_name()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_lexical() {
        assert_eq!(normalize_lexical(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(normalize_lexical(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn test_lexical_membership() {
        let paths = MemoryBankPaths::new(Path::new("/proj"));
        assert!(paths.is_memory_bank_path("memory-bank/MEMORY.md"));
        assert!(paths.is_memory_bank_path("/proj/memory-bank"));
        assert!(paths.is_memory_bank_path("./src/../memory-bank/details/x.md"));
        assert!(!paths.is_memory_bank_path("memory-bank-notes.md"));
        assert!(!paths.is_memory_bank_path("docs/memory-bank.md"));
        assert!(!paths.is_memory_bank_path("memory-bank/../src/main.rs"));
        assert!(!paths.is_memory_bank_path("/other/memory-bank/x.md"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_into_store() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("memory-bank")).unwrap();
        std::os::unix::fs::symlink(root.join("memory-bank"), root.join("notes")).unwrap();

        let paths = MemoryBankPaths::new(root);
        assert!(paths.is_memory_bank_path("notes/new-file.md"));
        assert!(!paths.is_memory_bank_path("src/lib.rs"));
    }

    #[test]
    fn test_canonicalize_rel() {
        let root = Path::new("/proj");
        let expected = if CASE_INSENSITIVE_FS { "memory-bank/memory.md" } else { "memory-bank/MEMORY.md" };
        assert_eq!(canonicalize_rel("/proj/memory-bank/MEMORY.md", root), expected);
        assert_eq!(canonicalize_rel("./memory-bank/details/patterns.md", root), "memory-bank/details/patterns.md");
        assert_eq!(canonicalize_rel("../elsewhere.md", root), "");
    }
}
