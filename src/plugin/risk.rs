//! Coarse risk classification of write targets

use super::write_targets::is_patch_tool;
use anyhow::Result;
use regex::RegexSet;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        })
    }
}

const SAFE_PATTERNS: &[&str] = &[
    r"(?i)^memory-bank/details/progress\.md$",
    r"(?i)^memory-bank/details/learnings/",
    r"(?i)^memory-bank/details/requirements/",
    r"(?i)^memory-bank/details/.*/index\.md$",
];

const SENSITIVE_PATTERNS: &[&str] = &[
    r"(?i)^src/auth/",
    r"(?i)^src/security/",
    r"(?i)/auth/",
    r"(?i)/security/",
    r"(?i)package\.json$",
    r"(?i)package-lock\.json$",
    r"(?i)bun\.lockb$",
    r"(?i)yarn\.lock$",
    r"(?i)pnpm-lock\.yaml$",
    r"(?i)tsconfig\.json$",
    r"(?i)\.env",
    r"(?i)docker/",
    r"(?i)Dockerfile",
    r"(?i)docker-compose",
    r"(?i)infra/",
    r"(?i)k8s/",
    r"(?i)kubernetes/",
    r"(?i)\.github/workflows/",
    r"(?i)\.gitlab-ci\.yml$",
    r"(?i)Jenkinsfile$",
    r"(?i)pyproject\.toml$",
    r"(?i)requirements\.txt$",
    r"(?i)go\.mod$",
    r"(?i)Cargo\.toml$",
    r"(?i)Gemfile$",
    r"(?i)\.config\.(js|ts|mjs)$",
    r"(?i)vite\.config",
    r"(?i)next\.config",
    r"(?i)eslint\.config",
    r"(?i)migrations/",
    r"(?i)prisma/schema\.prisma$",
    r"(?i)nginx\.conf$",
    r"(?i)oauth",
    r"(?i)sso",
    r"(?i)rbac",
    r"(?i)plugin/.*\.ts$",
];

/// Substrings in a shell command that make a shell write high risk
const SHELL_SENSITIVE_PATTERNS: &[&str] = &[
    r"(?i)package\.json",
    r"(?i)\.env",
    r"(?i)tsconfig\.json",
    r"(?i)src/auth/",
    r"(?i)src/security/",
    r"(?i)plugin/",
    r"(?i)docker",
    r"(?i)\.github/workflows",
    r"(?i)infra/",
];

pub struct RiskRules {
    safe: RegexSet,
    sensitive: RegexSet,
    shell_sensitive: RegexSet,
}

impl RiskRules {
    pub fn new() -> Result<Self> {
        Ok(Self {
            safe: RegexSet::new(SAFE_PATTERNS)?,
            sensitive: RegexSet::new(SENSITIVE_PATTERNS)?,
            shell_sensitive: RegexSet::new(SHELL_SENSITIVE_PATTERNS)?,
        })
    }

    /// Risk of a write by `tool` (lowercase) to `targets`
    pub fn assess(&self, tool: &str, targets: &[String], root: &Path) -> RiskLevel {
        let relative: Vec<String> = targets.iter().map(|p| project_relative(p, root)).collect();

        if !relative.is_empty() && relative.iter().all(|p| self.safe.is_match(p)) {
            return RiskLevel::Low;
        }
        if relative.iter().any(|p| self.sensitive.is_match(p)) {
            return RiskLevel::High;
        }
        let multi_file = tool == "multiedit" || (is_patch_tool(tool) && relative.len() > 1);
        if multi_file {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Risk of a shell command already judged to write files
    pub fn assess_shell_write(&self, command: &str) -> RiskLevel {
        if self.shell_sensitive.is_match(command) {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        }
    }
}

/// Strip the project root prefix and use `/` separators
fn project_relative(path: &str, root: &Path) -> String {
    let root = root.to_string_lossy();
    let rel = match path.strip_prefix(root.as_ref()) {
        Some(rest) => rest.trim_start_matches(['/', '\\']),
        None => path,
    };
    rel.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assess(tool: &str, targets: &[&str]) -> RiskLevel {
        let targets: Vec<String> = targets.iter().map(|s| s.to_string()).collect();
        RiskRules::new().unwrap().assess(tool, &targets, Path::new("/proj"))
    }

    #[test]
    fn test_safe_memory_files_are_low() {
        assert_eq!(assess("write", &["memory-bank/details/progress.md"]), RiskLevel::Low);
        assert_eq!(
            assess("multiedit", &["memory-bank/details/learnings/a.md", "/proj/memory-bank/details/requirements/REQ-1.md"]),
            RiskLevel::Low
        );
    }

    #[test]
    fn test_sensitive_targets_are_high() {
        assert_eq!(assess("edit", &["package.json"]), RiskLevel::High);
        assert_eq!(assess("write", &["/proj/src/auth/login.ts"]), RiskLevel::High);
        assert_eq!(assess("write", &[".github/workflows/ci.yml"]), RiskLevel::High);
        assert_eq!(assess("write", &["Cargo.toml"]), RiskLevel::High);
    }

    #[test]
    fn test_multi_file_is_medium() {
        assert_eq!(assess("multiedit", &["src/a.rs"]), RiskLevel::Medium);
        assert_eq!(assess("apply_patch", &["src/a.rs", "src/b.rs"]), RiskLevel::Medium);
        assert_eq!(assess("apply_patch", &["src/a.rs"]), RiskLevel::Low);
        assert_eq!(assess("write", &["src/main.py"]), RiskLevel::Low);
    }

    #[test]
    fn test_shell_write_risk() {
        let rules = RiskRules::new().unwrap();
        assert_eq!(rules.assess_shell_write("echo x > .env.local"), RiskLevel::High);
        assert_eq!(rules.assess_shell_write("echo x > out.txt"), RiskLevel::Medium);
    }
}
