//! YAML frontmatter parsing for skill documents
//!
//! Handles BOM stripping, CRLF normalization, and closing `---` lines that
//! appear inside multiline YAML values.

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Parsed document with frontmatter and body separated
#[derive(Debug, Clone)]
pub struct ParsedDocument<T> {
    pub frontmatter: T,
    pub body: String,
}

/// Frontmatter every skill's `SKILL.md` must carry
#[derive(Debug, Clone, Deserialize)]
pub struct SkillFrontmatter {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

pub fn parse_document<T: DeserializeOwned>(content: &str) -> Result<ParsedDocument<T>> {
    let normalized = normalize_content(content);
    let (frontmatter_str, body) = split_frontmatter(&normalized)?;

    let frontmatter: T =
        serde_yaml::from_str(&frontmatter_str).context("Failed to parse YAML frontmatter")?;

    Ok(ParsedDocument { frontmatter, body })
}

/// Strip a leading BOM and normalize line endings to LF
pub fn normalize_content(content: &str) -> String {
    let s = content.strip_prefix('\u{FEFF}').unwrap_or(content);
    s.replace("\r\n", "\n").replace('\r', "\n")
}

/// Split `(frontmatter, body)`; the closing `---` must start a line
pub fn split_frontmatter(content: &str) -> Result<(String, String)> {
    let Some(after_open) = content.strip_prefix("---\n") else {
        bail!("Document must start with YAML frontmatter (---)")
    };

    let re = Regex::new(r"(?:^|\n)---[ \t]*(?:\n|$)")?;
    let Some(m) = re.find(after_open) else {
        bail!("Frontmatter not properly closed (--- must be at line start)")
    };

    let frontmatter = after_open[..m.start()].to_string();
    let body = after_open[m.end()..].to_string();
    Ok((frontmatter, body))
}
