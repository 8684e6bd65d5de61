//! Extracting file targets from write-tool arguments

use anyhow::Result;
use regex::Regex;
use serde_json::Value;

/// Tools that write files directly
pub const WRITE_TOOLS: &[&str] = &["write", "edit", "multiedit", "apply_patch", "patch"];

const PATH_ARGS: &[&str] = &["filePath", "path", "filename", "file", "dest", "destination", "target"];

pub fn is_write_tool(tool: &str) -> bool {
    WRITE_TOOLS.contains(&tool)
}

pub fn is_patch_tool(tool: &str) -> bool {
    tool == "apply_patch" || tool == "patch"
}

pub struct WriteTargetExtractor {
    /// `+++ b/path` / `--- a/path`
    unified_header: Regex,
    /// `*** Update File: path` and friends
    envelope_header: Regex,
}

impl WriteTargetExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            unified_header: Regex::new(r"(?m)^(?:\+\+\+|---)\s+[ab]/(.+)$")?,
            envelope_header: Regex::new(
                r"(?m)^\*\*\*\s+(?:Add|Update|Delete|Move to:?)\s+(?:File:\s*)?(.+)$",
            )?,
        })
    }

    /// Deduplicated targets, in first-seen order; `tool` must be lowercase
    pub fn extract(&self, tool: &str, args: &Value) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();

        for key in PATH_ARGS {
            if let Some(val) = args.get(*key).and_then(Value::as_str) {
                if !val.trim().is_empty() {
                    paths.push(val.to_string());
                }
            }
        }

        if tool == "multiedit" {
            if let Some(edits) = args.get("edits").and_then(Value::as_array) {
                for edit in edits {
                    for key in ["path", "filePath"] {
                        if let Some(p) = edit.get(key).and_then(Value::as_str) {
                            paths.push(p.to_string());
                        }
                    }
                }
            }
        }

        if is_patch_tool(tool) {
            let patch_text = ["patchText", "patch", "diff"]
                .iter()
                .find_map(|key| args.get(*key).and_then(Value::as_str));
            if let Some(text) = patch_text {
                for caps in self.unified_header.captures_iter(text) {
                    paths.push(caps[1].trim_end_matches('\r').to_string());
                }
                for caps in self.envelope_header.captures_iter(text) {
                    paths.push(caps[1].trim().to_string());
                }
            }
        }

        let mut seen = std::collections::HashSet::new();
        paths.retain(|p| seen.insert(p.clone()));
        paths
    }
}
