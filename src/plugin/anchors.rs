//! Anchor files re-read after a context compaction

use std::path::Path;

pub const MAX_ANCHORS: usize = 5;
pub const ANCHOR_SENTINEL: &str = "<memory-bank-anchors>";
pub const ANCHOR_SENTINEL_CLOSE: &str = "</memory-bank-anchors>";
/// Always required, whatever the agent read before compaction
pub const FALLBACK_ANCHORS: &[&str] = &["memory-bank/MEMORY.md", "memory-bank/details/patterns.md"];
const MAX_FOCUS_LINES: usize = 6;

/// Requirement, design and progress files count as anchors
pub fn is_anchor_path(canonical: &str) -> bool {
    canonical.starts_with("memory-bank/details/requirements/")
        || canonical.starts_with("memory-bank/details/design/")
        || canonical == "memory-bank/details/progress.md"
}

/// Move `path` to the most-recent end, evicting beyond `MAX_ANCHORS`
pub fn touch_lru(lru: &mut Vec<String>, path: &str) {
    lru.retain(|p| p != path);
    lru.push(path.to_string());
    while lru.len() > MAX_ANCHORS {
        lru.remove(0);
    }
}

/// Fallback anchors first, then recently read ones, up to `MAX_ANCHORS`
pub fn required_anchors(lru: &[String]) -> Vec<String> {
    let mut required: Vec<String> = FALLBACK_ANCHORS.iter().map(|s| s.to_string()).collect();
    for path in lru {
        if required.len() >= MAX_ANCHORS {
            break;
        }
        if !required.contains(path) {
            required.push(path.clone());
        }
    }
    required
}

/// Anchors that still exist on disk
pub fn existing_anchors(paths: &[String], root: &Path) -> Vec<String> {
    paths
        .iter()
        .filter(|p| root.join(p).exists())
        .cloned()
        .collect()
}

/// First lines of the `## Current Focus` section of the entry file
pub fn current_focus(entry: &str) -> Option<Vec<String>> {
    let mut lines = entry.lines().map(str::trim_end);
    lines.find(|line| *line == "## Current Focus")?;

    let section: Vec<&str> = lines
        .take_while(|line| !line.starts_with("## "))
        .skip_while(|line| line.is_empty())
        .collect();
    let end = section
        .iter()
        .rposition(|line| !line.is_empty())
        .map_or(0, |i| i + 1);

    Some(
        section[..end]
            .iter()
            .take(MAX_FOCUS_LINES)
            .map(|line| line.to_string())
            .collect(),
    )
}

/// The recovery block appended to the compacted context
pub fn anchor_block(anchors: &[String], focus: Option<&[String]>, compaction: u32) -> String {
    let list: Vec<String> = anchors.iter().map(|p| format!("- {}", p)).collect();
    let focus = match focus {
        Some(lines) if !lines.is_empty() => {
            format!("\nSession state (from MEMORY.md):\n{}\n", lines.join("\n"))
        }
        _ => String::new(),
    };
    format!(
        "{}\n## POST-COMPACTION RECOVERY (Compaction #{})\n\n\
         Compaction occurred. Before medium/high-risk writes, you MUST read:\n{}\n{}\n\
         Recovery Gate blocks medium/high-risk writes until anchor files are read.\n{}",
        ANCHOR_SENTINEL,
        compaction,
        list.join("\n"),
        focus,
        ANCHOR_SENTINEL_CLOSE
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_anchor_patterns() {
        assert!(is_anchor_path("memory-bank/details/requirements/REQ-001.md"));
        assert!(is_anchor_path("memory-bank/details/design/api.md"));
        assert!(is_anchor_path("memory-bank/details/progress.md"));
        assert!(!is_anchor_path("memory-bank/details/learnings/x.md"));
        assert!(!is_anchor_path("src/details/progress.md"));
    }

    #[test]
    fn test_lru_order_and_cap() {
        let mut lru = Vec::new();
        for i in 0..7 {
            touch_lru(&mut lru, &format!("p{}", i));
        }
        touch_lru(&mut lru, "p3");
        assert_eq!(lru, vec!["p2", "p4", "p5", "p6", "p3"]);
    }

    #[test]
    fn test_required_anchors_bounded() {
        let lru: Vec<String> = (0..5).map(|i| format!("memory-bank/details/design/{}.md", i)).collect();
        let required = required_anchors(&lru);
        assert_eq!(required.len(), MAX_ANCHORS);
        assert_eq!(required[0], "memory-bank/MEMORY.md");
        assert_eq!(required[2], "memory-bank/details/design/0.md");
    }

    #[test]
    fn test_existing_anchors() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("memory-bank")).unwrap();
        std::fs::write(temp.path().join("memory-bank/MEMORY.md"), "x").unwrap();
        let all = required_anchors(&[]);
        assert_eq!(existing_anchors(&all, temp.path()), vec!["memory-bank/MEMORY.md"]);
    }

    #[test]
    fn test_current_focus() {
        let entry = "# P\n\n## Current Focus\n- a\n- b\n\n## Other\n- c\n";
        assert_eq!(current_focus(entry), Some(vec!["- a".to_string(), "- b".to_string()]));
        assert_eq!(current_focus("# none"), None);

        let long: String = (0..10).map(|i| format!("- {}\n", i)).collect();
        let entry = format!("## Current Focus\n{}", long);
        assert_eq!(current_focus(&entry).unwrap().len(), 6);
    }

    #[test]
    fn test_current_focus_crlf() {
        let entry = "# P\r\n\r\n## Current Focus\r\n- a\r\n- b\r\n\r\n## Other\r\n- c\r\n";
        assert_eq!(current_focus(entry), Some(vec!["- a".to_string(), "- b".to_string()]));
    }

    #[test]
    fn test_anchor_block() {
        let anchors = vec!["memory-bank/MEMORY.md".to_string()];
        let block = anchor_block(&anchors, Some(&["- ship".to_string()]), 1);
        assert!(block.starts_with(ANCHOR_SENTINEL));
        assert!(block.ends_with(ANCHOR_SENTINEL_CLOSE));
        assert!(block.contains("Compaction #1"));
        assert!(block.contains("- memory-bank/MEMORY.md"));
        assert!(block.contains("Session state (from MEMORY.md):\n- ship"));
    }
}
