//! Best-effort shell command tokenizing for write detection
//!
//! This is not a shell grammar. It splits on command separators outside quotes,
//! tokenizes each segment with simple quoting rules, and recognizes redirects.
//! Heredocs, subshells, variable expansion and nested quoting are not understood.

use super::paths::MemoryBankPaths;
use anyhow::Result;
use regex::{Regex, RegexSet};

/// One command of a compound shell line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub argv: Vec<String>,
}

pub fn parse_shell_command(command: &str) -> Vec<Segment> {
    split_segments(command)
        .into_iter()
        .map(|text| {
            let argv = parse_argv(&text);
            Segment { text, argv }
        })
        .collect()
}

/// Split on `;`, `|`, `||`, `&&` and newlines outside of quotes
pub fn split_segments(command: &str) -> Vec<String> {
    let chars: Vec<char> = command.chars().collect();
    let mut parts = Vec::new();
    let mut buf = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    let flush = |buf: &mut String, parts: &mut Vec<String>| {
        let trimmed = buf.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_string());
        }
        buf.clear();
    };

    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];

        if escaped {
            buf.push(ch);
            escaped = false;
        } else if matches!(quote, Some('"') | Some('`')) && ch == '\\' {
            buf.push(ch);
            escaped = true;
        } else if let Some(q) = quote {
            buf.push(ch);
            if ch == q {
                quote = None;
            }
        } else if matches!(ch, '\'' | '"' | '`') {
            quote = Some(ch);
            buf.push(ch);
        } else if matches!(ch, ';' | '|' | '\n') {
            flush(&mut buf, &mut parts);
            if ch == '|' && chars.get(i + 1) == Some(&'|') {
                i += 1;
            }
        } else if ch == '&' && chars.get(i + 1) == Some(&'&') {
            flush(&mut buf, &mut parts);
            i += 1;
        } else {
            buf.push(ch);
        }
        i += 1;
    }
    flush(&mut buf, &mut parts);
    parts
}

/// Whitespace-separated words with quotes removed
pub fn parse_argv(segment: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in segment.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        if quote == Some('"') && ch == '\\' {
            escaped = true;
            continue;
        }
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            } else {
                current.push(ch);
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            ' ' | '\t' => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

pub fn looks_like_path(token: &str) -> bool {
    if token.starts_with('-') {
        return false;
    }
    token.contains('/') || token.contains('\\') || token == "memory-bank"
}

/// Path-like arguments mentioning the store; everything after `--` counts as a path
pub fn memory_bank_path_args(argv: &[String]) -> Vec<String> {
    let mut paths = Vec::new();
    let mut after_double_dash = false;
    for arg in argv {
        if arg == "--" {
            after_double_dash = true;
            continue;
        }
        if (after_double_dash || looks_like_path(arg)) && arg.contains("memory-bank") {
            paths.push(arg.clone());
        }
    }
    paths
}

/// Targets of every output redirect (`>`, `>>`, `2>`, `&>`) in a segment, in order
pub fn redirect_targets(segment: &str) -> Vec<String> {
    let chars: Vec<char> = segment.chars().collect();
    let mut targets = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '>' {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        if chars.get(j) == Some(&'>') {
            j += 1;
        }
        while chars.get(j).is_some_and(|c| c.is_whitespace()) {
            j += 1;
        }
        if matches!(chars.get(j), Some('\'') | Some('"')) {
            j += 1;
        }
        let target: String = chars[j.min(chars.len())..]
            .iter()
            .take_while(|c| !c.is_whitespace() && **c != '\'' && **c != '"' && **c != '>')
            .collect();
        i = j + target.chars().count();
        if !target.is_empty() {
            targets.push(target);
        }
    }
    targets
}

/// An output redirect to a file: `>` or `>>` followed by a target, not an fd
/// duplication like `2>&1`
pub fn has_output_redirect(command: &str) -> bool {
    let chars: Vec<char> = command.chars().collect();
    chars.iter().enumerate().any(|(i, &c)| {
        if c != '>' {
            return false;
        }
        let prev_ok = i == 0 || !(chars[i - 1].is_ascii_digit() || chars[i - 1] == '&');
        if !prev_ok {
            return false;
        }
        let rest_start = match chars.get(i + 1) {
            Some('&') => return false,
            Some('>') => i + 2,
            _ => i + 1,
        };
        chars[rest_start.min(chars.len())..]
            .iter()
            .any(|c| !c.is_whitespace())
    })
}

const WRITE_HINTS: &[&str] = &[r"\|\s*tee\s", r"\bsed\s+(-[^-]*)?-i", r"\bperl\s+(-[^-]*)?-[pi]"];

pub struct ShellRules {
    write_hints: RegexSet,
    read_only: RegexSet,
    find: Regex,
    find_actions: Regex,
}

impl ShellRules {
    pub fn new() -> Result<Self> {
        Ok(Self {
            write_hints: RegexSet::new(WRITE_HINTS)?,
            read_only: RegexSet::new([
                r"(?i)^\s*(ls|cat|head|tail|less|more|grep|rg|ag|find|tree|wc|file|stat)\b",
                r"(?i)^\s*git\s+",
            ])?,
            find: Regex::new(r"(?i)^\s*find\b")?,
            find_actions: Regex::new(
                r"(?i)-(delete|exec|ok|execdir|okdir|fprint|fprint0|fprintf|fls)\b",
            )?,
        })
    }

    /// Redirects, `tee`, `sed -i`, `perl -pi`
    pub fn is_likely_write(&self, command: &str) -> bool {
        has_output_redirect(command) || self.write_hints.is_match(command)
    }

    /// Read-only command; `find` with a write action is not
    fn is_read_only(&self, segment: &str) -> bool {
        self.read_only.is_match(segment)
            && !(self.find.is_match(segment) && self.find_actions.is_match(segment))
    }

    /// The first argument through which `command` would modify the memory store
    pub fn memory_bank_write(&self, command: &str, paths: &MemoryBankPaths) -> Option<String> {
        if !command.contains("memory-bank") {
            return None;
        }

        for segment in parse_shell_command(command) {
            if !segment.text.contains("memory-bank") {
                continue;
            }

            if let Some(target) = redirect_targets(&segment.text)
                .into_iter()
                .find(|t| t.contains("memory-bank") && paths.is_memory_bank_path(t))
            {
                return Some(target);
            }

            if self.is_read_only(&segment.text) {
                continue;
            }

            if let Some(hit) = memory_bank_path_args(&segment.argv)
                .into_iter()
                .find(|arg| paths.is_memory_bank_path(arg))
            {
                return Some(hit);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn rules() -> ShellRules {
        ShellRules::new().unwrap()
    }

    fn store() -> MemoryBankPaths {
        MemoryBankPaths::new(Path::new("/proj"))
    }

    #[test]
    fn test_split_segments_respects_quotes() {
        assert_eq!(
            split_segments("echo 'a;b' && ls | wc -l; cat \"x|y\" || true"),
            vec!["echo 'a;b'", "ls", "wc -l", "cat \"x|y\"", "true"]
        );
        assert_eq!(split_segments("echo \"a\\\";b\"; ls"), vec!["echo \"a\\\";b\"", "ls"]);
    }

    #[test]
    fn test_parse_argv() {
        assert_eq!(
            parse_argv(r#"cp "my file.md" 'memory-bank/x y.md'"#),
            vec!["cp", "my file.md", "memory-bank/x y.md"]
        );
        assert_eq!(parse_argv("echo \"a\\\"b\""), vec!["echo", "a\"b"]);
    }

    #[test]
    fn test_redirect_targets() {
        assert_eq!(redirect_targets("echo hi > memory-bank/a.md"), vec!["memory-bank/a.md"]);
        assert_eq!(redirect_targets("echo hi >>'memory-bank/a.md'"), vec!["memory-bank/a.md"]);
        assert_eq!(
            redirect_targets("cat a 2>/dev/null > memory-bank/x.md"),
            vec!["/dev/null", "memory-bank/x.md"]
        );
        assert!(redirect_targets("echo hi").is_empty());
    }

    #[test]
    fn test_later_redirect_into_store_blocked() {
        let r = rules();
        let s = store();
        assert_eq!(
            r.memory_bank_write("cat a 2>/dev/null > memory-bank/x.md", &s).as_deref(),
            Some("memory-bank/x.md")
        );
        assert!(r
            .memory_bank_write("cat memory-bank/MEMORY.md 2>/dev/null", &s)
            .is_none());
    }

    #[test]
    fn test_has_output_redirect() {
        assert!(has_output_redirect("echo x > out.txt"));
        assert!(has_output_redirect("echo x >> out.txt"));
        assert!(!has_output_redirect("cargo test 2>&1"));
        assert!(!has_output_redirect("ls 2> /dev/null"));
        assert!(!has_output_redirect("echo x >"));
    }

    #[test]
    fn test_likely_write_hints() {
        let r = rules();
        assert!(r.is_likely_write("cat a | tee b.txt"));
        assert!(r.is_likely_write("sed -i 's/a/b/' f"));
        assert!(r.is_likely_write("perl -pi -e 's/a/b/' f"));
        assert!(!r.is_likely_write("grep -r foo src"));
    }

    #[test]
    fn test_memory_bank_writes_blocked() {
        let r = rules();
        let s = store();
        assert!(r.memory_bank_write("echo x > memory-bank/notes.md", &s).is_some());
        assert!(r.memory_bank_write("cp draft.md memory-bank/details/", &s).is_some());
        assert!(r.memory_bank_write("rm -- memory-bank", &s).is_some());
        assert!(r.memory_bank_write("find memory-bank -name '*.tmp' -delete", &s).is_some());
        assert!(r.memory_bank_write("cd /tmp && mv x ./memory-bank/y.md", &s).is_some());
    }

    #[test]
    fn test_memory_bank_reads_allowed() {
        let r = rules();
        let s = store();
        assert!(r.memory_bank_write("cat memory-bank/MEMORY.md", &s).is_none());
        assert!(r.memory_bank_write("ls memory-bank/details | wc -l", &s).is_none());
        assert!(r.memory_bank_write("git diff memory-bank/", &s).is_none());
        assert!(r.memory_bank_write("find memory-bank -name '*.md'", &s).is_none());
        assert!(r.memory_bank_write("echo x > docs/memory-bank-notes.md", &s).is_none());
        assert!(r.memory_bank_write("cargo build", &s).is_none());
    }
}
