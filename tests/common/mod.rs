//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use memory_bank::plugin::host::{HostClient, LogEntry, PromptRequest};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

/// Host double that records every prompt and log line
#[derive(Default)]
pub struct RecordingHost {
    prompts: Mutex<Vec<(String, PromptRequest)>>,
    logs: Mutex<Vec<LogEntry>>,
}

impl RecordingHost {
    pub fn prompts(&self) -> Vec<(String, PromptRequest)> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn prompt_texts(&self) -> Vec<String> {
        self.prompts().into_iter().map(|(_, p)| p.text).collect()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostClient for RecordingHost {
    async fn prompt(&self, session_id: &str, request: PromptRequest) -> anyhow::Result<()> {
        self.prompts
            .lock()
            .unwrap()
            .push((session_id.to_string(), request));
        Ok(())
    }

    async fn log(&self, entry: LogEntry) -> anyhow::Result<()> {
        self.logs.lock().unwrap().push(entry);
        Ok(())
    }
}

/// Relative path → contents for every entry under `dir` (directories map to `None`)
pub fn snapshot(dir: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    walkdir::WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .map(|entry| entry.unwrap())
        .map(|entry| {
            let rel = entry
                .path()
                .strip_prefix(dir)
                .unwrap()
                .to_string_lossy()
                .into_owned();
            let content = if entry.file_type().is_file() {
                Some(fs::read(entry.path()).unwrap())
            } else {
                None
            };
            (rel, content)
        })
        .collect()
}

/// Write `files` (relative path, content) under `root`, creating parents
pub fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}
