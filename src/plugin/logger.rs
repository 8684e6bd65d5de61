//! Structured logging that also reaches the host's log

use super::host::{HostClient, LogEntry, LogLevel, SERVICE_NAME};
use serde_json::Value;
use std::sync::Arc;

const MAX_FIELDS_CHARS: usize = 2000;

/// Emits every line through `tracing` and forwards it to the host, best effort
#[derive(Clone)]
pub struct PluginLogger {
    host: Arc<dyn HostClient>,
    debug: bool,
}

impl PluginLogger {
    pub fn new(host: Arc<dyn HostClient>, debug: bool) -> Self {
        Self { host, debug }
    }

    pub async fn debug(&self, message: &str, fields: Value) {
        self.emit(LogLevel::Debug, message, fields).await;
    }

    pub async fn info(&self, message: &str, fields: Value) {
        self.emit(LogLevel::Info, message, fields).await;
    }

    pub async fn warn(&self, message: &str, fields: Value) {
        self.emit(LogLevel::Warn, message, fields).await;
    }

    pub async fn error(&self, message: &str, fields: Value) {
        self.emit(LogLevel::Error, message, fields).await;
    }

    async fn emit(&self, level: LogLevel, message: &str, fields: Value) {
        let line = format_line(message, &fields);
        match level {
            LogLevel::Debug => tracing::debug!(target: "memory_bank::plugin", "{}", line),
            LogLevel::Info => tracing::info!(target: "memory_bank::plugin", "{}", line),
            LogLevel::Warn => tracing::warn!(target: "memory_bank::plugin", "{}", line),
            LogLevel::Error => tracing::error!(target: "memory_bank::plugin", "{}", line),
        }

        if level == LogLevel::Debug && !self.debug {
            return;
        }

        let entry = LogEntry {
            service: SERVICE_NAME.to_string(),
            level,
            message: line,
        };
        if let Err(e) = self.host.log(entry).await {
            tracing::trace!(error = %e, "host log forwarding failed");
        }
    }
}

fn format_line(message: &str, fields: &Value) -> String {
    match fields {
        Value::Null => message.to_string(),
        Value::Object(map) if map.is_empty() => message.to_string(),
        _ => {
            let rendered = fields.to_string();
            if rendered.chars().count() > MAX_FIELDS_CHARS {
                let cut: String = rendered.chars().take(MAX_FIELDS_CHARS).collect();
                format!("{} {}...", message, cut)
            } else {
                format!("{} {}", message, rendered)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::host::PromptRequest;
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Sink {
        entries: Mutex<Vec<LogEntry>>,
        fail: bool,
    }

    #[async_trait]
    impl HostClient for Sink {
        async fn prompt(&self, _session_id: &str, _request: PromptRequest) -> Result<()> {
            Ok(())
        }

        async fn log(&self, entry: LogEntry) -> Result<()> {
            if self.fail {
                anyhow::bail!("host unavailable");
            }
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }
    }

    #[test]
    fn test_format_line() {
        assert_eq!(format_line("hello", &Value::Null), "hello");
        assert_eq!(format_line("hello", &json!({})), "hello");
        assert_eq!(format_line("hello", &json!({"a": 1})), r#"hello {"a":1}"#);
        let long = json!({ "x": "y".repeat(3000) });
        assert!(format_line("m", &long).ends_with("..."));
    }

    #[tokio::test]
    async fn test_debug_lines_gated() {
        let sink = Arc::new(Sink::default());
        let logger = PluginLogger::new(sink.clone(), false);
        logger.debug("hidden", Value::Null).await;
        logger.info("shown", json!({"session": "s1"})).await;

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, LogLevel::Info);
        assert_eq!(entries[0].service, "memory-bank");
        assert!(entries[0].message.starts_with("shown"));
    }

    #[tokio::test]
    async fn test_forwarding_failure_is_swallowed() {
        let sink = Arc::new(Sink { fail: true, ..Default::default() });
        let logger = PluginLogger::new(sink, true);
        logger.error("still fine", Value::Null).await;
    }
}
