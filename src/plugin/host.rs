//! The seam between the plugin and the host agent runtime

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

/// Variant tag on every prompt the plugin posts
pub const PLUGIN_PROMPT_VARIANT: &str = "memory-bank-plugin";
/// Service name attached to forwarded log lines
pub const SERVICE_NAME: &str = "memory-bank";

/// Calls back into the host
#[async_trait]
pub trait HostClient: Send + Sync {
    /// Post a synthetic message into a session
    async fn prompt(&self, session_id: &str, request: PromptRequest) -> Result<()>;

    /// Emit a log line through the host
    async fn log(&self, entry: LogEntry) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub text: String,
    /// Post without asking the agent for a reply
    pub no_reply: bool,
    pub variant: String,
}

impl PromptRequest {
    /// A no-reply message tagged as plugin-generated
    pub fn advisory(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            no_reply: true,
            variant: PLUGIN_PROMPT_VARIANT.to_string(),
        }
    }

    /// Request body in the host's wire shape
    pub fn to_body(&self) -> Value {
        json!({
            "noReply": self.no_reply,
            "variant": self.variant,
            "parts": [{ "type": "text", "text": self.text }],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub service: String,
    pub level: LogLevel,
    pub message: String,
}

/// A message as carried by `message.updated`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageInfo {
    pub role: String,
    pub content: String,
    pub id: Option<String>,
    /// Creation time in epoch millis
    pub created: Option<i64>,
    pub variant: Option<String>,
    pub agent: Option<String>,
}

impl MessageInfo {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    SessionCreated {
        session_id: String,
        parent_id: Option<String>,
    },
    SessionDeleted {
        session_id: String,
    },
    MessageUpdated {
        session_id: String,
        message: MessageInfo,
    },
    SessionIdle {
        session_id: String,
    },
}

impl HostEvent {
    pub fn session_id(&self) -> &str {
        match self {
            HostEvent::SessionCreated { session_id, .. }
            | HostEvent::SessionDeleted { session_id }
            | HostEvent::MessageUpdated { session_id, .. }
            | HostEvent::SessionIdle { session_id } => session_id,
        }
    }

    /// Decode a raw `{type, properties}` event; unknown types and events without a
    /// session id yield `None`
    pub fn from_value(event: &Value) -> Option<Self> {
        let kind = event.get("type")?.as_str()?;
        let props = event.get("properties");
        let info = props.and_then(|p| p.get("info"));
        let str_at = |v: Option<&Value>, key: &str| {
            v.and_then(|v| v.get(key)).and_then(Value::as_str).map(str::to_string)
        };

        match kind {
            "session.created" => Some(HostEvent::SessionCreated {
                session_id: str_at(info, "id")?,
                parent_id: str_at(info, "parentID"),
            }),
            "session.deleted" => Some(HostEvent::SessionDeleted {
                session_id: str_at(info, "id")?,
            }),
            "message.updated" => {
                let info = info?;
                Some(HostEvent::MessageUpdated {
                    session_id: str_at(Some(info), "sessionID")?,
                    message: MessageInfo {
                        role: str_at(Some(info), "role").unwrap_or_default(),
                        content: content_text(info.get("content")),
                        id: str_at(Some(info), "id").or_else(|| str_at(Some(info), "messageID")),
                        created: info.pointer("/time/created").and_then(Value::as_i64),
                        variant: str_at(Some(info), "variant"),
                        agent: str_at(Some(info), "agent"),
                    },
                })
            }
            "session.idle" => Some(HostEvent::SessionIdle {
                session_id: str_at(props, "sessionID").or_else(|| str_at(info, "id"))?,
            }),
            _ => None,
        }
    }
}

/// Flatten message content: plain strings as-is, part lists by their text fields
fn content_text(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

/// A tool invocation about to run
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub tool: String,
    pub session_id: String,
    pub args: Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, session_id: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            session_id: session_id.into(),
            args,
        }
    }

    pub fn tool_lower(&self) -> String {
        self.tool.to_lowercase()
    }

    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    /// Target of a read-style call
    pub fn read_target(&self) -> Option<&str> {
        self.str_arg("filePath").or_else(|| self.str_arg("path"))
    }
}
