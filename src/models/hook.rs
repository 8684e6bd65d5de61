//! SessionStart hook wire types

use serde::{Deserialize, Serialize};

pub const SESSION_START_EVENT: &str = "SessionStart";

/// Payload the agent runtime pipes to the hook on stdin; every field is optional
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct HookInput {
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    pub hook_specific_output: HookSpecificOutput,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HookSpecificOutput {
    pub hook_event_name: String,
    pub additional_context: String,
}

impl HookOutput {
    pub fn session_start(additional_context: impl Into<String>) -> Self {
        Self {
            hook_specific_output: HookSpecificOutput {
                hook_event_name: SESSION_START_EVENT.to_string(),
                additional_context: additional_context.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_shape() {
        let out = serde_json::to_value(HookOutput::session_start("ctx")).unwrap();
        assert_eq!(out["hookSpecificOutput"]["hookEventName"], "SessionStart");
        assert_eq!(out["hookSpecificOutput"]["additionalContext"], "ctx");
    }

    #[test]
    fn test_input_tolerates_extra_fields() {
        let input: HookInput =
            serde_json::from_str(r#"{"cwd":"/work/app","hook_event_name":"SessionStart"}"#).unwrap();
        assert_eq!(input.cwd.as_deref(), Some("/work/app"));
        assert!(input.session_id.is_none());
    }
}
