//! Plugin configuration from environment variables

use std::fmt;
use std::str::FromStr;

pub const DEFAULT_MAX_CHARS: usize = 12_000;

/// How a gate reacts when its condition is met
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatingMode {
    Off,
    #[default]
    Warn,
    Block,
}

impl FromStr for GatingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(GatingMode::Off),
            "warn" => Ok(GatingMode::Warn),
            "block" => Ok(GatingMode::Block),
            other => Err(format!("Unknown gating mode: {}", other)),
        }
    }
}

impl fmt::Display for GatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GatingMode::Off => "off",
            GatingMode::Warn => "warn",
            GatingMode::Block => "block",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    /// Forward debug lines to the host log
    pub debug: bool,
    /// Turns off every reminder and notification
    pub disabled: bool,
    /// Character budget for the injected context block
    pub max_chars: usize,
    pub guard_mode: GatingMode,
    pub doc_first_mode: GatingMode,
    /// Run the idle reminder on `session.idle` events
    pub idle_reminder: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            debug: false,
            disabled: false,
            max_chars: DEFAULT_MAX_CHARS,
            guard_mode: GatingMode::Warn,
            doc_first_mode: GatingMode::Warn,
            idle_reminder: false,
        }
    }
}

impl PluginConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable lookup; unknown or malformed values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| matches!(lookup(key).as_deref(), Some("1") | Some("true"));
        let mode = |key: &str| {
            lookup(key)
                .and_then(|v| v.parse::<GatingMode>().ok())
                .unwrap_or_default()
        };

        Self {
            debug: lookup("MEMORY_BANK_DEBUG").as_deref() == Some("1"),
            disabled: flag("MEMORY_BANK_DISABLED"),
            max_chars: lookup("MEMORY_BANK_MAX_CHARS")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_MAX_CHARS),
            guard_mode: mode("MEMORY_BANK_GUARD_MODE"),
            doc_first_mode: mode("MEMORY_BANK_DOC_FIRST_MODE"),
            idle_reminder: flag("MEMORY_BANK_IDLE_REMINDER"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> PluginConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PluginConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(config_from(&[]), PluginConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("MEMORY_BANK_DEBUG", "1"),
            ("MEMORY_BANK_DISABLED", "true"),
            ("MEMORY_BANK_MAX_CHARS", "5000"),
            ("MEMORY_BANK_GUARD_MODE", "block"),
            ("MEMORY_BANK_DOC_FIRST_MODE", "OFF"),
        ]);
        assert!(config.debug);
        assert!(config.disabled);
        assert_eq!(config.max_chars, 5000);
        assert_eq!(config.guard_mode, GatingMode::Block);
        assert_eq!(config.doc_first_mode, GatingMode::Off);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[
            ("MEMORY_BANK_MAX_CHARS", "-3"),
            ("MEMORY_BANK_GUARD_MODE", "strict"),
            ("MEMORY_BANK_DISABLED", "yes"),
        ]);
        assert_eq!(config.max_chars, DEFAULT_MAX_CHARS);
        assert_eq!(config.guard_mode, GatingMode::Warn);
        assert!(!config.disabled);
        assert_eq!(config_from(&[("MEMORY_BANK_MAX_CHARS", "0")]).max_chars, DEFAULT_MAX_CHARS);
    }
}
