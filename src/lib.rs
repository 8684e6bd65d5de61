// Memory Bank - persistent project memory for coding agents
// Installer for the host agent runtime plus the runtime plugin that injects and guards it

pub mod cli;
pub mod install;
pub mod models;
pub mod parser;
pub mod plugin;

pub use anyhow::{Context, Result};
pub use colored::Colorize;

// Re-export commonly used types
pub use install::{InstallOutcome, InstallPaths, Installer};
pub use models::Manifest;
pub use plugin::{GateError, HostClient, HostEvent, MemoryBankPlugin, PluginConfig, ToolCall};
