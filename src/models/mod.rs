pub mod hook;
pub mod manifest;

pub use hook::{HookInput, HookOutput};
pub use manifest::{Manifest, ManifestFile};

/// Marker the installer writes into the orchestrator's prompt; the plugin looks for it
/// to decide whether the orchestrator owns the memory trigger
pub const KEY_TRIGGER_MARKER: &str = "Memory Bank Key Trigger";
