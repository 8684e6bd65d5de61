//! Ordered, named migrations for the host config's plugin list
//!
//! Older installers registered the plugin as a `file://` URL to a copied `.ts`
//! file, then as an unpinned package name. Each migration below is idempotent and
//! returns a human-readable change line when it modified the list.

use serde_json::Value;

/// Values the plugin-list migrations need
#[derive(Debug, Clone)]
pub struct MigrationContext<'a> {
    pub package: &'a str,
    pub version: &'a str,
    pub legacy_plugin_url: &'a str,
}

impl MigrationContext<'_> {
    /// `<package>@<version>`
    pub fn pinned(&self) -> String {
        format!("{}@{}", self.package, self.version)
    }

    /// True for `<package>` and `<package>@<anything>`
    pub fn refers_to_package(&self, entry: &Value) -> bool {
        entry.as_str().is_some_and(|s| {
            s == self.package
                || s.strip_prefix(self.package)
                    .is_some_and(|rest| rest.starts_with('@'))
        })
    }

    fn is_legacy_reference(&self, entry: &Value) -> bool {
        entry.as_str().is_some_and(|s| {
            s == self.legacy_plugin_url
                || (s.starts_with("file://") && s.ends_with("/plugin/memory-bank.ts"))
        })
    }
}

/// A single plugin-list migration step
pub struct Migration {
    pub name: &'static str,
    apply: fn(&mut Vec<Value>, &MigrationContext) -> Option<String>,
}

impl Migration {
    pub fn apply(&self, plugins: &mut Vec<Value>, ctx: &MigrationContext) -> Option<String> {
        (self.apply)(plugins, ctx)
    }
}

pub const PLUGIN_MIGRATIONS: &[Migration] = &[
    Migration {
        name: "remove-legacy-file-plugin",
        apply: remove_legacy_file_plugin,
    },
    Migration {
        name: "dedupe-plugin-entries",
        apply: dedupe_plugin_entries,
    },
    Migration {
        name: "pin-plugin-version",
        apply: pin_plugin_version,
    },
];

/// Run every migration in order, collecting change lines
pub fn run_plugin_migrations(plugins: &mut Vec<Value>, ctx: &MigrationContext) -> Vec<String> {
    PLUGIN_MIGRATIONS
        .iter()
        .filter_map(|m| m.apply(plugins, ctx))
        .collect()
}

fn remove_legacy_file_plugin(plugins: &mut Vec<Value>, ctx: &MigrationContext) -> Option<String> {
    let before = plugins.len();
    plugins.retain(|p| !ctx.is_legacy_reference(p));
    (plugins.len() != before).then(|| "Removed old file:// plugin reference".to_string())
}

fn dedupe_plugin_entries(plugins: &mut Vec<Value>, ctx: &MigrationContext) -> Option<String> {
    let before = plugins.len();
    let mut seen = false;
    plugins.retain(|p| {
        if !ctx.refers_to_package(p) {
            return true;
        }
        let keep = !seen;
        seen = true;
        keep
    });
    let removed = before - plugins.len();
    (removed > 0).then(|| format!("Removed {} duplicate plugin entr{}", removed, if removed == 1 { "y" } else { "ies" }))
}

fn pin_plugin_version(plugins: &mut Vec<Value>, ctx: &MigrationContext) -> Option<String> {
    let pinned = ctx.pinned();
    let entry = plugins.iter_mut().find(|p| ctx.refers_to_package(p))?;
    if entry.as_str() == Some(pinned.as_str()) {
        return None;
    }
    let previous = entry.as_str().unwrap_or_default().to_string();
    *entry = Value::String(pinned.clone());
    Some(format!("Pinned plugin: {} → {}", previous, pinned))
}
