//! Installer engine
//!
//! Copies the skill and slash-command files into the host's config directory,
//! patches the host config, and records a manifest. Every change goes through the
//! [`atomic`] helpers so a failure at any step rolls the whole run back.

pub mod atomic;
pub mod config;
pub mod doctor;
pub mod error;
pub mod migrations;

use crate::models::manifest::{Manifest, ManifestFile, MANIFEST_FILE};
use crate::Result;
use atomic::{atomic_copy_dir, atomic_remove, CopiedFile, UndoStack};
use colored::Colorize;
use config::{inject_key_trigger, patch_host_config, PatchOptions};
use error::InstallError;
use std::fmt;
use std::path::{Path, PathBuf};

/// Published package name, as referenced from the host's plugin list
pub const PACKAGE_NAME: &str = "memory-bank-skill";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Sub-agent the installer defines in the host config
pub const AGENT_NAME: &str = "memory-reader";
/// Marker field on config entries written by the installer
pub const INSTALLED_BY_KEY: &str = "installedBy";
/// Slash commands shipped with the package
pub const SHIPPED_COMMANDS: &[&str] = &["memory-bank-refresh.md"];

const TOTAL_STEPS: usize = 6;

/// Result of one install step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Created,
    Updated,
    Skipped,
    AlreadyConfigured,
}

impl StepStatus {
    /// Nothing was written by this step
    pub fn is_noop(self) -> bool {
        matches!(self, StepStatus::Skipped | StepStatus::AlreadyConfigured)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepStatus::Created => "created",
            StepStatus::Updated => "updated",
            StepStatus::Skipped => "skipped",
            StepStatus::AlreadyConfigured => "already-configured",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: String,
    pub status: StepStatus,
    pub details: String,
}

impl StepReport {
    pub fn new(step: impl Into<String>, status: StepStatus, details: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            status,
            details: details.into(),
        }
    }
}

/// Where the installer reads from and writes to
#[derive(Debug, Clone)]
pub struct InstallPaths {
    /// Directory holding the shipped `skill/` and `command/` trees
    pub package_root: PathBuf,
    /// Host config directory (`~/.config/opencode`)
    pub config_dir: PathBuf,
    /// Host cache directory (`~/.cache/opencode`)
    pub cache_dir: PathBuf,
}

impl InstallPaths {
    /// Resolve paths from the environment and the user's home directory
    pub fn detect() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;

        let config_dir = std::env::var_os("OPENCODE_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".config").join("opencode"));

        Ok(Self {
            package_root: detect_package_root(),
            config_dir,
            cache_dir: home.join(".cache").join("opencode"),
        })
    }

    pub fn skill_source(&self) -> PathBuf {
        self.package_root.join("skill").join("memory-bank")
    }

    pub fn command_source(&self) -> PathBuf {
        self.package_root.join("command")
    }

    pub fn skill_dir(&self) -> PathBuf {
        self.config_dir.join("skill").join("memory-bank")
    }

    pub fn command_dir(&self) -> PathBuf {
        self.config_dir.join("command")
    }

    pub fn host_config(&self) -> PathBuf {
        self.config_dir.join("opencode.json")
    }

    pub fn orchestrator_config(&self) -> PathBuf {
        self.config_dir.join("oh-my-opencode.json")
    }

    /// Plugin file copied by installers that predate the published package
    pub fn legacy_plugin_file(&self) -> PathBuf {
        self.config_dir.join("plugin").join("memory-bank.ts")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.skill_dir().join(MANIFEST_FILE)
    }

    /// The host's cached copy of the published plugin package
    pub fn cached_package_json(&self) -> PathBuf {
        self.cache_dir
            .join("node_modules")
            .join(PACKAGE_NAME)
            .join("package.json")
    }
}

fn has_assets(dir: &Path) -> bool {
    dir.join("skill").join("memory-bank").join("SKILL.md").is_file()
}

/// `MEMORY_BANK_PACKAGE_ROOT`, else the nearest ancestor of the executable that
/// ships the assets, else the crate directory
fn detect_package_root() -> PathBuf {
    if let Some(root) = std::env::var_os("MEMORY_BANK_PACKAGE_ROOT") {
        return PathBuf::from(root);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(found) = exe.ancestors().skip(1).find(|dir| has_assets(dir)) {
            return found.to_path_buf();
        }
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Summary of a successful install
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub steps: Vec<StepReport>,
    pub manifest: Manifest,
}

impl InstallOutcome {
    /// True when the run found everything in place and wrote nothing
    pub fn already_installed(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_noop())
    }
}

/// One install run
pub struct Installer {
    paths: InstallPaths,
    version: String,
    model: Option<String>,
}

impl Installer {
    pub fn new(paths: InstallPaths) -> Self {
        Self {
            paths,
            version: VERSION.to_string(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn paths(&self) -> &InstallPaths {
        &self.paths
    }

    /// Run every step; on failure, roll back everything this run changed
    pub fn run(&self) -> Result<InstallOutcome> {
        let mut undo = UndoStack::new();
        match self.run_steps(&mut undo) {
            Ok(outcome) => {
                undo.cleanup_backups();
                Ok(outcome)
            }
            Err(e) => {
                undo.rollback();
                Err(e)
            }
        }
    }

    fn run_steps(&self, undo: &mut UndoStack) -> Result<InstallOutcome> {
        let mut steps = Vec::new();
        let mut files: Vec<ManifestFile> = Vec::new();

        log_step(1, "Installing skill files...");
        let (report, copied) = self.install_skill_files(undo)?;
        files.extend(copied.into_iter().map(to_manifest_file));
        steps.push(log_report(report));

        log_step(2, "Installing slash commands...");
        let (report, copied) = self.install_commands(undo)?;
        files.extend(copied.into_iter().map(to_manifest_file));
        steps.push(log_report(report));

        log_step(3, "Removing legacy plugin file...");
        steps.push(log_report(self.remove_legacy_plugin(undo)?));

        log_step(4, "Configuring opencode.json...");
        let skill_dir = self.paths.skill_dir();
        let options = PatchOptions {
            version: &self.version,
            model: self.model.as_deref(),
            skill_dir: &skill_dir,
            legacy_plugin_url: format!("file://{}", self.paths.legacy_plugin_file().display()),
        };
        steps.push(log_report(patch_host_config(&self.paths.host_config(), &options, undo)?));

        log_step(5, "Injecting key trigger...");
        steps.push(log_report(inject_key_trigger(&self.paths.orchestrator_config(), undo)?));

        log_step(6, "Writing manifest...");
        let manifest = Manifest::new(self.version.clone(), files);
        steps.push(log_report(self.write_manifest(&manifest, &steps, undo)?));

        Ok(InstallOutcome { steps, manifest })
    }

    fn install_skill_files(&self, undo: &mut UndoStack) -> Result<(StepReport, Vec<CopiedFile>)> {
        let src = self.paths.skill_source();
        let dest = self.paths.skill_dir();
        copy_tree("Installing skill files", &src, &dest, undo)
    }

    fn install_commands(&self, undo: &mut UndoStack) -> Result<(StepReport, Vec<CopiedFile>)> {
        let src = self.paths.command_source();
        let dest = self.paths.command_dir();
        copy_tree("Installing slash commands", &src, &dest, undo)
    }

    fn remove_legacy_plugin(&self, undo: &mut UndoStack) -> Result<StepReport> {
        const STEP: &str = "Removing legacy plugin file";
        let legacy = self.paths.legacy_plugin_file();
        if atomic_remove(&legacy, undo)? {
            Ok(StepReport::new(STEP, StepStatus::Updated, format!("Removed {}", legacy.display())))
        } else {
            Ok(StepReport::new(STEP, StepStatus::Skipped, "No legacy plugin file"))
        }
    }

    fn write_manifest(
        &self,
        manifest: &Manifest,
        previous: &[StepReport],
        undo: &mut UndoStack,
    ) -> Result<StepReport> {
        const STEP: &str = "Writing manifest";
        let path = self.paths.manifest_path();

        let unchanged = previous.iter().all(|s| s.status.is_noop())
            && Manifest::load(&path)
                .map(|existing| existing.same_contents(manifest))
                .unwrap_or(false);
        if unchanged {
            return Ok(StepReport::new(STEP, StepStatus::AlreadyConfigured, path.display().to_string()));
        }

        let outcome = atomic::atomic_write(&path, manifest.to_json()?.as_bytes(), undo)?;
        let status = match outcome {
            atomic::WriteOutcome::Created => StepStatus::Created,
            atomic::WriteOutcome::Updated => StepStatus::Updated,
            atomic::WriteOutcome::Unchanged => StepStatus::AlreadyConfigured,
        };
        Ok(StepReport::new(STEP, status, path.display().to_string()))
    }
}

fn copy_tree(
    step: &str,
    src: &Path,
    dest: &Path,
    undo: &mut UndoStack,
) -> Result<(StepReport, Vec<CopiedFile>)> {
    if !src.is_dir() {
        return Err(InstallError::MissingSource(src.to_path_buf()).into());
    }

    let existed = dest.exists();
    let copied = atomic_copy_dir(src, dest, undo)?;
    let status = if !copied.iter().any(|c| c.outcome.changed()) && existed {
        StepStatus::AlreadyConfigured
    } else if existed {
        StepStatus::Updated
    } else {
        StepStatus::Created
    };

    Ok((StepReport::new(step, status, dest.display().to_string()), copied))
}

fn to_manifest_file(copied: CopiedFile) -> ManifestFile {
    ManifestFile {
        path: copied.path,
        sha256: copied.sha256,
    }
}

fn log_step(num: usize, msg: &str) {
    println!("{} {}", format!("[{}/{}]", num, TOTAL_STEPS).cyan(), msg);
}

fn log_report(report: StepReport) -> StepReport {
    println!("      {} {}", "→".dimmed(), report.details);
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_status_noop() {
        assert!(StepStatus::Skipped.is_noop());
        assert!(StepStatus::AlreadyConfigured.is_noop());
        assert!(!StepStatus::Created.is_noop());
        assert_eq!(StepStatus::AlreadyConfigured.to_string(), "already-configured");
    }

    #[test]
    fn test_install_paths_layout() {
        let paths = InstallPaths {
            package_root: PathBuf::from("/pkg"),
            config_dir: PathBuf::from("/home/u/.config/opencode"),
            cache_dir: PathBuf::from("/home/u/.cache/opencode"),
        };
        assert_eq!(paths.skill_source(), PathBuf::from("/pkg/skill/memory-bank"));
        assert_eq!(
            paths.manifest_path(),
            PathBuf::from("/home/u/.config/opencode/skill/memory-bank/.manifest.json")
        );
        assert_eq!(
            paths.cached_package_json(),
            PathBuf::from("/home/u/.cache/opencode/node_modules/memory-bank-skill/package.json")
        );
    }
}
