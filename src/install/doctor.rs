//! Read-only installation checks

use super::config::read_json_config;
use super::{InstallPaths, AGENT_NAME, PACKAGE_NAME, SHIPPED_COMMANDS};
use crate::models::manifest::Manifest;
use crate::parser::frontmatter::{parse_document, SkillFrontmatter};
use semver::Version;
use serde_json::Value;
use std::fs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DoctorReport {
    pub checks: Vec<CheckResult>,
    pub warnings: Vec<String>,
    pub manifest: Option<Manifest>,
}

impl DoctorReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }
}

/// Run every check against `paths` for the given package version
pub fn diagnose(paths: &InstallPaths, version: &str) -> DoctorReport {
    let manifest = Manifest::load(&paths.manifest_path()).ok();

    let mut checks = vec![check_skill(paths), check_commands(paths)];
    checks.extend(check_host_config(paths, version));
    checks.push(check_manifest(paths, manifest.as_ref()));

    let warnings = stale_cache_warning(paths, version).into_iter().collect();

    DoctorReport {
        checks,
        warnings,
        manifest,
    }
}

fn check_skill(paths: &InstallPaths) -> CheckResult {
    const NAME: &str = "Skill files";
    let skill_md = paths.skill_dir().join("SKILL.md");
    let content = match fs::read_to_string(&skill_md) {
        Ok(c) => c,
        Err(_) => return CheckResult::fail(NAME, format!("{} not found", skill_md.display())),
    };
    match parse_document::<SkillFrontmatter>(&content) {
        Ok(doc) => CheckResult::pass(NAME, format!("skill `{}` at {}", doc.frontmatter.name, skill_md.display())),
        Err(e) => CheckResult::fail(NAME, format!("{}: {:#}", skill_md.display(), e)),
    }
}

fn check_commands(paths: &InstallPaths) -> CheckResult {
    const NAME: &str = "Slash commands";
    let dir = paths.command_dir();
    let missing: Vec<&str> = SHIPPED_COMMANDS
        .iter()
        .copied()
        .filter(|name| !dir.join(name).is_file())
        .collect();

    if missing.is_empty() {
        CheckResult::pass(NAME, dir.display().to_string())
    } else {
        CheckResult::fail(NAME, format!("missing {} in {}", missing.join(", "), dir.display()))
    }
}

fn check_host_config(paths: &InstallPaths, version: &str) -> Vec<CheckResult> {
    let path = paths.host_config();
    let config = match read_json_config(&path, "") {
        Ok(Some(config)) => config,
        Ok(None) => {
            return vec![CheckResult::fail("opencode.json", format!("{} not found", path.display()))]
        }
        Err(e) => return vec![CheckResult::fail("opencode.json", e.to_string())],
    };

    let pinned = format!("{}@{}", PACKAGE_NAME, version);
    let has_plugin = config
        .get("plugin")
        .and_then(Value::as_array)
        .is_some_and(|plugins| plugins.iter().any(|p| p.as_str() == Some(pinned.as_str())));
    let plugin = if has_plugin {
        CheckResult::pass("Plugin entry", pinned)
    } else {
        CheckResult::fail("Plugin entry", format!("`{}` not in plugin list", pinned))
    };

    let permission = match config.pointer("/permission/skill").and_then(Value::as_str) {
        Some("allow") => CheckResult::pass("Skill permission", "permission.skill = allow"),
        other => CheckResult::fail(
            "Skill permission",
            format!("permission.skill = {}", other.unwrap_or("<unset>")),
        ),
    };

    let agent = if config.pointer(&format!("/agent/{}", AGENT_NAME)).is_some_and(Value::is_object) {
        CheckResult::pass("Reader agent", AGENT_NAME)
    } else {
        CheckResult::fail("Reader agent", format!("agent `{}` not defined", AGENT_NAME))
    };

    vec![plugin, permission, agent]
}

fn check_manifest(paths: &InstallPaths, manifest: Option<&Manifest>) -> CheckResult {
    const NAME: &str = "Manifest";
    let Some(manifest) = manifest else {
        return CheckResult::fail(NAME, format!("{} missing or unreadable", paths.manifest_path().display()));
    };

    let modified = manifest.modified_files();
    if modified.is_empty() {
        CheckResult::pass(NAME, format!("{} files verified", manifest.files.len()))
    } else {
        let names: Vec<String> = modified.iter().map(|f| f.path.display().to_string()).collect();
        CheckResult::fail(NAME, format!("modified or missing: {}", names.join(", ")))
    }
}

fn stale_cache_warning(paths: &InstallPaths, version: &str) -> Option<String> {
    let package_json = paths.cached_package_json();
    let content = fs::read_to_string(&package_json).ok()?;
    let cached: Value = serde_json::from_str(&content).ok()?;
    let cached_version = cached.get("version")?.as_str()?;

    if is_newer(version, cached_version) {
        let dir = package_json.parent().unwrap_or(&package_json);
        Some(format!(
            "Cached plugin v{} is older than v{}. Remove {} and restart OpenCode.",
            cached_version,
            version,
            dir.display()
        ))
    } else {
        None
    }
}

/// Compare two versions, `new_version > current`
pub fn is_newer(new_version: &str, current: &str) -> bool {
    let new_ver = new_version.trim_start_matches('v');
    let curr_ver = current.trim_start_matches('v');

    match (Version::parse(new_ver), Version::parse(curr_ver)) {
        (Ok(new), Ok(curr)) => new > curr,
        // unparseable: fall back to string comparison
        _ => new_ver > curr_ver,
    }
}
