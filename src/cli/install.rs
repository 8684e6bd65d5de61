use crate::install::error::InstallError;
use crate::install::{InstallOutcome, InstallPaths, Installer, StepStatus};
use crate::Result;
use colored::Colorize;

/// Run install command
pub fn run(model: Option<String>) -> Result<()> {
    let paths = InstallPaths::detect()?;
    run_with(paths, model)
}

pub fn run_with(paths: InstallPaths, model: Option<String>) -> Result<()> {
    println!("   Config dir: {}", paths.config_dir.display().to_string().dimmed());
    println!();

    let installer = Installer::new(paths).with_model(model);
    match installer.run() {
        Ok(outcome) => {
            print_summary(&outcome);
            Ok(())
        }
        Err(e) => {
            println!();
            println!("{}", "✗ Installation failed. All changes have been rolled back.".red());
            if let Some(hint) = remedy(&e) {
                println!("   {}", hint.yellow());
            }
            println!();
            Err(e)
        }
    }
}

fn print_summary(outcome: &InstallOutcome) {
    println!();
    if outcome.already_installed() {
        println!(
            "{}",
            format!("✓ Already installed (v{})", outcome.manifest.version).green()
        );
    } else {
        println!("{}", "✓ Installation complete!".green().bold());
        println!();
        for step in &outcome.steps {
            let status = match step.status {
                StepStatus::Created => step.status.to_string().green(),
                StepStatus::Updated => step.status.to_string().cyan(),
                StepStatus::Skipped | StepStatus::AlreadyConfigured => step.status.to_string().dimmed(),
            };
            println!("   {:<28} {}", step.step, status);
        }
    }
    println!();
    println!("{}", "Next step: Restart OpenCode".cyan());
}

fn remedy(err: &anyhow::Error) -> Option<String> {
    match err.downcast_ref::<InstallError>()? {
        InstallError::MissingSource(_) => Some(
            "The package assets are missing. Set MEMORY_BANK_PACKAGE_ROOT to the directory holding skill/ and command/.".to_string(),
        ),
        InstallError::ConfigParse { path, .. } => Some(format!(
            "Fix the JSON in {} and run `memory-bank install` again.",
            path.display()
        )),
        InstallError::ConfigShape { path, key, .. } => Some(format!(
            "Correct `{}` in {} and run `memory-bank install` again.",
            key,
            path.display()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_remedy_for_parse_error() {
        let err: anyhow::Error = InstallError::ConfigParse {
            path: PathBuf::from("/cfg/opencode.json"),
            message: "expected value".into(),
            suggested_patch: "{}".into(),
        }
        .into();
        let hint = remedy(&err).unwrap();
        assert!(hint.contains("/cfg/opencode.json"));
    }

    #[test]
    fn test_no_remedy_for_io_error() {
        let err = anyhow::anyhow!("disk full");
        assert!(remedy(&err).is_none());
    }
}
