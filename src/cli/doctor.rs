use crate::install::doctor::{diagnose, DoctorReport};
use crate::install::{InstallPaths, VERSION};
use crate::Result;
use colored::Colorize;

/// Run doctor command; fails when any check fails
pub fn run() -> Result<()> {
    let paths = InstallPaths::detect()?;
    let report = diagnose(&paths, VERSION);
    print_report(&report);

    if !report.all_passed() {
        anyhow::bail!("{} check(s) failed", report.checks.iter().filter(|c| !c.ok).count());
    }
    Ok(())
}

fn print_report(report: &DoctorReport) {
    println!("{}", format!("Memory Bank Doctor v{}", VERSION).cyan().bold());
    println!();

    for check in &report.checks {
        let icon = if check.ok { "✓".green() } else { "✗".red() };
        println!("{} {}", icon, check.name);
        println!("      {} {}", "→".dimmed(), check.detail.dimmed());
    }

    if !report.warnings.is_empty() {
        println!();
        for warning in &report.warnings {
            println!("{}", format!("⚠ {}", warning).yellow());
        }
    }

    if let Some(manifest) = &report.manifest {
        println!();
        println!(
            "{}",
            format!("Installed v{} at {}", manifest.version, manifest.installed_at).dimmed()
        );
    }

    println!();
    if report.all_passed() {
        println!("{}", "All checks passed.".green());
    } else {
        println!("{}", "Some checks failed. Run `memory-bank install` to repair.".yellow());
    }
}
