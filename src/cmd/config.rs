//! `config init [--detect] [--force]`, `config show`, `config set`.

use crate::workspace::{EnvConfig, detect_environment};
use anyhow::{Result, bail};
use console::style;
use std::path::Path;

pub fn cmd_config_init(project_dir: &Path, detect: bool, force: bool) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let path = workspace.config_path();

    let existing = EnvConfig::load(&path).unwrap_or_default();
    let has_settings = existing.package_manager.is_some()
        || existing.test_framework.is_some()
        || !existing.lint_tools.is_empty();
    if has_settings && !force {
        bail!("config already initialized; use --force to overwrite");
    }

    let config = if detect {
        detect_environment(&workspace.root)
    } else {
        EnvConfig::default()
    };
    config.save(&path)?;
    println!("{} {}", style("Wrote").green(), path.display());
    if detect {
        if let Some(pm) = config.package_manager {
            println!("  detected package manager: {pm}");
        }
        if let Some(tf) = config.test_framework {
            println!("  detected test framework: {tf}");
        }
        if !config.lint_tools.is_empty() {
            println!("  detected lint tools: {}", config.lint_tools.join(", "));
        }
    }
    Ok(())
}

pub fn cmd_config_show(project_dir: &Path) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let raw = std::fs::read_to_string(workspace.config_path())?;
    print!("{raw}");
    Ok(())
}

pub fn cmd_config_set(project_dir: &Path, key: &str, value: &str) -> Result<()> {
    let workspace = super::open_workspace(project_dir)?;
    let path = workspace.config_path();
    let mut config = EnvConfig::load(&path).unwrap_or_default();
    config.set_key(key, value)?;
    config.save(&path)?;
    println!("{} {key} = {value}", style("Set").green());
    Ok(())
}
