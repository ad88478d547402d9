//! Shared helpers for CLI commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use console::style;

use procflow_sched::{RunConfig, SetStatus};

/// Default configuration file name.
const CONFIG_FILE: &str = "procflow.yaml";

/// Resolve the configuration path.
///
/// An explicit path wins, then `./procflow.yaml`, then the user config
/// directory (`~/.config/procflow/procflow.yaml` on Linux).
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        return Ok(local);
    }

    let user = dirs::config_dir()
        .map(|dir| dir.join("procflow").join(CONFIG_FILE))
        .filter(|path| path.exists());

    user.ok_or_else(|| {
        anyhow::anyhow!("No configuration found; pass --config or create ./{CONFIG_FILE}")
    })
}

/// Load, override from the environment, and validate.
pub fn load_config(explicit: Option<&Path>) -> Result<RunConfig> {
    let path = resolve_config_path(explicit)?;
    RunConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Status name styled for a terminal.
pub fn styled_status(status: SetStatus) -> console::StyledObject<&'static str> {
    let name = status.name();
    match status {
        SetStatus::Completed => style(name).green(),
        SetStatus::Failed => style(name).red(),
        SetStatus::NoData | SetStatus::PartialData => style(name).yellow(),
        SetStatus::DataReady | SetStatus::Running => style(name).cyan(),
    }
}
