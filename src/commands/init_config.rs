use anyhow::{Context as _, Result, bail};
use std::fs;
use std::path::Path;

use crate::Context;
use crate::config;
use crate::ui;

/// Write the default configuration to `path`
pub fn run(ctx: &Context, path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Could not create {}", parent.display()))?;
    }
    fs::write(path, config::default_config_toml())
        .with_context(|| format!("Could not write {}", path.display()))?;

    if !ctx.quiet {
        ui::success(&format!("Wrote {}", path.display()));
        ui::dim("Set aws.identity_center.instance_id and the group names before running");
    }
    Ok(())
}
