//! ELF RUNPATH patching via `patchelf`.

use anyhow::{Context, Result};
use std::path::Path;
use walkdir::WalkDir;

use crate::process::Cmd;

/// RUNPATH for the main binary in `usr/bin`, pointing at `usr/lib`.
pub const MAIN_BINARY_RUNPATH: &str = "$ORIGIN/../lib";
/// RUNPATH for plugins in `usr/plugins/<category>`, two levels up.
pub const PLUGIN_RUNPATH: &str = "$ORIGIN/../../lib";

/// Set the RUNPATH of one ELF file.
pub fn set_runpath(file: &Path, runpath: &str) -> Result<()> {
    let result = Cmd::new("patchelf")
        .args(["--set-rpath", runpath])
        .arg_path(file)
        .allow_fail()
        .run()
        .context("failed to run patchelf")?;
    if !result.success() {
        anyhow::bail!(
            "patchelf failed to set RUNPATH on {}",
            file.display()
        );
    }
    Ok(())
}

/// Sweep every shared object under the staged plugin tree and point its
/// RUNPATH at the deployed library directory. Failures on individual
/// files are warnings.
pub fn set_plugins_runpath(plugins_dir: &Path) {
    if !plugins_dir.is_dir() {
        return;
    }
    for entry in WalkDir::new(plugins_dir).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name.contains(".so") {
            continue;
        }
        if let Err(e) = set_runpath(entry.path(), PLUGIN_RUNPATH) {
            eprintln!("Warning: {}", e);
        }
    }
}
