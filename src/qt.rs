//! Qt installation probing.
//!
//! Locations come from the `qtpaths` tool (overridable through
//! `QTPATHS_BIN`), one query per key. A key whose query fails or whose
//! directory does not exist is recorded as absent, which disables the
//! corresponding deployment behavior downstream.

use std::path::{Path, PathBuf};

use crate::host;
use crate::process::Cmd;

/// Name of the Qt query tool, honoring the `QTPATHS_BIN` override.
pub fn qtpaths_bin() -> String {
    let over = host::get_env("QTPATHS_BIN");
    if over.is_empty() {
        "qtpaths".to_string()
    } else {
        over
    }
}

/// Resolved Qt installation directories. Absent entries disable the
/// behavior that would use them.
#[derive(Debug, Clone, Default)]
pub struct QtLocations {
    pub libs: Option<PathBuf>,
    pub bins: Option<PathBuf>,
    pub prefix: Option<PathBuf>,
    pub plugins: Option<PathBuf>,
    pub qml: Option<PathBuf>,
    pub translations: Option<PathBuf>,
}

impl QtLocations {
    /// Probe the environment by querying the Qt tool for each location.
    pub fn query() -> Self {
        let tool = qtpaths_bin();
        Self {
            libs: query_one(&tool, "QT_INSTALL_LIBS"),
            bins: query_one(&tool, "QT_INSTALL_BINS"),
            prefix: query_one(&tool, "QT_INSTALL_PREFIX"),
            plugins: query_one(&tool, "QT_INSTALL_PLUGINS"),
            qml: query_one(&tool, "QT_INSTALL_QML"),
            translations: query_one(&tool, "QT_INSTALL_TRANSLATIONS"),
        }
    }

    /// Whether `path` lies under the Qt libs, bins or prefix directory.
    pub fn contains(&self, path: &Path) -> bool {
        let s = path.to_string_lossy();
        for root in [&self.libs, &self.bins, &self.prefix].into_iter().flatten() {
            if s.starts_with(root.to_string_lossy().as_ref()) {
                return true;
            }
        }
        false
    }
}

fn query_one(tool: &str, key: &str) -> Option<PathBuf> {
    let result = Cmd::new(tool)
        .args(["--query", key])
        .allow_fail()
        .run()
        .ok()?;
    if !result.success() {
        return None;
    }
    let trimmed = result.stdout.trim();
    if trimmed.is_empty() {
        return None;
    }
    let path = PathBuf::from(trimmed);
    if path.exists() {
        Some(path)
    } else {
        None
    }
}
