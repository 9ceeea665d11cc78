//! Deployment request configuration.

use std::path::PathBuf;

use crate::binary::BinaryKind;

/// Everything one deployment run needs to know, assembled by the CLI
/// and fixed for the lifetime of the run.
#[derive(Debug, Clone)]
pub struct DeployPlan {
    /// Detected format of the main binary.
    pub kind: BinaryKind,
    /// The application executable being deployed.
    pub binary: PathBuf,
    /// Platform-normalized output root (`.AppDir` / `.app` / flat dir).
    pub output_root: PathBuf,
    /// Extra QML source roots from the command line.
    pub qml_roots: Vec<PathBuf>,
    /// Explicit language tags; empty means derive from the locale
    /// environment.
    pub languages: Vec<String>,
    /// Directories merged verbatim onto the output as a late step.
    pub overlays: Vec<PathBuf>,
}
