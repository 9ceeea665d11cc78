//! Fatal error taxonomy.
//!
//! Most functions propagate `anyhow::Error`; the variants here mark the
//! failures that map to specific process exit codes. Recoverable
//! problems (a failed copy, a failed patch step) are printed as warnings
//! and never reach this type.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    /// Bad invocation: missing flags, nonexistent binary, missing tools.
    #[error("{0}")]
    Usage(String),

    /// The input file is not a recognizable PE, ELF or Mach-O binary.
    #[error("failed to detect binary type of {path}: {reason}")]
    Detect { path: PathBuf, reason: String },

    /// A referenced Qt library could not be resolved in any search path.
    #[error("required Qt library not found in search paths: {0}")]
    QtLibraryNotFound(String),
}

impl DeployError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::Usage(_) | DeployError::Detect { .. } => 2,
            DeployError::QtLibraryNotFound(_) => 1,
        }
    }
}

/// Exit code for an arbitrary error: the mapped code for a
/// [`DeployError`], `1` for anything else.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<DeployError>() {
        Some(e) => e.exit_code(),
        None => 1,
    }
}
