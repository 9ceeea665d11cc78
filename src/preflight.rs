//! Preflight checks for external tool availability.
//!
//! Validates that the host has the tools the detected binary format
//! needs before any filesystem work starts. This prevents cryptic
//! mid-deployment errors.

use std::path::Path;

use crate::binary::BinaryKind;
use crate::host;
use crate::process;

/// Whether `path` names an existing executable-looking file.
fn file_exists_executable(path: &str) -> bool {
    let p = Path::new(path);
    p.is_file() || p.is_symlink()
}

/// Compute the external tools required for `kind` that are missing from
/// the host. An empty result means deployment can proceed.
pub fn missing_tools(kind: BinaryKind) -> Vec<String> {
    let mut missing = Vec::new();

    let qtpaths_override = host::get_env("QTPATHS_BIN");
    let have_qtpaths = if qtpaths_override.is_empty() {
        process::exists("qtpaths")
    } else {
        file_exists_executable(&qtpaths_override)
    };
    if !have_qtpaths {
        if qtpaths_override.is_empty() {
            missing.push("qtpaths".to_string());
        } else {
            missing.push(format!("{} (from QTPATHS_BIN)", qtpaths_override));
        }
    }

    if !process::exists("qmlimportscanner") {
        missing.push("qmlimportscanner".to_string());
    }
    if !process::exists("lconvert") {
        missing.push("lconvert".to_string());
    }

    match kind {
        BinaryKind::Elf => {
            if !process::exists("objdump") {
                missing.push("objdump".to_string());
            }
            if !process::exists("patchelf") {
                missing.push("patchelf".to_string());
            }
        }
        BinaryKind::Pe => {
            if !process::exists("x86_64-w64-mingw32-objdump") {
                missing.push("x86_64-w64-mingw32-objdump".to_string());
            }
        }
        BinaryKind::MachO => {
            if !process::exists("llvm-otool") {
                missing.push("llvm-otool".to_string());
            }
            if !process::exists("llvm-install-name-tool") {
                missing.push("llvm-install-name-tool".to_string());
            }
        }
    }

    missing
}
