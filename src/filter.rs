//! Deployment filter: which resolved libraries belong in the output.
//!
//! Qt libraries and libraries living next to the application are
//! staged; host-system libraries are left for the target system to
//! provide. The rules differ per format because each platform draws the
//! system boundary differently.

use std::path::Path;

use crate::binary::BinaryKind;
use crate::deps::canonical_key;
use crate::resolve::ResolveContext;

/// DLLs provided by every Windows installation; never staged.
const WINDOWS_SYSTEM_DLLS: &[&str] = &[
    "kernel32.dll",
    "user32.dll",
    "gdi32.dll",
    "shell32.dll",
    "ole32.dll",
    "advapi32.dll",
    "ws2_32.dll",
    "ntdll.dll",
    "sechost.dll",
    "shlwapi.dll",
    "comdlg32.dll",
    "imm32.dll",
    "version.dll",
    "winmm.dll",
    "cfgmgr32.dll",
];

/// Heuristic for Qt 6 library names across platforms: the lowercased
/// name starts with `qt` or contains `qt6`.
pub fn is_qt_library_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.starts_with("qt") || lower.contains("qt6")
}

/// Decide whether a resolved library should be staged into the output.
pub fn should_deploy(lib_path: &Path, kind: BinaryKind, ctx: &ResolveContext) -> bool {
    let base = lib_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let path_str = lib_path.to_string_lossy();

    let qt_name = is_qt_library_name(&base);
    let qt_path = ctx.qt.contains(lib_path);
    let near_binary = lib_path.parent().map(canonical_key)
        == ctx.plan.binary.parent().map(canonical_key);

    match kind {
        BinaryKind::Elf => {
            if path_str.starts_with("/lib") || path_str.starts_with("/usr/lib") {
                return qt_name || qt_path;
            }
            qt_name || qt_path || near_binary
        }
        BinaryKind::Pe => {
            let lower = base.to_lowercase();
            if lower.starts_with("api-ms-win-") || lower.starts_with("ext-ms-win-") {
                return false;
            }
            if WINDOWS_SYSTEM_DLLS.contains(&lower.as_str()) {
                return false;
            }
            // Cross builds resolve DLLs out of the Nix store.
            let in_nix_store = path_str.starts_with("/nix/store/");
            in_nix_store || qt_name || qt_path || near_binary
        }
        BinaryKind::MachO => {
            if path_str.starts_with("/System/Library/Frameworks/")
                || path_str.starts_with("/usr/lib/")
            {
                return false;
            }
            qt_name || qt_path || near_binary
        }
    }
}
