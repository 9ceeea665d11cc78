//! Mach-O install-name and rpath fixups.
//!
//! After staging, every binary in the bundle must reference its
//! dependencies through `@rpath` so the bundle can live anywhere:
//!
//! 1. each binary under `Contents/Frameworks` gets its install-name ID
//!    set to the canonical `@rpath/...` form,
//! 2. every dependency reference that resolves into
//!    `Contents/Frameworks` is rewritten to that same canonical form,
//! 3. the main executable gains `LC_RPATH @executable_path/../Frameworks`
//!    and every plugin dylib `@loader_path/../../Frameworks`.
//!
//! All edits go through `llvm-install-name-tool`; individual failures
//! (an already-present rpath, a stripped load command) are warnings.

use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::DeployPlan;
use crate::deps::{canonical_key, query_macho_deps_with_id};
use crate::process::Cmd;

/// Canonical install name of a staged binary. Framework-internal
/// binaries become `@rpath/<Name>.framework/Versions/<V>/<Name>` with
/// the version taken from the destination path (default `A`); loose
/// dylibs become `@rpath/<basename>`.
pub fn canonical_install_name(bin_path: &Path, bundle_root: &Path) -> String {
    let rel = bin_path
        .strip_prefix(bundle_root)
        .unwrap_or(bin_path)
        .to_string_lossy()
        .into_owned();
    if let Some(fw_pos) = rel.find("Frameworks/") {
        let after = &rel[fw_pos + "Frameworks/".len()..];
        if let Some(ext_pos) = after.find(".framework/") {
            let name = &after[..ext_pos];
            let tail = &after[ext_pos + ".framework/".len()..];
            let mut version = "A";
            if let Some(v_pos) = tail.find("Versions/") {
                let after_versions = &tail[v_pos + "Versions/".len()..];
                if let Some(slash) = after_versions.find('/') {
                    version = &after_versions[..slash];
                }
            }
            return format!("@rpath/{}.framework/Versions/{}/{}", name, version, name);
        }
    }
    format!(
        "@rpath/{}",
        bin_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    )
}

/// Locate the primary binary of a framework bundle: prefer
/// `Versions/Current/<Name>`, then letter-versioned directories in
/// order, then any `Versions/` subdirectory.
pub fn find_framework_binary(framework_root: &Path) -> Option<PathBuf> {
    let name = framework_root
        .file_name()?
        .to_string_lossy()
        .trim_end_matches(".framework")
        .to_string();
    let versions = framework_root.join("Versions");
    if !versions.is_dir() {
        return None;
    }

    let current = versions.join("Current").join(&name);
    if current.is_file() {
        return Some(current);
    }
    for letter in 'A'..='Z' {
        let cand = versions.join(letter.to_string()).join(&name);
        if cand.is_file() {
            return Some(cand);
        }
    }
    if let Ok(entries) = fs::read_dir(&versions) {
        for entry in entries.flatten() {
            let cand = entry.path().join(&name);
            if entry.path().is_dir() && cand.is_file() {
                return Some(cand);
            }
        }
    }
    None
}

fn path_starts_with(path: &Path, prefix: &Path) -> bool {
    let p = canonical_key(path);
    let pre = canonical_key(prefix);
    let pre_str = pre.to_string_lossy();
    if pre_str.is_empty() {
        return false;
    }
    p.to_string_lossy().starts_with(pre_str.as_ref())
}

/// Every Mach-O binary in the bundle that the fixup passes must touch:
/// the executable(s) in `Contents/MacOS`, each framework's primary
/// binary, loose dylibs under `Contents/Frameworks`, and every dylib
/// under `Contents/PlugIns`.
fn collect_bundle_binaries(bundle: &Path) -> Vec<PathBuf> {
    let macos_dir = bundle.join("Contents/MacOS");
    let fw_dir = bundle.join("Contents/Frameworks");
    let plugins_dir = bundle.join("Contents/PlugIns");

    let mut bins = Vec::new();

    if let Ok(entries) = fs::read_dir(&macos_dir) {
        for entry in entries.flatten() {
            if entry.path().is_file() {
                bins.push(entry.path());
            }
        }
    }

    if fw_dir.is_dir() {
        for entry in WalkDir::new(&fw_dir).into_iter().flatten() {
            let path = entry.path();
            if entry.file_type().is_dir()
                && path.extension().is_some_and(|e| e == "framework")
            {
                if let Some(bin) = find_framework_binary(path) {
                    bins.push(bin);
                }
            } else if entry.file_type().is_file()
                && path.extension().is_some_and(|e| e == "dylib")
            {
                bins.push(path.to_path_buf());
            }
        }
    }

    if plugins_dir.is_dir() {
        for entry in WalkDir::new(&plugins_dir).into_iter().flatten() {
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|e| e == "dylib")
            {
                bins.push(entry.path().to_path_buf());
            }
        }
    }

    bins.sort();
    bins.dedup();
    bins
}

fn run_install_name_tool(args: &[&str], subject: &Path) {
    let result = Cmd::new("llvm-install-name-tool")
        .args(args.iter().copied())
        .arg_path(subject)
        .allow_fail()
        .run();
    match result {
        Ok(r) if !r.success() => eprintln!(
            "Warning: llvm-install-name-tool {} failed on {}",
            args.first().unwrap_or(&""),
            subject.display()
        ),
        Err(e) => eprintln!("Warning: {}", e),
        _ => {}
    }
}

/// Run the fixup passes over the whole bundle.
pub fn fix_install_names(plan: &DeployPlan) {
    let bundle = &plan.output_root;
    let fw_dir = bundle.join("Contents/Frameworks");
    let macos_dir = bundle.join("Contents/MacOS");
    let plugins_dir = bundle.join("Contents/PlugIns");

    let bins = collect_bundle_binaries(bundle);

    // Pass 1: IDs for everything shipped inside Frameworks.
    for bin in &bins {
        if path_starts_with(bin, &fw_dir) {
            let id = canonical_install_name(bin, bundle);
            run_install_name_tool(&["-id", &id], bin);
        }
    }

    // Pass 2: rewrite dependency references that point into Frameworks.
    for bin in &bins {
        let (_id, deps) = query_macho_deps_with_id(bin);
        for dep in deps {
            let dep_path = Path::new(&dep);
            if dep_path.is_absolute() && path_starts_with(dep_path, &fw_dir) {
                let new_ref = canonical_install_name(dep_path, bundle);
                run_install_name_tool(&["-change", &dep, &new_ref], bin);
            }
        }
    }

    // Pass 3: rpaths pointing at the shipped Frameworks directory.
    for bin in &bins {
        if path_starts_with(bin, &macos_dir) {
            run_install_name_tool(&["-add_rpath", "@executable_path/../Frameworks"], bin);
        } else if path_starts_with(bin, &plugins_dir) {
            run_install_name_tool(&["-add_rpath", "@loader_path/../../Frameworks"], bin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_canonical_install_name_framework() {
        let bundle = Path::new("/out/App.app");
        let bin = Path::new(
            "/out/App.app/Contents/Frameworks/QtCore.framework/Versions/A/QtCore",
        );
        assert_eq!(
            canonical_install_name(bin, bundle),
            "@rpath/QtCore.framework/Versions/A/QtCore"
        );
    }

    #[test]
    fn test_canonical_install_name_versionless_framework_defaults_to_a() {
        let bundle = Path::new("/out/App.app");
        let bin = Path::new("/out/App.app/Contents/Frameworks/QtGui.framework/QtGui");
        assert_eq!(
            canonical_install_name(bin, bundle),
            "@rpath/QtGui.framework/Versions/A/QtGui"
        );
    }

    #[test]
    fn test_canonical_install_name_loose_dylib() {
        let bundle = Path::new("/out/App.app");
        let bin = Path::new("/out/App.app/Contents/Frameworks/libicu.73.dylib");
        assert_eq!(canonical_install_name(bin, bundle), "@rpath/libicu.73.dylib");
    }

    #[test]
    fn test_find_framework_binary_prefers_current() {
        let temp = TempDir::new().unwrap();
        let fw = temp.path().join("QtCore.framework");
        fs::create_dir_all(fw.join("Versions/A")).unwrap();
        fs::create_dir_all(fw.join("Versions/Current")).unwrap();
        fs::write(fw.join("Versions/A/QtCore"), b"lettered").unwrap();
        fs::write(fw.join("Versions/Current/QtCore"), b"current").unwrap();

        let bin = find_framework_binary(&fw).unwrap();
        assert!(bin.ends_with("Versions/Current/QtCore"));
    }

    #[test]
    fn test_find_framework_binary_letter_fallback() {
        let temp = TempDir::new().unwrap();
        let fw = temp.path().join("QtCore.framework");
        fs::create_dir_all(fw.join("Versions/B")).unwrap();
        fs::write(fw.join("Versions/B/QtCore"), b"b").unwrap();

        let bin = find_framework_binary(&fw).unwrap();
        assert!(bin.ends_with("Versions/B/QtCore"));
    }

    #[test]
    fn test_find_framework_binary_any_version_dir() {
        let temp = TempDir::new().unwrap();
        let fw = temp.path().join("QtCore.framework");
        fs::create_dir_all(fw.join("Versions/6.5")).unwrap();
        fs::write(fw.join("Versions/6.5/QtCore"), b"numbered").unwrap();

        let bin = find_framework_binary(&fw).unwrap();
        assert!(bin.ends_with("Versions/6.5/QtCore"));
    }

    #[test]
    fn test_collect_bundle_binaries() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path();
        fs::create_dir_all(bundle.join("Contents/MacOS")).unwrap();
        fs::write(bundle.join("Contents/MacOS/App"), b"exe").unwrap();
        let fw = bundle.join("Contents/Frameworks/QtCore.framework");
        fs::create_dir_all(fw.join("Versions/A")).unwrap();
        fs::write(fw.join("Versions/A/QtCore"), b"fw").unwrap();
        fs::write(
            bundle.join("Contents/Frameworks/libextra.dylib"),
            b"loose",
        )
        .unwrap();
        fs::create_dir_all(bundle.join("Contents/PlugIns/quick")).unwrap();
        fs::write(
            bundle.join("Contents/PlugIns/quick/libqtquick2plugin.dylib"),
            b"plugin",
        )
        .unwrap();

        let bins = collect_bundle_binaries(bundle);
        assert_eq!(bins.len(), 4);
        assert!(bins.iter().any(|b| b.ends_with("Contents/MacOS/App")));
        assert!(bins.iter().any(|b| b.ends_with("Versions/A/QtCore")));
        assert!(bins.iter().any(|b| b.ends_with("libextra.dylib")));
        assert!(bins.iter().any(|b| b.ends_with("libqtquick2plugin.dylib")));
    }
}
