//! Staging: copying resolved libraries, the main binary and the Qt
//! platform plugins into the output layout.
//!
//! Copy failures are warnings; deployment continues with what could be
//! staged. ELF libraries additionally get their SONAME symlink so the
//! dynamic loader finds them under the name recorded in dependents.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::binary::BinaryKind;
use crate::deps::query_elf_soname;
use crate::fsops::copy_file_fresh;
use crate::host;
use crate::layout;
use crate::patch;
use crate::resolve::ResolveContext;

/// Copy the resolved library set into the platform layout.
pub fn stage_libraries(ctx: &ResolveContext, libs: &[PathBuf]) {
    match ctx.plan.kind {
        BinaryKind::Pe => stage_libraries_pe(ctx, libs),
        BinaryKind::Elf => stage_libraries_elf(ctx, libs),
        BinaryKind::MachO => stage_libraries_macho(ctx, libs),
    }
}

fn stage_libraries_pe(ctx: &ResolveContext, libs: &[PathBuf]) {
    let root = &ctx.plan.output_root;
    for lib in libs {
        let Some(name) = lib.file_name() else { continue };
        if let Err(e) = copy_file_fresh(lib, &root.join(name)) {
            eprintln!("Warning: {}", e);
        }
    }
    if let Err(e) = layout::write_qt_conf(BinaryKind::Pe, root) {
        eprintln!("Warning: {}", e);
    }
}

fn stage_libraries_elf(ctx: &ResolveContext, libs: &[PathBuf]) {
    let lib_dir = layout::lib_dir(BinaryKind::Elf, &ctx.plan.output_root);
    for lib in libs {
        let Some(name) = lib.file_name() else { continue };
        let dest = lib_dir.join(name);
        if let Err(e) = copy_file_fresh(lib, &dest) {
            eprintln!("Warning: {}", e);
            continue;
        }
        create_soname_link(&lib_dir, &dest);
    }
    if let Err(e) = layout::write_qt_conf(BinaryKind::Elf, &ctx.plan.output_root) {
        eprintln!("Warning: {}", e);
    }
}

/// Link `<soname> -> <filename>` next to a staged library whose SONAME
/// differs from its on-disk name. When symlinks are unavailable the
/// library is copied a second time under the SONAME.
fn create_soname_link(lib_dir: &Path, staged: &Path) {
    let Some(soname) = query_elf_soname(staged) else {
        return;
    };
    let file_name = staged
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if soname == file_name {
        return;
    }
    let link_path = lib_dir.join(&soname);
    if link_path.exists() || link_path.is_symlink() {
        let _ = fs::remove_file(&link_path);
    }
    if std::os::unix::fs::symlink(&file_name, &link_path).is_err() {
        if let Err(e) = copy_file_fresh(staged, &link_path) {
            eprintln!("Warning: {}", e);
        }
    }
}

fn stage_libraries_macho(ctx: &ResolveContext, libs: &[PathBuf]) {
    let fw_dir = layout::lib_dir(BinaryKind::MachO, &ctx.plan.output_root);
    let mut copied_frameworks: HashSet<String> = HashSet::new();
    for lib in libs {
        if host::verbose() {
            println!("[macho-copy] lib: {}", lib.display());
        }
        match framework_root(lib) {
            Some(fw_root) => {
                let key = fw_root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if !copied_frameworks.insert(key.clone()) {
                    continue;
                }
                let dst = fw_dir.join(&key);
                if host::verbose() {
                    println!(
                        "[macho-copy] framework: {} -> {}",
                        fw_root.display(),
                        dst.display()
                    );
                }
                copy_tree_skip_symlinks(&fw_root, &dst);
            }
            None => {
                let Some(name) = lib.file_name() else { continue };
                if let Err(e) = copy_file_fresh(lib, &fw_dir.join(name)) {
                    eprintln!("Warning: {}", e);
                }
            }
        }
    }
}

/// Walk up the parent chain looking for a `.framework` ancestor; that
/// whole directory is the unit to copy.
fn framework_root(lib: &Path) -> Option<PathBuf> {
    let mut cursor = lib.parent();
    while let Some(dir) = cursor {
        if dir.extension().is_some_and(|e| e == "framework") {
            return Some(dir.to_path_buf());
        }
        cursor = dir.parent();
    }
    None
}

fn copy_tree_skip_symlinks(src_root: &Path, dst_root: &Path) {
    for entry in WalkDir::new(src_root).into_iter().flatten() {
        let src = entry.path();
        let Ok(rel) = src.strip_prefix(src_root) else {
            continue;
        };
        let dst = dst_root.join(rel);
        if entry.file_type().is_symlink() {
            continue;
        }
        if entry.file_type().is_dir() {
            let _ = fs::create_dir_all(&dst);
        } else if entry.file_type().is_file() {
            if let Err(e) = copy_file_fresh(src, &dst) {
                eprintln!("Warning: {}", e);
            }
        }
    }
}

/// Copy the main binary to its platform destination. On ELF the copy
/// also gets its RUNPATH pointed at the bundled library directory.
pub fn stage_main_binary(ctx: &ResolveContext) {
    let dest = layout::main_binary_dest(ctx.plan.kind, &ctx.plan.output_root, &ctx.plan.binary);
    if let Err(e) = copy_file_fresh(&ctx.plan.binary, &dest) {
        eprintln!(
            "Warning: failed to copy main binary {} -> {}: {}",
            ctx.plan.binary.display(),
            dest.display(),
            e
        );
        return;
    }
    if ctx.plan.kind == BinaryKind::Elf {
        if let Err(e) = patch::elf::set_runpath(&dest, patch::elf::MAIN_BINARY_RUNPATH) {
            eprintln!("Warning: {}", e);
        }
    }
}

/// Expected platform plugin file for each format.
fn platform_plugin_name(kind: BinaryKind) -> &'static str {
    match kind {
        BinaryKind::Pe => "qwindows.dll",
        BinaryKind::Elf => "libqxcb.so",
        BinaryKind::MachO => "libqcocoa.dylib",
    }
}

/// Image-format plugin files worth shipping alongside the platform
/// plugin.
fn imageformat_plugin_names(kind: BinaryKind) -> [String; 4] {
    ["qjpeg", "qico", "qgif", "qpng"].map(|base| match kind {
        BinaryKind::Pe => format!("{}.dll", base),
        BinaryKind::Elf => format!("lib{}.so", base),
        BinaryKind::MachO => format!("lib{}.dylib", base),
    })
}

/// Candidate directories that may hold the Qt plugin tree, in
/// preference order.
fn plugin_root_candidates(ctx: &ResolveContext, resolved_libs: &[PathBuf]) -> Vec<PathBuf> {
    let sep = host::path_list_sep();
    let mut roots = Vec::new();

    if let Some(plugins) = &ctx.qt.plugins {
        roots.push(plugins.clone());
    }

    if ctx.plan.kind == BinaryKind::Pe {
        for p in host::split_path_list(&host::get_env("MINGW_QT_PLUGINS"), sep) {
            roots.push(PathBuf::from(p));
        }
    }

    for p in host::split_path_list(&host::get_env("PATH"), sep) {
        if p.ends_with("/bin") {
            let base = Path::new(&p).parent().unwrap_or(Path::new(""));
            for cand in [base.join("plugins"), base.join("lib/qt-6/plugins")] {
                if cand.exists() {
                    roots.push(cand);
                }
            }
        }
    }

    if ctx.plan.kind == BinaryKind::Pe {
        for lib in resolved_libs {
            let name = lib
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if name == "qt6core.dll" {
                if let Some(base) = lib.parent().and_then(|d| d.parent()) {
                    for cand in [base.join("plugins"), base.join("lib/qt-6/plugins")] {
                        if cand.exists() {
                            roots.push(cand);
                        }
                    }
                }
            }
        }
    }

    let mut seen = HashSet::new();
    roots.retain(|r| seen.insert(r.clone()));
    roots
}

/// Copy the minimal plugin set: the platform plugin plus any of the
/// image-format plugins present in the same root. The first candidate
/// root that actually holds the platform plugin wins.
pub fn stage_platform_plugins(ctx: &ResolveContext, resolved_libs: &[PathBuf]) {
    let kind = ctx.plan.kind;
    let dst_base = layout::plugins_dir(kind, &ctx.plan.output_root);

    for src_root in plugin_root_candidates(ctx, resolved_libs) {
        let platform_plugin = src_root.join("platforms").join(platform_plugin_name(kind));
        if !platform_plugin.exists() {
            continue;
        }
        if let Err(e) = copy_file_fresh(
            &platform_plugin,
            &dst_base.join("platforms").join(platform_plugin_name(kind)),
        ) {
            eprintln!("Warning: {}", e);
        }
        for name in imageformat_plugin_names(kind) {
            let src = src_root.join("imageformats").join(&name);
            if src.exists() {
                if let Err(e) = copy_file_fresh(&src, &dst_base.join("imageformats").join(&name)) {
                    eprintln!("Warning: {}", e);
                }
            }
        }
        break;
    }

    if kind == BinaryKind::Elf {
        patch::elf::set_plugins_runpath(&dst_base);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeployPlan;
    use crate::qt::QtLocations;
    use tempfile::TempDir;

    fn ctx_with(kind: BinaryKind, binary: &Path, root: &Path, qt: QtLocations) -> ResolveContext {
        ResolveContext {
            plan: DeployPlan {
                kind,
                binary: binary.to_path_buf(),
                output_root: root.to_path_buf(),
                qml_roots: Vec::new(),
                languages: Vec::new(),
                overlays: Vec::new(),
            },
            qt,
            search_dirs: Vec::new(),
            qml_import_paths: Vec::new(),
            qml_source_roots: Vec::new(),
        }
    }

    #[test]
    fn test_framework_root_detection() {
        assert_eq!(
            framework_root(Path::new(
                "/opt/qt/lib/QtCore.framework/Versions/A/QtCore"
            )),
            Some(PathBuf::from("/opt/qt/lib/QtCore.framework"))
        );
        assert_eq!(framework_root(Path::new("/opt/qt/lib/libicu.dylib")), None);
    }

    #[test]
    fn test_stage_libraries_pe_flat() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("Qt6Core.dll");
        fs::write(&src, b"dll bytes").unwrap();
        let out = temp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        let binary = temp.path().join("app.exe");
        fs::write(&binary, b"").unwrap();

        let ctx = ctx_with(BinaryKind::Pe, &binary, &out, QtLocations::default());
        stage_libraries(&ctx, &[src]);

        assert!(out.join("Qt6Core.dll").is_file());
        assert!(out.join("qt.conf").is_file());
    }

    #[test]
    fn test_stage_libraries_elf_into_usr_lib() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("libdep.so.1");
        fs::write(&src, b"not really elf").unwrap();
        let out = temp.path().join("app.AppDir");
        fs::create_dir_all(&out).unwrap();
        let binary = temp.path().join("app");
        fs::write(&binary, b"").unwrap();

        let ctx = ctx_with(BinaryKind::Elf, &binary, &out, QtLocations::default());
        stage_libraries(&ctx, &[src]);

        assert!(out.join("usr/lib/libdep.so.1").is_file());
        assert!(out.join("usr/bin/qt.conf").is_file());
    }

    #[test]
    fn test_stage_libraries_macho_framework_copied_once() {
        let temp = TempDir::new().unwrap();
        let fw = temp.path().join("QtCore.framework");
        fs::create_dir_all(fw.join("Versions/A/Resources")).unwrap();
        fs::write(fw.join("Versions/A/QtCore"), b"macho").unwrap();
        fs::write(fw.join("Versions/A/Resources/Info.plist"), b"plist").unwrap();
        // Symlinks inside the framework are not duplicated.
        std::os::unix::fs::symlink("A", fw.join("Versions/Current")).unwrap();

        let out = temp.path().join("App.app");
        fs::create_dir_all(&out).unwrap();
        let binary = temp.path().join("App");
        fs::write(&binary, b"").unwrap();

        let ctx = ctx_with(BinaryKind::MachO, &binary, &out, QtLocations::default());
        let lib = fw.join("Versions/A/QtCore");
        stage_libraries(&ctx, &[lib.clone(), lib]);

        let staged = out.join("Contents/Frameworks/QtCore.framework");
        assert!(staged.join("Versions/A/QtCore").is_file());
        assert!(staged.join("Versions/A/Resources/Info.plist").is_file());
        assert!(!staged.join("Versions/Current").exists());
    }

    #[test]
    fn test_stage_libraries_macho_loose_dylib() {
        let temp = TempDir::new().unwrap();
        let lib = temp.path().join("libextra.dylib");
        fs::write(&lib, b"dylib").unwrap();
        let out = temp.path().join("App.app");
        fs::create_dir_all(&out).unwrap();
        let binary = temp.path().join("App");
        fs::write(&binary, b"").unwrap();

        let ctx = ctx_with(BinaryKind::MachO, &binary, &out, QtLocations::default());
        stage_libraries(&ctx, &[lib]);
        assert!(out.join("Contents/Frameworks/libextra.dylib").is_file());
    }

    #[test]
    fn test_stage_platform_plugins_pe() {
        let temp = TempDir::new().unwrap();
        let plugin_root = temp.path().join("plugins");
        fs::create_dir_all(plugin_root.join("platforms")).unwrap();
        fs::create_dir_all(plugin_root.join("imageformats")).unwrap();
        fs::write(plugin_root.join("platforms/qwindows.dll"), b"platform").unwrap();
        fs::write(plugin_root.join("imageformats/qjpeg.dll"), b"jpeg").unwrap();

        let out = temp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        let binary = temp.path().join("app.exe");
        fs::write(&binary, b"").unwrap();

        let qt = QtLocations {
            plugins: Some(plugin_root),
            ..Default::default()
        };
        let ctx = ctx_with(BinaryKind::Pe, &binary, &out, qt);
        stage_platform_plugins(&ctx, &[]);

        assert!(out.join("plugins/platforms/qwindows.dll").is_file());
        assert!(out.join("plugins/imageformats/qjpeg.dll").is_file());
        // qgif was not present in the source root, so not staged.
        assert!(!out.join("plugins/imageformats/qgif.dll").exists());
    }

    #[test]
    fn test_stage_platform_plugins_skips_root_without_platform_plugin() {
        let temp = TempDir::new().unwrap();
        let plugin_root = temp.path().join("plugins");
        fs::create_dir_all(plugin_root.join("imageformats")).unwrap();
        fs::write(plugin_root.join("imageformats/qjpeg.dll"), b"jpeg").unwrap();

        let out = temp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        let binary = temp.path().join("app.exe");
        fs::write(&binary, b"").unwrap();

        let qt = QtLocations {
            plugins: Some(plugin_root),
            ..Default::default()
        };
        let ctx = ctx_with(BinaryKind::Pe, &binary, &out, qt);
        stage_platform_plugins(&ctx, &[]);

        // Root rejected wholesale: no platform plugin means nothing is taken.
        assert!(!out.join("plugins/imageformats/qjpeg.dll").exists());
    }
}
