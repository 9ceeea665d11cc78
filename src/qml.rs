//! QML module deployment.
//!
//! The import scanner reports which QML modules the application's
//! sources use; each module directory is copied into the output's QML
//! base. On Mach-O the plugin dylibs inside modules are relocated to
//! `Contents/PlugIns/quick` and replaced with relative symlinks so the
//! bundle never ships the same binary twice.
//!
//! QML plugins load further libraries the main binary never references,
//! so a second dependency closure runs over the staged plugin set.

use anyhow::Result;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::binary::BinaryKind;
use crate::closure;
use crate::deps::{canonical_key, ParseCache};
use crate::fsops::copy_file_fresh;
use crate::host;
use crate::layout;
use crate::process::Cmd;
use crate::resolve::ResolveContext;
use crate::stage;

/// One module record from the import scanner.
#[derive(Debug, Clone, Deserialize)]
struct ScanRecord {
    #[serde(default)]
    path: Option<String>,
    #[serde(default, rename = "relativePath")]
    relative_path: Option<String>,
}

/// A QML module to stage: its source directory and its destination
/// relative to the QML output base.
#[derive(Debug, Clone)]
pub struct QmlModule {
    pub source: PathBuf,
    pub relative: String,
}

/// Whether a directory contains at least one `.qml` file, recursively.
fn has_qml_file(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    WalkDir::new(dir).into_iter().flatten().any(|entry| {
        entry.file_type().is_file() && entry.path().extension().is_some_and(|e| e == "qml")
    })
}

/// Roots to hand to the import scanner. Explicit roots (CLI, `QML_ROOT`)
/// win; otherwise the working directory and the binary's directory are
/// tried, each only if it actually holds QML sources.
pub fn discover_qml_roots(ctx: &ResolveContext) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    if ctx.qml_source_roots.is_empty() {
        if let Ok(cwd) = std::env::current_dir() {
            if has_qml_file(&cwd) {
                roots.push(cwd);
            }
        }
        if let Some(bin_dir) = ctx.plan.binary.parent() {
            if has_qml_file(bin_dir) {
                roots.push(bin_dir.to_path_buf());
            }
        }
    } else {
        roots.extend(ctx.qml_source_roots.iter().cloned());
    }

    let mut seen = HashSet::new();
    roots.retain(|r| seen.insert(canonical_key(r)));
    roots
}

/// Run the import scanner over each root and collect the used modules,
/// deduplicated by source path.
pub fn scan_modules(ctx: &ResolveContext, roots: &[PathBuf]) -> Vec<QmlModule> {
    let mut modules = Vec::new();
    let mut seen = HashSet::new();

    for root in roots {
        let mut cmd = Cmd::new("qmlimportscanner")
            .arg("-rootPath")
            .arg_path(root);
        for import in &ctx.qml_import_paths {
            cmd = cmd.arg("-importPath").arg_path(import);
        }
        let Ok(result) = cmd.allow_fail().run() else {
            continue;
        };
        if !result.success() || result.stdout.is_empty() {
            continue;
        }
        let records: Vec<ScanRecord> = match serde_json::from_str(&result.stdout) {
            Ok(records) => records,
            Err(e) => {
                eprintln!("Warning: unparsable qmlimportscanner output: {}", e);
                continue;
            }
        };
        for record in records {
            let Some(path) = record.path else { continue };
            let source = PathBuf::from(&path);
            if !seen.insert(source.clone()) {
                continue;
            }
            let relative = record
                .relative_path
                .unwrap_or_else(|| derive_relative(&source, ctx));
            modules.push(QmlModule { source, relative });
        }
    }
    modules
}

/// Destination for a module the scanner gave no `relativePath` for:
/// its path below the Qt QML directory, else its basename.
fn derive_relative(source: &Path, ctx: &ResolveContext) -> String {
    if let Some(qt_qml) = &ctx.qt.qml {
        if let Ok(rel) = source.strip_prefix(qt_qml) {
            let rel = rel.to_string_lossy();
            if !rel.is_empty() {
                return rel.into_owned();
            }
        }
    }
    source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Relative path from `base` to `target` (both absolute).
fn relative_path(target: &Path, base: &Path) -> PathBuf {
    let t: Vec<Component> = target.components().collect();
    let b: Vec<Component> = base.components().collect();
    let common = t
        .iter()
        .zip(b.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut out = PathBuf::new();
    for _ in common..b.len() {
        out.push("..");
    }
    for component in &t[common..] {
        out.push(component.as_os_str());
    }
    out
}

/// Scan and copy the used QML modules into the output tree.
pub fn copy_qml_modules(ctx: &ResolveContext) {
    let roots = discover_qml_roots(ctx);
    if roots.is_empty() {
        return;
    }
    if host::verbose() {
        let rendered: Vec<String> = roots.iter().map(|r| r.display().to_string()).collect();
        println!("[qml] roots: {}", rendered.join(" "));
    }

    let modules = scan_modules(ctx, &roots);
    let dest_base = layout::qml_dir(ctx.plan.kind, &ctx.plan.output_root);

    for module in &modules {
        if host::verbose() {
            println!(
                "[qml] module: {} -> {}",
                module.source.display(),
                dest_base.join(&module.relative).display()
            );
        }
        if let Err(e) = copy_one_module(ctx, module, &dest_base) {
            eprintln!(
                "Warning: failed to copy QML module {}: {}",
                module.source.display(),
                e
            );
        }
    }
}

fn copy_one_module(ctx: &ResolveContext, module: &QmlModule, dest_base: &Path) -> Result<()> {
    let dst_root = dest_base.join(&module.relative);
    fs::create_dir_all(&dst_root)?;

    for entry in WalkDir::new(&module.source).min_depth(1).into_iter().flatten() {
        if entry.file_type().is_dir() {
            continue;
        }
        let src = entry.path();
        let Ok(rel) = src.strip_prefix(&module.source) else {
            continue;
        };
        let out = dst_root.join(rel);

        if ctx.plan.kind == BinaryKind::MachO {
            // A dylib, or a symlink pointing at one, is relocated into
            // PlugIns/quick with a relative symlink left behind.
            let is_link = entry.file_type().is_symlink();
            let target = if is_link {
                canonical_key(src)
            } else {
                src.to_path_buf()
            };
            if target.extension().is_some_and(|e| e == "dylib") {
                relocate_quick_dylib(ctx, &target, &out)?;
                continue;
            }
            if is_link {
                continue;
            }
        } else if entry.file_type().is_symlink() {
            continue;
        }

        copy_file_fresh(src, &out)?;
    }
    Ok(())
}

/// Stage a module's plugin dylib under `Contents/PlugIns/quick` and
/// leave a relative symlink at its place in the QML tree.
fn relocate_quick_dylib(ctx: &ResolveContext, dylib: &Path, out: &Path) -> Result<()> {
    let quick_dir = ctx.plan.output_root.join("Contents/PlugIns/quick");
    fs::create_dir_all(&quick_dir)?;
    let name = dylib.file_name().unwrap_or_default();
    let moved = quick_dir.join(name);
    if host::verbose() {
        println!("[qml] stage dylib: {} -> {}", dylib.display(), moved.display());
    }
    copy_file_fresh(dylib, &moved)?;

    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)?;
    }
    let _ = fs::remove_file(out);
    let link_target = relative_path(&moved, out.parent().unwrap_or(Path::new("")));
    if std::os::unix::fs::symlink(&link_target, out).is_err() {
        copy_file_fresh(&moved, out)?;
    }
    Ok(())
}

/// All plugin libraries staged under the QML base (and, on Mach-O,
/// under `Contents/PlugIns/quick`), deduplicated by canonical path.
pub fn qml_plugin_libraries(ctx: &ResolveContext) -> Vec<PathBuf> {
    let kind = ctx.plan.kind;
    let ext = kind.shared_lib_extension();
    let mut seen = HashSet::new();
    let mut libs = Vec::new();

    let mut scan_dir = |dir: PathBuf| {
        if !dir.is_dir() {
            return;
        }
        for entry in WalkDir::new(&dir).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().is_some_and(|e| e == ext) {
                let key = canonical_key(entry.path());
                if seen.insert(key) {
                    libs.push(entry.path().to_path_buf());
                }
            }
        }
    };

    scan_dir(layout::qml_dir(kind, &ctx.plan.output_root));
    if kind == BinaryKind::MachO {
        scan_dir(ctx.plan.output_root.join("Contents/PlugIns/quick"));
    }
    libs
}

/// Resolve and stage the further dependencies of the staged QML
/// plugins. Runs the regular closure with a fresh parse cache seeded by
/// the plugin libraries themselves.
pub fn deploy_qml_plugin_dependencies(ctx: &ResolveContext) -> Result<()> {
    let plugins = qml_plugin_libraries(ctx);
    if plugins.is_empty() {
        return Ok(());
    }
    if host::verbose() {
        for p in &plugins {
            println!("[qml-deps] seed: {}", p.display());
        }
    }
    let mut cache = ParseCache::new();
    let deps = closure::plugin_closure(&plugins, ctx, &mut cache)?;
    if deps.is_empty() {
        return Ok(());
    }
    stage::stage_libraries(ctx, &deps);
    Ok(())
}
