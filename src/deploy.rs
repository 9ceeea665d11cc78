//! Deployment driver.
//!
//! Composes the pipeline per platform: output layout, library closure,
//! staging, plugin and QML deployment, translations, overlays and the
//! final relocation fixups. The resolve context is built once and
//! shared by every step; building it also exports the Qt directories to
//! the loader-path environment for all child tools.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::binary::BinaryKind;
use crate::closure;
use crate::config::DeployPlan;
use crate::deps::ParseCache;
use crate::fsops::apply_overlays;
use crate::host;
use crate::layout;
use crate::patch;
use crate::qml;
use crate::resolve::ResolveContext;
use crate::stage;
use crate::translations;

fn print_resolved(libs: &[PathBuf]) {
    if libs.is_empty() {
        return;
    }
    println!("Resolved shared libraries (filtered):");
    for lib in libs {
        println!("  {}", lib.display());
    }
}

/// Run the whole deployment for `plan`.
pub fn deploy(plan: &DeployPlan) -> Result<()> {
    layout::ensure_output_layout(plan.kind, &plan.output_root)?;

    let ctx = ResolveContext::new(plan);
    let mut cache = ParseCache::new();
    let libs = closure::main_binary_closure(&ctx, &mut cache)?;
    print_resolved(&libs);

    stage::stage_libraries(&ctx, &libs);
    stage::stage_main_binary(&ctx);

    match plan.kind {
        BinaryKind::Pe => deploy_pe(&ctx, &libs)?,
        BinaryKind::Elf => deploy_elf(&ctx, &libs)?,
        BinaryKind::MachO => deploy_macho(&ctx, &libs)?,
    }
    Ok(())
}

fn deploy_pe(ctx: &ResolveContext, libs: &[PathBuf]) -> Result<()> {
    apply_overlays(&ctx.plan);
    patch_staged_qt_core(ctx, libs);
    stage::stage_platform_plugins(ctx, libs);
    qml::copy_qml_modules(ctx);
    translations::deploy_translations(ctx);
    qml::deploy_qml_plugin_dependencies(ctx)?;
    Ok(())
}

fn deploy_elf(ctx: &ResolveContext, libs: &[PathBuf]) -> Result<()> {
    stage::stage_platform_plugins(ctx, libs);
    qml::copy_qml_modules(ctx);
    translations::deploy_translations(ctx);
    apply_overlays(&ctx.plan);
    // Re-stage plugins after overlays so a staged plugin set survives an
    // overlay tree that shipped its own.
    stage::stage_platform_plugins(ctx, libs);
    qml::deploy_qml_plugin_dependencies(ctx)?;
    Ok(())
}

fn deploy_macho(ctx: &ResolveContext, libs: &[PathBuf]) -> Result<()> {
    stage::stage_platform_plugins(ctx, libs);
    qml::copy_qml_modules(ctx);
    translations::deploy_translations(ctx);
    apply_overlays(&ctx.plan);
    qml::deploy_qml_plugin_dependencies(ctx)?;
    patch::macho::fix_install_names(&ctx.plan);
    Ok(())
}

/// Patch the embedded prefix strings of a staged `Qt6Core.dll`
/// (matched case-insensitively among the resolved libraries).
fn patch_staged_qt_core(ctx: &ResolveContext, libs: &[PathBuf]) {
    for lib in libs {
        let Some(name) = lib.file_name() else { continue };
        if name.to_string_lossy().to_lowercase() != "qt6core.dll" {
            continue;
        }
        let staged = ctx.plan.output_root.join(name);
        if staged.exists() {
            if host::verbose() {
                println!("[pe] patch Qt6Core.dll: {}", staged.display());
            }
            if let Err(e) = patch::pe::patch_qt_core_prefixes(&staged) {
                eprintln!("Warning: {}", e);
            }
        }
        break;
    }
}

/// Validate the requested binary and detection-independent plan inputs.
pub fn binary_is_deployable(binary: &Path) -> Result<(), String> {
    if !binary.exists() {
        return Err(format!("binary does not exist: {}", binary.display()));
    }
    if !binary.is_file() {
        return Err(format!("binary path is not a file: {}", binary.display()));
    }
    Ok(())
}
