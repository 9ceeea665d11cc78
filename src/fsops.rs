//! Filesystem staging primitives: fresh-copy with skip, overlay merge.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::DeployPlan;
use crate::host;

/// Copy `src` to `dst`, creating parent directories on demand.
///
/// The write is skipped when the destination already exists as a
/// regular file of identical size with a last-write time at least as
/// new as the source; re-running a deployment against a populated
/// output then rewrites nothing. After a copy the destination gains
/// owner-write permission so later patch steps can modify it.
pub fn copy_file_fresh(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    if is_fresh(src, dst) {
        if host::verbose() {
            println!("[copy-skip] {} -> {}", src.display(), dst.display());
        }
        return Ok(());
    }

    fs::copy(src, dst)
        .with_context(|| format!("copying {} to {}", src.display(), dst.display()))?;
    add_owner_write(dst)?;
    Ok(())
}

fn is_fresh(src: &Path, dst: &Path) -> bool {
    let (Ok(src_meta), Ok(dst_meta)) = (fs::metadata(src), fs::metadata(dst)) else {
        return false;
    };
    if !dst_meta.is_file() {
        return false;
    }
    if src_meta.len() != dst_meta.len() {
        return false;
    }
    match (src_meta.modified(), dst_meta.modified()) {
        (Ok(src_time), Ok(dst_time)) => dst_time >= src_time,
        _ => false,
    }
}

/// Add owner-write permission so a staged file can be patched in place.
pub fn add_owner_write(path: &Path) -> Result<()> {
    let mut perms = fs::metadata(path)
        .with_context(|| format!("reading metadata {}", path.display()))?
        .permissions();
    perms.set_mode(perms.mode() | 0o200);
    fs::set_permissions(path, perms)
        .with_context(|| format!("setting permissions on {}", path.display()))?;
    Ok(())
}

/// Merge `src_root` onto `dst_root`: directories created, regular files
/// overwritten, symlinks recreated as symlinks when possible (falling
/// back to copying the resolved target file). Last write wins; there is
/// no conflict reporting. Per-entry failures are warnings.
pub fn merge_directory_tree(src_root: &Path, dst_root: &Path) {
    if !src_root.is_dir() {
        return;
    }
    for entry in WalkDir::new(src_root).min_depth(1).into_iter().flatten() {
        let src = entry.path();
        let rel = match src.strip_prefix(src_root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let dst = dst_root.join(rel);

        if entry.file_type().is_dir() {
            if let Err(e) = fs::create_dir_all(&dst) {
                eprintln!("Warning: failed to create {}: {}", dst.display(), e);
            }
            continue;
        }

        if let Some(parent) = dst.parent() {
            let _ = fs::create_dir_all(parent);
        }

        if entry.file_type().is_symlink() {
            merge_symlink(src, &dst);
            continue;
        }

        if entry.file_type().is_file() {
            if let Err(e) = copy_file_fresh(src, &dst) {
                eprintln!("Warning: {}", e);
            }
        }
    }
}

fn merge_symlink(src: &Path, dst: &Path) {
    let _ = fs::remove_file(dst);
    let Ok(target) = fs::read_link(src) else {
        return;
    };
    if std::os::unix::fs::symlink(&target, dst).is_ok() {
        return;
    }
    // Symlink creation can fail on restricted filesystems; fall back to
    // copying the file the link points at.
    let resolved = src.parent().unwrap_or(Path::new("")).join(&target);
    if resolved.is_file() {
        if let Err(e) = copy_file_fresh(&resolved, dst) {
            eprintln!("Warning: {}", e);
        }
    }
}

/// Merge every existing overlay directory onto the output root, in the
/// order they were given.
pub fn apply_overlays(plan: &DeployPlan) {
    for overlay in &plan.overlays {
        if !overlay.is_dir() {
            continue;
        }
        if host::verbose() {
            println!(
                "[overlay] merge {} -> {}",
                overlay.display(),
                plan.output_root.display()
            );
        }
        merge_directory_tree(overlay, &plan.output_root);
    }
}
