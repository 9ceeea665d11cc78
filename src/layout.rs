//! Output tree layout.
//!
//! Each format has its own relocatable directory convention:
//!
//! | Kind   | Root suffix     | Libraries              | Plugins             |
//! |--------|-----------------|------------------------|---------------------|
//! | PE     | none (flat dir) | `<root>/*.dll`         | `plugins/`          |
//! | ELF    | `.AppDir`       | `usr/lib`              | `usr/plugins/`      |
//! | Mach-O | `.app`          | `Contents/Frameworks`  | `Contents/PlugIns/` |

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::binary::BinaryKind;

/// Normalize the requested output directory to the platform's bundle
/// convention: append `<basename>.AppDir` / `<basename>.app` unless the
/// request already ends in that suffix. PE output stays a flat directory.
pub fn platform_output_root(kind: BinaryKind, requested: &Path, binary: &Path) -> PathBuf {
    let requested_str = requested.to_string_lossy();
    let base_name = binary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match kind {
        BinaryKind::Elf => {
            if requested_str.ends_with(".AppDir") {
                requested.to_path_buf()
            } else {
                requested.join(format!("{}.AppDir", base_name))
            }
        }
        BinaryKind::MachO => {
            if requested_str.ends_with(".app") {
                requested.to_path_buf()
            } else {
                requested.join(format!("{}.app", base_name))
            }
        }
        BinaryKind::Pe => requested.to_path_buf(),
    }
}

/// Create the output skeleton for `kind` under `root`.
pub fn ensure_output_layout(kind: BinaryKind, root: &Path) -> Result<()> {
    let dirs: &[&str] = match kind {
        BinaryKind::Pe => &[
            "plugins/platforms",
            "plugins/imageformats",
            "qml",
            "translations",
        ],
        BinaryKind::Elf => &[
            "usr/bin",
            "usr/lib",
            "usr/plugins/platforms",
            "usr/plugins/imageformats",
            "usr/qml",
            "usr/translations",
        ],
        BinaryKind::MachO => &[
            "Contents/MacOS",
            "Contents/Frameworks",
            "Contents/PlugIns/quick",
            "Contents/PlugIns/platforms",
            "Contents/PlugIns/imageformats",
            "Contents/Resources/qml",
            "Contents/Resources/translations",
        ],
    };
    for dir in dirs {
        let path = root.join(dir);
        fs::create_dir_all(&path)
            .with_context(|| format!("failed to create output directory {}", path.display()))?;
    }
    Ok(())
}

/// Directory staged libraries land in.
pub fn lib_dir(kind: BinaryKind, root: &Path) -> PathBuf {
    match kind {
        BinaryKind::Pe => root.to_path_buf(),
        BinaryKind::Elf => root.join("usr/lib"),
        BinaryKind::MachO => root.join("Contents/Frameworks"),
    }
}

/// Root of the Qt plugin tree in the output.
pub fn plugins_dir(kind: BinaryKind, root: &Path) -> PathBuf {
    match kind {
        BinaryKind::Pe => root.join("plugins"),
        BinaryKind::Elf => root.join("usr/plugins"),
        BinaryKind::MachO => root.join("Contents/PlugIns"),
    }
}

/// Base directory for staged QML modules.
pub fn qml_dir(kind: BinaryKind, root: &Path) -> PathBuf {
    match kind {
        BinaryKind::Pe => root.join("qml"),
        BinaryKind::Elf => root.join("usr/qml"),
        BinaryKind::MachO => root.join("Contents/Resources/qml"),
    }
}

/// Destination of translation catalogs.
pub fn translations_dir(kind: BinaryKind, root: &Path) -> PathBuf {
    match kind {
        BinaryKind::Pe => root.join("translations"),
        BinaryKind::Elf => root.join("usr/translations"),
        BinaryKind::MachO => root.join("Contents/Resources/translations"),
    }
}

/// Destination path of the main binary inside the output tree.
pub fn main_binary_dest(kind: BinaryKind, root: &Path, binary: &Path) -> PathBuf {
    let name = binary.file_name().unwrap_or_default();
    match kind {
        BinaryKind::Pe => root.join(name),
        BinaryKind::Elf => root.join("usr/bin").join(name),
        BinaryKind::MachO => root.join("Contents/MacOS").join(name),
    }
}

/// Write the `qt.conf` that points the deployed Qt at the relocated
/// plugin/QML/translation directories. Mach-O bundles rely on the
/// bundle layout instead and get none.
pub fn write_qt_conf(kind: BinaryKind, root: &Path) -> Result<()> {
    let (path, contents) = match kind {
        BinaryKind::MachO => return Ok(()),
        BinaryKind::Elf => (
            root.join("usr/bin/qt.conf"),
            "[Paths]\nPrefix=..\nPlugins=../plugins\nQml2Imports=../qml\nTranslations=../translations\n",
        ),
        BinaryKind::Pe => (
            root.join("qt.conf"),
            "[Paths]\nPrefix=.\nPlugins=plugins\nQml2Imports=qml\nTranslations=translations\n",
        ),
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, contents)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
