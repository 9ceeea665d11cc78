//! Reference resolution: mapping dependency references to files.
//!
//! A reference can be an absolute path, a bare library name, an ELF
//! rpath entry using `$ORIGIN`, or a Mach-O install name using
//! `@loader_path`, `@executable_path` or `@rpath`. Resolution tries the
//! platform-specific rules first and falls back to the ordered search
//! directories of the [`ResolveContext`]; the first hit wins.
//!
//! The context is built once per deployment. Building it also prepends
//! the Qt directories to the loader-path environment variables so child
//! tools inherit a working search path.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::binary::BinaryKind;
use crate::config::DeployPlan;
use crate::deps::{canonical_key, ParseCache, ParseRecord};
use crate::host;
use crate::qt::QtLocations;

/// Immutable per-deployment resolution state.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub plan: DeployPlan,
    pub qt: QtLocations,
    /// Ordered, canonical, deduplicated library search directories. The
    /// main binary's own directory always comes first.
    pub search_dirs: Vec<PathBuf>,
    /// Directories handed to the QML import scanner.
    pub qml_import_paths: Vec<PathBuf>,
    /// QML source roots from the command line and `QML_ROOT`.
    pub qml_source_roots: Vec<PathBuf>,
}

impl ResolveContext {
    /// Build the context: probe Qt, derive search directories from the
    /// platform environment, and export the Qt directories to the
    /// loader-path variables for child processes.
    pub fn new(plan: &DeployPlan) -> Self {
        let ctx = Self::from_parts(plan, QtLocations::query());
        ctx.export_loader_paths();
        ctx
    }

    /// Assemble the context from an already-probed Qt installation.
    /// Does not touch the process environment.
    pub fn from_parts(plan: &DeployPlan, qt: QtLocations) -> Self {
        let sep = host::path_list_sep();
        let mut dirs = SearchDirs::new();
        let mut qml_import_paths = Vec::new();

        if let Some(parent) = plan.binary.parent() {
            dirs.add(parent);
        }

        match plan.kind {
            BinaryKind::Elf => {
                for p in host::split_path_list(&host::get_env("LD_LIBRARY_PATH"), sep) {
                    dirs.add(Path::new(&p));
                }
                if let Some(libs) = &qt.libs {
                    dirs.add(libs);
                }
            }
            BinaryKind::Pe => {
                let path_entries = host::split_path_list(&host::get_env("PATH"), sep);
                for p in &path_entries {
                    dirs.add(Path::new(p));
                }
                if let Some(bins) = &qt.bins {
                    dirs.add(bins);
                }
                // MinGW layouts keep QML modules next to the bin dir.
                for p in &path_entries {
                    if p.ends_with("/bin") {
                        let base = Path::new(p).parent().unwrap_or(Path::new(""));
                        for qml_dir in [base.join("qml"), base.join("lib/qt-6/qml")] {
                            if qml_dir.exists() {
                                qml_import_paths.push(qml_dir);
                            }
                        }
                    }
                }
            }
            BinaryKind::MachO => {
                for p in host::split_path_list(&host::get_env("DYLD_LIBRARY_PATH"), sep) {
                    dirs.add(Path::new(&p));
                }
                for p in host::split_path_list(&host::get_env("DYLD_FRAMEWORK_PATH"), sep) {
                    dirs.add(Path::new(&p));
                }
                if let Some(libs) = &qt.libs {
                    dirs.add(libs);
                }
            }
        }

        if let Some(qml) = &qt.qml {
            if qml.exists() {
                qml_import_paths.push(qml.clone());
            }
        }
        for p in host::split_path_list(&host::get_env("QML2_IMPORT_PATH"), sep) {
            let path = PathBuf::from(&p);
            if path.exists() {
                qml_import_paths.push(path);
            }
        }

        let mut qml_source_roots: Vec<PathBuf> = plan.qml_roots.clone();
        for p in host::split_path_list(&host::get_env("QML_ROOT"), sep) {
            qml_source_roots.push(PathBuf::from(p));
        }

        Self {
            plan: plan.clone(),
            qt,
            search_dirs: dirs.into_vec(),
            qml_import_paths,
            qml_source_roots,
        }
    }

    /// Prepend the Qt directories to the loader-path variables so child
    /// tool invocations see the same libraries we resolve against.
    pub fn export_loader_paths(&self) {
        let sep = host::path_list_sep();
        match self.plan.kind {
            BinaryKind::Elf => {
                if let Some(libs) = &self.qt.libs {
                    prepend_env("LD_LIBRARY_PATH", libs, sep);
                }
            }
            BinaryKind::Pe => {
                if let Some(bins) = &self.qt.bins {
                    prepend_env("PATH", bins, sep);
                }
            }
            BinaryKind::MachO => {
                if let Some(libs) = &self.qt.libs {
                    prepend_env("DYLD_LIBRARY_PATH", libs, sep);
                    prepend_env("DYLD_FRAMEWORK_PATH", libs, sep);
                }
            }
        }
    }
}

fn prepend_env(key: &str, dir: &Path, sep: char) {
    let old = host::get_env(key);
    let dir = dir.to_string_lossy();
    let new = if old.is_empty() {
        dir.into_owned()
    } else {
        format!("{}{}{}", dir, sep, old)
    };
    host::set_env(key, &new);
}

/// Ordered search-directory collector with canonical-path dedup.
struct SearchDirs {
    seen: HashSet<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl SearchDirs {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            dirs: Vec::new(),
        }
    }

    fn add(&mut self, dir: &Path) {
        if dir.as_os_str().is_empty() {
            return;
        }
        let key = canonical_key(dir);
        if self.seen.insert(key.clone()) {
            self.dirs.push(key);
        }
    }

    fn into_vec(self) -> Vec<PathBuf> {
        self.dirs
    }
}

/// Substitute every `$ORIGIN` / `${ORIGIN}` occurrence with the
/// subject's parent directory.
fn expand_elf_origin(entry: &str, subject: &Path) -> PathBuf {
    let origin = subject
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let expanded = entry.replace("${ORIGIN}", &origin).replace("$ORIGIN", &origin);
    PathBuf::from(expanded)
}

/// Expand `@loader_path` / `@executable_path` prefixes. `main` is the
/// original input binary, never a nested library.
fn expand_macho_token(entry: &str, subject: &Path, main: &Path) -> PathBuf {
    if let Some(rest) = entry.strip_prefix("@loader_path/") {
        return subject.parent().unwrap_or(Path::new("")).join(rest);
    }
    if let Some(rest) = entry.strip_prefix("@executable_path/") {
        return main.parent().unwrap_or(Path::new("")).join(rest);
    }
    PathBuf::from(entry)
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.exists().then(|| canonical_key(&path))
}

/// Try each context search directory in order; first hit wins.
pub fn find_in_search_dirs(name_or_path: &str, ctx: &ResolveContext) -> Option<PathBuf> {
    let p = Path::new(name_or_path);
    if p.is_absolute() {
        if let Some(found) = existing(p.to_path_buf()) {
            return Some(found);
        }
    }
    for dir in &ctx.search_dirs {
        if let Some(found) = existing(dir.join(name_or_path)) {
            return Some(found);
        }
    }
    None
}

/// Resolve one dependency reference of `subject` to an absolute
/// canonical path, or `None` when nothing matches.
pub fn resolve_ref(
    reference: &str,
    subject: &Path,
    subject_record: &ParseRecord,
    ctx: &ResolveContext,
    cache: &mut ParseCache,
) -> Option<PathBuf> {
    match ctx.plan.kind {
        BinaryKind::Elf => {
            let p = Path::new(reference);
            if p.is_absolute() {
                if let Some(found) = existing(p.to_path_buf()) {
                    return Some(found);
                }
            }
            for entry in &subject_record.search_paths {
                let base = expand_elf_origin(entry, subject);
                if let Some(found) = existing(base.join(reference)) {
                    return Some(found);
                }
            }
            find_in_search_dirs(reference, ctx)
        }
        BinaryKind::Pe => find_in_search_dirs(reference, ctx),
        BinaryKind::MachO => {
            let main = ctx.plan.binary.clone();
            let p = Path::new(reference);
            if p.is_absolute() {
                if let Some(found) = existing(p.to_path_buf()) {
                    return Some(found);
                }
            }
            if reference.starts_with("@loader_path/")
                || reference.starts_with("@executable_path/")
            {
                let cand = expand_macho_token(reference, subject, &main);
                if let Some(found) = existing(cand) {
                    return Some(found);
                }
            }
            if let Some(tail) = reference.strip_prefix("@rpath/") {
                for rpath in cache.macho_rpaths(subject) {
                    let base = expand_macho_token(&rpath, subject, &main);
                    if let Some(found) = existing(base.join(tail)) {
                        return Some(found);
                    }
                }
            }
            find_in_search_dirs(reference, ctx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn plan_for(kind: BinaryKind, binary: &Path) -> DeployPlan {
        DeployPlan {
            kind,
            binary: binary.to_path_buf(),
            output_root: PathBuf::from("/tmp/out"),
            qml_roots: Vec::new(),
            languages: Vec::new(),
            overlays: Vec::new(),
        }
    }

    fn bare_ctx(kind: BinaryKind, binary: &Path, search_dirs: Vec<PathBuf>) -> ResolveContext {
        ResolveContext {
            plan: plan_for(kind, binary),
            qt: QtLocations::default(),
            search_dirs,
            qml_import_paths: Vec::new(),
            qml_source_roots: Vec::new(),
        }
    }

    #[test]
    fn test_expand_elf_origin_every_occurrence() {
        let subject = Path::new("/opt/app/bin/tool");
        assert_eq!(
            expand_elf_origin("$ORIGIN/../lib", subject),
            PathBuf::from("/opt/app/bin/../lib")
        );
        assert_eq!(
            expand_elf_origin("${ORIGIN}/a:$ORIGIN/b", subject),
            PathBuf::from("/opt/app/bin/a:/opt/app/bin/b")
        );
    }

    #[test]
    fn test_expand_macho_tokens() {
        let subject = Path::new("/bundle/Contents/PlugIns/quick/libqtquick2plugin.dylib");
        let main = Path::new("/bundle/Contents/MacOS/App");
        assert_eq!(
            expand_macho_token("@loader_path/../lib/x.dylib", subject, main),
            PathBuf::from("/bundle/Contents/PlugIns/quick/../lib/x.dylib")
        );
        assert_eq!(
            expand_macho_token("@executable_path/../Frameworks", subject, main),
            PathBuf::from("/bundle/Contents/MacOS/../Frameworks")
        );
        assert_eq!(
            expand_macho_token("/plain/path", subject, main),
            PathBuf::from("/plain/path")
        );
    }

    #[test]
    fn test_find_in_search_dirs_first_hit_wins() {
        let temp = TempDir::new().unwrap();
        let first = temp.path().join("first");
        let second = temp.path().join("second");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();
        fs::write(first.join("libfoo.so"), b"first").unwrap();
        fs::write(second.join("libfoo.so"), b"second").unwrap();

        let binary = temp.path().join("app");
        fs::write(&binary, b"").unwrap();
        let ctx = bare_ctx(BinaryKind::Elf, &binary, vec![first.clone(), second]);

        let hit = find_in_search_dirs("libfoo.so", &ctx).unwrap();
        assert_eq!(hit, canonical_key(&first.join("libfoo.so")));
    }

    #[test]
    fn test_resolve_elf_rpath_before_search_dirs() {
        let temp = TempDir::new().unwrap();
        let bindir = temp.path().join("bin");
        let libdir = temp.path().join("lib");
        let other = temp.path().join("other");
        fs::create_dir_all(&bindir).unwrap();
        fs::create_dir_all(&libdir).unwrap();
        fs::create_dir_all(&other).unwrap();
        fs::write(libdir.join("libdep.so.1"), b"rpath hit").unwrap();
        fs::write(other.join("libdep.so.1"), b"search hit").unwrap();

        let subject = bindir.join("app");
        fs::write(&subject, b"").unwrap();

        let ctx = bare_ctx(BinaryKind::Elf, &subject, vec![other]);
        let record = ParseRecord {
            needed: vec!["libdep.so.1".to_string()],
            search_paths: vec!["$ORIGIN/../lib".to_string()],
        };
        let mut cache = ParseCache::new();
        let hit = resolve_ref("libdep.so.1", &subject, &record, &ctx, &mut cache).unwrap();
        assert_eq!(hit, canonical_key(&libdir.join("libdep.so.1")));
    }

    #[test]
    fn test_resolve_absolute_path() {
        let temp = TempDir::new().unwrap();
        let lib = temp.path().join("libabs.so");
        fs::write(&lib, b"").unwrap();
        let binary = temp.path().join("app");
        fs::write(&binary, b"").unwrap();

        let ctx = bare_ctx(BinaryKind::Elf, &binary, Vec::new());
        let record = ParseRecord::default();
        let mut cache = ParseCache::new();
        let hit = resolve_ref(
            lib.to_str().unwrap(),
            &binary,
            &record,
            &ctx,
            &mut cache,
        )
        .unwrap();
        assert_eq!(hit, canonical_key(&lib));
    }

    #[test]
    fn test_resolve_macho_loader_path() {
        let temp = TempDir::new().unwrap();
        let fwdir = temp.path().join("Frameworks");
        fs::create_dir_all(&fwdir).unwrap();
        fs::write(fwdir.join("libextra.dylib"), b"").unwrap();
        let macos = temp.path().join("MacOS");
        fs::create_dir_all(&macos).unwrap();
        let subject = macos.join("App");
        fs::write(&subject, b"").unwrap();

        let ctx = bare_ctx(BinaryKind::MachO, &subject, Vec::new());
        let record = ParseRecord::default();
        let mut cache = ParseCache::new();
        let hit = resolve_ref(
            "@loader_path/../Frameworks/libextra.dylib",
            &subject,
            &record,
            &ctx,
            &mut cache,
        )
        .unwrap();
        assert_eq!(hit, canonical_key(&fwdir.join("libextra.dylib")));
    }

    #[test]
    fn test_resolve_macho_executable_path_uses_main_binary() {
        let temp = TempDir::new().unwrap();
        let macos = temp.path().join("MacOS");
        let plugins = temp.path().join("PlugIns");
        fs::create_dir_all(&macos).unwrap();
        fs::create_dir_all(&plugins).unwrap();
        fs::write(macos.join("libshared.dylib"), b"").unwrap();
        let main = macos.join("App");
        fs::write(&main, b"").unwrap();
        // The subject is a plugin elsewhere in the bundle; the token
        // still expands against the main executable's directory.
        let subject = plugins.join("libplugin.dylib");
        fs::write(&subject, b"").unwrap();

        let ctx = bare_ctx(BinaryKind::MachO, &main, Vec::new());
        let record = ParseRecord::default();
        let mut cache = ParseCache::new();
        let hit = resolve_ref(
            "@executable_path/libshared.dylib",
            &subject,
            &record,
            &ctx,
            &mut cache,
        )
        .unwrap();
        assert_eq!(hit, canonical_key(&macos.join("libshared.dylib")));
    }

    #[test]
    fn test_unresolvable_is_none() {
        let temp = TempDir::new().unwrap();
        let binary = temp.path().join("app");
        fs::write(&binary, b"").unwrap();
        let ctx = bare_ctx(BinaryKind::Elf, &binary, Vec::new());
        let record = ParseRecord::default();
        let mut cache = ParseCache::new();
        assert!(resolve_ref("libmissing.so.9", &binary, &record, &ctx, &mut cache).is_none());
    }

    #[test]
    fn test_search_dirs_dedup_preserves_order() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();

        let mut dirs = SearchDirs::new();
        dirs.add(&a);
        dirs.add(&b);
        dirs.add(&a);
        let v = dirs.into_vec();
        assert_eq!(v.len(), 2);
        assert_eq!(v[0], canonical_key(&a));
        assert_eq!(v[1], canonical_key(&b));
    }
}
