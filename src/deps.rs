//! Dependency extraction from compiled binaries.
//!
//! Dependencies are read through the platform's object-dump tool and
//! parsed line by line:
//!
//! - PE: `x86_64-w64-mingw32-objdump -p`, `DLL Name:` lines
//! - ELF: `objdump -p`, `NEEDED` / `RPATH` / `RUNPATH` entries
//! - Mach-O: `llvm-otool -L` for load names, `llvm-otool -l` for `LC_RPATH`
//!
//! A tool failure yields an empty record: an unreadable dependency is
//! not a parse error, and a missing Qt library surfaces later during
//! resolution. Parsing is cached per canonical path for the duration of
//! one traversal pass.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::binary::BinaryKind;
use crate::process::Cmd;

/// Parsed dependency information for one binary.
#[derive(Debug, Clone, Default)]
pub struct ParseRecord {
    /// Referenced library names or paths, in link order.
    pub needed: Vec<String>,
    /// Embedded search paths (ELF `RPATH`/`RUNPATH` entries). RPATH and
    /// RUNPATH are treated identically for deploy-time resolution.
    pub search_paths: Vec<String>,
}

/// Canonical form of a path, falling back to the input when the file
/// does not exist or cannot be resolved.
pub fn canonical_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Per-traversal parse memoization, keyed by canonical path.
#[derive(Default)]
pub struct ParseCache {
    records: HashMap<PathBuf, ParseRecord>,
    macho_rpaths: HashMap<PathBuf, Vec<String>>,
}

impl ParseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dependency record for `subject`, parsing at most once.
    pub fn record(&mut self, subject: &Path, kind: BinaryKind) -> ParseRecord {
        let key = canonical_key(subject);
        if let Some(cached) = self.records.get(&key) {
            return cached.clone();
        }
        let record = parse_deps(subject, kind);
        self.records.insert(key, record.clone());
        record
    }

    /// `LC_RPATH` entries of a Mach-O `subject`, parsing at most once.
    pub fn macho_rpaths(&mut self, subject: &Path) -> Vec<String> {
        let key = canonical_key(subject);
        if let Some(cached) = self.macho_rpaths.get(&key) {
            return cached.clone();
        }
        let rpaths = query_macho_rpaths(subject);
        self.macho_rpaths.insert(key, rpaths.clone());
        rpaths
    }
}

/// Run the platform tool for `subject` and parse its output.
pub fn parse_deps(subject: &Path, kind: BinaryKind) -> ParseRecord {
    match kind {
        BinaryKind::Pe => run_dump("x86_64-w64-mingw32-objdump", subject)
            .map(|out| ParseRecord {
                needed: parse_pe_output(&out),
                search_paths: Vec::new(),
            })
            .unwrap_or_default(),
        BinaryKind::Elf => run_dump("objdump", subject)
            .map(|out| parse_elf_output(&out))
            .unwrap_or_default(),
        BinaryKind::MachO => run_otool(subject, "-L")
            .map(|out| ParseRecord {
                needed: parse_macho_deps_output(&out),
                search_paths: Vec::new(),
            })
            .unwrap_or_default(),
    }
}

fn run_dump(tool: &str, subject: &Path) -> Option<String> {
    let result = Cmd::new(tool)
        .arg("-p")
        .arg_path(subject)
        .allow_fail()
        .run()
        .ok()?;
    result.success().then_some(result.stdout)
}

fn run_otool(subject: &Path, flag: &str) -> Option<String> {
    let result = Cmd::new("llvm-otool")
        .arg(flag)
        .arg_path(subject)
        .allow_fail()
        .run()
        .ok()?;
    result.success().then_some(result.stdout)
}

/// `LC_RPATH` entries of a Mach-O binary, empty on tool failure.
pub fn query_macho_rpaths(subject: &Path) -> Vec<String> {
    run_otool(subject, "-l")
        .map(|out| parse_macho_rpaths_output(&out))
        .unwrap_or_default()
}

/// SONAME of an ELF shared object, if it declares one.
pub fn query_elf_soname(subject: &Path) -> Option<String> {
    let out = run_dump("objdump", subject)?;
    parse_soname_output(&out)
}

/// Install-name ID and dependency list of a Mach-O binary, from
/// `llvm-otool -L`. The first token line is the ID; the rest are
/// dependencies.
pub fn query_macho_deps_with_id(subject: &Path) -> (Option<String>, Vec<String>) {
    match run_otool(subject, "-L") {
        Some(out) => parse_macho_deps_with_id_output(&out),
        None => (None, Vec::new()),
    }
}

/// Extract `DLL Name:` entries from PE objdump output.
pub fn parse_pe_output(out: &str) -> Vec<String> {
    let mut needed = Vec::new();
    for line in out.lines() {
        if let Some(pos) = line.find("DLL Name:") {
            let name = line[pos + 9..].trim();
            if !name.is_empty() {
                needed.push(name.to_string());
            }
        }
    }
    needed
}

/// Extract `NEEDED` names and `RPATH`/`RUNPATH` entries from ELF
/// objdump output.
pub fn parse_elf_output(out: &str) -> ParseRecord {
    let mut record = ParseRecord::default();
    for line in out.lines() {
        let last = line.split_whitespace().last();
        if line.contains("NEEDED") {
            if let Some(name) = last {
                record.needed.push(name.to_string());
            }
        }
        if line.contains("RPATH") || line.contains("RUNPATH") {
            if let Some(paths) = last {
                for piece in paths.split(':') {
                    if !piece.is_empty() {
                        record.search_paths.push(piece.to_string());
                    }
                }
            }
        }
    }
    record
}

/// Extract load names from `llvm-otool -L` output. The first line
/// echoes the subject and is skipped; each subsequent line's token runs
/// up to the first whitespace or `(`.
pub fn parse_macho_deps_output(out: &str) -> Vec<String> {
    out.lines()
        .skip(1)
        .filter_map(macho_line_token)
        .collect()
}

fn macho_line_token(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let end = trimmed
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(trimmed.len());
    if end == 0 {
        None
    } else {
        Some(trimmed[..end].to_string())
    }
}

/// Extract `LC_RPATH` paths from `llvm-otool -l` output.
///
/// The load-command dump is a two-line state machine: a `cmd LC_RPATH`
/// line arms the scan, and the following `path X (offset ...)` line
/// carries the value.
pub fn parse_macho_rpaths_output(out: &str) -> Vec<String> {
    let mut rpaths = Vec::new();
    let mut in_rpath = false;
    for line in out.lines() {
        if line.contains("cmd LC_RPATH") {
            in_rpath = true;
            continue;
        }
        if in_rpath {
            if let Some(pos) = line.find("path ") {
                let mut value = &line[pos + 5..];
                if let Some(paren) = value.find(" (") {
                    value = &value[..paren];
                }
                let value = value.trim();
                if !value.is_empty() {
                    rpaths.push(value.to_string());
                }
                in_rpath = false;
            }
        }
    }
    rpaths
}

/// Extract the `SONAME` entry from ELF objdump output.
pub fn parse_soname_output(out: &str) -> Option<String> {
    for line in out.lines() {
        if line.contains("SONAME") {
            if let Some(name) = line.split_whitespace().last() {
                if !name.is_empty() {
                    return Some(name.to_string());
                }
            }
        }
    }
    None
}

/// Split `llvm-otool -L` output into the install-name ID (first token
/// line) and the remaining dependencies.
pub fn parse_macho_deps_with_id_output(out: &str) -> (Option<String>, Vec<String>) {
    let mut id = None;
    let mut deps = Vec::new();
    for line in out.lines().skip(1) {
        let Some(token) = macho_line_token(line) else {
            continue;
        };
        if id.is_none() {
            id = Some(token);
        } else {
            deps.push(token);
        }
    }
    (id, deps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pe_output() {
        let out = "\
The Import Tables (interpreted .idata section contents)
\tDLL Name: Qt6Core.dll
\tDLL Name: KERNEL32.dll\r
 something unrelated
";
        assert_eq!(
            parse_pe_output(out),
            vec!["Qt6Core.dll".to_string(), "KERNEL32.dll".to_string()]
        );
    }

    #[test]
    fn test_parse_elf_output() {
        let out = "\
Dynamic Section:
  NEEDED               libQt6Gui.so.6
  NEEDED               libc.so.6
  RUNPATH              /opt/qt/lib:$ORIGIN/../lib
  SONAME               libapp.so.1
";
        let record = parse_elf_output(out);
        assert_eq!(
            record.needed,
            vec!["libQt6Gui.so.6".to_string(), "libc.so.6".to_string()]
        );
        assert_eq!(
            record.search_paths,
            vec!["/opt/qt/lib".to_string(), "$ORIGIN/../lib".to_string()]
        );
    }

    #[test]
    fn test_parse_elf_rpath_and_runpath_merge() {
        let out = "\
  RPATH                /first
  RUNPATH              /second:/third
";
        let record = parse_elf_output(out);
        assert_eq!(record.search_paths, vec!["/first", "/second", "/third"]);
    }

    #[test]
    fn test_parse_macho_deps_output() {
        let out = "\
/tmp/App:
\t@rpath/QtCore.framework/Versions/A/QtCore (compatibility version 6.0.0, current version 6.5.3)
\t/usr/lib/libSystem.B.dylib (compatibility version 1.0.0, current version 1319.0.0)
";
        assert_eq!(
            parse_macho_deps_output(out),
            vec![
                "@rpath/QtCore.framework/Versions/A/QtCore".to_string(),
                "/usr/lib/libSystem.B.dylib".to_string()
            ]
        );
    }

    #[test]
    fn test_parse_macho_rpaths_output() {
        let out = "\
Load command 12
          cmd LC_RPATH
      cmdsize 48
         path @executable_path/../Frameworks (offset 12)
Load command 13
          cmd LC_LOAD_DYLIB
         path /not/an/rpath (offset 12)
Load command 14
          cmd LC_RPATH
      cmdsize 32
         path /opt/qt/lib (offset 12)
";
        assert_eq!(
            parse_macho_rpaths_output(out),
            vec![
                "@executable_path/../Frameworks".to_string(),
                "/opt/qt/lib".to_string()
            ]
        );
    }

    #[test]
    fn test_parse_soname_output() {
        let out = "  SONAME               libQt6Core.so.6\n";
        assert_eq!(parse_soname_output(out), Some("libQt6Core.so.6".to_string()));
        assert_eq!(parse_soname_output("  NEEDED  libz.so.1\n"), None);
    }

    #[test]
    fn test_parse_macho_deps_with_id() {
        let out = "\
/out/App.app/Contents/Frameworks/QtCore.framework/Versions/A/QtCore:
\t@rpath/QtCore.framework/Versions/A/QtCore (compatibility version 6.0.0, current version 6.5.3)
\t/usr/lib/libc++.1.dylib (compatibility version 1.0.0, current version 1500.65.0)
";
        let (id, deps) = parse_macho_deps_with_id_output(out);
        assert_eq!(
            id,
            Some("@rpath/QtCore.framework/Versions/A/QtCore".to_string())
        );
        assert_eq!(deps, vec!["/usr/lib/libc++.1.dylib".to_string()]);
    }

    #[test]
    fn test_canonical_key_missing_file_passthrough() {
        let p = Path::new("/no/such/file/libQt6Core.so.6");
        assert_eq!(canonical_key(p), p.to_path_buf());
    }

    #[test]
    fn test_cache_memoizes_missing_files() {
        let mut cache = ParseCache::new();
        let subject = Path::new("/no/such/binary");
        let first = cache.record(subject, BinaryKind::Elf);
        assert!(first.needed.is_empty());
        // Second lookup hits the cache; behavior identical.
        let second = cache.record(subject, BinaryKind::Elf);
        assert!(second.needed.is_empty());
    }
}
