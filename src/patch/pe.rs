//! `Qt6Core.dll` prefix patching.
//!
//! Qt bakes its install prefix into Qt6Core as `qt_prfxpath=` (and the
//! extension/host variants), both as 8-bit and UTF-16LE strings. For a
//! relocatable tree each value is overwritten with `.` and zero-filled
//! up to its original length; the file size never changes. `qt.conf`
//! then supplies the real layout at runtime.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

const PREFIX_KEYS: &[&str] = &["qt_prfxpath=", "qt_epfxpath=", "qt_hpfxpath="];

/// Patch every embedded prefix value in the staged `Qt6Core.dll`.
///
/// Returns whether any byte changed. The buffer is rewritten in one
/// truncating write, so the result is either the old or the new file.
pub fn patch_qt_core_prefixes(qt_core: &Path) -> Result<bool> {
    if !qt_core.is_file() {
        return Ok(false);
    }
    let mut buf = fs::read(qt_core)
        .with_context(|| format!("reading {}", qt_core.display()))?;
    if buf.is_empty() {
        return Ok(false);
    }

    let mut changed = false;
    for key in PREFIX_KEYS {
        changed |= patch_key(&mut buf, key.as_bytes(), b".", 1);
        let key_utf16 = utf16le_bytes(key);
        changed |= patch_key(&mut buf, &key_utf16, &utf16le_bytes("."), 2);
    }

    if !changed {
        return Ok(false);
    }
    fs::write(qt_core, &buf)
        .with_context(|| format!("writing patched {}", qt_core.display()))?;
    Ok(true)
}

fn utf16le_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

/// Overwrite the value after every occurrence of `key` with
/// `replacement` plus zero padding. The value ends at the first
/// zero terminator in the given stride; it is only touched when it is
/// at least as long as the replacement and the bytes actually differ.
/// Values are never extended.
fn patch_key(buf: &mut [u8], key: &[u8], replacement: &[u8], stride: usize) -> bool {
    let mut changed = false;
    let mut pos = 0;
    while let Some(found) = find_subsequence(&buf[pos..], key) {
        let key_pos = pos + found;
        let val_start = key_pos + key.len();

        let mut scan = val_start;
        match stride {
            1 => {
                while scan < buf.len() && buf[scan] != 0 {
                    scan += 1;
                }
            }
            _ => {
                while scan + 1 < buf.len() && !(buf[scan] == 0 && buf[scan + 1] == 0) {
                    scan += 2;
                }
            }
        }
        if scan <= val_start {
            pos = key_pos + key.len();
            continue;
        }

        let val_len = scan - val_start;
        if val_len >= replacement.len() {
            let value = &buf[val_start..scan];
            let needs_change = value[..replacement.len()] != *replacement
                || value[replacement.len()..].iter().any(|&b| b != 0);
            if needs_change {
                buf[val_start..val_start + replacement.len()].copy_from_slice(replacement);
                for b in &mut buf[val_start + replacement.len()..scan] {
                    *b = 0;
                }
                changed = true;
            }
        }
        pos = scan;
    }
    changed
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ascii_blob(value: &str) -> Vec<u8> {
        let mut buf = b"garbage before ".to_vec();
        buf.extend_from_slice(b"qt_prfxpath=");
        buf.extend_from_slice(value.as_bytes());
        buf.push(0);
        buf.extend_from_slice(b" trailing data");
        buf
    }

    #[test]
    fn test_ascii_patch_preserves_length() {
        let temp = TempDir::new().unwrap();
        let dll = temp.path().join("Qt6Core.dll");
        let before = ascii_blob("C:/Qt/6.5.3");
        fs::write(&dll, &before).unwrap();

        assert!(patch_qt_core_prefixes(&dll).unwrap());
        let after = fs::read(&dll).unwrap();
        assert_eq!(after.len(), before.len());

        let key_pos = find_subsequence(&after, b"qt_prfxpath=").unwrap();
        let val_start = key_pos + "qt_prfxpath=".len();
        assert_eq!(after[val_start], b'.');
        // Remainder of the original value is zero-filled.
        for i in 1.."C:/Qt/6.5.3".len() {
            assert_eq!(after[val_start + i], 0);
        }
        // Bytes beyond the original terminator are untouched.
        assert_eq!(
            &after[val_start + "C:/Qt/6.5.3".len()..],
            &before[val_start + "C:/Qt/6.5.3".len()..]
        );
    }

    #[test]
    fn test_utf16_patch() {
        let temp = TempDir::new().unwrap();
        let dll = temp.path().join("Qt6Core.dll");
        let mut buf = vec![0xAAu8; 8];
        buf.extend(utf16le_bytes("qt_epfxpath="));
        buf.extend(utf16le_bytes("C:/Qt"));
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&[0xBB; 4]);
        fs::write(&dll, &buf).unwrap();

        assert!(patch_qt_core_prefixes(&dll).unwrap());
        let after = fs::read(&dll).unwrap();
        assert_eq!(after.len(), buf.len());

        let key = utf16le_bytes("qt_epfxpath=");
        let val_start = find_subsequence(&after, &key).unwrap() + key.len();
        assert_eq!(&after[val_start..val_start + 2], &utf16le_bytes(".")[..]);
        for b in &after[val_start + 2..val_start + utf16le_bytes("C:/Qt").len()] {
            assert_eq!(*b, 0);
        }
        assert_eq!(&after[after.len() - 4..], &[0xBB; 4]);
    }

    #[test]
    fn test_second_patch_is_noop() {
        let temp = TempDir::new().unwrap();
        let dll = temp.path().join("Qt6Core.dll");
        fs::write(&dll, ascii_blob("/opt/qt")).unwrap();

        assert!(patch_qt_core_prefixes(&dll).unwrap());
        assert!(!patch_qt_core_prefixes(&dll).unwrap());
    }

    #[test]
    fn test_all_three_keys_and_multiple_occurrences() {
        let temp = TempDir::new().unwrap();
        let dll = temp.path().join("Qt6Core.dll");
        let mut buf = Vec::new();
        for key in ["qt_prfxpath=", "qt_epfxpath=", "qt_hpfxpath=", "qt_prfxpath="] {
            buf.extend_from_slice(key.as_bytes());
            buf.extend_from_slice(b"/some/prefix");
            buf.push(0);
        }
        fs::write(&dll, &buf).unwrap();

        assert!(patch_qt_core_prefixes(&dll).unwrap());
        let after = fs::read(&dll).unwrap();
        assert!(find_subsequence(&after, b"/some/prefix").is_none());
    }

    #[test]
    fn test_value_shorter_than_replacement_untouched() {
        let temp = TempDir::new().unwrap();
        let dll = temp.path().join("Qt6Core.dll");
        // Empty value: key immediately followed by the terminator.
        let mut buf = b"qt_prfxpath=".to_vec();
        buf.push(0);
        buf.extend_from_slice(b"tail");
        fs::write(&dll, &buf).unwrap();

        assert!(!patch_qt_core_prefixes(&dll).unwrap());
        assert_eq!(fs::read(&dll).unwrap(), buf);
    }

    #[test]
    fn test_missing_file_is_false() {
        assert!(!patch_qt_core_prefixes(Path::new("/no/such/Qt6Core.dll")).unwrap());
    }
}
