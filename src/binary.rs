//! Binary format detection.
//!
//! Sniffs the magic bytes of an executable to classify it as PE, ELF or
//! Mach-O (thin or universal). Fat Mach-O headers share their magic with
//! Java class files, so the fat-arch table is validated before the file
//! is accepted.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use thiserror::Error;

/// Object-file format of a deployable binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryKind {
    /// Windows Portable Executable.
    Pe,
    /// Linux ELF.
    Elf,
    /// macOS Mach-O.
    MachO,
}

impl BinaryKind {
    /// File extension of shared libraries for this format.
    pub fn shared_lib_extension(&self) -> &'static str {
        match self {
            BinaryKind::Pe => "dll",
            BinaryKind::Elf => "so",
            BinaryKind::MachO => "dylib",
        }
    }
}

impl fmt::Display for BinaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryKind::Pe => write!(f, "PE"),
            BinaryKind::Elf => write!(f, "ELF"),
            BinaryKind::MachO => write!(f, "Mach-O"),
        }
    }
}

/// Why a file was not recognized as any supported format.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct DetectError {
    pub reason: String,
}

impl DetectError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

const MH_MAGIC: u32 = 0xFEED_FACE;
const MH_CIGAM: u32 = 0xCEFA_EDFE;
const MH_MAGIC_64: u32 = 0xFEED_FACF;
const MH_CIGAM_64: u32 = 0xCFFA_EDFE;

const FAT_MAGIC: u32 = 0xCAFE_BABE;
const FAT_CIGAM: u32 = 0xBEBA_FECA;
const FAT_MAGIC_64: u32 = 0xCAFE_BABF;
const FAT_CIGAM_64: u32 = 0xBFBA_FECA;

/// Detect the binary format of `path` by magic bytes.
///
/// Every input either yields a kind or a reason; I/O problems are
/// reported as reasons rather than panics.
pub fn detect(path: &Path) -> Result<BinaryKind, DetectError> {
    let mut file = File::open(path).map_err(|_| DetectError::new("cannot open file"))?;
    let file_size = file
        .metadata()
        .map_err(|_| DetectError::new("cannot stat file"))?
        .len();

    let mut head = [0u8; 16];
    let n = read_up_to(&mut file, &mut head).map_err(|_| DetectError::new("cannot read file"))?;
    if n < 4 {
        return Err(DetectError::new("file too small"));
    }

    // ELF: 0x7F 'E' 'L' 'F'
    if head[0] == 0x7F && head[1] == b'E' && head[2] == b'L' && head[3] == b'F' {
        return Ok(BinaryKind::Elf);
    }

    // PE: 'MZ' with 'PE\0\0' at e_lfanew. Non-PE files may start with MZ;
    // those fall through to the remaining checks.
    if head[0] == b'M' && head[1] == b'Z' && file_size >= 0x40 {
        if let Some(e_lfanew) = read_u32_at(&mut file, 0x3C, file_size, Endian::Little) {
            if u64::from(e_lfanew) + 4 <= file_size {
                let mut sig = [0u8; 4];
                let ok = file
                    .seek(SeekFrom::Start(u64::from(e_lfanew)))
                    .and_then(|_| file.read_exact(&mut sig))
                    .is_ok();
                if ok && sig == [b'P', b'E', 0, 0] {
                    return Ok(BinaryKind::Pe);
                }
            }
        }
    }

    let be = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);

    if be == MH_MAGIC || be == MH_CIGAM || be == MH_MAGIC_64 || be == MH_CIGAM_64 {
        return Ok(BinaryKind::MachO);
    }

    if be == FAT_MAGIC || be == FAT_MAGIC_64 || be == FAT_CIGAM || be == FAT_CIGAM_64 {
        // Fat magic collides with Java class files; validate nfat_arch
        // and the arch table size before accepting.
        let endian = if be == FAT_MAGIC || be == FAT_MAGIC_64 {
            Endian::Big
        } else {
            Endian::Little
        };
        let nfat_arch = read_u32_at(&mut file, 4, file_size, endian)
            .ok_or_else(|| DetectError::new("truncated fat header"))?;
        if nfat_arch == 0 || nfat_arch > 64 {
            return Err(DetectError::new(
                "CAFEBABE but invalid nfat_arch (likely not Mach-O)",
            ));
        }
        let entry_size: u64 = if be == FAT_MAGIC_64 || be == FAT_CIGAM_64 {
            32
        } else {
            20
        };
        let need = 8 + u64::from(nfat_arch) * entry_size;
        if need > file_size {
            return Err(DetectError::new("fat header larger than file"));
        }
        return Ok(BinaryKind::MachO);
    }

    Err(DetectError::new("unknown binary format"))
}

#[derive(Clone, Copy)]
enum Endian {
    Little,
    Big,
}

fn read_u32_at(file: &mut File, offset: u64, file_size: u64, endian: Endian) -> Option<u32> {
    if offset + 4 > file_size {
        return None;
    }
    let mut buf = [0u8; 4];
    file.seek(SeekFrom::Start(offset)).ok()?;
    file.read_exact(&mut buf).ok()?;
    Some(match endian {
        Endian::Little => u32::from_le_bytes(buf),
        Endian::Big => u32::from_be_bytes(buf),
    })
}

/// Read as many bytes as the file holds, up to the buffer size.
fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}
