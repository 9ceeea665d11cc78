//! Post-staging binary patching that makes the output relocatable.
//!
//! - ELF: RUNPATH rewrites through `patchelf`
//! - Mach-O: install-name IDs, `@rpath` reference rewrites and
//!   `LC_RPATH` additions through `llvm-install-name-tool`
//! - PE: in-file patching of the prefix strings embedded in
//!   `Qt6Core.dll`

pub mod elf;
pub mod macho;
pub mod pe;
