//! Stage a compiled Qt application into a self-contained, relocatable
//! distribution directory.
//!
//! Given a PE, ELF or Mach-O executable, this crate resolves its
//! transitive shared-library dependencies, copies the Qt plugins, QML
//! modules and translation catalogs it uses, and patches the staged
//! binaries so the result runs without a Qt installation on the target
//! machine.
//!
//! # Pipeline
//!
//! ```text
//! detect format                    (binary)
//!   -> build resolve context       (resolve, qt)
//!   -> dependency closure          (deps, filter, closure)
//!   -> stage libraries + main     (stage, layout, fsops)
//!   -> plugins / QML / translations (stage, qml, translations)
//!   -> overlays                    (fsops)
//!   -> relocation fixups           (patch)
//! ```
//!
//! The external tools (objdump, llvm-otool, patchelf,
//! llvm-install-name-tool, qtpaths, qmlimportscanner, lconvert) are
//! spawned synchronously through [`process::Cmd`]; their availability
//! is checked up front by [`preflight`].

pub mod binary;
pub mod closure;
pub mod config;
pub mod deploy;
pub mod deps;
pub mod error;
pub mod filter;
pub mod fsops;
pub mod host;
pub mod layout;
pub mod patch;
pub mod preflight;
pub mod process;
pub mod qml;
pub mod qt;
pub mod resolve;
pub mod stage;
pub mod translations;

pub use binary::BinaryKind;
pub use config::DeployPlan;
pub use deploy::deploy;
pub use error::DeployError;
