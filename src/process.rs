//! External process invocation.
//!
//! All external tools (objdump, otool, patchelf, qtpaths, ...) run
//! through [`Cmd`], which captures stdout and reports the exit code.
//! Calls are synchronous; no timeouts are imposed.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, Stdio};

/// Check if a command exists on the host system.
///
/// Uses `which` to locate the command in PATH.
pub fn exists(cmd: &str) -> bool {
    Command::new("which")
        .arg(cmd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Captured result of a finished command.
pub struct CmdResult {
    pub stdout: String,
    pub code: i32,
}

impl CmdResult {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Builder for an external tool invocation.
///
/// By default a non-zero exit status is an error; `allow_fail` turns it
/// into a normal [`CmdResult`] so callers can inspect the code.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|a| a.into()));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Treat a non-zero exit status as a normal result instead of an error.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Run the command, capturing stdout.
    pub fn run(self) -> Result<CmdResult> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to run {}", self.program))?;

        let code = output.status.code().unwrap_or(-1);
        if code != 0 && !self.allow_fail {
            anyhow::bail!("{} exited with status {}", self.program, code);
        }
        Ok(CmdResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            code,
        })
    }
}
