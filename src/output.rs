use anyhow::{Context, Result};
use std::fmt::Display;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use crate::env;

/// Operator-facing diagnostics. CI workflows grep stdout for these prefixes,
/// so they are part of the command-line contract rather than log formatting.
pub fn info(message: impl Display) {
    println!("[INFO] {message}");
}

pub fn warning(message: impl Display) {
    println!("[WARNING] {message}");
}

pub fn error(message: impl Display) {
    println!("[ERROR] {message}");
}

pub fn pass(message: impl Display) {
    println!("[PASS] {message}");
}

/// Key/value results handed to later workflow steps.
///
/// Every value is echoed as `key=value` on stdout; when a step output file is
/// configured it receives the same line, which is how orchestrated jobs pick
/// the values up.
#[derive(Debug, Clone, Default)]
pub struct JobOutputs {
    file: Option<PathBuf>,
}

impl JobOutputs {
    /// Binds to the output file named by `GITHUB_OUTPUT`, if any.
    pub fn from_env() -> Self {
        Self {
            file: env::optional_env("GITHUB_OUTPUT").map(PathBuf::from),
        }
    }

    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(path.into()),
        }
    }

    pub fn set(&self, key: &str, value: impl Display) -> Result<()> {
        println!("{key}={value}");
        if let Some(path) = &self.file {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open output file {}", path.display()))?;
            writeln!(file, "{key}={value}")
                .with_context(|| format!("failed to append to output file {}", path.display()))?;
        }
        Ok(())
    }
}
