//! Pull-request gate for files only release approvers may touch.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_yaml_bw as serde_yaml;
use std::fs;
use std::path::PathBuf;

use crate::github::PullRequestClient;
use crate::output;
use crate::release_suite::DEFAULT_VERSION_FILE;

/// Name of the approvers document at the repository root.
pub const OWNERS_FILE: &str = "OWNERS";

/// Options for the ownership gate.
#[derive(Debug, Clone)]
pub struct OwnersGateOptions {
    /// Path prefixes only approvers may change.
    pub restricted: Vec<String>,
    pub owners_file: PathBuf,
}

impl Default for OwnersGateOptions {
    fn default() -> Self {
        Self {
            restricted: vec![OWNERS_FILE.to_string(), DEFAULT_VERSION_FILE.to_string()],
            owners_file: PathBuf::from(OWNERS_FILE),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OwnersDoc {
    #[serde(default)]
    approvers: Vec<String>,
}

/// Outcome of gating one pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Nothing in the change set is restricted.
    NoRestrictedFiles,
    /// A restricted file was touched by a listed approver.
    Authorized { file: String },
    /// A restricted file was touched by someone else.
    Denied { file: String },
}

impl GateOutcome {
    pub fn authorized(&self) -> bool {
        !matches!(self, GateOutcome::Denied { .. })
    }
}

impl OwnersGateOptions {
    pub fn restrict(mut self, prefix: impl Into<String>) -> Self {
        self.restricted.push(prefix.into());
        self
    }

    pub fn with_owners_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.owners_file = path.into();
        self
    }

    /// First changed file matching a restricted prefix, if any.
    pub fn find_restricted(&self, files: &[String]) -> Option<String> {
        files
            .iter()
            .find(|file| self.restricted.iter().any(|prefix| file.starts_with(prefix)))
            .cloned()
    }

    /// Whether `username` appears in the approvers list.
    ///
    /// A missing approvers document denies everyone rather than erroring.
    pub fn verify_approver(&self, username: &str) -> Result<bool> {
        if !self.owners_file.exists() {
            output::error(format!(
                "approvers file not found: {}",
                self.owners_file.display()
            ));
            return Ok(false);
        }
        let raw = fs::read_to_string(&self.owners_file)
            .with_context(|| format!("failed to read {}", self.owners_file.display()))?;
        let doc: OwnersDoc = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to decode {}", self.owners_file.display()))?;
        Ok(doc.approvers.iter().any(|approver| approver == username))
    }

    /// Full gate: list the changed files, look for restricted ones, and check
    /// the submitting user when one is found.
    pub fn gate(&self, pull_request: &PullRequestClient, username: &str) -> Result<GateOutcome> {
        let files = pull_request.changed_files()?;
        let Some(file) = self.find_restricted(&files) else {
            output::info("no restricted files found in the pull request");
            return Ok(GateOutcome::NoRestrictedFiles);
        };
        output::info(format!("restricted file found: {file}"));
        if self.verify_approver(username)? {
            output::info(format!("{username} is authorized to modify {file}"));
            Ok(GateOutcome::Authorized { file })
        } else {
            output::error(format!("{username} is not authorized to modify {file}"));
            Ok(GateOutcome::Denied { file })
        }
    }
}
