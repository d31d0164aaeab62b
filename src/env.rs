use anyhow::{Result, anyhow};
use std::env;
use std::path::PathBuf;

/// Reads an environment variable, treating blank values as unset.
pub fn optional_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Job context detected from the CI environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionsContext {
    pub repository: Option<String>,
    pub token: Option<String>,
}

impl ActionsContext {
    pub fn detect() -> Self {
        Self {
            repository: optional_env("GITHUB_REPOSITORY"),
            token: optional_env("GITHUB_TOKEN"),
        }
    }

    /// Repository slug, required when querying published releases.
    pub fn require_repository(&self) -> Result<&str> {
        self.repository
            .as_deref()
            .ok_or_else(|| anyhow!("GITHUB_REPOSITORY must be set"))
    }
}

/// Kubeconfig for cluster-backed verify runs, when one is configured.
pub fn kubeconfig_path() -> Option<PathBuf> {
    optional_env("KUBECONFIG").map(PathBuf::from)
}
