use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::header;
use serde::Deserialize;
use std::time::Duration;

use crate::env::ActionsContext;
use crate::output;
use crate::retry::RetryPolicy;

const ACCEPT: &str = "application/vnd.github.v3+json";
const USER_AGENT: &str = concat!("chart-verifier-ci/", env!("CARGO_PKG_VERSION"));
const PAGE_SIZE: usize = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("failed to build HTTP client")
}

/// Client for one pull request's REST resource.
///
/// `api_url` is the full resource URL, e.g.
/// `https://api.github.com/repos/org/repo/pulls/123`.
#[derive(Debug, Clone)]
pub struct PullRequestClient {
    api_url: String,
    page_size: usize,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ChangedFile {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestView {
    #[serde(default)]
    merged: bool,
}

impl PullRequestClient {
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_url: api_url.into(),
            page_size: PAGE_SIZE,
            client: http_client()?,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Lists the names of every file changed by this pull request.
    ///
    /// Pages through the listing endpoint; a page shorter than the requested
    /// size is the last one. An empty or malformed page stops the walk with
    /// whatever was collected so far rather than looping against a
    /// misbehaving remote.
    pub fn changed_files(&self) -> Result<Vec<String>> {
        let url = format!("{}/files", self.api_url);
        let mut files = Vec::new();
        let mut page = 1usize;
        loop {
            let response = self
                .client
                .get(&url)
                .header(header::ACCEPT, ACCEPT)
                .query(&[
                    ("per_page", self.page_size.to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .with_context(|| format!("file listing request failed: {url}"))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                bail!("file listing {url} returned status {status}: {body}");
            }
            let batch: Vec<ChangedFile> = match response.json() {
                Ok(batch) => batch,
                Err(err) => {
                    output::warning(format!("malformed file listing page {page}: {err}"));
                    return Ok(files);
                }
            };
            tracing::debug!(page, count = batch.len(), "fetched changed files");
            let last_page = batch.len() < self.page_size;
            files.extend(batch.into_iter().map(|file| file.filename));
            if last_page {
                return Ok(files);
            }
            page += 1;
        }
    }

    /// Whether the hosting service reports this pull request as merged.
    pub fn is_merged(&self) -> Result<bool> {
        let response = self
            .client
            .get(&self.api_url)
            .header(header::ACCEPT, ACCEPT)
            .send()
            .with_context(|| format!("pull request lookup failed: {}", self.api_url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!(
                "pull request lookup {} returned status {status}: {body}",
                self.api_url
            );
        }
        let view: PullRequestView = response
            .json()
            .context("failed to decode pull request resource")?;
        Ok(view.merged)
    }

    /// Polls until the pull request reports merged.
    ///
    /// A failed round (transport or HTTP error) is logged and counts against
    /// the budget; exhausting the budget is a failure.
    pub fn wait_until_merged(&self, policy: &RetryPolicy) -> Result<()> {
        let merged = policy.run(|attempt| {
            tracing::debug!(attempt, api_url = %self.api_url, "merge poll");
            match self.is_merged() {
                Ok(merged) => Ok(merged.then_some(())),
                Err(err) => {
                    output::warning(format!("merge poll attempt {attempt} failed: {err:#}"));
                    Ok(None)
                }
            }
        })?;
        if merged.is_none() {
            bail!(
                "pull request {} not merged after {} attempts",
                self.api_url,
                policy.attempts
            );
        }
        output::info("pull request merged");
        Ok(())
    }
}

/// Read-only client for a repository's published releases.
#[derive(Debug, Clone)]
pub struct ReleaseClient {
    api_base: String,
    repository: String,
    token: Option<String>,
    page_size: usize,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ReleaseView {
    #[serde(default)]
    name: Option<String>,
    tag_name: String,
}

impl ReleaseClient {
    pub fn new(repository: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_base: DEFAULT_API_BASE.to_string(),
            repository: repository.into(),
            token: None,
            page_size: PAGE_SIZE,
            client: http_client()?,
        })
    }

    /// Builds a client from the detected CI job context.
    pub fn from_context(context: &ActionsContext) -> Result<Self> {
        let mut client = Self::new(context.require_repository()?)?;
        client.token = context.token.clone();
        Ok(client)
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Whether a release with `version` as its name or tag already exists.
    pub fn release_exists(&self, version: &str) -> Result<bool> {
        let url = format!("{}/repos/{}/releases", self.api_base, self.repository);
        let mut page = 1usize;
        loop {
            let mut request = self
                .client
                .get(&url)
                .header(header::ACCEPT, ACCEPT)
                .query(&[
                    ("per_page", self.page_size.to_string()),
                    ("page", page.to_string()),
                ]);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .with_context(|| format!("release listing request failed: {url}"))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                bail!("release listing {url} returned status {status}: {body}");
            }
            let batch: Vec<ReleaseView> = response
                .json()
                .context("failed to decode release listing")?;
            if batch
                .iter()
                .any(|release| release.name.as_deref() == Some(version) || release.tag_name == version)
            {
                return Ok(true);
            }
            if batch.len() < self.page_size {
                return Ok(false);
            }
            page += 1;
        }
    }
}
