//! Tag resolution and linking against the image registry.
//!
//! After a release publishes, the workflow waits for the new version tag to
//! become visible in the registry and then repoints a well-known link tag at
//! the same image. Tag propagation on the registry side can lag the release
//! by minutes, so reads go through a bounded retry schedule.

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::env;
use crate::output;
use crate::retry::RetryPolicy;

pub const DEFAULT_API_BASE: &str = "https://quay.io/api/v1";
pub const DEFAULT_REPOSITORY: &str = "redhat-certification/chart-verifier";
/// Default target for `ensure_linked`.
pub const DEFAULT_LINK_TAG: &str = "test";
/// Environment variable holding the bearer token required for tag writes.
pub const AUTH_TOKEN_VAR: &str = "QUAY_AUTH_TOKEN";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the registry tag API.
#[derive(Debug, Clone)]
pub struct TagRegistryOptions {
    pub api_base: String,
    pub repository: String,
    pub auth_token: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for TagRegistryOptions {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            repository: DEFAULT_REPOSITORY.to_string(),
            auth_token: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl TagRegistryOptions {
    /// Production defaults plus the auth token from the environment, when set.
    pub fn from_env() -> Self {
        Self {
            auth_token: env::optional_env(AUTH_TOKEN_VAR),
            ..Self::default()
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = repository.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Result<TagRegistry> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(TagRegistry {
            options: self,
            client,
        })
    }
}

/// One tag as returned by the listing endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryTag {
    pub name: String,
    pub image_id: String,
}

#[derive(Debug, Deserialize)]
struct TagPage {
    #[serde(default)]
    tags: Vec<RegistryTag>,
}

/// Returned when a tag never became visible within the retry budget.
#[derive(Debug, Clone, thiserror::Error)]
#[error("tag {tag} not found after {attempts} attempts")]
pub struct TagUnresolved {
    pub tag: String,
    pub attempts: u32,
}

/// Outcome of `ensure_linked`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The link tag already pointed at the same image; nothing was written.
    AlreadyCurrent { image_id: String },
    /// The link tag was repointed.
    Linked { image_id: String },
}

impl LinkOutcome {
    pub fn image_id(&self) -> &str {
        match self {
            LinkOutcome::AlreadyCurrent { image_id } | LinkOutcome::Linked { image_id } => image_id,
        }
    }
}

/// Client for resolving and linking tags in one registry repository.
pub struct TagRegistry {
    options: TagRegistryOptions,
    client: Client,
}

impl TagRegistry {
    fn tag_endpoint(&self) -> String {
        format!(
            "{}/repository/{}/tag/",
            self.options.api_base, self.options.repository
        )
    }

    /// One snapshot query against the active-tag listing.
    ///
    /// `Ok(None)` covers both "tag absent" and a non-success response, which
    /// is logged and treated as a miss for this round. A transport-level
    /// failure is an error.
    fn query_tag(&self, tag: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.tag_endpoint())
            .query(&[("onlyActiveTags", "true"), ("specificTag", tag)])
            .send()
            .with_context(|| format!("tag listing request failed for {tag}"))?;
        let status = response.status();
        if !status.is_success() {
            output::error(format!("tag listing for {tag} returned status {status}"));
            return Ok(None);
        }
        let page: TagPage = response
            .json()
            .with_context(|| format!("failed to decode tag listing for {tag}"))?;
        for candidate in page.tags {
            if candidate.name == tag {
                output::info(format!("found tag {tag}, image id {}", candidate.image_id));
                return Ok(Some(candidate.image_id));
            }
            output::info(format!("ignore tag {}", candidate.name));
        }
        Ok(None)
    }

    /// Resolves `tag` to an image identifier.
    ///
    /// Without retry this is a single probe: `Ok(None)` simply means the tag
    /// is not visible right now. With retry the registry is polled on the
    /// configured schedule and exhausting it yields a [`TagUnresolved`]
    /// error, so a successful return always carries the identifier.
    pub fn resolve(&self, tag: &str, allow_retry: bool) -> Result<Option<String>> {
        if tag.is_empty() {
            bail!("tag name must not be empty");
        }
        if allow_retry {
            self.resolve_with_retry(tag).map(Some)
        } else {
            output::info(format!("look for tag {tag}, single probe"));
            self.query_tag(tag)
        }
    }

    fn resolve_with_retry(&self, tag: &str) -> Result<String> {
        if tag.is_empty() {
            bail!("tag name must not be empty");
        }
        let retry = self.options.retry;
        let found = retry.run(|attempt| {
            output::info(format!(
                "look for tag {tag}, attempt {attempt}/{}",
                retry.attempts
            ));
            match self.query_tag(tag) {
                Ok(Some(image_id)) => Ok(Some(image_id)),
                Ok(None) => Ok(None),
                Err(err) => {
                    output::warning(format!("tag listing failed: {err:#}"));
                    Ok(None)
                }
            }
        })?;
        found.ok_or_else(|| {
            TagUnresolved {
                tag: tag.to_string(),
                attempts: retry.attempts,
            }
            .into()
        })
    }

    /// Repoints `target_tag` at `image_id` with a single authenticated write.
    ///
    /// Requires the auth token; a missing token is a configuration error
    /// reported before any network call.
    pub fn link(&self, image_id: &str, target_tag: &str) -> Result<()> {
        let Some(token) = &self.options.auth_token else {
            bail!("{AUTH_TOKEN_VAR} is not set, cannot update tag {target_tag}");
        };
        output::info(format!("update tag {target_tag} to point at {image_id}"));
        let response = self
            .client
            .put(format!("{}{target_tag}", self.tag_endpoint()))
            .bearer_auth(token)
            .json(&serde_json::json!({ "image": image_id }))
            .send()
            .with_context(|| format!("tag update request failed for {target_tag}"))?;
        let status = response.status();
        let body = response.text().unwrap_or_default();
        output::info(format!("tag update response {status}: {body}"));
        if !matches!(status, StatusCode::OK | StatusCode::CREATED) {
            bail!("failed to link {target_tag} to {image_id}: status {status}, body {body}");
        }
        Ok(())
    }

    /// Points `link_tag` at whatever image `new_tag` resolves to.
    ///
    /// The new tag is resolved with retry (it must eventually appear once a
    /// release has been requested); the link target is probed once since it
    /// may not exist yet. Equal identifiers make this a no-op.
    pub fn ensure_linked(&self, new_tag: &str, link_tag: &str) -> Result<LinkOutcome> {
        let new_image = self.resolve_with_retry(new_tag)?;
        let current = self.resolve(link_tag, false)?;
        if current.as_deref() == Some(new_image.as_str()) {
            output::info(format!("tag {link_tag} is current"));
            return Ok(LinkOutcome::AlreadyCurrent {
                image_id: new_image,
            });
        }
        self.link(&new_image, link_tag)?;
        output::pass(format!("{link_tag} linked to {new_tag}"));
        Ok(LinkOutcome::Linked {
            image_id: new_image,
        })
    }
}
