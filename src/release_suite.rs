//! Release plumbing: the version file, the new-release decision, release
//! pull-request detection, the release-notes body, and tarball packaging.

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use crate::github::{PullRequestClient, ReleaseClient};
use crate::output;
use crate::verifier_suite::VERIFIER_BINARY;

/// Repository-relative path of the file that drives releases.
pub const DEFAULT_VERSION_FILE: &str = "pkg/chartverifier/version/version_info.json";
/// Where the build drops the verifier binary before packaging.
pub const DEFAULT_BINARY_PATH: &str = "out/chart-verifier";

/// Contents of the version file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VersionInfo {
    pub version: String,
    #[serde(rename = "quay-image")]
    pub quay_image: String,
    #[serde(rename = "release-info", default)]
    pub release_info: Vec<String>,
}

impl VersionInfo {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read version file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to decode version file {}", path.display()))
    }
}

fn parse_version(raw: &str) -> Result<Version> {
    Version::parse(raw.trim().trim_start_matches('v'))
        .with_context(|| format!("not a semantic version: {raw}"))
}

/// Whether `proposed` warrants cutting a release over `current`.
///
/// Strictly newer always does. The same version does only when no release of
/// that name has been published yet, which covers re-running a workflow that
/// failed after merging the version bump.
pub fn release_update_needed(proposed: &str, current: &str, release_exists: bool) -> Result<bool> {
    let proposed = parse_version(proposed)?;
    let current = parse_version(current)?;
    Ok(proposed > current || (proposed == current && !release_exists))
}

/// True when the changed-file list is non-empty and every entry falls under
/// the version file path.
pub fn only_version_file_modified(files: &[String], version_file: &str) -> bool {
    !files.is_empty() && files.iter().all(|file| file.starts_with(version_file))
}

/// Renders the release-notes body shown on the release page.
///
/// Lines already starting with markup pass through untouched so curated
/// HTML fragments in the version file survive.
pub fn release_body(info: &VersionInfo) -> String {
    let mut body = format!("Chart verifier version {} <br><br>", info.version);
    body.push_str(&format!(
        "Docker Image:<br>- {}:{}<br><br>",
        info.quay_image, info.version
    ));
    body.push_str("This version includes:<br>");
    for line in &info.release_info {
        if line.starts_with('<') {
            body.push_str(line);
        } else {
            body.push_str(&format!("- {line}<br>"));
        }
    }
    body
}

/// One entry packaged into the release tarball.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub source: PathBuf,
    pub archive_name: String,
}

impl AssetEntry {
    pub fn new(source: impl Into<PathBuf>, archive_name: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            archive_name: archive_name.into(),
        }
    }
}

/// Options controlling release asset packaging.
#[derive(Debug, Clone)]
pub struct ReleaseAssetOptions {
    pub contents: Vec<AssetEntry>,
    pub output_dir: PathBuf,
}

impl Default for ReleaseAssetOptions {
    fn default() -> Self {
        Self {
            contents: vec![AssetEntry::new(DEFAULT_BINARY_PATH, VERIFIER_BINARY)],
            output_dir: PathBuf::from("."),
        }
    }
}

impl ReleaseAssetOptions {
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.contents = vec![AssetEntry::new(path, VERIFIER_BINARY)];
        self
    }

    pub fn add_entry(mut self, entry: AssetEntry) -> Self {
        self.contents.push(entry);
        self
    }

    /// File name of the tarball for `release`.
    pub fn asset_name(release: &str) -> String {
        format!("chart-verifier-{release}.tgz")
    }

    /// Assembles the release tarball, replacing any existing file.
    pub fn create(&self, release: &str) -> Result<PathBuf> {
        let path = self.output_dir.join(Self::asset_name(release));
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove stale {}", path.display()))?;
        }
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut archive = tar::Builder::new(encoder);
        for entry in &self.contents {
            if entry.source.is_dir() {
                archive
                    .append_dir_all(&entry.archive_name, &entry.source)
                    .with_context(|| {
                        format!("failed to archive directory {}", entry.source.display())
                    })?;
            } else {
                archive
                    .append_path_with_name(&entry.source, &entry.archive_name)
                    .with_context(|| format!("failed to archive {}", entry.source.display()))?;
            }
        }
        archive
            .into_inner()
            .and_then(GzEncoder::finish)
            .with_context(|| format!("failed to finish {}", path.display()))?;
        output::info(format!("release asset created: {}", path.display()));
        Ok(path)
    }
}

/// Release content derived from the version file for a release pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseContent {
    pub version: String,
    pub image: String,
    pub info: Vec<String>,
    pub body: String,
}

/// What a pull-request inspection produced: the packaged asset, always, and
/// the release content when the pull request is a release one.
#[derive(Debug, Clone)]
pub struct ReleaseCheck {
    pub tarball: PathBuf,
    pub release: Option<ReleaseContent>,
}

/// Options for the release-check flow.
#[derive(Debug, Clone)]
pub struct ReleaseCheckOptions {
    pub version_file: String,
    pub asset: ReleaseAssetOptions,
}

impl Default for ReleaseCheckOptions {
    fn default() -> Self {
        Self {
            version_file: DEFAULT_VERSION_FILE.to_string(),
            asset: ReleaseAssetOptions::default(),
        }
    }
}

impl ReleaseCheckOptions {
    pub fn with_version_file(mut self, path: impl Into<String>) -> Self {
        self.version_file = path.into();
        self
    }

    pub fn with_asset(mut self, asset: ReleaseAssetOptions) -> Self {
        self.asset = asset;
        self
    }

    pub fn load_version_info(&self) -> Result<VersionInfo> {
        VersionInfo::load(Path::new(&self.version_file))
    }

    /// Packages the asset and decides whether the pull request is a release.
    pub fn inspect_pull_request(&self, pull_request: &PullRequestClient) -> Result<ReleaseCheck> {
        let info = self.load_version_info()?;
        let tarball = self.asset.create(&info.version)?;
        let files = pull_request.changed_files()?;
        let release = if only_version_file_modified(&files, &self.version_file) {
            output::info(format!("release found in pull request files: {}", info.version));
            Some(ReleaseContent {
                body: release_body(&info),
                version: info.version,
                image: info.quay_image,
                info: info.release_info,
            })
        } else {
            output::info("pull request contains non-release files");
            None
        };
        Ok(ReleaseCheck { tarball, release })
    }

    /// Whether `proposed` should trigger a release, consulting the published
    /// releases only when versions tie.
    pub fn update_available(&self, proposed: &str, releases: &ReleaseClient) -> Result<bool> {
        let info = self.load_version_info()?;
        let proposed_version = parse_version(proposed)?;
        let current_version = parse_version(&info.version)?;
        if proposed_version > current_version {
            output::info(format!(
                "release {proposed} is newer than {}",
                info.version
            ));
            return Ok(true);
        }
        if proposed_version == current_version && !releases.release_exists(proposed)? {
            output::info(format!(
                "release {proposed} is not new but no release exists yet"
            ));
            return Ok(true);
        }
        output::info(format!("release {} already exists", info.version));
        Ok(false)
    }
}
