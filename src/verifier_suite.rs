//! Harness for invoking the verifier itself, either from a release tarball
//! or as a container image, and for pulling report info back out of a saved
//! report.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_yaml_bw as serde_yaml;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tar::Archive;

use crate::container::{ContainerRuntime, RunOptions, RuntimeFailure, VolumeMount};
use crate::env;
use crate::report_suite::ReportInfo;

pub const DEFAULT_IMAGE: &str = "quay.io/redhat-certification/chart-verifier";
pub const DEFAULT_IMAGE_TAG: &str = "main";
/// Name of the binary inside the release tarball.
pub const VERIFIER_BINARY: &str = "chart-verifier";

const CHARTS_MOUNT: &str = "/charts";
const KUBECONFIG_MOUNT: &str = "/kubeconfig";

/// Where a runnable verifier comes from.
#[derive(Clone)]
pub enum VerifierSource {
    /// Release tarball carrying the verifier binary.
    Tarball { path: PathBuf },
    /// Container image executed through an engine adapter.
    Image {
        name: String,
        tag: String,
        runtime: Arc<dyn ContainerRuntime>,
    },
}

/// Chart input for one verify run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChartLocation {
    Local(PathBuf),
    Remote(String),
}

impl ChartLocation {
    /// Anything with an http(s) scheme is remote; the rest is a local path.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            ChartLocation::Remote(raw.to_string())
        } else {
            ChartLocation::Local(PathBuf::from(raw))
        }
    }
}

impl fmt::Display for ChartLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChartLocation::Local(path) => write!(f, "{}", path.display()),
            ChartLocation::Remote(url) => write!(f, "{url}"),
        }
    }
}

/// Failure reasons surfaced to scenario logs, each prefixed `FAIL:`.
#[derive(Debug, thiserror::Error)]
pub enum VerifierFailure {
    #[error("FAIL: chart does not exist: {}", .0.display())]
    ChartMissing(PathBuf),
    #[error("FAIL: missing kubeconfig, set KUBECONFIG or configure one explicitly")]
    KubeconfigMissing,
    #[error("FAIL: no report produced by: {0}")]
    EmptyReport(String),
    #[error("FAIL: verifier invocation error: {0}")]
    Invocation(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeFailure),
}

/// The slice of the raw verify report the harness consults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReportHead {
    pub verifier_version: String,
    pub vendor_type: String,
    pub profile_version: String,
    pub chart_name: String,
    pub chart_version: String,
}

#[derive(Debug, Deserialize)]
struct RawReport {
    metadata: RawMetadata,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    tool: RawTool,
    chart: RawChart,
}

#[derive(Debug, Deserialize)]
struct RawTool {
    #[serde(rename = "verifier-version")]
    verifier_version: String,
    profile: RawProfile,
}

// The YAML report spells vendor type with a leading capital.
#[derive(Debug, Deserialize)]
struct RawProfile {
    #[serde(rename = "VendorType")]
    vendor_type: String,
    version: String,
}

#[derive(Debug, Deserialize)]
struct RawChart {
    name: String,
    version: String,
}

/// Parses the head fields out of a raw YAML verify report.
pub fn parse_report_head(raw: &str) -> Result<VerifyReportHead> {
    let report: RawReport = serde_yaml::from_str(raw).context("failed to decode verify report")?;
    Ok(VerifyReportHead {
        verifier_version: report.metadata.tool.verifier_version,
        vendor_type: report.metadata.tool.profile.vendor_type,
        profile_version: report.metadata.tool.profile.version,
        chart_name: report.metadata.chart.name,
        chart_version: report.metadata.chart.version,
    })
}

/// One configured way of running the verifier.
#[derive(Clone)]
pub struct VerifierInvocation {
    source: VerifierSource,
    vendor_type: Option<String>,
    profile_version: Option<String>,
    kubeconfig: Option<PathBuf>,
    local_only: bool,
    extract_dir: PathBuf,
}

impl VerifierInvocation {
    pub fn tarball(path: impl Into<PathBuf>) -> Self {
        Self::from_source(VerifierSource::Tarball { path: path.into() })
    }

    pub fn image(
        name: impl Into<String>,
        tag: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self::from_source(VerifierSource::Image {
            name: name.into(),
            tag: tag.into(),
            runtime,
        })
    }

    fn from_source(source: VerifierSource) -> Self {
        Self {
            source,
            vendor_type: None,
            profile_version: None,
            kubeconfig: None,
            local_only: false,
            extract_dir: PathBuf::from("test_verifier"),
        }
    }

    pub fn with_vendor_type(mut self, vendor_type: impl Into<String>) -> Self {
        self.vendor_type = Some(vendor_type.into());
        self
    }

    pub fn with_profile_version(mut self, version: impl Into<String>) -> Self {
        self.profile_version = Some(version.into());
        self
    }

    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Skip cluster-backed checks; no kubeconfig is required then.
    pub fn local_only(mut self) -> Self {
        self.local_only = true;
        self
    }

    /// Where tarball sources are unpacked before running the binary.
    pub fn with_extract_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extract_dir = dir.into();
        self
    }

    // Profile selections travel as a single --set flag with comma-joined
    // pairs, the form the verifier accepts.
    fn set_flags(&self) -> Vec<String> {
        let mut pairs = Vec::new();
        if let Some(vendor_type) = &self.vendor_type {
            pairs.push(format!("profile.vendorType={vendor_type}"));
        }
        if let Some(version) = &self.profile_version {
            pairs.push(format!("profile.version={version}"));
        }
        if pairs.is_empty() {
            Vec::new()
        } else {
            vec!["--set".to_string(), pairs.join(",")]
        }
    }

    fn verify_args(&self, chart_arg: &str) -> Vec<String> {
        let mut args = vec!["verify".to_string()];
        if self.local_only {
            args.push("-l".to_string());
        }
        args.extend(self.set_flags());
        args.push(chart_arg.to_string());
        args
    }

    fn resolve_kubeconfig(&self) -> Result<PathBuf, VerifierFailure> {
        self.kubeconfig
            .clone()
            .or_else(env::kubeconfig_path)
            .ok_or(VerifierFailure::KubeconfigMissing)
    }

    /// Runs `verify` against the chart and returns the raw YAML report.
    ///
    /// The verifier reports failed checks inside the report rather than
    /// through its exit status, so only an empty report is treated as a
    /// failed invocation.
    pub fn verify(&self, chart: &ChartLocation) -> Result<String, VerifierFailure> {
        match &self.source {
            VerifierSource::Tarball { path } => self.verify_from_tarball(path, chart),
            VerifierSource::Image { name, tag, runtime } => {
                self.verify_in_container(name, tag, runtime.as_ref(), chart)
            }
        }
    }

    fn verify_from_tarball(
        &self,
        tarball: &Path,
        chart: &ChartLocation,
    ) -> Result<String, VerifierFailure> {
        let chart_arg = match chart {
            ChartLocation::Local(path) => {
                if !path.exists() {
                    return Err(VerifierFailure::ChartMissing(path.clone()));
                }
                path.display().to_string()
            }
            ChartLocation::Remote(url) => url.clone(),
        };
        let binary = self.extract_verifier(tarball)?;
        let mut command = Command::new(&binary);
        command.args(self.verify_args(&chart_arg));
        if !self.local_only {
            let kubeconfig = self.resolve_kubeconfig()?;
            command.env("KUBECONFIG", &kubeconfig);
        }
        let run = command.output().map_err(|err| {
            VerifierFailure::Invocation(format!("{} failed to start: {err}", binary.display()))
        })?;
        let report = String::from_utf8_lossy(&run.stdout).to_string();
        if report.trim().is_empty() {
            return Err(VerifierFailure::EmptyReport(format!(
                "{} verify {chart_arg}",
                binary.display()
            )));
        }
        Ok(report)
    }

    fn verify_in_container(
        &self,
        name: &str,
        tag: &str,
        runtime: &dyn ContainerRuntime,
        chart: &ChartLocation,
    ) -> Result<String, VerifierFailure> {
        let image = format!("{name}:{tag}");
        let mut options = RunOptions::default();
        let chart_arg = match chart {
            ChartLocation::Local(path) => {
                if !path.exists() {
                    return Err(VerifierFailure::ChartMissing(path.clone()));
                }
                let (chart_dir, file_name) = split_mountable(path)?;
                options = options.add_volume(VolumeMount::new(chart_dir, CHARTS_MOUNT).relabel());
                format!("{CHARTS_MOUNT}/{file_name}")
            }
            ChartLocation::Remote(url) => url.clone(),
        };
        if !self.local_only {
            let kubeconfig = self.resolve_kubeconfig()?;
            options = options
                .add_volume(VolumeMount::new(kubeconfig, KUBECONFIG_MOUNT).read_only())
                .add_env("KUBECONFIG", KUBECONFIG_MOUNT);
        }
        let report = runtime.run(&image, &self.verify_args(&chart_arg), &options)?;
        if report.trim().is_empty() {
            return Err(VerifierFailure::EmptyReport(format!(
                "{image} verify {chart_arg}"
            )));
        }
        Ok(report)
    }

    /// Extracts report info from a saved report via the `report` subcommand.
    ///
    /// The profile selection comes from the report itself (parsed by the
    /// caller), so info extraction sees the same profile the verify run used.
    pub fn report_info(
        &self,
        report: &Path,
        vendor_type: &str,
        profile_version: &str,
    ) -> Result<ReportInfo> {
        let set_flag = format!("profile.vendorType={vendor_type},profile.version={profile_version}");
        let raw = match &self.source {
            VerifierSource::Tarball { path } => {
                let binary = self.extract_verifier(path)?;
                let run = Command::new(&binary)
                    .arg("report")
                    .arg("all")
                    .arg("--set")
                    .arg(&set_flag)
                    .arg(report)
                    .output()
                    .with_context(|| format!("failed to run {} report", binary.display()))?;
                String::from_utf8_lossy(&run.stdout).to_string()
            }
            VerifierSource::Image { name, tag, runtime } => {
                let (report_dir, file_name) = split_mountable(report)?;
                let options = RunOptions::default()
                    .add_volume(VolumeMount::new(report_dir, CHARTS_MOUNT).relabel());
                let args = vec![
                    "report".to_string(),
                    "all".to_string(),
                    "--set".to_string(),
                    set_flag,
                    format!("{CHARTS_MOUNT}/{file_name}"),
                ];
                runtime.run(&format!("{name}:{tag}"), &args, &options)?
            }
        };
        ReportInfo::from_json(&raw)
    }

    fn extract_verifier(&self, tarball: &Path) -> Result<PathBuf, VerifierFailure> {
        fs::create_dir_all(&self.extract_dir).map_err(|err| {
            VerifierFailure::Invocation(format!(
                "cannot create {}: {err}",
                self.extract_dir.display()
            ))
        })?;
        let file = fs::File::open(tarball).map_err(|err| {
            VerifierFailure::Invocation(format!("cannot open tarball {}: {err}", tarball.display()))
        })?;
        let mut archive = Archive::new(GzDecoder::new(file));
        archive.unpack(&self.extract_dir).map_err(|err| {
            VerifierFailure::Invocation(format!("cannot extract {}: {err}", tarball.display()))
        })?;
        let binary = self.extract_dir.join(VERIFIER_BINARY);
        if !binary.exists() {
            return Err(VerifierFailure::Invocation(format!(
                "no {VERIFIER_BINARY} binary in {}",
                tarball.display()
            )));
        }
        Ok(binary)
    }
}

// Absolute directory and file name for bind-mounting a single file's parent.
fn split_mountable(path: &Path) -> Result<(PathBuf, String), VerifierFailure> {
    let absolute = path.canonicalize().map_err(|err| {
        VerifierFailure::Invocation(format!("cannot resolve {}: {err}", path.display()))
    })?;
    let file_name = absolute
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            VerifierFailure::Invocation(format!("path has no file name: {}", absolute.display()))
        })?;
    let directory = absolute
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    Ok((directory, file_name))
}
