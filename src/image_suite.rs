//! Builds the candidate verifier image and smoke-tests it against a known
//! sample chart before anything gets published.

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::container::{ContainerRuntime, RunOptions};
use crate::output;
use crate::verifier_suite::{ChartLocation, VerifierInvocation, parse_report_head};

/// Chart exercised by the post-build smoke test, with the counts a healthy
/// verifier reports for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeChart {
    pub url: String,
    pub expected_passed: i64,
    pub expected_failed: i64,
    pub vendor_type: String,
    pub profile_version: String,
}

impl Default for SmokeChart {
    fn default() -> Self {
        Self {
            url: "https://github.com/redhat-certification/chart-verifier/blob/main/pkg/chartverifier/checks/chart-0.1.0-v3.valid.tgz?raw=true"
                .to_string(),
            expected_passed: 10,
            expected_failed: 1,
            vendor_type: "partner".to_string(),
            profile_version: "v1.0".to_string(),
        }
    }
}

/// Options for building and smoke-testing a candidate image.
#[derive(Clone)]
pub struct ImageBuildOptions {
    pub image_name: String,
    pub tag: String,
    pub context: PathBuf,
    pub expected_version: Option<String>,
    pub build_only: bool,
    pub chart: SmokeChart,
    pub report_path: PathBuf,
    runtime: Arc<dyn ContainerRuntime>,
}

/// What the build pipeline produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuildReport {
    pub image: String,
    pub smoke: Option<SmokeReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeReport {
    pub passed: i64,
    pub failed: i64,
    pub report_path: PathBuf,
}

impl ImageBuildOptions {
    pub fn new(
        image_name: impl Into<String>,
        tag: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            image_name: image_name.into(),
            tag: tag.into(),
            context: PathBuf::from("."),
            expected_version: None,
            build_only: false,
            chart: SmokeChart::default(),
            report_path: PathBuf::from("smoke-report.yaml"),
            runtime,
        }
    }

    pub fn with_context_dir(mut self, context: impl Into<PathBuf>) -> Self {
        self.context = context.into();
        self
    }

    /// Release version the built image must report.
    pub fn with_expected_version(mut self, version: impl Into<String>) -> Self {
        self.expected_version = Some(version.into());
        self
    }

    pub fn build_only(mut self) -> Self {
        self.build_only = true;
        self
    }

    pub fn with_chart(mut self, chart: SmokeChart) -> Self {
        self.chart = chart;
        self
    }

    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = path.into();
        self
    }

    /// Builds the image, then smoke-tests it unless build-only is set.
    pub fn run(&self) -> Result<ImageBuildReport> {
        let image = format!("{}:{}", self.image_name, self.tag);
        output::info(format!("building image {image}"));
        self.runtime.build(&self.context, &image)?;
        output::info(format!("image built: {image}"));
        if self.build_only {
            return Ok(ImageBuildReport { image, smoke: None });
        }
        let smoke = self.smoke_test(&image)?;
        Ok(ImageBuildReport {
            image,
            smoke: Some(smoke),
        })
    }

    // Verify the sample chart with the freshly built image, check the
    // version it reports, and compare the result counts.
    fn smoke_test(&self, image: &str) -> Result<SmokeReport> {
        let invocation = VerifierInvocation::image(
            self.image_name.clone(),
            self.tag.clone(),
            Arc::clone(&self.runtime),
        )
        .with_vendor_type(&self.chart.vendor_type)
        .with_profile_version(&self.chart.profile_version)
        .local_only();

        output::info(format!("verifying sample chart {}", self.chart.url));
        let report = invocation.verify(&ChartLocation::Remote(self.chart.url.clone()))?;
        let head = parse_report_head(&report)?;

        if let Some(expected) = &self.expected_version {
            if head.verifier_version != *expected {
                bail!(
                    "report carries verifier version {}, expected {expected}",
                    head.verifier_version
                );
            }
            let version_output =
                self.runtime
                    .run(image, &["version".to_string()], &RunOptions::default())?;
            let reported = version_output.trim();
            let reported = reported.strip_prefix('v').unwrap_or(reported);
            if reported != expected {
                bail!("version command reported {reported}, expected {expected}");
            }
        }

        fs::write(&self.report_path, &report).with_context(|| {
            format!("failed to write report to {}", self.report_path.display())
        })?;
        let info =
            invocation.report_info(&self.report_path, &head.vendor_type, &head.profile_version)?;
        let Some((passed, failed)) = info.result_counts() else {
            bail!("report info for {} carries no result counts", self.chart.url);
        };
        if passed != self.chart.expected_passed || failed != self.chart.expected_failed {
            output::error(format!(
                "expected {} passed and {} failed, got {passed} passed and {failed} failed",
                self.chart.expected_passed, self.chart.expected_failed
            ));
            bail!("chart results do not match for {}", self.chart.url);
        }
        output::pass(format!("chart result validated: {}", self.chart.url));
        Ok(SmokeReport {
            passed,
            failed,
            report_path: self.report_path.clone(),
        })
    }
}
