use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::output;
use crate::report_suite::{ReportCompareOptions, ReportComparison, ReportInfo};
use crate::verifier_suite::{ChartLocation, VerifierInvocation, parse_report_head};

/// Configuration for one golden-report certification scenario: verify one
/// chart, keep the raw report, and compare the derived report info against a
/// golden fixture.
#[derive(Clone)]
pub struct CertificationScenario {
    pub profile: String,
    pub chart: ChartLocation,
    pub expected_report: PathBuf,
    pub invocation: VerifierInvocation,
    pub results_dir: PathBuf,
    pub compare: ReportCompareOptions,
}

impl CertificationScenario {
    pub fn new(
        profile: impl Into<String>,
        chart: ChartLocation,
        expected_report: impl Into<PathBuf>,
        invocation: VerifierInvocation,
    ) -> Self {
        Self {
            profile: profile.into(),
            chart,
            expected_report: expected_report.into(),
            invocation,
            results_dir: PathBuf::from("test-reports"),
            compare: ReportCompareOptions::default(),
        }
    }

    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    pub fn with_compare_options(mut self, compare: ReportCompareOptions) -> Self {
        self.compare = compare;
        self
    }
}

/// Outcome of a scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    /// Where the raw report was saved for post-hoc inspection.
    pub report_path: PathBuf,
    pub chart_name: String,
    pub chart_version: String,
    /// Set when the report's vendor type is not the requested profile.
    pub profile_mismatch: Option<String>,
    pub comparison: ReportComparison,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.profile_mismatch.is_none() && self.comparison.passed()
    }
}

/// Runs one certification scenario end to end.
///
/// The raw report is written to the results directory before any comparison
/// happens, so a failing scenario still leaves the report behind for
/// inspection. A vendor-type mismatch is recorded and the scenario keeps
/// going.
pub fn run_scenario(scenario: &CertificationScenario) -> Result<ScenarioReport> {
    output::info(format!(
        "verifying chart {} against profile {}",
        scenario.chart, scenario.profile
    ));
    let raw = scenario.invocation.verify(&scenario.chart)?;
    let head = parse_report_head(&raw)?;

    let profile_mismatch = if head.vendor_type != scenario.profile {
        let mismatch = format!(
            "report vendor type {} does not match profile {}",
            head.vendor_type, scenario.profile
        );
        output::error(&mismatch);
        Some(mismatch)
    } else {
        None
    };

    fs::create_dir_all(&scenario.results_dir).with_context(|| {
        format!(
            "failed to create results directory {}",
            scenario.results_dir.display()
        )
    })?;
    let report_path = scenario.results_dir.join(format!(
        "{}-{}-{}-report.yaml",
        scenario.profile, head.chart_name, head.chart_version
    ));
    fs::write(&report_path, &raw)
        .with_context(|| format!("failed to write report to {}", report_path.display()))?;
    output::info(format!("report saved to {}", report_path.display()));

    let actual =
        scenario
            .invocation
            .report_info(&report_path, &head.vendor_type, &head.profile_version)?;
    let expected = ReportInfo::from_path(&scenario.expected_report)?;
    let comparison = scenario.compare.compare(&expected, &actual);
    for discrepancy in &comparison.discrepancies {
        output::error(discrepancy);
    }
    if comparison.passed() && profile_mismatch.is_none() {
        output::pass(format!(
            "report for chart {} matches the expected report",
            head.chart_name
        ));
    }

    Ok(ScenarioReport {
        report_path,
        chart_name: head.chart_name,
        chart_version: head.chart_version,
        profile_mismatch,
        comparison,
    })
}
