mod common;

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;

use chart_verifier_ci::suites::certification::{CertificationScenario, run_scenario};
use chart_verifier_ci::{ChartLocation, ReleaseAssetOptions, VerifierInvocation};

use common::TempBinary;

/// Stand-in verifier answering the `verify` and `report` subcommands.
const VERIFIER_SOURCE: &str = r##"
use std::env;

const REPORT: &str = r#"apiversion: v1
kind: verify-report
metadata:
    tool:
        verifier-version: 1.13.0
        profile:
            VendorType: partner
            version: v1.1
    chart:
        name: psql-service
        version: 0.1.9
results:
    - check: v1.0/has-readme
      type: Mandatory
      outcome: PASS
      reason: Chart has a README
"#;

const INFO: &str = r#"{
  "annotations": [
    { "name": "charts.openshift.io/digest", "value": "sha256:7755e7" },
    { "name": "charts.openshift.io/lastCertifiedTimestamp", "value": "2026-08-23T10:00:00Z" }
  ],
  "digests": { "chart": "sha256:7755e7", "package": "a0d1dafe" },
  "metadata": { "vendorType": "partner", "profileVersion": "v1.1" },
  "results": { "passed": "10", "failed": "1", "message": ["Chart test files do not exist"] }
}"#;

fn main() {
    match env::args().nth(1).as_deref() {
        Some("verify") => print!("{REPORT}"),
        Some("report") => print!("{INFO}"),
        other => eprintln!("unsupported arguments: {other:?}"),
    }
}
"##;

fn matching_fixture(dir: &Path) -> PathBuf {
    let path = dir.join("expected-report-info.json");
    let doc = json!({
        "annotations": [
            { "name": "charts.openshift.io/lastCertifiedTimestamp", "value": "2026-08-20T08:00:00Z" },
            { "name": "charts.openshift.io/digest", "value": "sha256:7755e7" },
        ],
        "digests": { "chart": "sha256:7755e7", "package": "a0d1dafe" },
        "metadata": { "vendorType": "partner", "profileVersion": "v1.1" },
        "results": { "passed": 10, "failed": 1, "message": ["Chart test files do not exist"] },
    });
    fs::write(&path, doc.to_string()).expect("write expected report info");
    path
}

fn drifted_fixture(dir: &Path) -> PathBuf {
    let path = dir.join("expected-report-info.json");
    let doc = json!({
        "annotations": [
            { "name": "charts.openshift.io/digest", "value": "sha256:7755e7" },
            { "name": "charts.openshift.io/lastCertifiedTimestamp", "value": "2026-08-20T08:00:00Z" },
        ],
        "digests": { "chart": "sha256:7755e7", "package": "d1ffer" },
        "metadata": { "vendorType": "partner", "profileVersion": "v1.1" },
        "results": { "passed": 11, "failed": 0, "message": [] },
    });
    fs::write(&path, doc.to_string()).expect("write expected report info");
    path
}

fn scenario_in(dir: &TempDir, profile: &str, expected: PathBuf) -> CertificationScenario {
    let binary = TempBinary::new("mock-verifier", VERIFIER_SOURCE);
    let tarball = ReleaseAssetOptions::default()
        .with_binary(binary.path())
        .with_output_dir(dir.path())
        .create("1.13.0")
        .expect("package verifier tarball");
    let invocation = VerifierInvocation::tarball(tarball)
        .with_extract_dir(dir.path().join("extract"))
        .with_vendor_type(profile)
        .local_only();
    CertificationScenario::new(
        profile,
        ChartLocation::Remote("https://charts.example.test/chart-0.1.0-v3.valid.tgz".to_string()),
        expected,
        invocation,
    )
    .with_results_dir(dir.path().join("test-reports"))
}

#[test]
fn a_matching_report_passes_and_is_saved() {
    let dir = TempDir::new().expect("temp dir");
    let expected = matching_fixture(dir.path());

    let report = run_scenario(&scenario_in(&dir, "partner", expected)).expect("run scenario");

    assert!(report.passed());
    assert_eq!(report.chart_name, "psql-service");
    assert_eq!(report.chart_version, "0.1.9");
    assert!(
        report
            .report_path
            .ends_with("partner-psql-service-0.1.9-report.yaml")
    );
    let saved = fs::read_to_string(&report.report_path).expect("read saved report");
    assert!(saved.contains("verify-report"));
}

#[test]
fn report_drift_fails_the_scenario_but_keeps_the_report() {
    let dir = TempDir::new().expect("temp dir");
    let expected = drifted_fixture(dir.path());

    let report = run_scenario(&scenario_in(&dir, "partner", expected)).expect("run scenario");

    assert!(!report.passed());
    let sections: Vec<&str> = report
        .comparison
        .discrepancies
        .iter()
        .map(|discrepancy| discrepancy.section())
        .collect();
    assert!(sections.contains(&"results"));
    assert!(sections.contains(&"digests"));
    assert!(report.report_path.exists());
}

#[test]
fn a_profile_mismatch_is_recorded_and_fails() {
    let dir = TempDir::new().expect("temp dir");
    let expected = matching_fixture(dir.path());

    let report = run_scenario(&scenario_in(&dir, "redhat", expected)).expect("run scenario");

    assert!(!report.passed());
    let mismatch = report.profile_mismatch.expect("profile mismatch");
    assert!(mismatch.contains("partner"));
}
