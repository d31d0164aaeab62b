use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use chart_verifier_ci::container::{ContainerRuntime, RunOptions, RuntimeFailure};
use chart_verifier_ci::{
    ChartLocation, ImageBuildOptions, SmokeChart, VerifierInvocation,
};

const REPORT: &str = r#"apiversion: v1
kind: verify-report
metadata:
    tool:
        verifier-version: 1.13.0
        profile:
            VendorType: partner
            version: v1.0
    chart:
        name: chart
        version: 0.1.0
results:
    - check: v1.0/has-readme
      type: Mandatory
      outcome: PASS
      reason: Chart has a README
"#;

const INFO: &str = r#"{
  "annotations": [],
  "digests": { "chart": "sha256:7755e7" },
  "metadata": {},
  "results": { "passed": "10", "failed": "1", "message": ["Chart test files do not exist"] }
}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
struct RecordedRun {
    image: String,
    args: Vec<String>,
    mounts: Vec<String>,
    env: Vec<(String, String)>,
}

#[derive(Default)]
struct FakeEngine {
    fail_build: bool,
    version_output: Option<String>,
    built: Mutex<Vec<(PathBuf, String)>>,
    runs: Mutex<Vec<RecordedRun>>,
}

impl FakeEngine {
    fn runs(&self) -> Vec<RecordedRun> {
        self.runs.lock().unwrap().clone()
    }
}

impl ContainerRuntime for FakeEngine {
    fn build(&self, context: &Path, tag: &str) -> Result<(), RuntimeFailure> {
        if self.fail_build {
            return Err(RuntimeFailure::Build(format!("{tag}: no Dockerfile")));
        }
        self.built
            .lock()
            .unwrap()
            .push((context.to_path_buf(), tag.to_string()));
        Ok(())
    }

    fn run(
        &self,
        image: &str,
        args: &[String],
        options: &RunOptions,
    ) -> Result<String, RuntimeFailure> {
        self.runs.lock().unwrap().push(RecordedRun {
            image: image.to_string(),
            args: args.to_vec(),
            mounts: options.volumes.iter().map(|volume| volume.spec()).collect(),
            env: options.env.clone(),
        });
        match args.first().map(String::as_str) {
            Some("verify") => Ok(REPORT.to_string()),
            Some("report") => Ok(INFO.to_string()),
            Some("version") => Ok(self
                .version_output
                .clone()
                .unwrap_or_else(|| "v1.13.0\n".to_string())),
            _ => Err(RuntimeFailure::Run(format!("{image}: unsupported args"))),
        }
    }
}

fn options_with(engine: &Arc<FakeEngine>, dir: &TempDir) -> ImageBuildOptions {
    let runtime: Arc<dyn ContainerRuntime> = Arc::clone(engine) as Arc<dyn ContainerRuntime>;
    ImageBuildOptions::new("quay.io/acme/chart-verifier", "pr-1234", runtime)
        .with_context_dir(dir.path())
        .with_report_path(dir.path().join("smoke-report.yaml"))
}

#[test]
fn build_only_skips_the_smoke_test() {
    let engine = Arc::new(FakeEngine::default());
    let dir = TempDir::new().expect("temp dir");

    let report = options_with(&engine, &dir)
        .build_only()
        .run()
        .expect("build image");

    assert_eq!(report.image, "quay.io/acme/chart-verifier:pr-1234");
    assert!(report.smoke.is_none());
    assert!(engine.runs().is_empty());
    let built = engine.built.lock().unwrap().clone();
    assert_eq!(
        built,
        vec![(
            dir.path().to_path_buf(),
            "quay.io/acme/chart-verifier:pr-1234".to_string()
        )]
    );
}

#[test]
fn the_smoke_test_validates_chart_results() {
    let engine = Arc::new(FakeEngine::default());
    let dir = TempDir::new().expect("temp dir");

    let report = options_with(&engine, &dir)
        .with_expected_version("1.13.0")
        .run()
        .expect("build and smoke test");

    let smoke = report.smoke.expect("smoke report");
    assert_eq!(smoke.passed, 10);
    assert_eq!(smoke.failed, 1);
    assert!(smoke.report_path.exists());

    let runs = engine.runs();
    assert_eq!(runs.len(), 3);
    assert_eq!(runs[0].args[0], "verify");
    assert!(runs[0].args.contains(&"-l".to_string()));
    assert!(
        runs[0]
            .args
            .contains(&"profile.vendorType=partner,profile.version=v1.0".to_string())
    );
    assert_eq!(runs[1].args, vec!["version".to_string()]);
    assert_eq!(runs[2].args[0], "report");
}

#[test]
fn a_stale_version_in_the_report_fails_the_smoke_test() {
    let engine = Arc::new(FakeEngine::default());
    let dir = TempDir::new().expect("temp dir");

    let err = options_with(&engine, &dir)
        .with_expected_version("1.14.0")
        .run()
        .unwrap_err();

    assert!(err.to_string().contains("expected 1.14.0"));
}

#[test]
fn a_stale_version_command_fails_the_smoke_test() {
    let engine = Arc::new(FakeEngine {
        version_output: Some("v1.12.0\n".to_string()),
        ..Default::default()
    });
    let dir = TempDir::new().expect("temp dir");

    let err = options_with(&engine, &dir)
        .with_expected_version("1.13.0")
        .run()
        .unwrap_err();

    assert!(err.to_string().contains("version command reported 1.12.0"));
}

#[test]
fn unexpected_chart_results_fail_the_smoke_test() {
    let engine = Arc::new(FakeEngine::default());
    let dir = TempDir::new().expect("temp dir");

    let err = options_with(&engine, &dir)
        .with_chart(SmokeChart {
            expected_passed: 11,
            expected_failed: 0,
            ..Default::default()
        })
        .run()
        .unwrap_err();

    assert!(err.to_string().contains("chart results do not match"));
}

#[test]
fn a_failing_build_surfaces_the_engine_error() {
    let engine = Arc::new(FakeEngine {
        fail_build: true,
        ..Default::default()
    });
    let dir = TempDir::new().expect("temp dir");

    let err = options_with(&engine, &dir).run().unwrap_err();

    assert!(err.to_string().starts_with("FAIL: image build error"));
}

#[test]
fn local_charts_are_mounted_into_the_container() {
    let engine = Arc::new(FakeEngine::default());
    let dir = TempDir::new().expect("temp dir");
    let chart = dir.path().join("chart-0.1.0.tgz");
    fs::write(&chart, b"not a real chart").expect("write chart stand-in");
    let kubeconfig = dir.path().join("kubeconfig");
    fs::write(&kubeconfig, b"apiVersion: v1\n").expect("write kubeconfig stand-in");
    let runtime: Arc<dyn ContainerRuntime> = Arc::clone(&engine) as Arc<dyn ContainerRuntime>;

    VerifierInvocation::image("quay.io/acme/chart-verifier", "main", runtime)
        .with_kubeconfig(&kubeconfig)
        .verify(&ChartLocation::Local(chart))
        .expect("verify");

    let runs = engine.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].image, "quay.io/acme/chart-verifier:main");
    assert!(
        runs[0]
            .mounts
            .iter()
            .any(|spec| spec.ends_with(":/charts:z"))
    );
    assert!(
        runs[0]
            .mounts
            .iter()
            .any(|spec| spec.ends_with(":/kubeconfig:ro"))
    );
    assert!(
        runs[0]
            .env
            .contains(&("KUBECONFIG".to_string(), "/kubeconfig".to_string()))
    );
    assert!(runs[0].args.last().is_some_and(|arg| arg == "/charts/chart-0.1.0.tgz"));
}
