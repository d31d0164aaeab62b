use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use chart_verifier_ci::container::CliRuntime;
use chart_verifier_ci::env::ActionsContext;
use chart_verifier_ci::github::{PullRequestClient, ReleaseClient};
use chart_verifier_ci::output::{self, JobOutputs};
use chart_verifier_ci::retry::RetryPolicy;
use chart_verifier_ci::suites::certification::{CertificationScenario, run_scenario};
use chart_verifier_ci::{
    AssetEntry, ChartLocation, DEFAULT_IMAGE, DEFAULT_IMAGE_TAG, DEFAULT_LINK_TAG,
    DEFAULT_VERSION_FILE, GateOutcome, ImageBuildOptions, OwnersGateOptions, ReleaseAssetOptions,
    ReleaseCheckOptions, TagRegistryOptions, VerifierInvocation, VersionInfo,
};

#[derive(Parser)]
#[command(
    name = "chart-verifier-ci",
    version,
    about = "Release automation for the chart verifier"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Point the link tag at the image published for a release version.
    LinkImages {
        /// Release version tag to resolve; read from the version file when omitted.
        #[arg(long)]
        verifier_version: Option<String>,
        /// Tag to repoint at the release image.
        #[arg(long, default_value = DEFAULT_LINK_TAG)]
        link_tag: String,
        /// Version file consulted when no version is given.
        #[arg(long, default_value = DEFAULT_VERSION_FILE)]
        version_file: PathBuf,
    },
    /// Gate a pull request on the file-ownership rules.
    CheckOwners {
        /// Pull request API URL.
        #[arg(long)]
        api_url: String,
        /// User who submitted the pull request.
        #[arg(long)]
        user: String,
        /// Additional restricted path prefixes.
        #[arg(long = "restrict")]
        restricted: Vec<String>,
        /// Approvers document to check the user against.
        #[arg(long)]
        owners_file: Option<PathBuf>,
    },
    /// Inspect a pull request for release content, or decide whether a
    /// proposed version warrants a release.
    CheckRelease {
        /// Pull request API URL; triggers release-content inspection.
        #[arg(long)]
        api_url: Option<String>,
        /// Proposed release version; triggers the update decision.
        #[arg(long)]
        version: Option<String>,
        /// Version file driving the release.
        #[arg(long, default_value = DEFAULT_VERSION_FILE)]
        version_file: String,
        /// Built verifier binary packaged into the release asset.
        #[arg(long, default_value = chart_verifier_ci::DEFAULT_BINARY_PATH)]
        binary: PathBuf,
    },
    /// Package the release tarball.
    PackageAsset {
        /// Release version the asset is named after.
        #[arg(long)]
        release: String,
        /// Built verifier binary to package.
        #[arg(long, default_value = chart_verifier_ci::DEFAULT_BINARY_PATH)]
        binary: PathBuf,
        /// Optional configuration directory included alongside the binary.
        #[arg(long)]
        config_dir: Option<PathBuf>,
        /// Where the tarball is written.
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Build the candidate image and smoke-test it.
    BuildAndTest {
        /// Image name without tag.
        #[arg(long)]
        image_name: String,
        /// Commit sha used as the image tag.
        #[arg(long)]
        sha: String,
        /// Release version the built image must report.
        #[arg(long)]
        verifier_version: Option<String>,
        /// Stop after the image build.
        #[arg(long)]
        build_only: bool,
        /// Build context directory.
        #[arg(long, default_value = ".")]
        context: PathBuf,
        /// Container engine to run with.
        #[arg(long, value_enum, default_value_t = Engine::Podman)]
        engine: Engine,
    },
    /// Wait for a pull request to be merged by automation.
    WaitForMerge {
        /// Pull request API URL.
        #[arg(long)]
        api_url: String,
    },
    /// Run one certification scenario against a golden report.
    Certify {
        /// Certification profile the chart is verified against.
        #[arg(long)]
        profile: String,
        /// Chart to verify; a local path or an http(s) URL.
        #[arg(long)]
        chart: String,
        /// Golden report-info fixture to compare against.
        #[arg(long)]
        expected: PathBuf,
        /// Release tarball to run the verifier from, instead of an image.
        #[arg(long)]
        tarball: Option<PathBuf>,
        /// Verifier image name.
        #[arg(long, default_value = DEFAULT_IMAGE)]
        image: String,
        /// Verifier image tag.
        #[arg(long, default_value = DEFAULT_IMAGE_TAG)]
        image_tag: String,
        /// Container engine to run with.
        #[arg(long, value_enum, default_value_t = Engine::Podman)]
        engine: Engine,
        /// Kubeconfig for cluster-backed checks; falls back to KUBECONFIG.
        #[arg(long)]
        kubeconfig: Option<PathBuf>,
        /// Where raw reports are kept for inspection.
        #[arg(long, default_value = "test-reports")]
        results_dir: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Engine {
    Podman,
    Docker,
}

impl Engine {
    fn runtime(self) -> CliRuntime {
        match self {
            Engine::Podman => CliRuntime::podman(),
            Engine::Docker => CliRuntime::docker(),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(err) = run(cli.command) {
        output::error(format!("{err:#}"));
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::LinkImages {
            verifier_version,
            link_tag,
            version_file,
        } => link_images(verifier_version, &link_tag, &version_file),
        Commands::CheckOwners {
            api_url,
            user,
            restricted,
            owners_file,
        } => check_owners(&api_url, &user, restricted, owners_file),
        Commands::CheckRelease {
            api_url,
            version,
            version_file,
            binary,
        } => check_release(api_url, version, version_file, binary),
        Commands::PackageAsset {
            release,
            binary,
            config_dir,
            output_dir,
        } => package_asset(&release, binary, config_dir, output_dir),
        Commands::BuildAndTest {
            image_name,
            sha,
            verifier_version,
            build_only,
            context,
            engine,
        } => build_and_test(image_name, sha, verifier_version, build_only, context, engine),
        Commands::WaitForMerge { api_url } => wait_for_merge(&api_url),
        Commands::Certify {
            profile,
            chart,
            expected,
            tarball,
            image,
            image_tag,
            engine,
            kubeconfig,
            results_dir,
        } => certify(
            profile,
            &chart,
            expected,
            tarball,
            image,
            image_tag,
            engine,
            kubeconfig,
            results_dir,
        ),
    }
}

fn link_images(
    verifier_version: Option<String>,
    link_tag: &str,
    version_file: &std::path::Path,
) -> Result<()> {
    let new_tag = match verifier_version {
        Some(version) => version,
        None => VersionInfo::load(version_file)?.version,
    };
    let registry = TagRegistryOptions::from_env().build()?;
    registry.ensure_linked(&new_tag, link_tag)?;
    Ok(())
}

fn check_owners(
    api_url: &str,
    user: &str,
    restricted: Vec<String>,
    owners_file: Option<PathBuf>,
) -> Result<()> {
    let pull_request = PullRequestClient::new(api_url)?;
    let mut options = OwnersGateOptions::default();
    for prefix in restricted {
        options = options.restrict(prefix);
    }
    if let Some(path) = owners_file {
        options = options.with_owners_file(path);
    }
    match options.gate(&pull_request, user)? {
        GateOutcome::Denied { file } => bail!("{user} may not modify {file}"),
        GateOutcome::NoRestrictedFiles | GateOutcome::Authorized { .. } => Ok(()),
    }
}

fn check_release(
    api_url: Option<String>,
    version: Option<String>,
    version_file: String,
    binary: PathBuf,
) -> Result<()> {
    let outputs = JobOutputs::from_env();
    let options = ReleaseCheckOptions::default()
        .with_version_file(version_file)
        .with_asset(ReleaseAssetOptions::default().with_binary(binary));

    if let Some(api_url) = api_url {
        let pull_request = PullRequestClient::new(api_url)?;
        let check = options.inspect_pull_request(&pull_request)?;
        let tarball_name = check
            .tarball
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .context("tarball path has no file name")?;
        outputs.set("PR_tarball_name", tarball_name)?;
        if let Some(release) = check.release {
            outputs.set("PR_version", &release.version)?;
            outputs.set("PR_release_image", &release.image)?;
            outputs.set("PR_release_info", serde_json::to_string(&release.info)?)?;
            outputs.set("PR_includes_release", "true")?;
            outputs.set("PR_release_body", &release.body)?;
        }
        return Ok(());
    }

    if let Some(version) = version {
        let releases = ReleaseClient::from_context(&ActionsContext::detect())?;
        let updated = options.update_available(&version, &releases)?;
        outputs.set("updated", updated)?;
        return Ok(());
    }

    let info = options.load_version_info()?;
    outputs.set("PR_version", &info.version)?;
    outputs.set("PR_release_image", &info.quay_image)?;
    Ok(())
}

fn package_asset(
    release: &str,
    binary: PathBuf,
    config_dir: Option<PathBuf>,
    output_dir: PathBuf,
) -> Result<()> {
    let outputs = JobOutputs::from_env();
    let mut asset = ReleaseAssetOptions::default()
        .with_binary(binary)
        .with_output_dir(output_dir);
    if let Some(dir) = config_dir {
        let archive_name = dir
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .context("config directory has no name")?;
        asset = asset.add_entry(AssetEntry::new(dir, archive_name));
    }
    let tarball = asset.create(release)?;
    outputs.set("tarball_base_name", ReleaseAssetOptions::asset_name(release))?;
    outputs.set("tarball_full_name", tarball.display())?;
    Ok(())
}

fn build_and_test(
    image_name: String,
    sha: String,
    verifier_version: Option<String>,
    build_only: bool,
    context: PathBuf,
    engine: Engine,
) -> Result<()> {
    let outputs = JobOutputs::from_env();
    // Flipped to success only once the whole run completes.
    outputs.set("result", "failure")?;
    let mut options = ImageBuildOptions::new(image_name, sha.clone(), Arc::new(engine.runtime()))
        .with_context_dir(context);
    if let Some(version) = verifier_version {
        options = options.with_expected_version(version);
    }
    if build_only {
        options = options.build_only();
    }
    let report = options.run()?;
    outputs.set("verifier-image-tag", &sha)?;
    outputs.set("result", "success")?;
    output::info(format!("image {} ready", report.image));
    Ok(())
}

fn wait_for_merge(api_url: &str) -> Result<()> {
    let pull_request = PullRequestClient::new(api_url)?;
    pull_request.wait_until_merged(&RetryPolicy::merge_poll())
}

#[allow(clippy::too_many_arguments)]
fn certify(
    profile: String,
    chart: &str,
    expected: PathBuf,
    tarball: Option<PathBuf>,
    image: String,
    image_tag: String,
    engine: Engine,
    kubeconfig: Option<PathBuf>,
    results_dir: PathBuf,
) -> Result<()> {
    let mut invocation = match tarball {
        Some(path) => VerifierInvocation::tarball(path),
        None => VerifierInvocation::image(image, image_tag, Arc::new(engine.runtime())),
    };
    invocation = invocation.with_vendor_type(&profile);
    if let Some(path) = kubeconfig {
        invocation = invocation.with_kubeconfig(path);
    }
    let scenario = CertificationScenario::new(
        profile,
        ChartLocation::parse(chart),
        expected,
        invocation,
    )
    .with_results_dir(results_dir);
    let report = run_scenario(&scenario)?;
    if !report.passed() {
        bail!(
            "differences found between expected and actual reports for chart {}",
            report.chart_name
        );
    }
    Ok(())
}
