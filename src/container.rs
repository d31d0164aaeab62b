//! Seam over the container engine so suites can run against a fake in tests.

use std::path::{Path, PathBuf};
use std::process::Command;

/// Engine failure categories. Each renders with a `FAIL:` prefix because
/// scenario logs are grepped for those lines.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeFailure {
    #[error("FAIL: image build error: {0}")]
    Build(String),
    #[error("FAIL: container engine error: {0}")]
    Engine(String),
    #[error("FAIL: image not found: {0}")]
    ImageNotFound(String),
    #[error("FAIL: container run error: {0}")]
    Run(String),
}

/// Bind mount handed to `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host: PathBuf,
    pub container: String,
    options: Vec<String>,
}

impl VolumeMount {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            options: Vec::new(),
        }
    }

    pub fn read_only(mut self) -> Self {
        self.options.push("ro".to_string());
        self
    }

    /// SELinux relabel so rootless podman can read the mount.
    pub fn relabel(mut self) -> Self {
        self.options.push("z".to_string());
        self
    }

    /// The `-v` argument form, `host:container[:options]`.
    pub fn spec(&self) -> String {
        let mut spec = format!("{}:{}", self.host.display(), self.container);
        if !self.options.is_empty() {
            spec.push(':');
            spec.push_str(&self.options.join(","));
        }
        spec
    }
}

/// Per-run container settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub volumes: Vec<VolumeMount>,
    pub env: Vec<(String, String)>,
    pub remove: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            volumes: Vec::new(),
            env: Vec::new(),
            remove: true,
        }
    }
}

impl RunOptions {
    pub fn add_volume(mut self, volume: VolumeMount) -> Self {
        self.volumes.push(volume);
        self
    }

    pub fn add_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Adapter used to build images and run containers.
pub trait ContainerRuntime: Send + Sync {
    /// Builds an image from `context` and tags it.
    fn build(&self, context: &Path, tag: &str) -> Result<(), RuntimeFailure>;

    /// Runs a container to completion, capturing its stdout.
    fn run(&self, image: &str, args: &[String], options: &RunOptions)
    -> Result<String, RuntimeFailure>;
}

/// Engine adapter shelling out to `podman` or `docker`.
#[derive(Debug, Clone)]
pub struct CliRuntime {
    program: String,
}

impl CliRuntime {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn podman() -> Self {
        Self::new("podman")
    }

    pub fn docker() -> Self {
        Self::new("docker")
    }
}

// Phrases the engines emit when an image cannot be resolved.
fn missing_image(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("manifest unknown")
        || lower.contains("image not known")
        || lower.contains("unable to find image")
        || lower.contains("repository does not exist")
}

impl ContainerRuntime for CliRuntime {
    fn build(&self, context: &Path, tag: &str) -> Result<(), RuntimeFailure> {
        let run = Command::new(&self.program)
            .arg("build")
            .arg("-t")
            .arg(tag)
            .arg(context)
            .output()
            .map_err(|err| RuntimeFailure::Engine(format!("{} not runnable: {err}", self.program)))?;
        if !run.status.success() {
            let stderr = String::from_utf8_lossy(&run.stderr).trim().to_string();
            return Err(RuntimeFailure::Build(format!("{tag}: {stderr}")));
        }
        Ok(())
    }

    fn run(
        &self,
        image: &str,
        args: &[String],
        options: &RunOptions,
    ) -> Result<String, RuntimeFailure> {
        let mut command = Command::new(&self.program);
        command.arg("run");
        if options.remove {
            command.arg("--rm");
        }
        for volume in &options.volumes {
            command.arg("-v").arg(volume.spec());
        }
        for (key, value) in &options.env {
            command.arg("-e").arg(format!("{key}={value}"));
        }
        command.arg(image);
        command.args(args);
        tracing::debug!(image, ?args, "running container");
        let run = command
            .output()
            .map_err(|err| RuntimeFailure::Engine(format!("{} not runnable: {err}", self.program)))?;
        let stdout = String::from_utf8_lossy(&run.stdout).to_string();
        if !run.status.success() {
            let stderr = String::from_utf8_lossy(&run.stderr).trim().to_string();
            if missing_image(&stderr) {
                return Err(RuntimeFailure::ImageNotFound(format!("{image}: {stderr}")));
            }
            return Err(RuntimeFailure::Run(format!(
                "{image} {}: {stderr}",
                args.join(" ")
            )));
        }
        Ok(stdout)
    }
}
