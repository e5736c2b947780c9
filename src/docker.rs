use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, PruneContainersOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::{BuildImageOptions, CreateImageOptions, PruneImagesOptions};
use bollard::models::{
    ContainerWaitResponse, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum,
};
use flate2::Compression;
use flate2::write::GzEncoder;
use futures::StreamExt;
use serde::Serialize;
use tar::Builder;

use crate::config::BuildTarget;
use crate::error::{JgpError, Result};
use crate::output::Output;

const DOCKERFILE: &str = "Dockerfile";
const DOCKERIGNORE: &str = ".dockerignore";

/// A bind mount of a host directory into a container
#[derive(Debug, Clone, PartialEq)]
pub struct Bind {
    pub host: PathBuf,
    pub container: String,
}

impl Bind {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
        }
    }

    fn to_docker(&self) -> String {
        format!("{}:{}:rw", self.host.display(), self.container)
    }
}

/// Container TCP port published on the same or another host port
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PortMap {
    pub container: u16,
    pub host: u16,
}

/// Everything needed to create one of the lab containers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<(String, String)>,
    pub binds: Vec<Bind>,
    pub ports: Vec<PortMap>,
    /// Restart on non-zero exit at most this many times
    pub restart_on_failure: Option<i64>,
}

impl ContainerSpec {
    pub fn to_config(&self) -> Config<String> {
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();

        for port in &self.ports {
            let key = format!("{}/tcp", port.container);
            port_bindings.insert(
                key.clone(),
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(port.host.to_string()),
                }]),
            );
            exposed_ports.insert(key, HashMap::new());
        }

        let restart_policy = self.restart_on_failure.map(|retries| RestartPolicy {
            name: Some(RestartPolicyNameEnum::ON_FAILURE),
            maximum_retry_count: Some(retries),
        });

        let host_config = HostConfig {
            binds: Some(self.binds.iter().map(Bind::to_docker).collect()),
            port_bindings: Some(port_bindings),
            restart_policy,
            ..Default::default()
        };

        Config {
            image: Some(self.image.clone()),
            cmd: if self.cmd.is_empty() {
                None
            } else {
                Some(self.cmd.clone())
            },
            env: if self.env.is_empty() {
                None
            } else {
                Some(
                    self.env
                        .iter()
                        .map(|(k, v)| format!("{}={}", k, v))
                        .collect(),
                )
            },
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

/// Objects removed by one prune call
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PruneSummary {
    pub removed: usize,
    pub space_reclaimed: u64,
}

/// Result of running a container until it exits
#[derive(Debug)]
pub struct Completed {
    pub exit_code: i64,
    pub logs: Vec<String>,
}

pub struct DockerManager {
    docker: Docker,
}

impl DockerManager {
    /// Connect to the local daemon and make sure it answers
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(JgpError::DockerUnavailable)?;

        // Constructing the client does not touch the socket; ping does
        docker.ping().await.map_err(JgpError::DaemonNotRunning)?;

        // Version is informational only
        if let Ok(version) = docker.version().await {
            tracing::debug!(
                version = version.version.as_deref().unwrap_or("unknown"),
                api = version.api_version.as_deref().unwrap_or("unknown"),
                "connected to Docker Engine"
            );
        }

        Ok(Self { docker })
    }

    // ==================== Images ====================

    pub async fn pull_image(&self, image: &str, output: &Output) -> Result<()> {
        output.info(&format!("Pulling {} image...", image));

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        // Drain the pull progress; layers report one status line each
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        output.debug(&status);
                    }
                }
                Err(e) => return Err(JgpError::Docker(e)),
            }
        }

        tracing::debug!(image, "image pulled");
        output.success(&format!("Image pulled: {}", image));
        Ok(())
    }

    pub async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(JgpError::Docker(e)),
        }
    }

    /// Build an image from a local directory containing a Dockerfile
    pub async fn build_image(
        &self,
        context: &Path,
        tag: &str,
        target: Option<BuildTarget>,
        output: &Output,
    ) -> Result<()> {
        // Validate the context before packing it
        if !context.is_dir() {
            return Err(JgpError::BuildContextNotFound(context.to_path_buf()));
        }
        if !context.join(DOCKERFILE).is_file() {
            return Err(JgpError::DockerfileMissing(context.to_path_buf()));
        }

        match target {
            Some(t) => output.info(&format!(
                "Building Docker image with Dockerfile {} and target {}...",
                context.display(),
                t.as_str()
            )),
            None => output.info(&format!(
                "Building Docker image with Dockerfile {}...",
                context.display()
            )),
        }

        let tar_bytes = create_context_tarball(context)?;

        // An empty target builds the whole Dockerfile
        let options = BuildImageOptions {
            dockerfile: DOCKERFILE,
            t: tag,
            target: target.map(BuildTarget::as_str).unwrap_or(""),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(tar_bytes.into()));

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(stream_text) = info.stream {
                        let text = stream_text.trim();
                        if !text.is_empty() {
                            output.debug(text);
                        }
                    }
                    // Build failures arrive in-stream, not as an HTTP error
                    if let Some(error) = info.error {
                        return Err(JgpError::ImageBuild {
                            image: tag.to_string(),
                            message: error,
                        });
                    }
                }
                Err(e) => return Err(JgpError::Docker(e)),
            }
        }

        tracing::debug!(image = tag, "image built");
        output.success(&format!("Successfully built image: {}", tag));
        Ok(())
    }

    pub async fn prune_images(&self, dangling_only: bool) -> Result<PruneSummary> {
        let options = PruneImagesOptions {
            filters: image_prune_filters(dangling_only),
        };

        let response = self.docker.prune_images(Some(options)).await?;

        Ok(PruneSummary {
            removed: response.images_deleted.map(|v| v.len()).unwrap_or(0),
            space_reclaimed: response.space_reclaimed.unwrap_or(0).max(0) as u64,
        })
    }

    /// Prune the builder cache through the docker CLI; bollard has no
    /// binding for `/build/prune`.
    pub async fn prune_build_cache(&self, output: &Output) -> Result<Option<String>> {
        let command = "docker builder prune --all --force";

        let result = tokio::process::Command::new("docker")
            .args(["builder", "prune", "--all", "--force"])
            .output()
            .await
            .map_err(|e| JgpError::Command {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        // Deleted cache ids, then the total
        let stdout = String::from_utf8_lossy(&result.stdout);
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            output.debug(line);
        }

        if !result.status.success() {
            return Err(JgpError::Command {
                command: command.to_string(),
                message: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        Ok(reclaimed_space(&stdout))
    }

    // ==================== Containers ====================

    pub async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, spec.to_config())
            .await?;

        for warning in &response.warnings {
            tracing::warn!(image = %spec.image, "{}", warning);
        }

        Ok(response.id)
    }

    pub async fn start_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    /// Block until the container stops and return its exit code
    pub async fn wait_container(&self, container_id: &str) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(container_id, Some(options));
        let mut exit_code = 0;

        while let Some(result) = stream.next().await {
            exit_code = exit_code_from(result)?;
        }

        Ok(exit_code)
    }

    pub async fn container_logs(&self, container_id: &str) -> Result<Vec<String>> {
        let options = LogsOptions::<String> {
            follow: false,
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(container_id, Some(options));
        let mut lines = Vec::new();

        while let Some(result) = stream.next().await {
            let text = match result? {
                LogOutput::StdOut { message } | LogOutput::StdErr { message } => {
                    String::from_utf8_lossy(&message).to_string()
                }
                _ => continue,
            };
            lines.extend(
                text.lines()
                    .map(str::trim_end)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string),
            );
        }

        Ok(lines)
    }

    pub async fn remove_container(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(container_id, Some(options))
            .await?;
        Ok(())
    }

    /// Create and start a long-running container.
    ///
    /// A container that fails to start is removed again so retries do not
    /// pile up stopped containers.
    pub async fn run_detached(&self, spec: &ContainerSpec) -> Result<String> {
        let container_id = self.create_container(spec).await?;
        tracing::debug!(container_id = %short_id(&container_id), image = %spec.image, "container created");

        // Remove it again if the daemon refuses to start it
        let started = self.start_container(&container_id).await;
        discard_on_failure(started, || self.remove_container(&container_id)).await?;

        Ok(container_id)
    }

    /// Create, start and wait for a one-shot container, then remove it.
    ///
    /// The container is removed even when waiting or log collection fails.
    pub async fn run_to_completion(&self, spec: &ContainerSpec) -> Result<Completed> {
        let container_id = self.create_container(spec).await?;
        tracing::debug!(container_id = %short_id(&container_id), image = %spec.image, "container created");

        let outcome = async {
            self.start_container(&container_id).await?;
            let exit_code = self.wait_container(&container_id).await?;
            let logs = self.container_logs(&container_id).await?;
            Ok::<_, JgpError>(Completed { exit_code, logs })
        }
        .await;

        // Always remove, whatever happened above
        if let Err(e) = self.remove_container(&container_id).await {
            tracing::warn!(container_id = %short_id(&container_id), error = %e, "failed to remove container");
        }

        outcome
    }

    pub async fn prune_containers(&self) -> Result<PruneSummary> {
        let response = self
            .docker
            .prune_containers(None::<PruneContainersOptions<String>>)
            .await?;

        Ok(PruneSummary {
            removed: response.containers_deleted.map(|v| v.len()).unwrap_or(0),
            space_reclaimed: response.space_reclaimed.unwrap_or(0).max(0) as u64,
        })
    }
}

pub fn short_id(id: &str) -> &str {
    &id[..12.min(id.len())]
}

fn image_prune_filters(dangling_only: bool) -> HashMap<&'static str, Vec<&'static str>> {
    let dangling = if dangling_only { "true" } else { "false" };
    HashMap::from([("dangling", vec![dangling])])
}

/// Fold one item of the wait stream into an exit code. The daemon reports a
/// non-zero exit as an error item, which still carries the code.
fn exit_code_from(
    result: std::result::Result<ContainerWaitResponse, bollard::errors::Error>,
) -> Result<i64> {
    match result {
        Ok(response) => Ok(response.status_code),
        Err(bollard::errors::Error::DockerContainerWaitError { code, .. }) => Ok(code),
        Err(e) => Err(JgpError::Docker(e)),
    }
}

/// Run `cleanup` when `outcome` is an error, then hand back the original
/// error. Cleanup failures are only logged.
async fn discard_on_failure<T, C, F>(outcome: Result<T>, cleanup: C) -> Result<T>
where
    C: FnOnce() -> F,
    F: Future<Output = Result<()>>,
{
    if outcome.is_err()
        && let Err(e) = cleanup().await
    {
        tracing::warn!(error = %e, "cleanup after failure did not succeed");
    }
    outcome
}

/// Pack a directory into a gzip'd tarball usable as a build context,
/// leaving out whatever `.dockerignore` lists
fn create_context_tarball(dir: &Path) -> Result<Vec<u8>> {
    let rules = IgnoreRules::load(dir)?;

    let mut buf = Vec::new();
    {
        let encoder = GzEncoder::new(&mut buf, Compression::default());
        let mut tar = Builder::new(encoder);

        let walker = walkdir::WalkDir::new(dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.path()
                    .strip_prefix(dir)
                    .map(|rel| !rules.is_ignored(rel))
                    .unwrap_or(true)
            });

        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            let rel = entry
                .path()
                .strip_prefix(dir)
                .map_err(|e| std::io::Error::other(e.to_string()))?;

            if entry.file_type().is_dir() {
                tar.append_dir(rel, entry.path())?;
            } else {
                tar.append_path_with_name(entry.path(), rel)?;
            }
        }

        tar.into_inner()?.finish()?;
    }
    Ok(buf)
}

/// The subset of `.dockerignore` the build needs: paths, directory
/// prefixes, `*`/`?` inside a component and `**` across components.
/// Negated (`!`) lines are not supported and are skipped.
#[derive(Debug, Default)]
struct IgnoreRules {
    patterns: Vec<Vec<String>>,
}

impl IgnoreRules {
    fn load(dir: &Path) -> Result<Self> {
        match std::fs::read_to_string(dir.join(DOCKERIGNORE)) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(JgpError::Io(e)),
        }
    }

    fn parse(content: &str) -> Self {
        let mut patterns = Vec::new();

        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('!') {
                tracing::debug!(
                    pattern = line,
                    "negated .dockerignore patterns are not supported"
                );
                continue;
            }

            let components: Vec<String> = line
                .split('/')
                .filter(|c| !c.is_empty() && *c != ".")
                .map(str::to_string)
                .collect();
            if !components.is_empty() {
                patterns.push(components);
            }
        }

        Self { patterns }
    }

    fn is_ignored(&self, rel: &Path) -> bool {
        // The daemon needs both even when they are listed
        if rel == Path::new(DOCKERFILE) || rel == Path::new(DOCKERIGNORE) {
            return false;
        }

        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let parts: Vec<&str> = parts.iter().map(String::as_str).collect();

        self.patterns.iter().any(|p| matches_components(p, &parts))
    }
}

/// A pattern matching a leading run of components ignores everything below it
fn matches_components(pattern: &[String], parts: &[&str]) -> bool {
    match pattern.split_first() {
        None => true,
        Some((head, rest)) if head.as_str() == "**" => {
            (0..=parts.len()).any(|skip| matches_components(rest, &parts[skip..]))
        }
        Some((head, rest)) => match parts.split_first() {
            Some((part, tail)) => {
                wildcard(head.as_bytes(), part.as_bytes()) && matches_components(rest, tail)
            }
            None => false,
        },
    }
}

fn wildcard(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| wildcard(rest, &text[skip..])),
        Some((b'?', rest)) => !text.is_empty() && wildcard(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && wildcard(rest, &text[1..]),
    }
}

/// Pick the "Total reclaimed space" line out of `docker builder prune`
fn reclaimed_space(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find_map(|l| {
            l.strip_prefix("Total:")
                .or_else(|| l.strip_prefix("Total reclaimed space:"))
        })
        .map(|s| s.trim().to_string())
}
