use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum JgpError {
    #[error("Docker is not available: {0}")]
    DockerUnavailable(#[source] bollard::errors::Error),

    #[error("Docker daemon is not running: {0}")]
    DaemonNotRunning(#[source] bollard::errors::Error),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Failed to read configuration file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("missing configuration key: {0}")]
    MissingConfigKey(&'static str),

    #[error("build context not found: {0}")]
    BuildContextNotFound(PathBuf),

    #[error("no Dockerfile in {0}")]
    DockerfileMissing(PathBuf),

    #[error("failed to build image {image}: {message}")]
    ImageBuild { image: String, message: String },

    #[error("image {0} not found; run `build`")]
    ImageNotFound(String),

    #[error("lego exited with status {code}{}", log_tail(.logs))]
    LegoFailed { code: i64, logs: Vec<String> },

    #[error("`{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("Permission denied removing {path} (files created by a container are usually root-owned)")]
    RemovePermission { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, JgpError>;

fn log_tail(logs: &[String]) -> String {
    if logs.is_empty() {
        String::new()
    } else {
        format!(":\n{}", logs.join("\n"))
    }
}

