use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{JgpError, Result};

const CONFIG_FILE: &str = "config.json";
const DEFAULT_BUILD_PATH: &str = "docker";
const DEFAULT_LEGO_IMAGE: &str = "goacme/lego:latest";
const DEFAULT_LEGO_VOLUME: &str = "certificates";
const DEFAULT_GOPHISH_VOLUME: &str = "assets";
const FALLBACK_USER: &str = "local";

/// Stage of the gophish Dockerfile to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BuildTarget {
    /// Compiler stage
    Build,
    /// Runtime stage
    App,
}

impl BuildTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildTarget::Build => "build",
            BuildTarget::App => "app",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default)]
    pub run: RunSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSection {
    /// Directory holding the gophish Dockerfile
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub target: Option<BuildTarget>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSection {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Image the gophish container is started from
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub lego_image: Option<String>,
    /// Host directory lego writes certificates into
    #[serde(default)]
    pub lego_volume_path: Option<PathBuf>,
    /// Host directory gophish keeps its database in
    #[serde(default)]
    pub gophish_volume_path: Option<PathBuf>,
}

/// Values given on the command line, which win over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub domain: Option<String>,
    pub email: Option<String>,
    pub tag: Option<String>,
    pub path: Option<PathBuf>,
    pub target: Option<BuildTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CertSettings {
    pub domain: String,
    pub email: String,
    pub lego_image: String,
    pub cert_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildSettings {
    pub context: PathBuf,
    pub tag: String,
    pub target: Option<BuildTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub domain: String,
    pub email: String,
    pub tag: String,
    pub cert_dir: PathBuf,
    pub assets_dir: PathBuf,
}

impl Config {
    /// Load the configuration, returning it with the file it came from.
    ///
    /// An explicit path must exist. Otherwise `./config.json` and then the
    /// per-user config directory are tried, and defaults are used when
    /// neither is present.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
        }

        for candidate in default_locations() {
            if candidate.is_file() {
                return Ok((Self::from_file(&candidate)?, Some(candidate)));
            }
        }

        tracing::debug!("no configuration file found, using defaults");
        Ok((Self::default(), None))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| JgpError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&content).map_err(|e| JgpError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn parse(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn cert_settings(&self, overrides: &Overrides) -> Result<CertSettings> {
        Ok(CertSettings {
            domain: self.domain(overrides)?,
            email: self.email(overrides)?,
            lego_image: self
                .run
                .lego_image
                .clone()
                .unwrap_or_else(|| DEFAULT_LEGO_IMAGE.to_string()),
            cert_dir: self.cert_dir(),
        })
    }

    pub fn build_settings(&self, overrides: &Overrides) -> BuildSettings {
        let target = overrides.target.or(self.build.target);
        let tag = overrides
            .tag
            .clone()
            .or_else(|| self.build.tag.clone())
            .unwrap_or_else(|| {
                default_image_tag(&current_user(), target.unwrap_or(BuildTarget::App))
            });
        let context = overrides
            .path
            .clone()
            .or_else(|| self.build.path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_PATH));

        BuildSettings {
            context,
            tag,
            target,
        }
    }

    pub fn run_settings(&self, overrides: &Overrides) -> Result<RunSettings> {
        Ok(RunSettings {
            domain: self.domain(overrides)?,
            email: self.email(overrides)?,
            tag: overrides
                .tag
                .clone()
                .or_else(|| self.run.tag.clone())
                .unwrap_or_else(|| default_image_tag(&current_user(), BuildTarget::App)),
            cert_dir: self.cert_dir(),
            assets_dir: self.assets_dir(),
        })
    }

    /// Directories bind-mounted into the containers, in removal order
    pub fn local_folders(&self) -> Vec<PathBuf> {
        vec![self.cert_dir(), self.assets_dir()]
    }

    fn cert_dir(&self) -> PathBuf {
        self.run
            .lego_volume_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LEGO_VOLUME))
    }

    fn assets_dir(&self) -> PathBuf {
        self.run
            .gophish_volume_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_GOPHISH_VOLUME))
    }

    fn domain(&self, overrides: &Overrides) -> Result<String> {
        require(
            overrides.domain.as_ref().or(self.run.domain.as_ref()),
            "run.domain",
        )
    }

    fn email(&self, overrides: &Overrides) -> Result<String> {
        require(
            overrides.email.as_ref().or(self.run.email.as_ref()),
            "run.email",
        )
    }
}

fn require(value: Option<&String>, key: &'static str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(JgpError::MissingConfigKey(key)),
    }
}

fn default_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(CONFIG_FILE)];
    if let Some(dirs) = directories::ProjectDirs::from("", "", "just-go-phishing") {
        locations.push(dirs.config_dir().join(CONFIG_FILE));
    }
    locations
}

fn current_user() -> String {
    user_namespace(std::env::var("USER").ok().as_deref())
}

/// Image repositories must be lower-case
fn user_namespace(user: Option<&str>) -> String {
    match user.map(str::trim) {
        Some(u) if !u.is_empty() => u.to_lowercase(),
        _ => FALLBACK_USER.to_string(),
    }
}

fn default_image_tag(user: &str, target: BuildTarget) -> String {
    format!("{}/gophish-{}", user, target.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
{
  "build": { "path": "docker/", "tag": "alice/gophish", "target": "app" },
  "run": {
    "domain": "phish.example.com",
    "email": "admin@example.com",
    "tag": "alice/gophish",
    "lego_volume_path": "certs",
    "gophish_volume_path": "data"
  }
}
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(FULL).unwrap();
        assert_eq!(config.build.path, Some(PathBuf::from("docker/")));
        assert_eq!(config.build.target, Some(BuildTarget::App));
        assert_eq!(config.run.domain.as_deref(), Some("phish.example.com"));
        assert_eq!(
            config.local_folders(),
            vec![PathBuf::from("certs"), PathBuf::from("data")]
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("{}").unwrap();
        let build = config.build_settings(&Overrides::default());
        assert_eq!(build.context, PathBuf::from("docker"));
        assert_eq!(build.target, None);
        assert!(build.tag.ends_with("/gophish-app"));
        assert_eq!(
            config.local_folders(),
            vec![PathBuf::from("certificates"), PathBuf::from("assets")]
        );
    }

    #[test]
    fn test_missing_domain_is_reported() {
        let config = Config::parse(r#"{ "run": { "email": "a@b.c" } }"#).unwrap();
        let err = config.run_settings(&Overrides::default()).unwrap_err();
        assert!(matches!(err, JgpError::MissingConfigKey("run.domain")));
        assert_eq!(err.to_string(), "missing configuration key: run.domain");
    }

    #[test]
    fn test_blank_email_is_missing() {
        let config =
            Config::parse(r#"{ "run": { "domain": "x.org", "email": "  " } }"#).unwrap();
        let err = config.cert_settings(&Overrides::default()).unwrap_err();
        assert!(matches!(err, JgpError::MissingConfigKey("run.email")));
    }

    #[test]
    fn test_overrides_win_over_file() {
        let config = Config::parse(FULL).unwrap();
        let overrides = Overrides {
            domain: Some("other.org".to_string()),
            tag: Some("bob/gophish".to_string()),
            ..Default::default()
        };
        let run = config.run_settings(&overrides).unwrap();
        assert_eq!(run.domain, "other.org");
        assert_eq!(run.email, "admin@example.com");
        assert_eq!(run.tag, "bob/gophish");
        assert_eq!(run.cert_dir, PathBuf::from("certs"));
        assert_eq!(run.assets_dir, PathBuf::from("data"));
    }

    #[test]
    fn test_cert_settings_default_image() {
        let config =
            Config::parse(r#"{ "run": { "domain": "x.org", "email": "a@x.org" } }"#).unwrap();
        let certs = config.cert_settings(&Overrides::default()).unwrap();
        assert_eq!(certs.lego_image, "goacme/lego:latest");
        assert_eq!(certs.cert_dir, PathBuf::from("certificates"));
    }

    #[test]
    fn test_invalid_target_rejected() {
        assert!(Config::parse(r#"{ "build": { "target": "release" } }"#).is_err());
    }

    #[test]
    fn test_user_namespace() {
        assert_eq!(user_namespace(Some("Alice")), "alice");
        assert_eq!(user_namespace(Some("")), "local");
        assert_eq!(user_namespace(None), "local");
        assert_eq!(
            default_image_tag("alice", BuildTarget::Build),
            "alice/gophish-build"
        );
    }

    #[test]
    fn test_from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, JgpError::ConfigParse { .. }));
        assert!(err.to_string().contains("config.json"));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        let err = Config::load(Some(missing.as_path())).unwrap_err();
        assert!(matches!(err, JgpError::ConfigRead { .. }));
    }
}
