use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{BuildTarget, Overrides};

#[derive(Parser, Debug)]
#[command(name = "just-go-phishing")]
#[command(
    author,
    version,
    about = "Phishing infrastructure deployment made easy"
)]
pub struct Cli {
    /// Output in JSON format for automation
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to ./config.json, then the user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Show Docker progress output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Clean the Docker environment and local folders
    Clean(CleanArgs),

    /// Generate TLS certificates with lego and Let's Encrypt
    #[command(name = "generate-certs", visible_alias = "certs")]
    GenerateCerts(LabArgs),

    /// Build the gophish Docker image
    Build {
        /// Directory containing the gophish Dockerfile
        #[arg(long)]
        path: Option<PathBuf>,

        /// Tag for the built image
        #[arg(long)]
        tag: Option<String>,

        /// Dockerfile stage to build
        #[arg(long, value_enum)]
        target: Option<BuildTarget>,
    },

    /// Run the gophish container
    Run {
        #[command(flatten)]
        lab: LabArgs,

        /// Image to start
        #[arg(long)]
        tag: Option<String>,
    },
}

#[derive(Args, Debug, Default)]
pub struct CleanArgs {
    /// Prune stopped containers
    #[arg(long)]
    pub containers: bool,

    /// Prune unused images
    #[arg(long)]
    pub images: bool,

    /// Prune the builder cache
    #[arg(long)]
    pub build_cache: bool,

    /// Remove the certificate and assets folders
    #[arg(long)]
    pub local_folders: bool,

    /// Clean everything (the default when no other flag is given)
    #[arg(long)]
    pub all: bool,

    /// Prune every unused image, not only dangling ones
    #[arg(long)]
    pub include_tagged: bool,
}

/// Steps selected for `clean`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanPlan {
    pub containers: bool,
    pub images: bool,
    pub build_cache: bool,
    pub local_folders: bool,
}

impl CleanPlan {
    pub fn needs_docker(&self) -> bool {
        self.containers || self.images || self.build_cache
    }
}

impl CleanArgs {
    pub fn plan(&self) -> CleanPlan {
        let everything = self.all
            || !(self.containers || self.images || self.build_cache || self.local_folders);

        CleanPlan {
            containers: everything || self.containers,
            images: everything || self.images,
            build_cache: everything || self.build_cache,
            local_folders: everything || self.local_folders,
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct LabArgs {
    /// Domain the lab is served on
    #[arg(long)]
    pub domain: Option<String>,

    /// Contact address for Let's Encrypt and gophish
    #[arg(long)]
    pub email: Option<String>,
}

impl LabArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            domain: self.domain.clone(),
            email: self.email.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_without_flags_cleans_everything() {
        let cli = Cli::try_parse_from(["just-go-phishing", "clean"]).unwrap();
        let Commands::Clean(args) = cli.command else {
            panic!("expected clean");
        };
        let plan = args.plan();
        assert!(plan.containers && plan.images && plan.build_cache && plan.local_folders);
    }

    #[test]
    fn test_clean_local_folders_only() {
        let cli =
            Cli::try_parse_from(["just-go-phishing", "clean", "--local-folders"]).unwrap();
        let Commands::Clean(args) = cli.command else {
            panic!("expected clean");
        };
        let plan = args.plan();
        assert!(plan.local_folders);
        assert!(!plan.needs_docker());
    }

    #[test]
    fn test_build_target_values() {
        let cli = Cli::try_parse_from(["just-go-phishing", "build", "--target", "app"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Build {
                target: Some(BuildTarget::App),
                ..
            }
        ));
        assert!(
            Cli::try_parse_from(["just-go-phishing", "build", "--target", "release"]).is_err()
        );
    }

    #[test]
    fn test_certs_alias_and_global_flags() {
        let cli = Cli::try_parse_from([
            "just-go-phishing",
            "certs",
            "--domain",
            "x.org",
            "--json",
            "--config",
            "lab.json",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("lab.json")));
        let Commands::GenerateCerts(lab) = cli.command else {
            panic!("expected generate-certs");
        };
        assert_eq!(lab.overrides().domain.as_deref(), Some("x.org"));
        assert_eq!(lab.overrides().email, None);
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["just-go-phishing"]).is_err());
    }
}
