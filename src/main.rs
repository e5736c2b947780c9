mod cli;
mod config;
mod docker;
mod error;
mod gophish;
mod lego;
mod output;
mod workspace;

use clap::Parser;

use cli::{CleanArgs, Cli, Commands, LabArgs};
use config::{Config, Overrides};
use docker::{DockerManager, short_id};
use error::{JgpError, Result};
use output::{CleanReport, Output};
use workspace::Removal;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output = Output::new(cli.json);

    if let Err(e) = run(cli, &output).await {
        output.error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(cli: Cli, output: &Output) -> Result<()> {
    let (config, source) = Config::load(cli.config.as_deref())?;
    if let Some(path) = source {
        tracing::debug!(path = %path.display(), "loaded configuration");
    }

    match cli.command {
        Commands::Clean(args) => cmd_clean(&args, &config, output).await,
        Commands::GenerateCerts(lab) => cmd_generate_certs(&lab, &config, output).await,
        Commands::Build { path, tag, target } => {
            let overrides = Overrides {
                path,
                tag,
                target,
                ..Default::default()
            };
            cmd_build(&overrides, &config, output).await
        }
        Commands::Run { lab, tag } => {
            let overrides = Overrides {
                tag,
                ..lab.overrides()
            };
            cmd_run(&overrides, &config, output).await
        }
    }
}

async fn cmd_clean(args: &CleanArgs, config: &Config, output: &Output) -> Result<()> {
    let plan = args.plan();
    let mut report = CleanReport::default();

    output.info("Starting cleaning environment...");

    // Only the folder removal works without a daemon
    if plan.needs_docker() {
        let docker = DockerManager::connect().await?;

        if plan.containers {
            let summary = docker.prune_containers().await?;
            output.success(&format!(
                "Successfully cleaned unused Docker containers ({} removed).",
                summary.removed
            ));
            report.containers = Some(summary);
        }

        if plan.images {
            let summary = docker.prune_images(!args.include_tagged).await?;
            output.success(&format!(
                "Successfully cleaned Docker images ({} removed).",
                summary.removed
            ));
            report.images = Some(summary);
        }

        // bollard has no build-prune, this shells out
        if plan.build_cache {
            let reclaimed = docker.prune_build_cache(output).await?;
            output.success("Successfully cleaned Docker build cache.");
            report.build_cache_pruned = true;
            report.build_cache_reclaimed = reclaimed;
        }
    }

    // Bind-mount sources, possibly root-owned
    if plan.local_folders {
        for folder in config.local_folders() {
            match workspace::remove_folder(&folder)? {
                Removal::Removed => {
                    output.success(&format!("Successfully removed {}.", folder.display()));
                    report.removed_folders.push(folder.display().to_string());
                }
                Removal::Absent => {
                    output.info(&format!("{} does not exist, skipping", folder.display()));
                }
            }
        }
    }

    output.cleaned(&report);
    Ok(())
}

async fn cmd_generate_certs(lab: &LabArgs, config: &Config, output: &Output) -> Result<()> {
    let settings = config.cert_settings(&lab.overrides())?;
    let docker = DockerManager::connect().await?;

    // Create the bind source ourselves so the daemon doesn't make it as root
    let cert_dir = workspace::ensure_dir(&settings.cert_dir)?;

    // Pull image
    docker.pull_image(&settings.lego_image, output).await?;

    // Run lego; the container is gone once this returns
    output.info("Running lego container...");
    let spec = lego::container_spec(&settings, &cert_dir);
    let completed = docker.run_to_completion(&spec).await?;

    // stderr, so the lines survive --json
    for line in &completed.logs {
        tracing::info!(container = "lego", "{}", line);
    }

    lego::check_exit(completed)?;
    output.success("Done running lego container.");

    // lego writes as root
    output.info(&format!("Changing ownership of {}...", cert_dir.display()));
    match workspace::repair_ownership(&cert_dir) {
        Ok(0) => {}
        Ok(failed) => output.warning(&format!(
            "Could not change ownership of {} file(s); run `sudo chown -R $USER: {}`",
            failed,
            cert_dir.display()
        )),
        Err(e) => output.warning(&format!("Error changing ownership: {}", e)),
    }

    let (cert, key) = lego::certificate_files(&cert_dir, &settings.domain);
    output.certificates_generated(&settings.domain, &cert, &key);
    Ok(())
}

async fn cmd_build(overrides: &Overrides, config: &Config, output: &Output) -> Result<()> {
    let settings = config.build_settings(overrides);
    let docker = DockerManager::connect().await?;

    // Pack context, build, follow the stream
    docker
        .build_image(&settings.context, &settings.tag, settings.target, output)
        .await?;

    output.image_built(&settings.tag);
    Ok(())
}

async fn cmd_run(overrides: &Overrides, config: &Config, output: &Output) -> Result<()> {
    let settings = config.run_settings(overrides)?;
    let docker = DockerManager::connect().await?;

    // Check image exists
    if !docker.image_exists(&settings.tag).await? {
        return Err(JgpError::ImageNotFound(settings.tag));
    }

    // Ensure bind-mount sources exist
    let cert_dir = workspace::ensure_dir(&settings.cert_dir)?;
    let assets_dir = workspace::ensure_dir(&settings.assets_dir)?;

    // Missing certificate is only a warning
    let (cert, _) = lego::certificate_files(&cert_dir, &settings.domain);
    if !cert.is_file() {
        output.warning(&format!(
            "No certificate at {}; run `generate-certs` first or gophish will fail to start",
            cert.display()
        ));
    }

    output.info(&format!("Starting gophish from {}", settings.tag));
    let spec = gophish::container_spec(&settings, &cert_dir, &assets_dir);
    let container_id = docker.run_detached(&spec).await?;

    tracing::debug!(container_id = %short_id(&container_id), image = %settings.tag, "gophish started");
    output.container_started(&container_id, &settings.tag, &settings.domain, &spec.ports);
    Ok(())
}
