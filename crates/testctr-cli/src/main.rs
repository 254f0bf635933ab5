//! testctr - container-aware script test runner CLI

use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use testctr::{
    run_host, run_in_container, sweep_images, ContainerTestConfig, RunReport, Settings,
};
use testctr_driver::{detect_driver, RuntimeKind};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "testctr")]
#[command(author, version, about = "Container-aware script test runner", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Container runtime to use (docker or podman; auto-detected by default)
    #[arg(long, global = true)]
    runtime: Option<RuntimeKind>,

    #[command(flatten)]
    sweeper: SweeperFlags,

    #[command(subcommand)]
    command: Commands,
}

/// Image-lifecycle sweeper knobs, mirroring the `TESTCTR_*` environment
#[derive(Args)]
struct SweeperFlags {
    /// Remove script-built images older than cleanup-age at start
    #[arg(long, global = true)]
    cleanup_images: Option<bool>,

    /// Log warnings about old images
    #[arg(long, global = true)]
    warn_images: Option<bool>,

    /// Also remove labeled images not referenced by any container
    #[arg(long, global = true)]
    cleanup_orphans: Option<bool>,

    /// Age threshold, e.g. 5m or 90s
    #[arg(long, global = true)]
    cleanup_age: Option<String>,

    /// Label and image-name namespace
    #[arg(long, global = true)]
    label_prefix: Option<String>,

    /// Suppress image deletion for this run (debugging)
    #[arg(long, global = true)]
    keep_failed: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run test files matching a glob pattern
    Run {
        /// Glob pattern, e.g. testdata/*.txt
        pattern: String,

        /// Run each test file inside an ephemeral container
        #[arg(long)]
        container: bool,

        /// Image for container mode (ignored when the archive has a Dockerfile)
        #[arg(long)]
        image: Option<String>,

        /// Environment entries exported inside the container (K=V, repeatable)
        #[arg(long = "env", short = 'e')]
        env: Vec<String>,

        /// Extra build arguments passed verbatim to image builds (repeatable)
        #[arg(long = "build-arg")]
        build_args: Vec<String>,

        /// Provision a Docker endpoint inside the test container
        #[arg(long)]
        docker_in_docker: bool,

        /// Overall deadline for container-mode tests, e.g. 10m
        #[arg(long)]
        timeout: Option<String>,
    },

    /// Run the image sweep and exit
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut settings = Settings::load();
    apply_sweeper_flags(&mut settings, &cli.sweeper)?;

    let driver = detect_driver(cli.runtime).await?;

    match cli.command {
        Commands::Run {
            pattern,
            container,
            image,
            env,
            build_args,
            docker_in_docker,
            timeout,
        } => {
            let deadline = timeout
                .map(|t| testctr_engine::parse_duration(&t))
                .transpose()?;

            let report = if container {
                let mut config = ContainerTestConfig::default();
                if let Some(image) = image {
                    config = config.with_image(image);
                }
                for entry in env {
                    config = config.with_env(entry);
                }
                if docker_in_docker {
                    config = config.with_docker_in_docker();
                }
                config = config.with_build_args(build_args);

                run_in_container(driver, &pattern, &config, &settings, deadline).await?
            } else {
                run_host(driver, &pattern, &settings).await?
            };

            finish(report)
        }
        Commands::Sweep => {
            let report = sweep_images(driver.as_ref(), &settings).await;
            println!(
                "{} warned, {} removed, {} orphans removed",
                report.warned, report.removed, report.orphans_removed
            );
            Ok(())
        }
    }
}

fn apply_sweeper_flags(settings: &mut Settings, flags: &SweeperFlags) -> anyhow::Result<()> {
    if let Some(v) = flags.cleanup_images {
        settings.cleanup_images = v;
    }
    if let Some(v) = flags.warn_images {
        settings.warn_images = v;
    }
    if let Some(v) = flags.cleanup_orphans {
        settings.cleanup_orphans = v;
    }
    if let Some(ref age) = flags.cleanup_age {
        settings.cleanup_age = parse_age(age)?;
    }
    if let Some(ref prefix) = flags.label_prefix {
        settings.label_prefix = prefix.clone();
    }
    if flags.keep_failed {
        settings.keep_failed = true;
    }
    Ok(())
}

fn parse_age(text: &str) -> anyhow::Result<Duration> {
    Ok(testctr_engine::parse_duration(text)?)
}

fn finish(report: RunReport) -> anyhow::Result<()> {
    println!("{}", report.summarize());
    if report.ok() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
