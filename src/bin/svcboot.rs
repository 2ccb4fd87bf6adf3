use anyhow::Result;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use svcboot_invoker::{readiness, Launcher, LaunchSpec};
use svcboot_models::{BootstrapError, Config, Recipe};
use svcboot_packaging::{dockerfile, PackagingService, Provisioner, ShellRunner};
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "svcboot", about = "Bootstrap pipeline for containerized ASGI services")]
struct Cli {
    /// Path to a TOML config file; falls back to the default search list.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the generated Dockerfile for the current configuration.
    Render,
    /// Stage the source tree and build the service image.
    Build,
    /// Run the provisioning steps directly against a target directory.
    Provision {
        #[arg(long)]
        target: PathBuf,
    },
    /// Launch a previously built image and block until ctrl-c.
    Run {
        /// Image ref to run; defaults to the cached build for the tree.
        #[arg(long)]
        image: Option<String>,
    },
    /// Build, then launch.
    Up,
}

fn load_config(explicit: Option<&Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    }
    candidates.push(PathBuf::from("configs/default.toml"));
    candidates.push(PathBuf::from("config/config.toml"));

    for path in &candidates {
        if path.exists() {
            let contents = fs::read_to_string(path)?;
            let config: Config = toml::from_str(&contents)?;
            return Ok(config);
        }
    }

    Err("No config file found".into())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Failed to load config file: {}, using defaults", e);
        Config::default()
    });

    if let Err(e) = run(cli.command, config).await {
        tracing::error!("{e}");
        let code = match e.downcast_ref::<BootstrapError>() {
            Some(err) => err.exit_code(),
            None => 1,
        };
        std::process::exit(code);
    }
}

async fn run(command: Commands, config: Config) -> Result<()> {
    let recipe = Recipe::for_config(&config);
    recipe.validate()?;

    // The declared metadata port and the bound port may legitimately
    // differ; the contract is to flag the discrepancy, never reconcile it.
    if let Some((declared, bound)) = recipe.port_mismatch() {
        warn!(
            declared_port = declared,
            bound_port = bound,
            "Image metadata declares port {declared} but the server binds {bound}; \
             routing configured from metadata alone will miss the service"
        );
    }

    match command {
        Commands::Render => {
            print!("{}", dockerfile::render(&recipe));
        }
        Commands::Build => {
            let image_ref = build(&config).await?;
            println!("{image_ref}");
        }
        Commands::Provision { target } => {
            let provisioner = Provisioner::new(
                ShellRunner,
                PathBuf::from(&config.build.context),
                target,
            );
            let report = provisioner.apply(&recipe).await?;
            info!(
                program = %report.launch.program,
                args = ?report.launch.args,
                "Provisioning finished; launch command ready"
            );
        }
        Commands::Run { image } => {
            let image_ref = match image {
                Some(image) => image,
                None => build(&config).await?,
            };
            launch_and_wait(&config, &recipe, &image_ref).await?;
        }
        Commands::Up => {
            let image_ref = build(&config).await?;
            launch_and_wait(&config, &recipe, &image_ref).await?;
        }
    }
    Ok(())
}

async fn build(config: &Config) -> Result<String> {
    let mut packaging = PackagingService::new(config.clone())?;
    let image_ref = packaging.build().await?;
    info!(image = %image_ref, "Image ready");
    Ok(image_ref)
}

async fn launch_and_wait(config: &Config, recipe: &Recipe, image_ref: &str) -> Result<()> {
    let launcher = Launcher::new(config.clone()).await?;
    let spec = LaunchSpec::for_service(
        &config.service.name,
        image_ref,
        recipe.env(),
        config.launch.port,
    );
    let container_id = launcher.launch(spec).await?;

    let addr = format!("127.0.0.1:{}", config.launch.port);
    if let Err(e) = readiness::wait_for_listener(&addr, config.launch.startup_timeout_ms).await {
        // Surface the logs before tearing down; startup failures are the
        // application's to explain.
        if let Ok(logs) = launcher.container_logs(&container_id).await {
            warn!("Container logs:\n{logs}");
        }
        let _ = launcher.teardown(&container_id).await;
        return Err(e.into());
    }

    info!(
        container_id = %container_id,
        addr = %addr,
        "Service is up; press ctrl-c to stop"
    );

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(err) => warn!("Unable to listen for shutdown signal: {}", err),
    }

    // External termination is the only defined exit path.
    launcher.teardown(&container_id).await?;
    info!("Shutdown complete");
    Ok(())
}
