//! artbox CLI: plan, validate and run a toolchain provisioning pipeline.

use artbox::logging::{LoggingOptions, init_logging};
use artbox::pipeline::validate;
use artbox::recipe::toolchain_steps;
use artbox::{
    CancelFlag, EnvironmentState, Host, PipelineBuilder, PipelineExecutor, ProvisionConfig,
};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

/// Provision a release-engineering toolchain image
#[derive(Parser)]
#[command(name = "artbox", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the ordered step list
    Plan(ConfigArg),
    /// Check step ordering and privilege rules without running anything
    Validate(ConfigArg),
    /// Execute the pipeline against a root directory
    Run(RunArgs),
}

#[derive(Args)]
struct ConfigArg {
    /// Provisioning config (JSON)
    #[arg(short, long)]
    config: PathBuf,
}

#[derive(Args)]
struct RunArgs {
    /// Provisioning config (JSON)
    #[arg(short, long)]
    config: PathBuf,
    /// Filesystem root to provision
    #[arg(short, long, default_value = "/")]
    root: PathBuf,
    /// Build context holding repo files, application source and krb5.conf.
    /// Defaults to the config file's directory.
    #[arg(long)]
    context: Option<PathBuf>,
    /// Where to write the image manifest
    #[arg(short, long, default_value = "artbox-image.json")]
    manifest: PathBuf,
    /// Also write a debug log file here
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_dir = match &cli.cmd {
        Commands::Run(args) => args.log_dir.clone(),
        _ => None,
    };
    let _guard = match init_logging(&LoggingOptions {
        log_dir,
        default_filter: None,
        ansi: true,
    }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("artbox: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.cmd {
        Commands::Plan(args) => plan(&args.config),
        Commands::Validate(args) => check(&args.config),
        Commands::Run(args) => run(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn plan(config: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = ProvisionConfig::load(config)?;
    let steps = toolchain_steps(&config);
    let drop_index = steps.iter().position(|s| s.is_identity_drop());

    println!("base image: {}", config.base_image);
    for (index, step) in steps.iter().enumerate() {
        let phase = match drop_index {
            Some(drop) if index > drop => "unprivileged",
            _ => "privileged",
        };
        let floating = if step.is_floating() { "  [floating]" } else { "" };
        println!("{:>3}. {:<28} {:<24} {}{}", index + 1, step.name(), step.kind(), phase, floating);
    }
    Ok(())
}

fn check(config: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = ProvisionConfig::load(config)?;
    let steps = toolchain_steps(&config);
    let violations = validate::violations(&steps);
    if violations.is_empty() {
        println!("ok: {} steps", steps.len());
        return Ok(());
    }
    for violation in &violations {
        println!("invalid: {}", violation);
    }
    Err(format!("{} ordering violation(s)", violations.len()).into())
}

async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ProvisionConfig::load(&args.config)?;
    let pipeline = PipelineBuilder::from_steps(toolchain_steps(&config)).build()?;

    let context = match args.context {
        Some(context) => context,
        None => args
            .config
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let mut state = EnvironmentState::new(&args.root, context).with_base_image(&config.base_image);

    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping before the next step");
            flag.cancel();
        }
    });

    let host = Host::system();
    let image = PipelineExecutor::run(&pipeline, &host, &mut state, &cancel).await?;
    image.write_manifest(&args.manifest)?;

    info!(
        run_id = %image.run_id,
        manifest = %args.manifest.display(),
        packages = image.packages.len(),
        artifacts = image.artifacts.len(),
        "Image provisioned"
    );
    if !image.floating.is_empty() {
        warn!(inputs = ?image.floating, "Image includes floating inputs and is not reproducible");
    }
    Ok(())
}
