mod collaborators;
mod control;
mod serve;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use reportd_config::ReportdConfig;

#[derive(Parser)]
#[command(name = "reportd", about = "Recurring report scheduler")]
struct Cli {
    /// Config file (defaults to ~/.reportd/config.json5)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Run the scheduler until Ctrl-C
    Serve,
    /// Create a job from a TOML definition file
    Create {
        /// Path to the job definition
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Apply a TOML patch file to a job
    Update {
        id: String,
        /// Path to the patch
        #[arg(short, long)]
        file: PathBuf,
    },
    /// List all jobs
    List,
    /// Show one job
    Show { id: String },
    /// Pause an active job
    Pause { id: String },
    /// Resume a paused, failed or completed job
    Resume { id: String },
    /// Execute a job immediately
    Run { id: String },
    /// Delete a job (its run history is kept)
    Delete { id: String },
    /// Show the run history of a job
    History { id: String },
    /// Check configuration and storage
    Health,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    if let Commands::Init { force } = cli.command {
        return init_config(cli.config, force);
    }

    let config = load_config(cli.config.as_deref())?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match cli.command {
            Commands::Init { .. } => Ok(()),
            Commands::Serve => serve::run_serve(config).await,
            Commands::Create { file } => control::create(&config, &file).await,
            Commands::Update { id, file } => control::update(&config, &id, &file).await,
            Commands::List => control::list(&config).await,
            Commands::Show { id } => control::show(&config, &id).await,
            Commands::Pause { id } => control::pause(&config, &id).await,
            Commands::Resume { id } => control::resume(&config, &id).await,
            Commands::Run { id } => control::run(&config, &id).await,
            Commands::Delete { id } => control::delete(&config, &id).await,
            Commands::History { id } => control::history(&config, &id).await,
            Commands::Health => control::health(&config).await,
        }
    })
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<ReportdConfig> {
    let config = match path {
        Some(path) => reportd_config::load_config_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => reportd_config::load_config()?,
    };
    Ok(config)
}

fn init_config(path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = match path {
        Some(path) => path,
        None => {
            reportd_config::ensure_config_dir()?;
            reportd_config::config_file_path()?
        }
    };
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    reportd_config::save_config_to(&ReportdConfig::default(), &path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
