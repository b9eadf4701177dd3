mod backends;
mod cli;
mod cmd;
mod config;
mod engine;
mod github;
mod home;
mod store;
mod template;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "pr-relay",
    version,
    about = "Relays pull-request review feedback to a coding assistant"
)]
struct Cli {
    /// Verbose logging (pr_relay=debug)
    #[arg(long, global = true)]
    debug: bool,
    /// Also append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    /// Repository in OWNER/NAME format
    #[arg(long, global = true)]
    repo: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch labeled pull requests until SIGINT/SIGTERM
    Daemon {
        /// Seconds between poll cycles
        #[arg(long)]
        poll_interval: Option<u64>,
    },
    /// Process one pull request once and exit
    ProcessPr {
        /// Pull request number
        pr: u64,
    },
    /// Inspect conversation threads
    Threads {
        #[command(subcommand)]
        action: ThreadsAction,
    },
    /// Verify prerequisites
    Check,
    /// Read config values
    Config {
        /// Config key (dot-separated path)
        key: String,
    },
    /// Show version information
    Version,
    /// Generate shell completions
    Completions {
        /// Shell type
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ThreadsAction {
    /// List thread summaries
    List {
        /// Only threads of this pull request
        #[arg(long)]
        pr: Option<u64>,
    },
    /// Print a thread record as JSON
    Show {
        /// Thread ID
        thread_id: String,
    },
}

fn init_tracing(debug: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let default = if debug { "pr_relay=debug" } else { "pr_relay=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                home::ensure_dir(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Version => {
            cli::version();
            return Ok(());
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "pr-relay", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let mut config = config::Config::load()?;
    if let Some(repo) = cli.repo {
        config.repo = repo;
    }
    if let Some(path) = cli.log_file {
        config.log_file = Some(path);
    }
    if let Commands::Daemon {
        poll_interval: Some(secs),
    } = cli.command
    {
        config.poll_interval_secs = secs;
    }

    init_tracing(cli.debug, config.log_file.as_deref())?;
    let config = Arc::new(config);

    match cli.command {
        Commands::Daemon { .. } => {
            engine::serve(config).await?;
        }
        Commands::ProcessPr { pr } => {
            engine::process_once(config, pr).await?;
        }
        Commands::Threads { action } => match action {
            ThreadsAction::List { pr } => {
                cli::threads_list(&config, pr)?;
            }
            ThreadsAction::Show { thread_id } => {
                cli::threads_show(&config, &thread_id)?;
            }
        },
        Commands::Check => {
            cli::check(&config)?;
        }
        Commands::Config { key } => {
            cli::config_get(&config, &key)?;
        }
        Commands::Version | Commands::Completions { .. } => {}
    }

    Ok(())
}
