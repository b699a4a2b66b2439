//! Lattice CI CLI entrypoint.

use clap::{ArgAction, Parser};
use console::style;
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

mod commands;
mod config;
mod handlers;
mod render;

use commands::{Commands, ConfigCommands};
use config::CliConfig;
use handlers::RunOptions;

#[derive(Parser)]
#[command(name = "lattice")]
#[command(author, version, about = "Compile and run CI matrix pipelines locally", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Logs go to stderr so structured output on stdout stays parseable.
/// `RUST_LOG` overrides the verbosity flag.
fn init_tracing(verbose: u8, json: bool) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(env_filter);
    let _ = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
}

async fn dispatch(cli: Cli) -> anyhow::Result<u8> {
    let config = CliConfig::load().unwrap_or_default();

    match cli.command {
        Commands::Run {
            path,
            event,
            branch,
            base,
            max_parallel,
            dry_run,
            workspace,
            secrets_file,
            format,
        } => {
            let opts = RunOptions {
                path,
                event,
                branch,
                base,
                max_parallel,
                dry_run,
                workspace,
                secrets_file,
                format,
            };
            handlers::run_pipeline(&config, opts).await
        }
        Commands::Validate { path } => handlers::validate(&path),
        Commands::Expand { path, job, format } => {
            handlers::expand(&config, &path, job.as_deref(), format)
        }
        Commands::Schema => handlers::schema(),
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config),
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value),
        },
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::from(2)
        }
    }
}
