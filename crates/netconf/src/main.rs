mod cli;
mod commands;
mod config;
mod error;
mod output;

use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output on stdout stays parseable
    init_tracing(cli.global.verbose);

    // Errors render through miette and pick the process exit code
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// `RUST_LOG` wins over `-v` when set.
fn init_tracing(verbosity: u8) {
    let default = level_for(verbosity);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "netconf", &mut std::io::stdout());
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Completions(args) => {
            print_completions(args.shell);
            Ok(())
        }

        // The simulator needs no device profile
        Command::Serve(args) => commands::serve::handle(args, &cli.global).await,

        // Everything else talks to one mounted device
        cmd => {
            let cfg = netconf_config::load_config()?;
            let device = config::resolve_device(&cli.global, &cfg)?;

            tracing::debug!(command = ?cmd, device = %device.id, "dispatching command");
            commands::dispatch(cmd, device, &cli.global).await
        }
    }
}
