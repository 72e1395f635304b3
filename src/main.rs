//! hubsync CLI entry point.

use clap::Parser;
use colored::Colorize;
use hubsync::cli::commands;
use hubsync::cli::{Cli, Commands, OutputFormat};
use hubsync::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.no_color || std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    init_tracing(cli.verbose, cli.quiet);

    // Piped output is always JSON.
    let json = cli.json
        || cli.format == OutputFormat::Json
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    match run(&cli, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e, json, cli.quiet);
            ExitCode::from(e.exit_code())
        }
    }
}

/// Errors always go to stderr so stdout stays parseable.
fn report(e: &Error, json: bool, quiet: bool) {
    if json {
        eprintln!("{}", e.to_structured_json());
        return;
    }
    if quiet {
        return;
    }
    match e.hint() {
        Some(hint) => eprintln!("{} {e}\n  {hint}", "error:".red().bold()),
        None => eprintln!("{} {e}", "error:".red().bold()),
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // RUST_LOG beats -v.
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info,hyper=info,reqwest=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli, json: bool) -> Result<(), Error> {
    match &cli.command {
        Commands::Init { force } => commands::init::execute(cli.db.as_ref(), *force, json),
        Commands::Version => commands::version::execute(json),
        Commands::Issue { command } => commands::issue::execute(command, cli.db.as_ref(), json),
        Commands::Sync { command } => commands::sync::execute(command, cli.db.as_ref(), json),
        Commands::Config { command } => commands::config::execute(command, json),
        Commands::Completions { shell } => commands::completions::execute(shell),
    }
}
