//! buildwarden CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 3: Validation or compile failure
//! - 6: Build already in progress
//! - 7: Runtime failure or server timeout

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, CommandFailure, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const BUILD_FAILURE: u8 = 3;
    pub const BUSY: u8 = 6;
    pub const RUNTIME_FAILURE: u8 = 7;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.json);

    let result = match cli.command {
        Commands::Build(args) => commands::build::execute(args, cli.json).await,
        Commands::Serve(args) => commands::serve::execute(args).await,
        Commands::Validate(args) => commands::validate::execute(args).await,
        Commands::Unlock(args) => commands::unlock::execute(args).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

fn init_logging(verbose: bool, json: bool) {
    let default_directives = if verbose { "warden=debug,info" } else { "warden=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    // Ignore the error if a subscriber is already installed
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr)))
        .try_init();
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    if let Some(failure) = e.downcast_ref::<CommandFailure>() {
        return failure.exit_code;
    }

    let msg = e.to_string().to_lowercase();
    if msg.contains("validation") {
        ExitCodes::BUILD_FAILURE
    } else {
        ExitCodes::GENERAL_ERROR
    }
}
