//! Thingverse CLI - browse vessels and download their signals.

use clap::Parser;
use std::process;
use std::time::Instant;
use thingverse::cli::{Cli, Commands};
use thingverse::commands::{self, FetchOptions, Output, Services};
use thingverse::config::{self, ConfigOverrides};
use thingverse::logging::{self, LogOptions};
use tracing::debug;

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;

    let log_options = LogOptions {
        debug: cli.debug,
        json: cli.log_json,
        file: cli.log_file.clone(),
    };
    // Held until exit so buffered file logs are flushed.
    let _guard = match logging::init(&log_options) {
        Ok(guard) => guard,
        Err(e) => fail(&e, human),
    };

    let mut overrides = ConfigOverrides::new();
    if let Some(host) = cli.meta_host {
        overrides = overrides.with_meta_host(host);
    }
    if let Some(host) = cli.tsb_host {
        overrides = overrides.with_tsb_host(host);
    }
    if let Some(token) = cli.token {
        overrides = overrides.with_token(token);
    }

    let start = Instant::now();
    let result = config::resolve_config(&overrides)
        .and_then(|resolved| run_command(cli.command, resolved, human));
    debug!(elapsed_ms = start.elapsed().as_millis() as u64, "command finished");

    if let Err(e) = result {
        fail(&e, human);
    }
}

fn run_command(
    command: Commands,
    resolved: config::ResolvedConfig,
    human: bool,
) -> Result<(), thingverse::Error> {
    match command {
        Commands::Config => {
            output(&commands::ConfigView { config: resolved }, human);
        }
        Commands::Vessels => {
            let services = Services::from_config(&resolved);
            output(&commands::vessels(&services)?, human);
        }
        Commands::Signals {
            vessel,
            include_tests,
        } => {
            let services = Services::from_config(&resolved);
            output(&commands::signals(&services, &vessel, include_tests)?, human);
        }
        Commands::Tree { path, depth } => {
            let services = Services::from_config(&resolved);
            output(&commands::tree(&services, &path, depth)?, human);
        }
        Commands::Fetch {
            start,
            end,
            dt,
            all,
            nofill,
            noqc,
            output_prefix,
            vessels,
        } => {
            let services = Services::from_config(&resolved);
            let options = FetchOptions {
                start,
                end,
                dt,
                all,
                nofill,
                noqc,
                output_prefix,
                vessels,
            };
            output(&commands::fetch(&services, &options)?, human);
        }
    }
    Ok(())
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

fn fail(error: &thingverse::Error, human: bool) -> ! {
    if human {
        eprintln!("Error: {}", error);
    } else {
        eprintln!("{}", serde_json::json!({ "error": error.to_string() }));
    }
    process::exit(1);
}
