use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use courtnotes::{App, Cli, Config};

pub fn initialize_logger(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .format_module_path(true)
        .init();

    info!("Logger initialized");
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    initialize_logger(cli.verbose);

    info!("Application starting up");

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("{}", console::style(format!("Error: {}", e)).red());
            return ExitCode::FAILURE;
        }
    };
    if let Some(vault) = cli.vault {
        config.vault_dir = vault;
    }

    let result = match App::new(config, cli.config, cli.verbose) {
        Ok(app) => app.run(cli.command).await,
        Err(e) => Err(e),
    };

    info!("Application shutting down");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("{}", console::style(format!("Error: {}", e)).red());
            ExitCode::FAILURE
        }
    }
}
