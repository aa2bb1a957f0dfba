//! Server Monitor - Entry Point
//!
//! Keeps game server daemons running, deploys new builds on request and
//! answers control commands over TCP.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use servmon::app::options::{AppOptions, ServerOptions};
use servmon::app::run::run;
use servmon::config::settings::{Settings, DEFAULT_SETTINGS_FILE};
use servmon::logs::init_logging;
use servmon::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to encode version info: {e}"),
        }
        return;
    }

    // Retrieve the settings file
    let settings_path = cli_args
        .get("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    let settings = match Settings::load(&settings_path).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to load settings: {e}");
            std::process::exit(1);
        }
    };

    // Initialize logging
    let _log_guard = match init_logging(settings.log_options()) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    info!(path = %settings_path.display(), servers = settings.servers.len(), "Settings loaded");

    let api = match settings.api_options() {
        Ok(api) => api,
        Err(e) => {
            error!("Invalid API settings: {}", e);
            std::process::exit(1);
        }
    };

    let records = settings.server_records();
    info!("Loaded {} of {} servers", records.len(), settings.servers.len());

    // Run the monitor
    let options = AppOptions {
        api,
        command_auths: settings.api.command_auths.clone(),
        enable_status_server: settings.status_server.enabled,
        server: ServerOptions {
            host: settings.status_server.host.clone(),
            port: settings.status_server.port,
        },
        scheduler: settings.scheduler_options(),
        orchestrator: settings.orchestrator_options(),
        deployer: settings.deployer_options(),
        ..Default::default()
    };

    info!("Running server monitor with options: {:?}", options);
    if let Err(e) = run(version.version, options, records, await_shutdown_signal()).await {
        error!("Failed to run the server monitor: {e}");
        std::process::exit(1);
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
