//! topicwatch - long-running MQTT topic observer

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::{
    signal,
    time::{sleep, Duration},
};
use topicwatch::config::{discover_config, ConfigOverrides, WatchConfig};
use topicwatch::error::{WatchError, WatchResult};
use topicwatch::observability::{init_logging, LogSettings, LogSink, StatusServer};
use topicwatch::session::{DiagnosticOutcome, SessionConfig, SessionController};
use topicwatch::transport::mqtt::RumqttcConnector;
use tracing::{error, info, warn};

/// Subscribe to an MQTT broker and classify every inbound message
#[derive(Parser)]
#[command(name = "topicwatch")]
#[command(about = "Observe every message on an MQTT broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct OverrideArgs {
    /// Broker URL, e.g. mqtts://broker.example.com:8883
    #[arg(long, global = true, env = "TOPICWATCH_BROKER_URL")]
    broker_url: Option<String>,

    /// PEM bundle of trusted CA certificates
    #[arg(long, global = true, value_name = "FILE")]
    ca_file: Option<PathBuf>,

    /// Topic filter to subscribe to (repeatable)
    #[arg(long = "topic", global = true, value_name = "FILTER")]
    topics: Vec<String>,

    /// Skip broker certificate verification when no CA bundle loads
    #[arg(long, global = true)]
    insecure: bool,

    /// Serve /health and /stats on this port
    #[arg(long, global = true, env = "STATUS_PORT")]
    status_port: Option<u16>,
}

impl From<OverrideArgs> for ConfigOverrides {
    fn from(args: OverrideArgs) -> Self {
        Self {
            broker_url: args.broker_url,
            ca_file: args.ca_file,
            topics: args.topics,
            insecure: args.insecure,
            status_port: args.status_port,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and watch until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut log_settings = LogSettings::from_env();
    if cli.verbose > 0 {
        log_settings = log_settings.verbose();
    }
    init_logging(&log_settings);

    info!("Starting topicwatch v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config, cli.overrides.into()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e.sanitized_message());
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_watcher(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e.sanitized_message());
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    path: Option<PathBuf>,
    overrides: ConfigOverrides,
) -> WatchResult<WatchConfig> {
    let (config, used) = discover_config(path.as_deref())?;
    match used {
        Some(path) => info!("Loaded configuration from: {}", path.display()),
        None => info!("No configuration file found, using defaults"),
    }
    Ok(overrides.apply(config)?)
}

async fn run_watcher(config: WatchConfig) -> WatchResult<()> {
    let session_config = SessionConfig::from_watch_config(&config);
    info!(
        client_id = %session_config.identity.client_id,
        broker_url = %session_config.options.broker_url,
        "Watcher starting"
    );

    let (mut controller, handle) =
        SessionController::new(RumqttcConnector::new(), session_config, Arc::new(LogSink));
    controller.start()?;

    let mut session_task = tokio::spawn(controller.run());

    if let Some(port) = config.status.port {
        let server = StatusServer::new(port, handle.watch_stats());
        tokio::spawn(server.start());
    }

    if let Some(delay) = config.diagnostic.delay_secs {
        let diagnostic_handle = handle.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(delay)).await;
            match diagnostic_handle.publish_diagnostic(None, None).await {
                DiagnosticOutcome::Published { topic } => {
                    info!(topic = %topic, "Diagnostic message published")
                }
                DiagnosticOutcome::NotConnected { state } => {
                    warn!(state = %state, "Diagnostic skipped, not connected")
                }
                DiagnosticOutcome::Failed(reason) => {
                    warn!(reason = %reason, "Diagnostic publish failed")
                }
            }
        });
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Watching for messages...");

    let final_stats = tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
            handle.disconnect().await
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
            handle.disconnect().await
        }
        finished = &mut session_task => {
            warn!("Session closed without a shutdown request");
            finished.unwrap_or_else(|_| handle.stats())
        }
    };

    if !session_task.is_finished() {
        let _ = session_task.await;
    }

    info!(
        messages_received = final_stats.messages_received,
        sessions_established = final_stats.sessions_established,
        client_id = %final_stats.client_id,
        "Final statistics"
    );
    Ok(())
}

fn handle_config_command(config: &WatchConfig, show: bool) -> WatchResult<()> {
    info!("Configuration is valid");
    if show {
        let rendered = toml::to_string_pretty(config).map_err(|e| {
            WatchError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        println!("{rendered}");
    }
    Ok(())
}
