//! feedping - Main Entry Point
//!
//! Publishes one value to an Adafruit IO feed and reports whether the broker
//! confirmed it. The exit code tells scripts what kind of failure happened.

use clap::{Parser, Subcommand};
use feedping::config::FeedpingConfig;
use feedping::error::EXIT_CONFIG;
use feedping::observability::{init_default_logging, level_for_verbosity};
use feedping::publisher::{CancelToken, PublishRequest, Publisher, QosLevel, RetryPolicy};
use feedping::transport::mqtt::MqttTransport;
use feedping::transport::ProtocolVersion;
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, warn};

/// Reliable MQTT feed publisher
#[derive(Parser)]
#[command(name = "feedping")]
#[command(about = "Publish a value to an Adafruit IO feed and wait for the broker to confirm it")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "FEEDPING_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Broker URL, e.g. mqtts://io.adafruit.com:8883
    #[arg(long, env = "FEEDPING_BROKER_URL", global = true)]
    broker_url: Option<String>,

    /// MQTT protocol revision: v311 or v5
    #[arg(long, env = "FEEDPING_PROTOCOL", global = true)]
    protocol: Option<ProtocolVersion>,

    /// Account owning the feed (defaults to the username)
    #[arg(long, global = true)]
    account: Option<String>,

    /// Feed key
    #[arg(long, global = true)]
    feed: Option<String>,

    /// MQTT QoS level (0, 1 or 2)
    #[arg(long, global = true)]
    qos: Option<u8>,

    /// Acknowledgement deadline per attempt in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Total attempts including the first
    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish the trigger value (default "true")
    Publish {
        /// Payload to publish instead of the configured one
        #[arg(long)]
        payload: Option<String>,

        /// Ask the broker to retain the value
        #[arg(long)]
        retain: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reset the feed by publishing "false"
    Clear {
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize observability system
    init_default_logging(level_for_verbosity(cli.verbose));

    info!("Starting feedping v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match load_configuration(&cli.config).and_then(|config| apply_overrides(config, &cli))
    {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("feedping: configuration error: {e}");
            process::exit(EXIT_CONFIG);
        }
    };

    // Execute command
    let code = match cli.command {
        Commands::Publish {
            payload,
            retain,
            json,
        } => {
            let payload = payload.unwrap_or_else(|| config.publish.payload.clone());
            let retain = retain || config.publish.retain;
            publish_payload(&config, payload, retain, json).await
        }
        Commands::Clear { json } => {
            let retain = config.publish.retain;
            publish_payload(&config, "false".to_string(), retain, json).await
        }
        Commands::Config { show } => handle_config_command(&config, show),
    };

    process::exit(code);
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<FeedpingConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(FeedpingConfig::load_from_file(path)?)
        }
        None => {
            // Try default locations
            let default_paths = ["feedping.toml", "config/feedping.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(FeedpingConfig::load_from_file(&path)?);
                }
            }

            info!("No configuration file found, using defaults");
            Ok(FeedpingConfig::default())
        }
    }
}

/// Command-line flags win over the file
fn apply_overrides(
    mut config: FeedpingConfig,
    cli: &Cli,
) -> Result<FeedpingConfig, Box<dyn std::error::Error>> {
    if let Some(broker_url) = &cli.broker_url {
        config.broker.broker_url = broker_url.clone();
    }
    if let Some(protocol) = cli.protocol {
        config.broker.protocol = protocol;
    }
    if let Some(account) = &cli.account {
        config.feed.account = Some(account.clone());
    }
    if let Some(feed) = &cli.feed {
        config.feed.key = feed.clone();
    }
    if let Some(qos) = cli.qos {
        config.publish.qos = qos;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.publish.timeout_ms = timeout_ms;
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.retry.max_attempts = max_attempts;
    }

    config.validate()?;
    Ok(config)
}

/// Run one logical publish and return the process exit code
async fn publish_payload(config: &FeedpingConfig, payload: String, retain: bool, json: bool) -> i32 {
    let (publisher, request) = match build_publisher(config, payload, retain) {
        Ok(built) => built,
        Err(e) => {
            error!("Cannot publish: {}", e);
            eprintln!("feedping: {e}");
            return EXIT_CONFIG;
        }
    };

    tokio::spawn(watch_shutdown_signals(publisher.cancel_token()));

    let outcome = publisher.publish(&request).await;
    let report = outcome.report(request.topic());

    if json {
        match serde_json::to_string(&report) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Failed to serialize outcome report: {}", e),
        }
    } else if outcome.is_success() {
        println!(
            "published {} to {} (attempts: {}, {} ms)",
            String::from_utf8_lossy(request.payload()),
            report.topic,
            report.attempts,
            report.elapsed_ms
        );
    } else {
        eprintln!(
            "feedping: publish to {} failed after {} attempt(s): {}",
            report.topic,
            report.attempts,
            report.error.as_deref().unwrap_or("unknown error")
        );
    }

    outcome.status.exit_code()
}

/// Bootstrap: resolve credentials, topic and target, then wire the publisher
fn build_publisher(
    config: &FeedpingConfig,
    payload: String,
    retain: bool,
) -> Result<(Publisher<MqttTransport>, PublishRequest), Box<dyn std::error::Error>> {
    let credentials = config.credentials()?;
    let topic = config.feed_topic(&credentials)?;
    let target = config.broker_target(credentials)?;

    let qos = QosLevel::try_from(config.publish.qos)?;
    let request = PublishRequest::new(topic, payload.into_bytes(), qos)?.with_retain(retain);

    let publisher = Publisher::new(
        MqttTransport::new(),
        target,
        RetryPolicy::from(&config.retry),
        config.publish_timeout(),
    )
    .with_cancel_token(CancelToken::new());

    Ok((publisher, request))
}

/// Fire the cancel token on Ctrl-C or SIGTERM
async fn watch_shutdown_signals(cancel: CancelToken) {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received SIGINT, cancelling publish"),
                    _ = sigterm.recv() => info!("Received SIGTERM, cancelling publish"),
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                if signal::ctrl_c().await.is_err() {
                    return;
                }
                info!("Received SIGINT, cancelling publish");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if signal::ctrl_c().await.is_err() {
            return;
        }
        info!("Received Ctrl-C, cancelling publish");
    }

    cancel.cancel();
}

fn handle_config_command(config: &FeedpingConfig, show: bool) -> i32 {
    if show {
        println!("Current configuration:");
        match toml::to_string_pretty(config) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => {
                error!("Failed to render configuration: {}", e);
                return EXIT_CONFIG;
            }
        }

        for env_name in [&config.auth.username_env, &config.auth.key_env] {
            let state = match std::env::var(env_name) {
                Ok(value) if !value.is_empty() => "set",
                _ => "missing",
            };
            println!("# {env_name}: {state}");
        }
    }

    info!("Configuration validation complete");
    0
}
