//! secretmq - demo client for the secret-prefixed event layer
//!
//! Usage:
//!   secretmq [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -u, --url <URL>        Broker WebSocket URL
//!   -s, --secret <KEY>     Secret key (enables messaging)
//!   --username <NAME>      Sender name stamped on outgoing reminders
//!   --send <MESSAGE>       Emit one reminder after connecting
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use secretmq::config::Config;
use secretmq::provider::{Callback, PublishStatus};
use secretmq::{Envelope, EventSpec, MessagingContext};

const DRINK_WATER_EVENT: &str = "drink-water";
const DRINK_WATER_TOPIC: &str = "reminder/drink-water";

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// Reminder shared between every client under one secret
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DrinkWater {
    message: String,
}

/// secretmq - MQTT events under a secret namespace
#[derive(Parser, Debug)]
#[command(name = "secretmq")]
#[command(version)]
#[command(about = "Send and receive drink-water reminders over a secret MQTT namespace")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker WebSocket URL
    #[arg(short, long)]
    url: Option<String>,

    /// Secret key; setting it enables messaging
    #[arg(short, long)]
    secret: Option<String>,

    /// Sender name
    #[arg(long)]
    username: Option<String>,

    /// Emit one reminder with this message once connected
    #[arg(long)]
    send: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error loading config file: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::from_env()?,
    };

    // Setup logging - CLI overrides config
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&config.log.level));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    // CLI args override file config
    if let Some(url) = args.url {
        config.broker.url = url;
    }
    if let Some(secret) = args.secret {
        config.identity.secret_key = secret;
        config.identity.enabled = true;
    }
    if let Some(username) = args.username {
        config.identity.username = username;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let settings = config.settings();
    if !settings.enabled {
        warn!("Messaging is disabled; set identity.enabled or pass --secret");
        return Ok(());
    }

    info!("Starting secretmq");
    info!("  Broker: {}", settings.broker_url);
    info!("  Event: {} on '{}'", DRINK_WATER_EVENT, DRINK_WATER_TOPIC);

    let context = MessagingContext::from_config(&config);
    context.provider().set_error_hook(|e| error!("Messaging error: {}", e));

    let event = context
        .events()
        .get_or_register_event::<Envelope<DrinkWater>>(EventSpec::new(
            DRINK_WATER_EVENT,
            DRINK_WATER_TOPIC,
        ))
        .await?;

    let on_reminder: Callback<Envelope<DrinkWater>> =
        Arc::new(|reminder: &Envelope<DrinkWater>| {
            info!(
                "Reminder from {}: {}",
                reminder.sender, reminder.data.message
            );
        });
    event.register_receive_callback(on_reminder);

    context.apply_settings(settings).await?;

    if let Some(message) = args.send {
        match context.emit(&event, DrinkWater { message }).await? {
            PublishStatus::Sent => info!("Reminder sent"),
            PublishStatus::NotConnected => warn!("Reminder not sent, broker unreachable"),
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    context.provider().disconnect().await?;

    Ok(())
}
