//! iothub-device - IoT hub device client
//!
//! `run` drives a demo device: twin sync, desired-property handling and
//! periodic telemetry. `token` prints the SAS credentials for the configured
//! device and `config` validates the configuration.

use clap::{Parser, Subcommand};
use iothub_device::config::HubConfig;
use iothub_device::error::redact_secrets;
use iothub_device::hub::{compute_expiry, IotHubClient, SystemClock};
use iothub_device::observability::init_default_logging;
use iothub_device::protocol::{ConnectionDescriptor, Credentials};
use serde_json::json;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

const FIRMWARE_VERSION: &str = "1.0.0";
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Telemetry above this temperature carries `temperatureAlert=true`
const ALERT_TEMPERATURE_C: f64 = 30.0;

#[derive(Parser)]
#[command(name = "iothub-device")]
#[command(about = "IoT hub device client over MQTT with SAS authentication")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run the demo device loop until Ctrl-C
    Run {
        /// Seconds between telemetry messages
        #[arg(long, default_value_t = 10)]
        interval_secs: u64,
    },
    /// Print the SAS token and MQTT username for the configured device
    Token {
        /// Absolute expiry (epoch seconds) instead of now + lifetime
        #[arg(long)]
        expiry: Option<u64>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { interval_secs } => run_device(config, interval_secs).await,
        Commands::Token { expiry } => print_token(&config, expiry),
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", redact_secrets(&e.to_string()));
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<HubConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(HubConfig::load_from_file(path)?);
    }

    for path_str in ["iothub.toml", "config/iothub.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(HubConfig::load_from_file(&path)?);
        }
    }

    info!("No configuration file found, using defaults");
    Ok(HubConfig::default())
}

/// Slowly varying fake temperature/humidity source
struct SimulatedSensor {
    tick: u32,
}

impl SimulatedSensor {
    fn read(&mut self) -> (f64, f64) {
        let phase = f64::from(self.tick) / 6.0;
        self.tick = self.tick.wrapping_add(1);
        (22.0 + 10.0 * phase.sin(), 55.0 + 15.0 * phase.cos())
    }
}

async fn run_device(
    config: HubConfig,
    interval_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = IotHubClient::from_config(config);
    client.init().await?;

    let telemetry_interval = Arc::new(AtomicU64::new(interval_secs.max(1)));

    client.set_c2d_observer(|_session, message| {
        info!(
            topic = %message.topic,
            length = message.length,
            payload = %message.payload_str(),
            "Cloud-to-device message"
        );
    });

    let interval_setting = telemetry_interval.clone();
    client.set_desired_observer(move |session, patch| {
        info!(version = patch.version, payload = %patch.payload_str(), "Desired properties");
        let requested = serde_json::from_slice::<serde_json::Value>(patch.payload)
            .ok()
            .and_then(|doc| doc.get("telemetryInterval").and_then(|v| v.as_u64()))
            .filter(|secs| *secs > 0);
        if let Some(secs) = requested {
            interval_setting.store(secs, Ordering::Relaxed);
            let reported = json!({ "telemetryInterval": secs }).to_string();
            if let Err(e) = session.update_reported(reported.as_bytes()) {
                warn!(error = %e, "Failed to acknowledge telemetryInterval");
            }
        }
    });

    client.set_twin_observer(|_session, payload| {
        info!(payload = %String::from_utf8_lossy(payload), "Device twin");
    });

    client.connect().await?;

    if let Err(e) = client.request_twin() {
        warn!(error = %e, "Twin request failed");
    }
    let startup = json!({
        "firmwareVersion": FIRMWARE_VERSION,
        "telemetryInterval": telemetry_interval.load(Ordering::Relaxed),
        "deviceStarted": true,
    })
    .to_string();
    if let Err(e) = client.update_reported(startup.as_bytes()) {
        warn!(error = %e, "Startup report failed");
    }

    info!("Device running, press Ctrl-C to stop");

    let mut sensor = SimulatedSensor { tick: 0 };
    let mut message_id: u64 = 0;
    let mut last_send = Instant::now();

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
            _ = async {
                ticker.tick().await;
                client.poll().await
            } => {}
        }

        let interval = Duration::from_secs(telemetry_interval.load(Ordering::Relaxed));
        if client.is_connected() && last_send.elapsed() >= interval {
            last_send = Instant::now();
            let (temperature, humidity) = sensor.read();
            let payload = json!({
                "deviceId": client.device_id().unwrap_or_default(),
                "messageId": message_id,
                "temperature": (temperature * 100.0).round() / 100.0,
                "humidity": (humidity * 100.0).round() / 100.0,
            })
            .to_string();
            let properties = (temperature > ALERT_TEMPERATURE_C).then_some("temperatureAlert=true");

            match client.send_telemetry(payload.as_bytes(), properties) {
                Ok(()) => {
                    info!(message_id = message_id, temperature = temperature, "Telemetry sent");
                    message_id += 1;
                }
                Err(e) => warn!(error = %e, "Telemetry not sent"),
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

fn print_token(config: &HubConfig, expiry: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let descriptor = ConnectionDescriptor::parse(&config.connection_string()?)?;
    let expiry = match expiry {
        Some(expiry) => expiry,
        None => compute_expiry(&SystemClock, &config.time)?,
    };
    let credentials = Credentials::derive(&descriptor, expiry)?;

    println!("client_id: {}", credentials.client_id());
    println!("username:  {}", credentials.username());
    println!("password:  {}", credentials.token());
    println!("expiry:    {}", credentials.expiry());
    Ok(())
}

fn handle_config_command(
    mut config: HubConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    if show {
        config.hub.connection_string = config
            .hub
            .connection_string
            .as_deref()
            .map(redact_secrets);
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
