//! Robovac CLI binary.
//!
//! Fleet client for robotic vacuums.
//!
//! # Commands
//!
//! - `capabilities` - Resolve a model/firmware against the capability table
//! - `map` - Decode a saved map payload and print its rooms
//! - `watch` - Connect to every configured device and print events
//! - `status` - Fetch one device's status
//! - `clean` - Clean rooms by name
//! - `send` - Send any method with JSON parameters
//! - `config` - Print the effective configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use robovac::{
    capability::CapabilityRegistry,
    map,
    model::DeviceId,
    Config, Fleet, VERSION,
};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "robovac")]
#[command(version = VERSION)]
#[command(about = "Robovac - robotic vacuum fleet client", long_about = None)]
struct Cli {
    /// Config file (default: environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve capabilities for a model and firmware
    Capabilities {
        /// Model designator, e.g. roborock.vacuum.a15
        model: String,

        /// Firmware version
        #[arg(short, long, default_value = "")]
        firmware: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Decode a map payload file
    Map {
        /// Compressed map payload
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Connect to all configured devices and print events
    Watch,

    /// Fetch a device's status
    Status {
        /// Device id
        device: String,
    },

    /// Clean rooms by name
    Clean {
        /// Device id
        device: String,

        /// Room names, comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        rooms: Vec<String>,

        /// Passes per room (1-3)
        #[arg(long, default_value = "1")]
        repeat: u8,
    },

    /// Send a method with JSON parameters
    Send {
        /// Device id
        device: String,

        /// Wire method name, e.g. get_consumable
        method: String,

        /// JSON parameters
        params: Option<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::from_env(),
    };

    match cli.command {
        Commands::Capabilities {
            model,
            firmware,
            json,
        } => cmd_capabilities(&config, &model, &firmware, json),
        Commands::Map { file, json } => cmd_map(&config, &file, json),
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Watch => run(cmd_watch(config)),
        Commands::Status { device } => run(cmd_status(config, DeviceId::from(device))),
        Commands::Clean {
            device,
            rooms,
            repeat,
        } => run(cmd_clean(config, DeviceId::from(device), rooms, repeat)),
        Commands::Send {
            device,
            method,
            params,
        } => {
            let params: Value = match params {
                Some(raw) => serde_json::from_str(&raw).context("params must be JSON")?,
                None => Value::Null,
            };
            run(cmd_send(config, DeviceId::from(device), method, params))
        }
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run<F>(future: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = anyhow::Result<()>>,
{
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(future)
}

fn cmd_capabilities(config: &Config, model: &str, firmware: &str, json: bool) -> anyhow::Result<()> {
    let registry = CapabilityRegistry::from_config(&config.capabilities)?;
    let set = registry.capabilities_for(model, firmware);

    if json {
        println!("{}", serde_json::to_string_pretty(&set)?);
        return Ok(());
    }

    println!("Model:    {}", set.model);
    println!("Firmware: {}", if set.firmware.is_empty() { "-" } else { &set.firmware });
    println!("Capabilities:");
    for capability in set.iter() {
        println!("  {}", capability.as_str());
    }
    let modes = |label: &str, modes: &[robovac::capability::NamedMode]| {
        if !modes.is_empty() {
            let names: Vec<&str> = modes.iter().map(|m| m.name.as_str()).collect();
            println!("{label}: {}", names.join(", "));
        }
    };
    modes("Fan speeds", &set.fan_speeds);
    modes("Water levels", &set.water_levels);
    modes("Mop modes", &set.mop_modes);
    Ok(())
}

fn cmd_map(config: &Config, file: &Path, json: bool) -> anyhow::Result<()> {
    let payload = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let graph = map::parse(&payload, config.codec.max_map_size)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&graph)?);
        return Ok(());
    }

    let summary = graph.summary();
    println!("Map {} (generation {})", graph.map_id(), summary.generation);
    println!("Rooms: {}", summary.total_rooms);
    for room in graph.rooms() {
        let neighbors: Vec<String> = room.neighbors.iter().map(ToString::to_string).collect();
        println!(
            "  {:>4}  {:<20} {:>6.1} m²  next to [{}]",
            room.id.0,
            room.name,
            room.bounds.area() as f64 / 1_000_000.0,
            neighbors.join(", ")
        );
    }
    if let Some(charger) = graph.charger() {
        println!("Charger at {}, {}", charger.x, charger.y);
    }
    Ok(())
}

/// Start the fleet and wait until `device` has a session
async fn connect(config: Config, device: &DeviceId) -> anyhow::Result<Fleet> {
    let wait = (config.session.connect_timeout() + config.session.handshake_timeout()) * 2;
    let fleet = Fleet::from_config(config, None)?;
    fleet
        .device(device)?
        .wait_connected(wait)
        .await
        .with_context(|| format!("connecting to {device}"))?;
    Ok(fleet)
}

async fn cmd_watch(config: Config) -> anyhow::Result<()> {
    anyhow::ensure!(!config.devices.is_empty(), "no devices configured");
    let fleet = Fleet::from_config(config, None)?;
    let mut events = fleet.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&*event)?),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Dropped events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    fleet.shutdown().await;
    Ok(())
}

async fn cmd_status(config: Config, device: DeviceId) -> anyhow::Result<()> {
    let fleet = connect(config, &device).await?;
    let status = fleet.status(&device).await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    match fleet.maintenance_alerts(&device).await {
        Ok(alerts) if alerts > 0 => println!("{alerts} consumable(s) due for replacement"),
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, "No consumables"),
    }
    fleet.shutdown().await;
    Ok(())
}

async fn cmd_clean(config: Config, device: DeviceId, rooms: Vec<String>, repeat: u8) -> anyhow::Result<()> {
    let fleet = connect(config, &device).await?;
    let graph = fleet.refresh_map(&device).await?;
    tracing::info!(rooms = graph.len(), generation = graph.generation(), "Map loaded");

    let outcome = fleet.clean_rooms(&device, &rooms, repeat).await;
    fleet.shutdown().await;
    println!("{:?}", outcome?);
    Ok(())
}

async fn cmd_send(config: Config, device: DeviceId, method: String, params: Value) -> anyhow::Result<()> {
    let fleet = connect(config, &device).await?;
    let result = tokio::time::timeout(Duration::from_secs(120), fleet.issue(&device, &method, params))
        .await
        .context("command did not finish")?;
    fleet.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}
