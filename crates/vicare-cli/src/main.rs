//! Command-line interface for the ViCare bridge.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use vicare_core::config::env_vars;
use vicare_core::{EventBus, SharedEventBus, VicareEvent};
use vicare_devices::{
    CapabilityTable, DeviceAddress, DeviceSession, MemoryDeviceHost, PollScheduler, RemoteClient,
    SessionConfig, ViessmannClient, discover_devices, initial_features,
};
use vicare_storage::{DeviceStateStore, create_backend};

use crate::config::BridgeConfig;

/// ViCare bridge - sync Viessmann heating devices into a capability host.
#[derive(Parser, Debug)]
#[command(name = "vicare")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Config file path.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge until interrupted.
    Run,
    /// List installations of the account.
    Installations,
    /// List every device reachable through the account.
    Devices,
    /// Dump the raw feature records of one device.
    Features {
        #[arg(long)]
        installation: i64,
        #[arg(long)]
        gateway: String,
        #[arg(long, default_value = "0")]
        device: String,
        /// Only show enabled features.
        #[arg(long)]
        enabled: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = BridgeConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Run => run_bridge(config).await,
        Command::Installations => list_installations(&config).await,
        Command::Devices => list_devices(&config).await,
        Command::Features {
            installation,
            gateway,
            device,
            enabled,
        } => {
            let address = DeviceAddress::new(installation, gateway, device);
            dump_features(&config, &address, enabled).await
        }
    }
}

fn init_logging(verbose: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        tracing_subscriber::EnvFilter::new(format!(
            "vicare={level},vicare_devices={level},vicare_storage={level}"
        ))
        .add_directive(tracing::Level::WARN.into())
    });

    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

fn build_client(config: &BridgeConfig) -> Result<Arc<ViessmannClient>> {
    let client = ViessmannClient::new(config.client_config()?)
        .context("Failed to create Viessmann API client")?;
    Ok(Arc::new(client))
}

fn open_store(config: &BridgeConfig) -> Result<DeviceStateStore> {
    let backend = create_backend(&config.storage.backend, &config.storage_config())
        .with_context(|| format!("Failed to open {} storage", config.storage.backend))?;
    if !backend.is_persistent() {
        warn!(category = "storage", "Device state will not survive a restart");
    }
    Ok(DeviceStateStore::new(backend))
}

/// Session configs for every device to run: the configured ones, or all
/// devices of the account when none are configured.
async fn session_configs(
    config: &BridgeConfig,
    remote: &dyn RemoteClient,
    table: &CapabilityTable,
) -> Result<Vec<SessionConfig>> {
    let mut sessions = Vec::new();

    if config.devices.is_empty() {
        info!(category = "pairing", "No devices configured, discovering");
        for device in discover_devices(remote).await? {
            let (features, constraints) = initial_features(remote, &device.address, table).await?;
            info!(
                category = "pairing",
                name = %device.name,
                address = %device.address,
                features = features.len(),
                "Pairing device"
            );
            sessions.push(
                SessionConfig::new(device.device_id(), device.address)
                    .with_roles(device.roles)
                    .with_features(features)
                    .with_constraints(constraints)
                    .with_failure_policy(config.failure_policy()),
            );
        }
        return Ok(sessions);
    }

    for entry in &config.devices {
        let mut session = config.session_config(entry);
        if entry.features.is_empty() {
            let (features, constraints) = initial_features(remote, &session.address, table).await?;
            session.initial_features = features;
            session.initial_constraints = constraints;
        }
        sessions.push(session);
    }
    Ok(sessions)
}

/// Log bus traffic until the bus is dropped.
fn spawn_event_logger(bus: &SharedEventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        while let Some((event, meta)) = rx.recv().await {
            match event {
                VicareEvent::CapabilityChanged {
                    device_id,
                    capability,
                    value,
                } => info!(
                    category = "event",
                    device_id = %device_id,
                    capability = %capability,
                    value = %value,
                    source = %meta.source,
                    "Capability changed"
                ),
                VicareEvent::FlowTriggered {
                    device_id,
                    trigger_id,
                    tokens,
                } => info!(
                    category = "event",
                    device_id = %device_id,
                    trigger = %trigger_id,
                    tokens = %serde_json::Value::Object(tokens),
                    "Flow triggered"
                ),
                VicareEvent::DeviceUnavailable { device_id, reason } => warn!(
                    category = "event",
                    device_id = %device_id,
                    reason = %reason,
                    "Device unavailable"
                ),
                other => info!(
                    category = "event",
                    device_id = %other.device_id(),
                    event = other.type_name(),
                    "Device event"
                ),
            }
        }
    })
}

async fn run_bridge(config: BridgeConfig) -> Result<()> {
    let remote = build_client(&config)?;
    let store = open_store(&config)?;
    let table = CapabilityTable::viessmann();
    let bus: SharedEventBus = Arc::new(EventBus::with_name("vicare"));
    let logger = spawn_event_logger(&bus);

    let scheduler = PollScheduler::new(config.poll_floor());
    for session_config in session_configs(&config, remote.as_ref(), &table).await? {
        let device_id = session_config.device_id.clone();
        let session = DeviceSession::new(
            session_config,
            table.clone(),
            Arc::new(MemoryDeviceHost::new()),
            remote.clone(),
            store.clone(),
        )
        .with_events(bus.clone());

        match session.on_init().await {
            Ok(report) => {
                info!(
                    category = "device",
                    device_id = %device_id,
                    capabilities = report.added.len(),
                    "Device ready"
                );
                scheduler.add_device(Arc::new(session)).await;
            }
            Err(e) => error!(category = "device", device_id = %device_id, error = %e, "Failed to initialize device"),
        }
    }

    if scheduler.device_count().await == 0 {
        logger.abort();
        anyhow::bail!("No device could be started");
    }

    info!(
        category = "poll",
        devices = scheduler.device_count().await,
        interval_secs = scheduler.current_interval().await.as_secs(),
        "Bridge running, press Ctrl+C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!(category = "poll", "Shutting down");
    scheduler.shutdown().await;
    logger.abort();
    Ok(())
}

async fn list_installations(config: &BridgeConfig) -> Result<()> {
    let remote = build_client(config)?;
    for installation in remote.get_installations().await? {
        println!(
            "{}\t{}",
            installation.id,
            installation.description.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn list_devices(config: &BridgeConfig) -> Result<()> {
    let remote = build_client(config)?;
    for device in discover_devices(remote.as_ref()).await? {
        println!(
            "{}\t{}\t{}",
            device.address,
            device.name,
            device.roles.join(",")
        );
    }
    Ok(())
}

async fn dump_features(config: &BridgeConfig, address: &DeviceAddress, enabled: bool) -> Result<()> {
    let remote = build_client(config)?;
    let table = CapabilityTable::viessmann();
    for record in remote.get_features(address, None).await? {
        if enabled && !record.is_enabled {
            continue;
        }
        let marker = if table.contains(&record.feature) { "*" } else { " " };
        println!(
            "{} {}\t{}",
            marker,
            record.feature,
            serde_json::Value::Object(record.properties)
        );
    }
    Ok(())
}
