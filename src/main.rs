//! mmcore-midi - drive microscope properties from a MIDI controller
//!
//! Opens the device named in a map file, binds it to the simulated core and
//! runs until Ctrl+C, re-applying the map whenever the file changes.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mmcore_midi::device::{DeviceRegistry, MidiDevice};
use mmcore_midi::map_spec::DeviceMap;
use mmcore_midi::target::memory::SimulatedCore;
use mmcore_midi::target::TargetSystem;
use mmcore_midi::transport::memory::MemoryTransport;
use mmcore_midi::transport::{MidirTransport, Transport};
use mmcore_midi::watcher::{apply_reload, MapWatcher};
use mmcore_midi::Disconnect;

/// Bind MIDI controller knobs and buttons to microscope properties
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the device map (.json, .yaml or .yml)
    #[arg(short, long, env = "MMCORE_MIDI_MAP")]
    map: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log every inbound MIDI message
    #[arg(long, env = "MMCORE_MIDI_DEBUG")]
    debug: bool,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// List known device models
    #[arg(long)]
    list_devices: bool,

    /// Use an in-memory port instead of hardware
    #[arg(long = "virtual")]
    virtual_ports: bool,

    /// Do not reload the map when the file changes
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("Starting mmcore-midi v{}", env!("CARGO_PKG_VERSION"));

    let registry = DeviceRegistry::with_builtin();
    let midir = MidirTransport::default();

    if args.list_devices {
        list_devices(&registry);
        return Ok(());
    }

    if args.list_ports {
        list_ports(&midir, &registry);
        return Ok(());
    }

    let map_path = args
        .map
        .clone()
        .context("No device map given (use --map or MMCORE_MIDI_MAP)")?;
    info!("Device map: {}", map_path.display());

    let (watcher, map) = if args.no_watch {
        let map = DeviceMap::from_file(&map_path)
            .with_context(|| format!("Failed to load device map {}", map_path.display()))?;
        (None, map)
    } else {
        let (watcher, map) = MapWatcher::new(&map_path).await?;
        (Some(watcher), map)
    };

    let memory = MemoryTransport::new();
    let transport: &dyn Transport = if args.virtual_ports {
        memory.add_port(&map.device_name);
        info!("Using virtual port '{}'", map.device_name);
        &memory
    } else {
        &midir
    };

    let core = Arc::new(SimulatedCore::demo());
    core.property_changed()
        .connect(|change| info!("{}.{} = {}", change.device, change.property, change.value));
    let target: Arc<dyn TargetSystem> = core;

    let (device, bindings) = map
        .open_and_connect(&registry, transport, &target)
        .with_context(|| format!("Failed to set up '{}'", map.device_name))?;
    if args.debug {
        device.set_debug(true);
    }

    run_app(&device, &target, map, bindings, watcher, shutdown_signal()).await;

    if let Err(e) = device.reset() {
        warn!("Failed to reset '{}': {}", device.name(), e);
    }
    device.close();

    info!("mmcore-midi shutdown complete");
    Ok(())
}

async fn run_app(
    device: &MidiDevice,
    target: &Arc<dyn TargetSystem>,
    mut map: DeviceMap,
    mut bindings: Disconnect,
    mut watcher: Option<MapWatcher>,
    shutdown: impl std::future::Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    info!("Running, press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(reloaded) = next_reload(&mut watcher) => {
                bindings = apply_reload(device, target, &mut map, bindings, reloaded);
            }
        }
    }

    if let Err(e) = bindings.disconnect() {
        warn!("Failed to disconnect bindings: {}", e);
    }
}

async fn next_reload(watcher: &mut Option<MapWatcher>) -> Option<DeviceMap> {
    match watcher {
        Some(watcher) => watcher.next_map().await,
        None => std::future::pending().await,
    }
}

fn list_ports(transport: &dyn Transport, registry: &DeviceRegistry) {
    use colored::*;

    let print_ports = |title: &str, names: Vec<String>| {
        println!("\n{}", title.bold());
        if names.is_empty() {
            println!("  {}", "No ports found".dimmed());
        }
        for name in names {
            let known = registry.names().any(|model| name.contains(model));
            let marker = if known { "[KNOWN]".green() } else { "[OTHER]".dimmed() };
            println!("  {} {}", marker, name);
        }
    };

    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());
    print_ports("Input Ports:", transport.input_names());
    print_ports("Output Ports:", transport.output_names());
    println!();
}

fn list_devices(registry: &DeviceRegistry) {
    use colored::*;

    println!("\n{}", "=== Known Devices ===".bold().cyan());
    for name in registry.names() {
        println!("  {}", name.bright_white());
    }
    println!();
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level '{}'", level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
