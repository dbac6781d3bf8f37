//! hidconn monitor
//!
//! Connects the configured devices' event and hidraw nodes, services them
//! until Ctrl+C and logs what happens to them.

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use hidconn::kernel::KernelOpener;
use hidconn::{
    ConnectionType, DeviceConnection, DeviceEvent, DeviceId, MonitorConfig, Reactor,
    SubDeviceEntry, UinputOutput, VirtualOutput,
};

#[derive(Parser)]
#[command(name = "hidconn-monitor")]
#[command(about = "Connect and service the kernel nodes of HID devices")]
struct Cli {
    /// Config file path (default: ~/.config/hidconn/monitor.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Event node to connect (repeatable, needs --vid/--pid)
    #[arg(long = "event", value_name = "PATH")]
    events: Vec<String>,

    /// hidraw node to connect (repeatable, needs --vid/--pid)
    #[arg(long = "hidraw", value_name = "PATH")]
    hidraws: Vec<String>,

    /// Vendor id of the ad-hoc device (hex)
    #[arg(long, value_parser = parse_hex_id)]
    vid: Option<u16>,

    /// Product id of the ad-hoc device (hex)
    #[arg(long, value_parser = parse_hex_id)]
    pid: Option<u16>,

    /// Grab event nodes and re-emit their input through uinput
    #[arg(long)]
    virtual_device: bool,
}

fn parse_hex_id(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid id {s:?}: {e}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(MonitorConfig::default_path);
    info!("Loading config from {:?}", config_path);
    let mut config = MonitorConfig::load(&config_path)?;
    merge_cli_devices(&cli, &mut config)?;
    if cli.virtual_device {
        config.virtual_device = true;
    }
    if config.devices.is_empty() {
        bail!("No devices configured (use --config or --event/--hidraw with --vid/--pid)");
    }

    let virtual_device: Option<Rc<dyn VirtualOutput>> = if config.virtual_device {
        let output = UinputOutput::new(&config.virtual_device_name)
            .context("Failed to create virtual device")?;
        info!("Created virtual device: {}", config.virtual_device_name);
        Some(Rc::new(output))
    } else {
        None
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })
    .ok();

    let reactor = Reactor::new();
    let opener = KernelOpener;

    let mut devices: Vec<(DeviceConnection, broadcast::Receiver<DeviceEvent>)> = Vec::new();
    for entry in &config.devices {
        let id = entry.device_id();
        let name = if entry.name.is_empty() {
            id.to_string()
        } else {
            entry.name.clone()
        };
        let mut device = DeviceConnection::new(id, name, virtual_device.clone());
        let events = device.subscribe();

        let candidates = entry.candidates();
        let connected = candidates
            .iter()
            .filter(|c| device.connect_candidate(c, &opener, &reactor))
            .count();
        info!(
            "{} ({}): {} of {} sub-devices connected{}",
            device.name(),
            id,
            connected,
            candidates.len(),
            if device.has_hidpp_support() {
                ", HID++ capable"
            } else {
                ""
            }
        );
        devices.push((device, events));
    }

    let timeout = u16::try_from(config.poll_interval_ms).unwrap_or(u16::MAX);
    info!("Entering main loop. Press Ctrl+C to exit.");
    while running.load(Ordering::SeqCst) {
        reactor.poll_once(timeout).context("poll failed")?;

        for (device, events) in devices.iter_mut() {
            drain_events(device, events);
        }
        if devices.iter().all(|(device, _)| device.sub_device_count() == 0) {
            warn!("No sub-devices left");
            break;
        }
    }

    info!("Shutting down");
    // Dropping the devices ungrabs and closes every node
    drop(devices);
    Ok(())
}

/// Add the `--event`/`--hidraw` nodes to the config's device list
fn merge_cli_devices(cli: &Cli, config: &mut MonitorConfig) -> Result<()> {
    if cli.events.is_empty() && cli.hidraws.is_empty() {
        return Ok(());
    }
    let (Some(vid), Some(pid)) = (cli.vid, cli.pid) else {
        bail!("--event/--hidraw need --vid and --pid");
    };

    let entry = config.device_mut(DeviceId::new(vid, pid));
    let nodes = cli
        .events
        .iter()
        .map(|p| (p, ConnectionType::Event))
        .chain(cli.hidraws.iter().map(|p| (p, ConnectionType::Hidraw)));
    for (path, kind) in nodes {
        entry.sub_devices.push(SubDeviceEntry {
            path: path.clone(),
            kind,
        });
    }
    Ok(())
}

fn drain_events(device: &mut DeviceConnection, events: &mut broadcast::Receiver<DeviceEvent>) {
    loop {
        match events.try_recv() {
            Ok(DeviceEvent::SubDeviceReadError { path, errno, .. }) => {
                warn!(
                    "Read error on {}: {}",
                    path,
                    std::io::Error::from_raw_os_error(errno)
                );
                device.remove_sub_device(&path);
            }
            Ok(DeviceEvent::SubDeviceFlagsChanged { path, flags, .. }) => {
                info!("{}: flags now {:?}", path, flags);
            }
            Ok(event) => debug!("{:?}", event),
            Err(TryRecvError::Lagged(n)) => warn!("Missed {} device events", n),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}
