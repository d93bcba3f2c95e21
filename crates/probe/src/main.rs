//! ceusb probe
//!
//! Drives the Windows CE style backend against the host's USB stack through
//! libusb. Useful for checking enumeration, session id stability and clock
//! worker behaviour on real hardware.

mod config;
mod usb;

use anyhow::{Context, Result, anyhow};
use api::{ClockId, DeviceAddress, DeviceRegistry, OsBackend, SessionId, Timestamp};
use backend::CeBackend;
use byteorder::{ByteOrder, LittleEndian};
use clap::{Parser, Subcommand};
use common::setup_logging;
use config::ProbeConfig;
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{info, warn};
use usb::HostPlatform;

type HostBackend = CeBackend<HostPlatform>;
type HostDevice = <HostBackend as OsBackend>::Device;

#[derive(Parser, Debug)]
#[command(name = "ceusb-probe")]
#[command(
    author,
    version,
    about = "ceusb probe - exercise the Windows CE backend on this host"
)]
#[command(long_about = "
Runs the Windows CE style USB backend on top of the host's libusb and reports
what it sees.

EXAMPLES:
    # List devices (enumerates twice to show stable session ids)
    ceusb-probe list

    # Same, as JSON
    ceusb-probe list --json

    # Hammer the monotonic clock from 16 threads
    ceusb-probe clock --threads 16 --samples 1000

CONFIGURATION:
    The probe looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/ceusb/probe.toml
    3. /etc/ceusb/probe.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Query the monotonic clock concurrently and report coalescing
    Clock {
        /// Number of querying threads
        #[arg(long, default_value_t = 8)]
        threads: usize,
        /// Queries per thread
        #[arg(long, default_value_t = 100)]
        samples: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ProbeConfig::default();
        let path = ProbeConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        ProbeConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ProbeConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.probe.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("ceusb probe v{}", env!("CARGO_PKG_VERSION"));

    let backend = Arc::new(CeBackend::new(HostPlatform::new(), config.backend()));
    backend.init().context("Failed to initialize backend")?;

    let result = match args.command.unwrap_or(Command::List { json: false }) {
        Command::List { json } => list_devices(&backend, json),
        Command::Clock { threads, samples } => measure_clock(&backend, threads, samples),
    };

    backend.exit();
    result
}

/// One enumerated device as printed by `list`
#[derive(Debug, Serialize)]
struct DeviceReport {
    session: SessionId,
    address: DeviceAddress,
    vendor_id: u16,
    product_id: u16,
    usb_version: u16,
    class: u8,
    num_configurations: u8,
    config_total_length: Option<u16>,
}

impl DeviceReport {
    fn new(backend: &HostBackend, device: &HostDevice) -> Self {
        let descriptor = device.descriptor();

        let mut header = [0u8; 9];
        let config_total_length = backend
            .get_active_config_descriptor(device, &mut header)
            .ok()
            .filter(|len| *len >= 4)
            .map(|_| LittleEndian::read_u16(&header[2..4]));

        Self {
            session: device.session(),
            address: device.address(),
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            usb_version: descriptor.usb_version(),
            class: descriptor.class_code(),
            num_configurations: descriptor.num_configurations(),
            config_total_length,
        }
    }
}

/// Enumerate twice and print the devices of the second scan
fn list_devices(backend: &HostBackend, json: bool) -> Result<()> {
    let registry = DeviceRegistry::new();
    let first = backend
        .get_device_list(&registry)
        .context("Failed to enumerate devices")?;
    let second = backend
        .get_device_list(&registry)
        .context("Failed to enumerate devices again")?;

    let reused = second
        .iter()
        .filter(|device| first.iter().any(|seen| Arc::ptr_eq(seen, device)))
        .count();
    info!(
        "second scan reused {} of {} device(s)",
        reused,
        second.len()
    );

    let reports: Vec<DeviceReport> = second
        .iter()
        .map(|device| DeviceReport::new(backend, device))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", reports.len());
    for report in &reports {
        println!(
            "  [session {}] {:04x}:{:04x} - USB {:x}.{:02x}, class {:#04x}",
            report.session.0,
            report.vendor_id,
            report.product_id,
            report.usb_version >> 8,
            report.usb_version & 0xff,
            report.class
        );
        println!(
            "      Bus {:03} Device {:03} Configurations: {}",
            report.address.bus_number, report.address.device_address, report.num_configurations
        );
        if let Some(total) = report.config_total_length {
            println!("      Active configuration: {} bytes", total);
        }
        println!();
    }

    Ok(())
}

/// Number of clock queries issued, saturating for absurd CLI values
fn total_queries(threads: usize, samples: usize) -> u64 {
    (threads as u64).saturating_mul(samples as u64)
}

/// Query the monotonic clock from several threads and print worker stats
fn measure_clock(backend: &Arc<HostBackend>, threads: usize, samples: usize) -> Result<()> {
    if threads == 0 || samples == 0 {
        return Err(anyhow!("--threads and --samples must be greater than 0"));
    }

    let started = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let backend = Arc::clone(backend);
            thread::spawn(move || -> Result<u64> {
                let mut previous = Timestamp::default();
                let mut regressions = 0;
                for _ in 0..samples {
                    let now = backend.clock_gettime(ClockId::Monotonic)?;
                    if now < previous {
                        regressions += 1;
                    }
                    previous = now;
                }
                Ok(regressions)
            })
        })
        .collect();

    let mut regressions = 0;
    for handle in handles {
        regressions += handle
            .join()
            .map_err(|_| anyhow!("clock thread panicked"))??;
    }
    let elapsed = started.elapsed();

    let stats = backend.clock_stats().unwrap_or_default();
    let requests = total_queries(threads, samples);
    println!("Clock queries:     {}", requests);
    println!("Counter reads:     {}", stats.hardware_reads);
    if stats.hardware_reads > 0 {
        println!(
            "Callers per read:  {:.2}",
            requests as f64 / stats.hardware_reads as f64
        );
    }
    println!("Elapsed:           {:?}", elapsed);
    println!(
        "Last sample:       {}",
        backend.clock_gettime(ClockId::Monotonic)?
    );

    if regressions > 0 {
        warn!("{} per-thread clock regressions observed", regressions);
    }
    Ok(())
}
