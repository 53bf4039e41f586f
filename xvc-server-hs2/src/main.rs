//! # XVC Server for Digilent HS2 Adapters
//!
//! Exposes one or more FT2232H-based JTAG dongles to Xilinx tools over the
//! Xilinx Virtual Cable protocol. Each configured adapter gets its own
//! isolated instance — its own TCP port, its own device handle, its own
//! worker thread — so a wedged cable never takes a neighbor down with it.
//!
//! ```text
//! xvc-server-hs2 /etc/xvc-server/fleet.conf
//! xvc-server-hs2 -p 3000 -vv fleet.conf
//! ```
//!
//! A worker that dies of an adapter fault is restarted after a short delay;
//! `SIGTERM`/`SIGINT` stop the fleet. Exit status is 0 for a clean
//! shutdown and 1 for a startup failure.

mod backend;
mod config;
mod signals;

use std::error::Error;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;
use env_logger::Env;

use xvc_server::{Instance, InstanceConfig, Whitelist};

/// Delay before a crashed instance is restarted.
const RESTART_DELAY: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(about = "Xilinx Virtual Cable server for Digilent HS2 JTAG adapters", long_about = None)]
struct Args {
    /// INI configuration file describing the adapter fleet
    config: PathBuf,

    /// Override the base port; instance ports renumber from it
    #[arg(short, long)]
    port: Option<u16>,

    /// Raise verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let args = Args::parse();
    let filter = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter)).init();
    log::info!("xvc-server-hs2 starting");

    if let Err(e) = signals::install() {
        log::error!("cannot install signal handlers: {}", e);
        return 1;
    }

    let mut settings = match config::load(&args.config) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("{}", e);
            return 1;
        }
    };
    if let Some(port) = args.port {
        settings.base_port = port;
        for spec in settings.instances.iter_mut() {
            spec.port = port.saturating_add(spec.id as u16 - 1);
        }
    }
    if settings.instances.is_empty() {
        log::error!("no instances enabled in {}", args.config.display());
        return 1;
    }

    if settings.instances.len() == 1 {
        // One adapter runs on the main thread; its failure is our exit code.
        let spec = settings.instances.remove(0);
        log::info!("single instance mode");
        match run_instance(&spec, signals::running()) {
            Ok(()) => 0,
            Err(e) => {
                log::error!("instance {}: {}", spec.id, e);
                1
            }
        }
    } else {
        log::info!("starting {} instances", settings.instances.len());
        let mut workers = Vec::new();
        for spec in settings.instances {
            let name = format!("instance-{}", spec.id);
            match thread::Builder::new()
                .name(name.clone())
                .spawn(move || supervise(spec))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => log::error!("cannot start {}: {}", name, e),
            }
        }
        for worker in workers {
            let _ = worker.join();
        }
        log::info!("shutdown complete");
        0
    }
}

/// Keeps one instance alive: run, and on an adapter fault reopen and rerun
/// after a short delay, until shutdown.
fn supervise(spec: config::InstanceSpec) {
    let running = signals::running();
    while running.load(Ordering::SeqCst) {
        match run_instance(&spec, running) {
            Ok(()) => break,
            Err(e) => {
                log::error!("instance {} died: {}", spec.id, e);
                thread::sleep(RESTART_DELAY);
            }
        }
    }
}

fn run_instance(spec: &config::InstanceSpec, running: &AtomicBool) -> Result<(), Box<dyn Error>> {
    log::info!(
        "instance {}: port {}, device {}",
        spec.id,
        spec.port,
        spec.selector
    );

    let initial_hz = if spec.frequency_hz > 0 {
        spec.frequency_hz
    } else {
        config::DEFAULT_FREQUENCY_HZ
    };
    let cable = backend::Hs2Cable::open(
        &spec.selector,
        Duration::from_millis(spec.latency_ms as u64),
        initial_hz,
    )?;

    let mut whitelist = Whitelist::new(spec.whitelist_mode);
    for (entry, block) in &spec.whitelist {
        if let Err(e) = whitelist.add(entry, *block) {
            log::warn!("instance {}: {}", spec.id, e);
        }
    }

    let config = InstanceConfig {
        bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        port: spec.port,
        vector_cap_bytes: spec.vector_cap_bytes as usize,
        fixed_frequency_hz: (spec.frequency_hz > 0).then_some(spec.frequency_hz),
        client_lock_timeout: Duration::from_secs(spec.client_lock_timeout_s as u64),
        rw_timeout: Duration::from_secs(30),
    };
    Instance::new(cable, config, whitelist).run(running)?;
    Ok(())
}
