//! Entry Dispatcher (spec §4.8): selects between device-capture mode and
//! AirPlay mode and validates arguments.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use mirror_capture::CliDeviceBackend;
use mirror_core::{wire, DeviceId};
use mirror_process::Supervisor;
use mirror_protocol::FrameWriter;

/// Streams captured iOS screenshots, or AirPlay-mirrored frames, to stdout
/// as a length-prefixed frame protocol.
#[derive(Parser, Debug)]
#[command(name = "mirror", version, about)]
struct Cli {
    /// Device UDID to capture from. Required unless `--airplay` is given.
    udid: Option<String>,

    /// Mirror via AirPlay instead of direct device capture.
    #[arg(long)]
    airplay: bool,
}

fn main() {
    mirror_core::init_logging();

    let exit_code = match run() {
        Ok(code) => code,
        Err(e) => {
            wire::error(format!("{e:#}"));
            1
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let supervisor = Arc::new(Supervisor::new());
    mirror_process::install_termination_handler(Arc::clone(&supervisor));

    let stdout = std::io::stdout();
    let mut writer = FrameWriter::new(stdout.lock());

    if cli.airplay {
        tracing::info!("Starting in AirPlay mode");
        return Ok(mirror_airplay::run(&mut writer, &supervisor));
    }

    let Some(udid) = cli.udid else {
        eprintln!("usage: mirror <udid> | mirror --airplay");
        return Ok(1);
    };

    let device = DeviceId::new(udid);
    tracing::info!(device = %device, "Starting device capture");
    let backend = CliDeviceBackend;
    Ok(mirror_capture::run_ladder(&device, &backend, &mut writer))
}
