//! list_devices - probe local capture devices
//!
//! Prints the capture devices that open successfully, plus the resolution
//! and frame rate presets the capture settings UI offers.

use anyhow::Result;
use clap::Parser;

use camwatch::config::{RESOLUTION_PRESETS, SUPPORTED_FPS};
use camwatch::source::enumerate_devices;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Highest device index to probe (exclusive).
    #[arg(long, default_value_t = 5)]
    max_probe: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let devices = enumerate_devices(args.max_probe);
    if devices.is_empty() {
        println!(
            "no capture devices found (probing real hardware requires the source-v4l2 feature)"
        );
    } else {
        for device in &devices {
            println!("{}: {} ({})", device.index, device.path, device.description);
        }
    }

    let resolutions: Vec<String> = RESOLUTION_PRESETS
        .iter()
        .map(|(w, h)| format!("{w}x{h}"))
        .collect();
    let rates: Vec<String> = SUPPORTED_FPS.iter().map(|fps| fps.to_string()).collect();
    println!("resolution presets: {}", resolutions.join(", "));
    println!("frame rate presets: {}", rates.join(", "));
    Ok(())
}
