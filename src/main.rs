//! Headless lightpath viewer.
//!
//! Loads a simulated device set from a configuration file, builds the beamline registry
//! and prints the rows a display would show for the selected destination.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lightpath::config::LightpathConfig;
use lightpath::path::PathEvent;
use lightpath::view::{MpsIndicator, PathRow};

#[derive(Parser, Debug)]
#[command(name = "lightpath", about = "Show where the beam stops along a beamline")]
struct Args {
    /// Configuration file describing the devices
    #[arg(short, long, default_value = "config/lightpath.toml")]
    config: PathBuf,

    /// Destination beamline (defaults to the configured or most upstream one)
    #[arg(short, long)]
    beamline: Option<String>,

    /// Hide devices on upstream beamlines
    #[arg(long)]
    no_upstream: bool,

    /// Only show protection-system devices
    #[arg(long)]
    mps_only: bool,

    /// Remove a device before printing (repeatable)
    #[arg(long = "remove", value_name = "DEVICE")]
    remove: Vec<String>,

    /// Print rows as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = LightpathConfig::load_from(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lightpath={}", config.application.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(name = %config.application.name, "Starting lightpath");
    let light = config.build_controller();

    let requested = args.beamline.as_deref().or(config.view.beamline.as_deref());
    let Some(destination) = light.default_destination(requested) else {
        warn!("No beamlines configured");
        return Ok(());
    };
    let upstream = config.view.upstream && !args.no_upstream;
    let mps_only = config.view.mps_only || args.mps_only;

    let beamline = light.beamline(destination)?;
    let path = beamline.path();
    path.subscribe(
        Arc::new(|event: &PathEvent| {
            info!(beamline = %event.beamline, kind = ?event.kind, "Path changed");
        }),
        None,
    );

    for name in &args.remove {
        if let Err(err) = light.remove(name) {
            warn!(device = %name, error = %err, "Could not remove device");
        }
    }

    let rows = light.rows(destination, upstream, mps_only)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        print_table(destination, &rows);
        let snapshot = path.snapshot();
        println!();
        println!(
            "Impediment: {}",
            snapshot.impediment.as_deref().unwrap_or("none (beam reaches the end)")
        );
    }
    Ok(())
}

fn print_table(destination: &str, rows: &[PathRow]) {
    println!("Destination: {}", destination);
    println!(
        "{:<4} {:<24} {:<8} {:>8}  {:<12} {:<9} {}",
        "", "Device", "Line", "z", "State", "MPS", "Action"
    );
    for row in rows {
        let beam = if row.lit { "==" } else { "  " };
        let mps = match row.mps {
            MpsIndicator::NotMember => "",
            MpsIndicator::Clear => "ok",
            MpsIndicator::Tripped => "TRIPPED",
            MpsIndicator::Faulted => "faulted",
        };
        let action = if row.removable { "[Remove]" } else { "" };
        println!(
            "{:<4} {:<24} {:<8} {:>8.2}  {:<12} {:<9} {}",
            beam, row.name, row.beamline, row.z, row.state, mps, action
        );
    }
}
