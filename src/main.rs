// src/main.rs
//! Ping GPS Logger - command line driver

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use ping_gps_logger::{
    config::AppConfig,
    display::{terminal::fix_summary, TerminalDisplay},
    ports, GpsReader, RunController, StopReason, TransponderDriver,
};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ping-gps-logger", version, about = "GPS-tagged transponder ping logger")]
struct Cli {
    /// Config file (default: ~/.config/ping-gps-logger/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports (and HID devices when built with `hid`)
    Ports,
    /// Show the live GPS fix
    Monitor {
        #[command(flatten)]
        gps: GpsArgs,
    },
    /// Run a ping sequence
    Run {
        #[command(flatten)]
        gps: GpsArgs,
        #[command(flatten)]
        transponder: TransponderArgs,
        #[command(flatten)]
        run: RunArgs,
        /// Do not print the status screen
        #[arg(long)]
        no_display: bool,
    },
    /// Show the effective configuration
    Config {
        #[command(flatten)]
        gps: GpsArgs,
        #[command(flatten)]
        transponder: TransponderArgs,
        #[command(flatten)]
        run: RunArgs,
        /// Write the merged configuration back to the config file
        #[arg(long)]
        save: bool,
    },
}

#[derive(Args)]
struct GpsArgs {
    /// GPS serial port
    #[arg(long)]
    gps_port: Option<String>,
    /// GPS baud rate (Garmin 4800, GNSS 9600)
    #[arg(long)]
    gps_baud: Option<u32>,
}

#[derive(Args)]
struct TransponderArgs {
    /// Serial relay board port
    #[arg(long, conflicts_with = "hid")]
    relay_port: Option<String>,
    /// Serial relay board baud rate
    #[arg(long, default_value_t = 9600)]
    relay_baud: u32,
    /// USB HID relay board as VID:PID in hex, e.g. 16c0:05df
    #[arg(long, value_parser = parse_usb_id)]
    hid: Option<(u16, u16)>,
    /// Relay number wired to the transponder
    #[arg(long)]
    relay: Option<u8>,
    /// Time the relay stays closed per ping, in milliseconds
    #[arg(long)]
    dwell_ms: Option<u64>,
}

#[derive(Args)]
struct RunArgs {
    /// Directory for .ping files
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    ship: Option<String>,
    /// Transponder depth in meters
    #[arg(long)]
    depth: Option<String>,
    /// Seconds between pings
    #[arg(long)]
    interval: Option<f64>,
    /// Number of pings, 0 for no limit
    #[arg(long, allow_hyphen_values = true)]
    pings: Option<i64>,
    /// Seconds to wait before the first ping
    #[arg(long)]
    delay: Option<u32>,
    /// Run without a live GPS
    #[arg(long)]
    bypass_gps: bool,
}

fn parse_usb_id(value: &str) -> Result<(u16, u16), String> {
    let (vid, pid) = value
        .split_once(':')
        .ok_or_else(|| "expected VID:PID".to_string())?;
    let vid = u16::from_str_radix(vid, 16).map_err(|e| format!("bad vendor id: {}", e))?;
    let pid = u16::from_str_radix(pid, 16).map_err(|e| format!("bad product id: {}", e))?;
    Ok((vid, pid))
}

impl GpsArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = &self.gps_port {
            config.gps.port = Some(port.clone());
        }
        if let Some(baud) = self.gps_baud {
            config.gps.baud_rate = baud;
        }
    }
}

impl TransponderArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = &self.relay_port {
            config.update_transponder_serial(port.clone(), self.relay_baud);
        }
        if let Some((vid, pid)) = self.hid {
            config.update_transponder_hid(vid, pid);
        }
        if let Some(relay) = self.relay {
            config.transponder.relay = relay;
        }
        if let Some(dwell) = self.dwell_ms {
            config.transponder.dwell_ms = dwell;
        }
    }
}

impl RunArgs {
    fn apply(&self, config: &mut AppConfig) {
        let run = &mut config.run;
        if let Some(output) = &self.output {
            run.output_dir = output.clone();
        }
        if let Some(ship) = &self.ship {
            run.ship_name = ship.clone();
        }
        if let Some(depth) = &self.depth {
            run.transponder_depth = depth.clone();
        }
        if let Some(interval) = self.interval {
            run.ping_interval = interval;
        }
        if let Some(pings) = self.pings {
            run.number_of_pings = pings;
        }
        if let Some(delay) = self.delay {
            run.start_delay_seconds = delay;
        }
        if self.bypass_gps {
            config.bypass_gps = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => AppConfig::config_path()?,
    };
    let mut config = AppConfig::load_from(&config_path)?;

    match cli.command {
        Command::Ports => list_ports()?,
        Command::Monitor { gps } => {
            gps.apply(&mut config);
            monitor(config).await?;
        }
        Command::Run {
            gps,
            transponder,
            run,
            no_display,
        } => {
            gps.apply(&mut config);
            transponder.apply(&mut config);
            run.apply(&mut config);
            run_pings(config, !no_display).await?;
        }
        Command::Config {
            gps,
            transponder,
            run,
            save,
        } => {
            gps.apply(&mut config);
            transponder.apply(&mut config);
            run.apply(&mut config);
            println!("# {}", config_path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                config.save_to(&config_path)?;
                println!("Configuration saved.");
            }
        }
    }

    Ok(())
}

fn list_ports() -> anyhow::Result<()> {
    let serial = ports::list_serial_ports()?;
    if serial.is_empty() {
        println!("No serial ports found.");
    } else {
        println!("Available serial ports:");
        for port in serial {
            println!("  {} - {}", port.name, port.description);
        }
    }

    #[cfg(feature = "hid")]
    {
        println!("HID devices:");
        for device in ports::list_hid_devices()? {
            println!("  {} - {}", device.name, device.description);
        }
    }

    Ok(())
}

fn build_controller(config: &AppConfig) -> RunController {
    let gps = Arc::new(GpsReader::new(config.gps.clone()));
    let transponder = Arc::new(TransponderDriver::new(config.transponder.clone()));
    RunController::new(gps, transponder)
}

async fn monitor(config: AppConfig) -> anyhow::Result<()> {
    let port = config
        .gps
        .port
        .clone()
        .context("no GPS port given (use --gps-port or the config file)")?;
    let controller = build_controller(&config);
    controller.connect_gps(&port, config.gps.baud_rate).await?;

    let display = TerminalDisplay::gps_only();
    display.enter()?;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let snapshot = controller.snapshot();
                display.draw(&snapshot)?;
                if !snapshot.gps_running {
                    warn!("GPS read loop ended");
                    break;
                }
            }
        }
    }

    display.leave()?;
    info!("Last fix: {}", fix_summary(&controller.gps().fix()));
    controller.disconnect_gps().await;
    println!("\nShutting down...");
    Ok(())
}

async fn run_pings(config: AppConfig, show_display: bool) -> anyhow::Result<()> {
    let controller = build_controller(&config);

    match (&config.gps.port, config.bypass_gps) {
        (Some(port), bypass) => {
            if let Err(e) = controller.connect_gps(port, config.gps.baud_rate).await {
                if !bypass {
                    return Err(e.into());
                }
                warn!("GPS unavailable, continuing without it: {}", e);
            }
        }
        (None, true) => info!("Running without GPS"),
        (None, false) => bail!("no GPS port given (use --gps-port or --bypass-gps)"),
    }

    controller
        .connect_transponder()
        .await
        .context("could not connect transponder")?;

    let path = controller.start(config.run.clone(), config.bypass_gps).await?;
    println!("Logging pings to {}", path.display());

    let display = TerminalDisplay::new();
    if show_display {
        display.enter()?;
    }

    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut ticker = tokio::time::interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = commands.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "p" => controller.pause(),
                    "r" => controller.resume(),
                    "s" => break,
                    "" => {}
                    other => warn!("Unknown command {:?}", other),
                },
                // stdin closed; keep running until the run ends
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Error reading commands: {}", e);
                    stdin_open = false;
                }
            },
            _ = ticker.tick() => {
                let snapshot = controller.snapshot();
                if show_display {
                    display.draw(&snapshot)?;
                }
                if !snapshot.is_running {
                    break;
                }
            }
        }
    }

    if show_display {
        display.leave()?;
    }

    let before_stop = controller.state();
    controller.stop().await;
    let reason = controller
        .state()
        .last_stop_reason
        .unwrap_or(StopReason::Stopped);
    println!(
        "\nRun ended: {} after {} pings ({})",
        reason.description(),
        before_stop.ping_count,
        path.display()
    );

    controller.disconnect_transponder().await;
    controller.disconnect_gps().await;
    Ok(())
}
