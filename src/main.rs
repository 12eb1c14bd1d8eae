// src/main.rs - Command-line host for a GRBL stepper controller
use clap::{Parser, Subcommand};
use grbl_motors::config::{self, Config};
use grbl_motors::{Axis, GrblDriver, SerialPortChannel};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "grbl-host", version, about = "Drive GRBL stepper axes in motor steps")]
struct Cli {
    /// TOML configuration file; built-in defaults are used if it does not exist
    #[arg(short, long, default_value = "grbl.toml")]
    config: PathBuf,

    /// Override the configured serial port
    #[arg(short, long)]
    port: Option<String>,

    /// Log every serial line
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List serial ports
    Ports,
    /// Move an axis by a signed number of steps
    Move {
        axis: Axis,
        #[arg(allow_negative_numbers = true)]
        steps: i64,
        /// Steps per second
        #[arg(long)]
        rate: Option<f64>,
        /// Wait for the motion to finish and check the final position
        #[arg(long)]
        wait: bool,
    },
    /// Move an axis to an absolute step position
    MoveTo {
        axis: Axis,
        #[arg(allow_negative_numbers = true)]
        target: i64,
        #[arg(long)]
        rate: Option<f64>,
    },
    /// Run the homing cycle of one axis
    Home { axis: Axis },
    /// Print the status report and axis positions in steps
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Emergency stop (soft reset, position may be lost)
    Stop,
    /// Feed hold, then reset once stopped
    ControlledStop,
    /// Soft reset
    Reset,
    /// Clear an alarm lock
    Unlock,
    /// Inspect or program GRBL's $ settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Debug, Subcommand)]
enum SettingsAction {
    Show,
    Write,
    Verify,
}

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
        .init();

    if let Command::Ports = cli.command {
        for port in SerialPortChannel::available_ports() {
            println!("{}", port);
        }
        return Ok(());
    }

    let mut config = if cli.config.exists() {
        tracing::info!("Loading configuration from: {}", cli.config.display());
        config::load_config(&cli.config)?
    } else {
        tracing::info!("{} not found, using default configuration", cli.config.display());
        Config::default()
    };
    if let Some(port) = cli.port {
        config.serial.port = port;
    }

    let driver = GrblDriver::connect(&config).await?;
    let result = run(&driver, cli.command).await;
    driver.close().await?;
    result
}

async fn run(
    driver: &GrblDriver,
    command: Command,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    match command {
        Command::Ports => {}
        Command::Move { axis, steps, rate, wait: true } => {
            let position = driver.move_and_wait(axis, steps, rate, POLL_INTERVAL).await?;
            println!("{} {}", axis, position);
        }
        Command::Move { axis, steps, rate, wait: false } => driver.move_steps(axis, steps, rate).await?,
        Command::MoveTo { axis, target, rate } => driver.move_to(axis, target, rate).await?,
        Command::Home { axis } => driver.home(axis).await?,
        Command::Status { json } => {
            let report = driver.status().await?;
            let positions = driver.positions().await?;
            if json {
                let steps: BTreeMap<String, i64> =
                    positions.iter().map(|(axis, steps)| (axis.to_string(), *steps)).collect();
                let output = serde_json::json!({
                    "status": report,
                    "steps": steps,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("State: {:?}", report.state);
                for (axis, steps) in positions {
                    println!("{} {}", axis, steps);
                }
            }
        }
        Command::Stop => driver.stop().await?,
        Command::ControlledStop => driver.controlled_stop(POLL_INTERVAL).await?,
        Command::Reset => driver.soft_reset().await?,
        Command::Unlock => driver.alarm_reset().await?,
        Command::Settings { action: SettingsAction::Show } => {
            for (number, value) in driver.read_settings().await?.iter() {
                println!("${}={}", number, value);
            }
        }
        Command::Settings { action: SettingsAction::Write } => {
            let written = driver.write_settings().await?;
            println!("{} setting(s) written", written);
        }
        Command::Settings { action: SettingsAction::Verify } => driver.verify_settings().await?,
    }
    Ok(())
}
