//! Host-side driver for stepper motors controlled by GRBL.
//!
//! GRBL does the motion planning, acceleration and step generation on the
//! microcontroller. This crate opens the serial line, translates step-based
//! requests into GRBL commands and reports GRBL's answers. Converting steps
//! to millimetres or degrees is left to the caller.
//!
//! ```no_run
//! use grbl_motors::{config, Axis, GrblDriver};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = config::load_config("grbl.toml")?;
//! let driver = GrblDriver::connect(&config).await?;
//! driver.move_steps(Axis::X, 200, Some(500.0)).await?;
//! driver.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod communication;
pub mod config;
pub mod driver;
pub mod grbl;

pub use communication::{MockChannel, SerialChannel, SerialPortChannel};
pub use config::{AxisConfig, Config, ConfigError, SerialConfig};
pub use driver::{DriverError, GrblDriver};
pub use grbl::{Axis, GrblResponse, MachineState, MotionCommand, StatusReport};
