//! # Driver Configuration
//!
//! Serial line parameters, per-axis scaling and limits, and the global GRBL
//! settings the machine is expected to carry.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyACM0"
//! baud = 115200
//! timeout_ms = 2000
//!
//! [axes.Y]
//! steps_per_mm = 1000.0
//! max_rate = 6400.0
//! acceleration = 5000.0
//!
//! [axes.Z]
//! default_rate = 3200.0
//! min_steps = 0
//! max_steps = 150000
//!
//! [grbl.global]
//! "21" = 0
//! "22" = 1
//! ```
//!
//! - Axis tables are keyed by GRBL axis letter (X, Y, Z, A); only listed axes are usable.
//! - Rates are in steps/s and acceleration in steps/s². They are converted to
//!   GRBL's mm-based `$11x`/`$12x` settings using `steps_per_mm`.
//! - `[grbl.global]` entries are merged over the built-in defaults.

use crate::grbl::Axis;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level driver configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default = "default_axes")]
    pub axes: BTreeMap<String, AxisConfig>,
    #[serde(default)]
    pub grbl: GrblConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            axes: default_axes(),
            grbl: GrblConfig::default(),
        }
    }
}

/// Serial port and timing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    #[serde(default = "default_port")]
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// How long a command may wait for its acknowledgement.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Homing only acknowledges once the cycle has finished.
    #[serde(default = "default_homing_timeout_ms")]
    pub homing_timeout_ms: u64,
    /// Time GRBL needs to boot after the port opens and resets the board.
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
    /// Quiet period that ends a drain of stale input.
    #[serde(default = "default_drain_ms")]
    pub drain_ms: u64,
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn homing_timeout(&self) -> Duration {
        Duration::from_millis(self.homing_timeout_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn drain_window(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baud: default_baud(),
            timeout_ms: default_timeout_ms(),
            homing_timeout_ms: default_homing_timeout_ms(),
            startup_delay_ms: default_startup_delay_ms(),
            drain_ms: default_drain_ms(),
        }
    }
}

/// Scaling and limits of one stepper axis.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AxisConfig {
    /// Value programmed into `$10x`. 1000 makes one step 0.001 mm, the
    /// smallest increment GRBL resolves.
    #[serde(default = "default_steps_per_mm")]
    pub steps_per_mm: f64,
    /// Steps/s, programmed into `$11x` as a maximum rate.
    #[serde(default = "default_max_rate")]
    pub max_rate: f64,
    /// Steps/s², programmed into `$12x`.
    #[serde(default = "default_acceleration")]
    pub acceleration: f64,
    /// Steps/s used when a move does not specify a rate.
    #[serde(default = "default_max_rate")]
    pub default_rate: f64,
    #[serde(default)]
    pub min_steps: Option<i64>,
    #[serde(default)]
    pub max_steps: Option<i64>,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            steps_per_mm: default_steps_per_mm(),
            max_rate: default_max_rate(),
            acceleration: default_acceleration(),
            default_rate: default_max_rate(),
            min_steps: None,
            max_steps: None,
        }
    }
}

impl AxisConfig {
    pub fn validate(&self, axis: Axis) -> Result<(), ConfigError> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{} for axis {} must be > 0", name, axis)))
            }
        };
        positive("steps_per_mm", self.steps_per_mm)?;
        positive("max_rate", self.max_rate)?;
        positive("acceleration", self.acceleration)?;
        positive("default_rate", self.default_rate)?;
        if self.default_rate > self.max_rate {
            return Err(ConfigError::Invalid(format!(
                "default_rate for axis {} exceeds max_rate",
                axis
            )));
        }
        if let (Some(min), Some(max)) = (self.min_steps, self.max_steps) {
            if min >= max {
                return Err(ConfigError::Invalid(format!(
                    "min_steps must be below max_steps for axis {}",
                    axis
                )));
            }
        }
        Ok(())
    }

    /// Steps by which a reported position may differ from the true one.
    /// GRBL reports positions in mm with three decimals, so above
    /// 1000 steps/mm a report cannot resolve a single step.
    pub fn position_tolerance(&self) -> i64 {
        ((self.steps_per_mm * 0.0005).ceil() as i64).max(1)
    }

    /// Whether an absolute target lies within the soft travel limits.
    pub fn in_travel(&self, target: i64) -> bool {
        self.min_steps.is_none_or(|min| target >= min) && self.max_steps.is_none_or(|max| target <= max)
    }
}

/// Global (non-axis) GRBL settings, keyed by setting number.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GrblConfig {
    #[serde(default = "default_global_settings")]
    pub global: BTreeMap<String, f64>,
}

impl Default for GrblConfig {
    fn default() -> Self {
        Self {
            global: default_global_settings(),
        }
    }
}

impl Config {
    /// Configured axes, keyed by parsed axis.
    pub fn axis_configs(&self) -> Result<BTreeMap<Axis, AxisConfig>, ConfigError> {
        let mut axes = BTreeMap::new();
        for (name, axis_config) in &self.axes {
            let axis: Axis = name
                .parse()
                .map_err(|e: crate::grbl::UnknownAxis| ConfigError::Invalid(e.to_string()))?;
            axis_config.validate(axis)?;
            if axes.insert(axis, axis_config.clone()).is_some() {
                return Err(ConfigError::Invalid(format!("axis {} is configured twice", axis)));
            }
        }
        if axes.is_empty() {
            return Err(ConfigError::Invalid("at least one axis must be configured".to_string()));
        }
        Ok(axes)
    }

    /// Global settings merged over the defaults, keyed by setting number.
    /// Keys may be written with or without the leading `$`.
    pub fn global_settings(&self) -> Result<BTreeMap<u16, f64>, ConfigError> {
        let mut settings = BTreeMap::new();
        for source in [&default_global_settings(), &self.grbl.global] {
            for (key, value) in source {
                let number = key
                    .trim_start_matches('$')
                    .parse::<u16>()
                    .map_err(|_| ConfigError::Invalid(format!("'{}' is not a GRBL setting number", key)))?;
                if (100..=139).contains(&number) {
                    return Err(ConfigError::Invalid(format!(
                        "${} is an axis setting; configure it under [axes]",
                        number
                    )));
                }
                settings.insert(number, *value);
            }
        }
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.port.is_empty() {
            return Err(ConfigError::Invalid("serial port must not be empty".to_string()));
        }
        if self.serial.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be > 0".to_string()));
        }
        self.axis_configs()?;
        self.global_settings()?;
        Ok(())
    }
}

// Default value functions
fn default_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud() -> u32 { 115200 }
fn default_timeout_ms() -> u64 { 2000 }
fn default_homing_timeout_ms() -> u64 { 60_000 }
fn default_startup_delay_ms() -> u64 { 2000 }
fn default_drain_ms() -> u64 { 50 }
fn default_steps_per_mm() -> f64 { 1000.0 }
fn default_max_rate() -> f64 { 6400.0 }
fn default_acceleration() -> f64 { 5000.0 }

fn default_axes() -> BTreeMap<String, AxisConfig> {
    ["X", "Y", "Z"]
        .into_iter()
        .map(|name| (name.to_string(), AxisConfig::default()))
        .collect()
}

fn default_global_settings() -> BTreeMap<String, f64> {
    [
        ("1", 255.0), // never disable steppers when idle
        ("5", 1.0),   // normally-closed limit switches
        ("21", 0.0),  // hard limits off
        ("22", 1.0),  // homing cycle enabled
        ("24", 25.0), // homing feed, mm/min
        ("25", 300.0), // homing seek, mm/min
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Load and validate configuration from a TOML file at the given path.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path.display(), e);
        ConfigError::Io(e)
    })?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}
