use crate::config::ConfigError;
use crate::grbl::{alarm_description, Axis, GrblResponse, SettingMismatch};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    /// GRBL rejected the command. Carries the line exactly as received.
    #[error("GRBL rejected command: {0}")]
    Device(String),
    #[error("No response from GRBL within {0:?}")]
    Timeout(Duration),
    /// GRBL entered an alarm state. Carries the `ALARM:` line, or the state
    /// name when the alarm was seen in a status report.
    #[error("GRBL alarm: {0}")]
    Alarm(String),
    #[error("Axis {0} is not configured")]
    InvalidAxis(Axis),
    #[error("Step count must be non-zero")]
    InvalidSteps,
    #[error("Invalid rate {rate} steps/s for axis {axis} (maximum {max})")]
    InvalidRate { axis: Axis, rate: f64, max: f64 },
    #[error("Target {target} steps is outside the travel limits of axis {axis}")]
    OutOfRange { axis: Axis, target: i64 },
    #[error("Axis {axis} stopped at {actual} steps, {expected} was requested")]
    MissedTarget { axis: Axis, expected: i64, actual: i64 },
    #[error("{} GRBL setting(s) differ from the configuration: {}", .0.len(), join(.0))]
    SettingMismatch(Vec<SettingMismatch>),
    #[error("Invalid command line '{0}'")]
    InvalidCommand(String),
    #[error("Unexpected response from GRBL: {0}")]
    Protocol(String),
    #[error("Serial port error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl DriverError {
    /// Numeric GRBL error code, when the firmware sent one.
    pub fn error_code(&self) -> Option<u8> {
        match self {
            DriverError::Device(raw) => match GrblResponse::parse(raw) {
                GrblResponse::Error(code) => code,
                _ => None,
            },
            _ => None,
        }
    }

    pub fn alarm_code(&self) -> Option<u8> {
        match self {
            DriverError::Alarm(raw) => match GrblResponse::parse(raw) {
                GrblResponse::Alarm(code) => code,
                _ => None,
            },
            _ => None,
        }
    }

    /// Whether the machine must be reset and unlocked before moving again.
    pub fn requires_reset(&self) -> bool {
        matches!(self, DriverError::Alarm(_))
    }

    pub(crate) fn alarm(raw: &str) -> Self {
        if let GrblResponse::Alarm(Some(code)) = GrblResponse::parse(raw) {
            tracing::error!("{} ({})", raw, alarm_description(code));
        } else {
            tracing::error!("GRBL alarm: {}", raw);
        }
        DriverError::Alarm(raw.to_string())
    }
}

fn join(mismatches: &[SettingMismatch]) -> String {
    mismatches
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_from_raw_lines() {
        let err = DriverError::Device("error:9".to_string());
        assert_eq!(err.error_code(), Some(9));
        assert_eq!(err.to_string(), "GRBL rejected command: error:9");

        let err = DriverError::Alarm("ALARM:1".to_string());
        assert_eq!(err.alarm_code(), Some(1));
        assert!(err.requires_reset());

        assert_eq!(DriverError::Alarm("Alarm".to_string()).alarm_code(), None);
    }

    #[test]
    fn test_setting_mismatch_message() {
        let err = DriverError::SettingMismatch(vec![
            SettingMismatch { number: 22, expected: 1.0, actual: Some(0.0) },
            SettingMismatch { number: 110, expected: 384.0, actual: None },
        ]);
        assert_eq!(
            err.to_string(),
            "2 GRBL setting(s) differ from the configuration: $22 is 0 but 1 is expected; $110 was not reported, 384 is expected"
        );
    }
}
