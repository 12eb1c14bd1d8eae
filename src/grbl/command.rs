// src/grbl/command.rs - Outgoing GRBL command lines
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Axes GRBL can drive. The discriminant is GRBL's axis index, used to
/// number the `$10x`/`$11x`/`$12x` settings and the position fields of a
/// status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
    A,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::X, Axis::Y, Axis::Z, Axis::A];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
            Axis::A => 3,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::A => 'A',
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown axis '{0}', expected one of X, Y, Z, A")]
pub struct UnknownAxis(pub String);

impl FromStr for Axis {
    type Err = UnknownAxis;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "X" => Ok(Axis::X),
            "Y" => Ok(Axis::Y),
            "Z" => Ok(Axis::Z),
            "A" => Ok(Axis::A),
            _ => Err(UnknownAxis(s.to_string())),
        }
    }
}

/// Distance mode of a move: `G91` offsets or `G90` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveMode {
    #[default]
    Relative,
    Absolute,
}

impl MoveMode {
    pub fn gcode(self) -> &'static str {
        match self {
            MoveMode::Relative => "G91",
            MoveMode::Absolute => "G90",
        }
    }
}

/// A single-axis motion request expressed in motor steps.
///
/// For relative moves the sign of `steps` is the direction. For absolute
/// moves `steps` is the target measured from the machine origin. `rate` is
/// in steps per second; `None` means the axis default.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionCommand {
    pub axis: Axis,
    pub steps: i64,
    pub rate: Option<f64>,
    pub mode: MoveMode,
}

impl MotionCommand {
    pub fn relative(axis: Axis, steps: i64, rate: Option<f64>) -> Self {
        Self { axis, steps, rate, mode: MoveMode::Relative }
    }

    pub fn absolute(axis: Axis, steps: i64, rate: Option<f64>) -> Self {
        Self { axis, steps, rate, mode: MoveMode::Absolute }
    }

    /// Render the command as one GRBL line (without terminator).
    ///
    /// GRBL only understands millimetres, so steps are divided by the
    /// `steps_per_mm` value programmed into `$10x` and the rate becomes a
    /// feed in mm/min. The distance keeps as many decimals as GRBL needs
    /// to land on the exact step count.
    pub fn to_gcode(&self, steps_per_mm: f64, default_rate: f64) -> String {
        let rate = self.rate.unwrap_or(default_rate);
        let feed = rate / steps_per_mm * 60.0;
        format!(
            "{} G1 {}{} F{:.3}",
            self.mode.gcode(),
            self.axis.letter(),
            format_distance(self.steps, steps_per_mm),
            feed
        )
    }
}

/// Most decimals a distance is ever written with.
pub const MAX_DISTANCE_DECIMALS: usize = 9;

/// Steps as millimetres, with the fewest decimals (at least three) that
/// GRBL converts back to exactly `steps` via `lround(mm * $10x)`.
pub fn format_distance(steps: i64, steps_per_mm: f64) -> String {
    let distance = steps as f64 / steps_per_mm;
    let mut text = format!("{:.3}", distance);
    for decimals in 4..=MAX_DISTANCE_DECIMALS {
        let resolves = text
            .parse::<f64>()
            .is_ok_and(|written| (written * steps_per_mm - steps as f64).abs() < 0.1);
        if resolves {
            break;
        }
        text = format!("{:.*}", decimals, distance);
    }
    text
}

/// Single-byte commands GRBL acts on immediately, outside the line
/// buffer. None of them is acknowledged with `ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Realtime {
    StatusQuery,
    FeedHold,
    CycleStart,
    SoftReset,
}

impl Realtime {
    pub fn byte(self) -> u8 {
        match self {
            Realtime::StatusQuery => b'?',
            Realtime::FeedHold => b'!',
            Realtime::CycleStart => b'~',
            Realtime::SoftReset => 0x18,
        }
    }
}

pub const WAKE_UP: &str = "\r\n\r\n";
pub const UNLOCK: &str = "$X";
pub const VIEW_SETTINGS: &str = "$$";

/// Single-axis homing cycle. Requires GRBL built with `HOMING_SINGLE_AXIS_COMMANDS`.
pub fn home_axis(axis: Axis) -> String {
    format!("$H{}", axis.letter())
}

/// `$N=V` setting write. Whole numbers are sent without decimals so that
/// integer-only settings such as `$1` or `$22` are accepted.
pub fn write_setting(number: u16, value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e9 {
        format!("${}={}", number, value as i64)
    } else {
        format!("${}={:.3}", number, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_move_line() {
        let cmd = MotionCommand::relative(Axis::X, 200, Some(500.0));
        assert_eq!(cmd.to_gcode(1000.0, 6400.0), "G91 G1 X0.200 F30.000");
    }

    #[test]
    fn test_negative_steps_reverse_direction() {
        let cmd = MotionCommand::relative(Axis::Z, -1500, Some(1000.0));
        assert_eq!(cmd.to_gcode(1000.0, 6400.0), "G91 G1 Z-1.500 F60.000");
    }

    #[test]
    fn test_default_rate_used_when_missing() {
        let cmd = MotionCommand::relative(Axis::Y, 1, None);
        assert_eq!(cmd.to_gcode(1000.0, 6400.0), "G91 G1 Y0.001 F384.000");
    }

    #[test]
    fn test_absolute_move_line() {
        let cmd = MotionCommand::absolute(Axis::A, 0, Some(100.0));
        assert_eq!(cmd.to_gcode(100.0, 6400.0), "G90 G1 A0.000 F60.000");
    }

    #[test]
    fn test_fine_resolution_keeps_every_step() {
        assert_eq!(format_distance(1, 4000.0), "0.00025");
        assert_eq!(format_distance(3, 4000.0), "0.00075");
        assert_eq!(format_distance(4001, 4000.0), "1.00025");
        assert_eq!(format_distance(4000, 4000.0), "1.000");
        assert_eq!(format_distance(1, 250.0), "0.004");
        assert_eq!(format_distance(-3, 3200.0), "-0.00094");
    }

    #[test]
    fn test_axis_parsing() {
        assert_eq!("x".parse::<Axis>().unwrap(), Axis::X);
        assert_eq!(" A ".parse::<Axis>().unwrap(), Axis::A);
        assert!("E".parse::<Axis>().is_err());
        assert_eq!(Axis::Z.index(), 2);
    }

    #[test]
    fn test_setting_lines() {
        assert_eq!(write_setting(22, 1.0), "$22=1");
        assert_eq!(write_setting(110, 384.0), "$110=384");
        assert_eq!(write_setting(120, 5.25), "$120=5.250");
        assert_eq!(home_axis(Axis::Z), "$HZ");
    }
}
