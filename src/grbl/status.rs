//! Real-time status reports (`<Idle|MPos:0.000,0.000,0.000|FS:0,0>`).
//!
//! Field layout follows the GRBL 1.1 interface document. Only the fields the
//! driver acts on are typed; anything else is kept verbatim in `extra`.

use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum StatusParseError {
    #[error("status report is empty")]
    Empty,
    #[error("unknown machine state '{0}'")]
    UnknownState(String),
    #[error("status report has no MPos or WPos field")]
    MissingPosition,
    #[error("invalid number in field '{0}'")]
    BadNumber(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MachineState {
    Idle,
    Run,
    Hold(u8),
    Jog,
    Alarm,
    Door(u8),
    Check,
    Home,
    Sleep,
}

impl MachineState {
    /// True while GRBL is still executing motion.
    pub fn is_moving(&self) -> bool {
        matches!(self, MachineState::Run | MachineState::Jog | MachineState::Home)
    }
}

impl FromStr for MachineState {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, sub) = match s.split_once(':') {
            Some((name, sub)) => {
                let sub = sub
                    .parse::<u8>()
                    .map_err(|_| StatusParseError::UnknownState(s.to_string()))?;
                (name, sub)
            }
            None => (s, 0),
        };
        match name {
            "Idle" => Ok(MachineState::Idle),
            "Run" => Ok(MachineState::Run),
            "Hold" => Ok(MachineState::Hold(sub)),
            "Jog" => Ok(MachineState::Jog),
            "Alarm" => Ok(MachineState::Alarm),
            "Door" => Ok(MachineState::Door(sub)),
            "Check" => Ok(MachineState::Check),
            "Home" => Ok(MachineState::Home),
            "Sleep" => Ok(MachineState::Sleep),
            _ => Err(StatusParseError::UnknownState(s.to_string())),
        }
    }
}

/// Position as reported, in millimetres. GRBL sends one or the other
/// depending on `$10`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Position {
    Machine(Vec<f64>),
    Work(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub state: MachineState,
    pub position: Position,
    pub work_offset: Option<Vec<f64>>,
    pub feed: Option<f64>,
    pub spindle: Option<f64>,
    pub extra: Vec<(String, String)>,
}

impl StatusReport {
    /// Parse a report, with or without its enclosing angle brackets.
    pub fn parse(line: &str) -> Result<Self, StatusParseError> {
        let body = line.trim();
        let body = body.strip_prefix('<').unwrap_or(body);
        let body = body.strip_suffix('>').unwrap_or(body);

        let mut fields = body.split('|');
        let state = match fields.next() {
            Some(s) if !s.is_empty() => s.parse::<MachineState>()?,
            _ => return Err(StatusParseError::Empty),
        };

        let mut position = None;
        let mut work_offset = None;
        let mut feed = None;
        let mut spindle = None;
        let mut extra = Vec::new();

        for field in fields {
            let Some((key, value)) = field.split_once(':') else {
                extra.push((field.to_string(), String::new()));
                continue;
            };
            match key {
                "MPos" => position = Some(Position::Machine(parse_list(field, value)?)),
                "WPos" => position = Some(Position::Work(parse_list(field, value)?)),
                "WCO" => work_offset = Some(parse_list(field, value)?),
                "F" => feed = Some(parse_number(field, value)?),
                "FS" => {
                    let values = parse_list(field, value)?;
                    feed = values.first().copied();
                    spindle = values.get(1).copied();
                }
                _ => extra.push((key.to_string(), value.to_string())),
            }
        }

        Ok(Self {
            state,
            position: position.ok_or(StatusParseError::MissingPosition)?,
            work_offset,
            feed,
            spindle,
            extra,
        })
    }

    /// Machine coordinates in millimetres. A `WPos` report can only be
    /// converted when it carried a `WCO` field.
    pub fn machine_position(&self) -> Option<Vec<f64>> {
        match &self.position {
            Position::Machine(pos) => Some(pos.clone()),
            Position::Work(pos) => {
                let offset = self.work_offset.as_ref()?;
                Some(pos.iter().zip(offset).map(|(p, o)| p + o).collect())
            }
        }
    }
}

fn parse_number(field: &str, value: &str) -> Result<f64, StatusParseError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| StatusParseError::BadNumber(field.to_string()))
}

fn parse_list(field: &str, value: &str) -> Result<Vec<f64>, StatusParseError> {
    value.split(',').map(|v| parse_number(field, v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_with_machine_position() {
        let report = StatusReport::parse("<Idle|MPos:1.000,-2.500,0.200|FS:0,0>").unwrap();
        assert_eq!(report.state, MachineState::Idle);
        assert_eq!(report.position, Position::Machine(vec![1.0, -2.5, 0.2]));
        assert_eq!(report.feed, Some(0.0));
        assert_eq!(report.spindle, Some(0.0));
    }

    #[test]
    fn test_hold_substate_and_extra_fields() {
        let report = StatusReport::parse("<Hold:1|MPos:0.000,0.000,0.000|Bf:15,128|Pn:Z>").unwrap();
        assert_eq!(report.state, MachineState::Hold(1));
        assert_eq!(report.extra.len(), 2);
        assert_eq!(report.extra[1], ("Pn".to_string(), "Z".to_string()));
    }

    #[test]
    fn test_work_position_needs_offset() {
        let report = StatusReport::parse("<Run|WPos:1.000,1.000,1.000|F:500>").unwrap();
        assert!(report.state.is_moving());
        assert_eq!(report.feed, Some(500.0));
        assert_eq!(report.machine_position(), None);

        let report = StatusReport::parse("<Run|WPos:1.000,1.000,1.000|WCO:0.500,0.000,-1.000>").unwrap();
        assert_eq!(report.machine_position(), Some(vec![1.5, 1.0, 0.0]));
    }

    #[test]
    fn test_grbl_0_9_comma_separated_report_is_rejected() {
        assert!(StatusReport::parse("<Idle,MPos:0.000,0.000,0.000>").is_err());
    }

    #[test]
    fn test_invalid_reports() {
        assert_eq!(StatusReport::parse("<>"), Err(StatusParseError::Empty));
        assert_eq!(
            StatusReport::parse("<Idle|FS:0,0>"),
            Err(StatusParseError::MissingPosition)
        );
        assert!(matches!(
            StatusReport::parse("<Idle|MPos:a,b,c>"),
            Err(StatusParseError::BadNumber(_))
        ));
    }
}
