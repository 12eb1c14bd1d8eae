// src/grbl/response.rs - Classification of lines received from GRBL
use super::status::StatusReport;

/// One line received from GRBL.
#[derive(Debug, Clone, PartialEq)]
pub enum GrblResponse {
    Ok,
    /// `error:N`. The code is `None` for pre-1.1 firmware, which sends text.
    Error(Option<u8>),
    /// `ALARM:N`, same convention as `Error`.
    Alarm(Option<u8>),
    Status(StatusReport),
    Setting { number: u16, value: f64 },
    Greeting(String),
    /// Bracketed feedback such as `[MSG:Caution: Unlocked]`.
    Feedback(String),
    Unknown(String),
}

impl GrblResponse {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line == "ok" {
            return GrblResponse::Ok;
        }
        if let Some(code) = line.strip_prefix("error:") {
            return GrblResponse::Error(code.trim().parse().ok());
        }
        if let Some(code) = line.strip_prefix("ALARM:") {
            return GrblResponse::Alarm(code.trim().parse().ok());
        }
        if line.starts_with('<') && line.ends_with('>') {
            return match StatusReport::parse(line) {
                Ok(report) => GrblResponse::Status(report),
                Err(e) => {
                    tracing::warn!("Unparseable status report '{}': {}", line, e);
                    GrblResponse::Unknown(line.to_string())
                }
            };
        }
        if let Some(setting) = parse_setting(line) {
            return setting;
        }
        if let Some(rest) = line.strip_prefix("Grbl ") {
            let version = rest.split_whitespace().next().unwrap_or_default();
            return GrblResponse::Greeting(version.to_string());
        }
        if let Some(inner) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            return GrblResponse::Feedback(inner.to_string());
        }
        GrblResponse::Unknown(line.to_string())
    }

    /// Lines GRBL may emit at any time, which never answer a command.
    pub fn is_unsolicited(&self) -> bool {
        matches!(
            self,
            GrblResponse::Greeting(_) | GrblResponse::Feedback(_) | GrblResponse::Unknown(_)
        )
    }
}

// `$100=250.000`, optionally followed by a pre-1.1 comment such as `(x, step/mm)`.
fn parse_setting(line: &str) -> Option<GrblResponse> {
    let (key, value) = line.strip_prefix('$')?.split_once('=')?;
    let number = key.parse::<u16>().ok()?;
    let value = value.split_whitespace().next()?.parse::<f64>().ok()?;
    Some(GrblResponse::Setting { number, value })
}

/// Human-readable text for a GRBL 1.1 error code.
pub fn error_description(code: u8) -> &'static str {
    match code {
        1 => "G-code words consist of a letter and a value. Letter was not found.",
        2 => "Numeric value format is not valid or missing an expected value.",
        3 => "Grbl '$' system command was not recognized or supported.",
        4 => "Negative value received for an expected positive value.",
        5 => "Homing cycle is not enabled via settings.",
        6 => "Minimum step pulse time must be greater than 3usec.",
        7 => "EEPROM read failed. Reset and restored to default values.",
        8 => "Grbl '$' command cannot be used unless Grbl is IDLE.",
        9 => "G-code locked out during alarm or jog state.",
        10 => "Soft limits cannot be enabled without homing also enabled.",
        11 => "Max characters per line exceeded. Line was not processed and executed.",
        12 => "Grbl '$' setting value exceeds the maximum step rate supported.",
        13 => "Safety door detected as opened and door state initiated.",
        14 => "Build info or startup line exceeded EEPROM line length limit.",
        15 => "Jog target exceeds machine travel. Command ignored.",
        16 => "Jog command with no '=' or contains prohibited g-code.",
        17 => "Laser mode disabled. Requires PWM output.",
        20 => "Unsupported or invalid g-code command found in block.",
        21 => "More than one g-code command from same modal group found in block.",
        22 => "Feed rate has not yet been set or is undefined.",
        23 => "G-code command in block requires an integer value.",
        24 => "Two G-code commands that both require the use of the XYZ axis words were detected in the block.",
        25 => "A G-code word was repeated in the block.",
        26 => "A G-code command requires XYZ axis words in the block, but none were detected.",
        27 => "N line number value is not within the valid range of 1 - 9,999,999.",
        28 => "A G-code command was sent, but is missing some required P or L value words in the line.",
        29 => "Grbl supports six work coordinate systems G54-G59. G59.1, G59.2, and G59.3 are not supported.",
        30 => "The G53 G-code command requires either a G0 seek or G1 feed motion mode to be active.",
        31 => "There are unused axis words in the block and G80 motion mode cancel is active.",
        32 => "A G2 or G3 arc was commanded but there are no XYZ axis words in the selected plane.",
        33 => "The motion command has an invalid target.",
        34 => "A G2 or G3 arc, traced with the radius definition, had a mathematical error.",
        35 => "A G2 or G3 arc, traced with the offset definition, is missing the IJK offset word.",
        36 => "There are unused, leftover G-code words that aren't used by any command in the block.",
        37 => "The G43.1 dynamic tool length offset command cannot apply an offset to an axis other than its configured axis.",
        38 => "Tool number greater than max supported value.",
        _ => "Unknown error.",
    }
}

/// Human-readable text for a GRBL 1.1 alarm code.
pub fn alarm_description(code: u8) -> &'static str {
    match code {
        1 => "Hard limit triggered. Machine position is likely lost. Re-homing is highly recommended.",
        2 => "Motion target exceeds machine travel. Machine position safely retained.",
        3 => "Reset while in motion. Lost steps are likely. Re-homing is highly recommended.",
        4 => "Probe fail. The probe is not in the expected initial state.",
        5 => "Probe fail. Probe did not contact the workpiece within the programmed travel.",
        6 => "Homing fail. Reset during active homing cycle.",
        7 => "Homing fail. Safety door was opened during active homing cycle.",
        8 => "Homing fail. Cycle failed to clear limit switch when pulling off.",
        9 => "Homing fail. Could not find limit switch within search distance.",
        _ => "Unknown alarm.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grbl::status::MachineState;

    #[test]
    fn test_acknowledgements() {
        assert_eq!(GrblResponse::parse("ok\r"), GrblResponse::Ok);
        assert_eq!(GrblResponse::parse("error:9"), GrblResponse::Error(Some(9)));
        assert_eq!(
            GrblResponse::parse("error: Bad number format"),
            GrblResponse::Error(None)
        );
        assert_eq!(GrblResponse::parse("ALARM:1"), GrblResponse::Alarm(Some(1)));
    }

    #[test]
    fn test_status_line() {
        match GrblResponse::parse("<Alarm|MPos:0.000,0.000,0.000|FS:0,0>") {
            GrblResponse::Status(report) => assert_eq!(report.state, MachineState::Alarm),
            other => panic!("expected status, got {:?}", other),
        }
    }

    #[test]
    fn test_settings_lines() {
        assert_eq!(
            GrblResponse::parse("$100=1000.000"),
            GrblResponse::Setting { number: 100, value: 1000.0 }
        );
        assert_eq!(
            GrblResponse::parse("$1=255 (step idle delay, msec)"),
            GrblResponse::Setting { number: 1, value: 255.0 }
        );
        assert_eq!(GrblResponse::parse("$X"), GrblResponse::Unknown("$X".to_string()));
    }

    #[test]
    fn test_unsolicited_lines() {
        let greeting = GrblResponse::parse("Grbl 1.1h ['$' for help]");
        assert_eq!(greeting, GrblResponse::Greeting("1.1h".to_string()));
        assert!(greeting.is_unsolicited());

        let msg = GrblResponse::parse("[MSG:'$H'|'$X' to unlock]");
        assert_eq!(msg, GrblResponse::Feedback("MSG:'$H'|'$X' to unlock".to_string()));
        assert!(msg.is_unsolicited());
        assert!(!GrblResponse::Ok.is_unsolicited());
    }

    #[test]
    fn test_descriptions() {
        assert!(error_description(9).contains("locked out"));
        assert!(alarm_description(1).contains("Hard limit"));
        assert_eq!(error_description(200), "Unknown error.");
    }
}
