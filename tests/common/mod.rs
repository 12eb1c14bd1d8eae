// Shared fixtures for driver integration tests
#![allow(dead_code)]

use grbl_motors::{Config, GrblDriver, MockChannel};
use std::collections::BTreeMap;

/// Short timeouts so that timeout tests finish quickly.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.serial.timeout_ms = 100;
    config.serial.homing_timeout_ms = 300;
    config.serial.startup_delay_ms = 0;
    config.serial.drain_ms = 20;
    config
}

pub fn driver_with(channel: MockChannel) -> GrblDriver<MockChannel> {
    GrblDriver::with_channel(channel, &test_config()).unwrap()
}

/// Minimal behavioural model of GRBL 1.1 for the commands the driver sends.
#[derive(Debug, Clone)]
pub struct FakeGrbl {
    pub position: [f64; 4],
    /// Status polls answered with `Run` after each move.
    pub run_polls_per_move: u32,
    pub run_polls: u32,
    /// When false, moves are acknowledged but the axes never go anywhere.
    pub moves: bool,
    pub settings: BTreeMap<u16, f64>,
}

impl Default for FakeGrbl {
    fn default() -> Self {
        Self {
            position: [0.0; 4],
            run_polls_per_move: 2,
            run_polls: 0,
            moves: true,
            settings: BTreeMap::new(),
        }
    }
}

impl FakeGrbl {
    pub fn with_settings(settings: impl IntoIterator<Item = (u16, f64)>) -> Self {
        Self { settings: settings.into_iter().collect(), ..Self::default() }
    }

    pub fn into_channel(mut self) -> MockChannel {
        MockChannel::with_responder(move |line| self.respond(line))
    }

    pub fn respond(&mut self, line: &str) -> Vec<String> {
        let line = line.trim();
        match line {
            "" | "!" | "~" => vec![],
            "?" => {
                let state = if self.run_polls > 0 {
                    self.run_polls -= 1;
                    "Run"
                } else {
                    "Idle"
                };
                vec![format!("<{}|MPos:{}|FS:0,0>", state, self.machine_position())]
            }
            "\u{18}" => vec!["Grbl 1.1h ['$' for help]".to_string()],
            "$$" => {
                let mut lines: Vec<String> = self
                    .settings
                    .iter()
                    .map(|(n, v)| format!("${}={:.3}", n, v))
                    .collect();
                lines.push("ok".to_string());
                lines
            }
            "$X" => vec!["[MSG:Caution: Unlocked]".to_string(), "ok".to_string()],
            l if l.starts_with("$H") => vec!["ok".to_string()],
            l if l.starts_with('$') => match parse_setting(l) {
                Some((number, value)) => {
                    self.settings.insert(number, value);
                    vec!["ok".to_string()]
                }
                None => vec!["error:3".to_string()],
            },
            l if l.starts_with("G90") || l.starts_with("G91") => {
                if self.apply_move(l) {
                    vec!["ok".to_string()]
                } else {
                    vec!["error:20".to_string()]
                }
            }
            _ => vec!["error:20".to_string()],
        }
    }

    fn apply_move(&mut self, line: &str) -> bool {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some(target) = words.get(2) else { return false };
        let mut chars = target.chars();
        let Some(index) = chars.next().and_then(|c| "XYZA".find(c)) else { return false };
        let Ok(value) = chars.as_str().parse::<f64>() else { return false };
        if self.moves {
            if words[0] == "G91" {
                self.position[index] += value;
            } else {
                self.position[index] = value;
            }
        }
        self.run_polls = self.run_polls_per_move;
        true
    }

    fn machine_position(&self) -> String {
        self.position
            .iter()
            .map(|p| format!("{:.3}", p))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn parse_setting(line: &str) -> Option<(u16, f64)> {
    let (number, value) = line.strip_prefix('$')?.split_once('=')?;
    Some((number.parse().ok()?, value.parse().ok()?))
}
