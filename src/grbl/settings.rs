// src/grbl/settings.rs - GRBL `$` settings: desired values, parsing and comparison
use super::command::Axis;
use super::response::GrblResponse;
use crate::config::AxisConfig;
use std::collections::BTreeMap;
use std::fmt;

/// Settings are stored by GRBL with three decimals.
pub const SETTING_TOLERANCE: f64 = 1e-3;

/// Setting values reported by `$$`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GrblSettings {
    values: BTreeMap<u16, f64>,
}

impl GrblSettings {
    pub fn from_responses<'a>(responses: impl IntoIterator<Item = &'a GrblResponse>) -> Self {
        let values = responses
            .into_iter()
            .filter_map(|r| match r {
                GrblResponse::Setting { number, value } => Some((*number, *value)),
                _ => None,
            })
            .collect();
        Self { values }
    }

    pub fn get(&self, number: u16) -> Option<f64> {
        self.values.get(&number).copied()
    }

    pub fn insert(&mut self, number: u16, value: f64) {
        self.values.insert(number, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, f64)> + '_ {
        self.values.iter().map(|(n, v)| (*n, *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// `$10x`, `$11x` and `$12x` for one axis, converted from step units.
pub fn axis_settings(axis: Axis, config: &AxisConfig) -> [(u16, f64); 3] {
    let i = axis.index() as u16;
    [
        (100 + i, config.steps_per_mm),
        (110 + i, config.max_rate / config.steps_per_mm * 60.0),
        (120 + i, config.acceleration / config.steps_per_mm),
    ]
}

/// Every setting the driver expects GRBL to hold.
pub fn desired_settings(
    axes: &BTreeMap<Axis, AxisConfig>,
    global: &BTreeMap<u16, f64>,
) -> BTreeMap<u16, f64> {
    let mut desired = global.clone();
    for (axis, config) in axes {
        desired.extend(axis_settings(*axis, config));
    }
    desired
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettingMismatch {
    pub number: u16,
    pub expected: f64,
    pub actual: Option<f64>,
}

impl fmt::Display for SettingMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.actual {
            Some(actual) => write!(f, "${} is {} but {} is expected", self.number, actual, self.expected),
            None => write!(f, "${} was not reported, {} is expected", self.number, self.expected),
        }
    }
}

pub fn compare(desired: &BTreeMap<u16, f64>, current: &GrblSettings) -> Vec<SettingMismatch> {
    desired
        .iter()
        .filter_map(|(&number, &expected)| {
            let actual = current.get(number);
            match actual {
                Some(value) if (value - expected).abs() <= SETTING_TOLERANCE => None,
                _ => Some(SettingMismatch { number, expected, actual }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_settings_from_steps() {
        let config = AxisConfig::default();
        let settings = axis_settings(Axis::Z, &config);
        assert_eq!(settings[0], (102, 1000.0));
        assert_eq!(settings[1], (112, 384.0));
        assert_eq!(settings[2], (122, 5.0));
    }

    #[test]
    fn test_compare_reports_missing_and_different() {
        let mut desired = BTreeMap::new();
        desired.insert(22, 1.0);
        desired.insert(100, 1000.0);
        desired.insert(110, 384.0);

        let responses = vec![
            GrblResponse::parse("$22=1"),
            GrblResponse::parse("$100=1000.000"),
            GrblResponse::parse("ok"),
        ];
        let current = GrblSettings::from_responses(&responses);
        assert_eq!(current.len(), 2);

        let mismatches = compare(&desired, &current);
        assert_eq!(
            mismatches,
            vec![SettingMismatch { number: 110, expected: 384.0, actual: None }]
        );
        assert_eq!(mismatches[0].to_string(), "$110 was not reported, 384 is expected");
    }

    #[test]
    fn test_compare_tolerates_rounding() {
        let mut desired = BTreeMap::new();
        desired.insert(120, 5.0004);
        let mut current = GrblSettings::default();
        current.insert(120, 5.0);
        assert!(compare(&desired, &current).is_empty());
        current.insert(120, 5.1);
        assert_eq!(compare(&desired, &current).len(), 1);
    }
}
