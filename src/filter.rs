//! Sticky per-metric spurious-reading filter.
//!
//! The inverter occasionally emits garbage register reads (a single bad
//! sample wildly out of range). Rather than discard the whole cycle, each
//! power-family metric is tracked independently and a reading that blows
//! past the configured threshold is replaced with the last accepted value
//! for that same key.

use std::collections::HashMap;

use tracing::warn;

/// Identifies the metrics this filter applies to. Kept as a typed enum
/// instead of `poll.py`'s raw string-prefix match so callers can't typo a
/// key into silently skipping validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKey {
    SolarString1,
    SolarString2,
    SolarString3,
    Solar,
    Grid,
    ToGrid,
    FromGrid,
    ToHome,
    Battery,
    ToBattery,
    FromBattery,
    AcPower,
}

impl MetricKey {
    /// Matches `poll.py`'s `key.startswith('Power/' | 'String' | 'AC/Power')`
    /// gate. Every variant here is in the power family; this exists so the
    /// guard is explicit rather than implicit in which keys got a variant.
    fn in_power_family(self) -> bool {
        true
    }

    fn label(self) -> &'static str {
        match self {
            MetricKey::SolarString1 => "String1/Power",
            MetricKey::SolarString2 => "String2/Power",
            MetricKey::SolarString3 => "String3/Power",
            MetricKey::Solar => "Power/FromSolar",
            MetricKey::Grid => "Power/Grid",
            MetricKey::ToGrid => "Power/ToGrid",
            MetricKey::FromGrid => "Power/FromGrid",
            MetricKey::ToHome => "Power/ToHome",
            MetricKey::Battery => "Power/Battery",
            MetricKey::ToBattery => "Power/ToBattery",
            MetricKey::FromBattery => "Power/FromBattery",
            MetricKey::AcPower => "AC/Power",
        }
    }
}

/// Last-accepted-value store, one global instance for the process lifetime.
#[derive(Debug, Default)]
pub struct FilterState {
    last_good: HashMap<MetricKey, f64>,
    threshold: f64,
}

impl FilterState {
    pub fn new(threshold_w: f64) -> Self {
        Self {
            last_good: HashMap::new(),
            threshold: threshold_w,
        }
    }

    /// Admits `value` if within threshold (and remembers it), otherwise
    /// substitutes the last good reading for `key`, or zero if there is
    /// none yet.
    pub fn validate(&mut self, key: MetricKey, value: f64) -> f64 {
        if !key.in_power_family() {
            return value;
        }

        if value.abs() <= self.threshold {
            self.last_good.insert(key, value);
            return value;
        }

        match self.last_good.get(&key) {
            Some(&last) => {
                warn!(
                    metric = key.label(),
                    value, threshold = self.threshold, substituted = last,
                    "spurious reading detected, using last known good value"
                );
                last
            }
            None => {
                warn!(
                    metric = key.label(),
                    value, threshold = self.threshold,
                    "spurious reading detected, no prior good value, substituting 0"
                );
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_values_within_threshold() {
        let mut f = FilterState::new(1000.0);
        assert_eq!(f.validate(MetricKey::Solar, 500.0), 500.0);
        assert_eq!(f.validate(MetricKey::Solar, -999.0), -999.0);
    }

    #[test]
    fn substitutes_last_good_when_available() {
        let mut f = FilterState::new(1000.0);
        f.validate(MetricKey::Solar, 600.0);
        assert_eq!(f.validate(MetricKey::Solar, 50_000.0), 600.0);
    }

    #[test]
    fn substitutes_zero_when_no_prior_reading() {
        let mut f = FilterState::new(1000.0);
        assert_eq!(f.validate(MetricKey::Solar, 50_000.0), 0.0);
    }

    #[test]
    fn is_idempotent_on_admitted_values() {
        let mut f = FilterState::new(1000.0);
        let once = f.validate(MetricKey::Battery, 800.0);
        let twice = f.validate(MetricKey::Battery, once);
        assert_eq!(once, twice);
    }

    #[test]
    fn per_metric_independence() {
        let mut f = FilterState::new(1000.0);
        f.validate(MetricKey::Solar, 900.0);
        // a spurious reading on a different key must not see Solar's history
        assert_eq!(f.validate(MetricKey::Battery, 50_000.0), 0.0);
    }
}
