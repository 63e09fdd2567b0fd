//! Pure power-budget calculations. No component here owns state beyond the
//! bounded rolling-average buffer; every other function is a stateless
//! transform of its inputs.

use std::collections::VecDeque;

/// `solar - house - buffer`. Negative is legal: the house alone can exceed
/// solar production.
pub fn excess(solar_w: f64, house_w: f64, buffer_w: f64) -> f64 {
    solar_w - house_w - buffer_w
}

/// Piecewise watts to withhold from the charging budget to keep the
/// stationary battery topping up, tiered by state-of-charge. Monotonic
/// non-increasing in `soc`.
pub fn battery_reserve(soc: u8) -> f64 {
    if soc < 75 {
        1700.0
    } else if soc < 85 {
        1200.0
    } else if soc < 95 {
        700.0
    } else if soc < 99 {
        500.0
    } else {
        0.0
    }
}

/// Power left over for vehicle charging once the reserve and bus ceiling
/// are accounted for. `total_charger_load` is added back because it was
/// already subtracted out of `house_w` upstream in `excess`; restoring it
/// gives the true ceiling rather than double-counting existing charge draw.
pub fn available_for_charge(excess_w: f64, total_charger_load_w: f64, house_w: f64, bus_maximum_w: f64, reserve_w: f64) -> f64 {
    let available_excess = excess_w + total_charger_load_w - reserve_w;
    let available_via_bus = bus_maximum_w - (house_w - total_charger_load_w);
    available_excess.min(available_via_bus)
}

/// `"HH:MM"` time to reach 100% SOC at the given average charge rate, or
/// `"N/A"` when the battery isn't net charging or is already full.
pub fn time_to_full(soc: u8, capacity_kwh: f64, avg_kw: f64) -> String {
    if avg_kw <= 0.0 || soc >= 100 {
        return "N/A".to_string();
    }
    let energy_needed_kwh = (100 - soc) as f64 / 100.0 * capacity_kwh;
    format_hours(energy_needed_kwh / avg_kw)
}

/// `"HH:MM"` time to reach `min_soc` at the given average discharge rate, or
/// `"N/A"` when the battery isn't net discharging or is already at/below the
/// floor.
pub fn time_to_empty(soc: u8, min_soc: u8, capacity_kwh: f64, avg_kw: f64) -> String {
    if avg_kw <= 0.0 || soc <= min_soc {
        return "N/A".to_string();
    }
    let energy_available_kwh = (soc - min_soc) as f64 / 100.0 * capacity_kwh;
    format_hours(energy_available_kwh / avg_kw)
}

fn format_hours(hours: f64) -> String {
    let whole_hours = hours.trunc() as i64;
    let minutes = ((hours - hours.trunc()) * 60.0) as i64;
    format!("{:02}:{:02}", whole_hours, minutes)
}

/// Bounded FIFO of recent battery-power samples (kW), sized
/// `ceil(window_minutes * 60 / cycle_seconds)`.
#[derive(Debug, Clone)]
pub struct PowerAverageBuffer {
    samples: VecDeque<f64>,
    max_samples: usize,
}

impl PowerAverageBuffer {
    pub fn new(window_minutes: u32, cycle_seconds: u32) -> Self {
        let max_samples = ((window_minutes as f64 * 60.0) / cycle_seconds as f64).ceil() as usize;
        Self {
            samples: VecDeque::with_capacity(max_samples.max(1)),
            max_samples: max_samples.max(1),
        }
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Appends `sample_kw`, evicting the oldest entry if over capacity, and
    /// returns the new mean. An empty buffer (never reachable after this
    /// call, but used by callers probing state) averages to zero.
    pub fn push_and_average(&mut self, sample_kw: f64) -> f64 {
        self.samples.push_back(sample_kw);
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
        rolling_average(&self.samples)
    }
}

fn rolling_average(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excess_can_go_negative() {
        assert_eq!(excess(1000.0, 2000.0, 100.0), -1100.0);
    }

    #[test]
    fn battery_reserve_tiers() {
        assert_eq!(battery_reserve(0), 1700.0);
        assert_eq!(battery_reserve(74), 1700.0);
        assert_eq!(battery_reserve(75), 1200.0);
        assert_eq!(battery_reserve(84), 1200.0);
        assert_eq!(battery_reserve(85), 700.0);
        assert_eq!(battery_reserve(94), 700.0);
        assert_eq!(battery_reserve(95), 500.0);
        assert_eq!(battery_reserve(98), 500.0);
        assert_eq!(battery_reserve(99), 0.0);
        assert_eq!(battery_reserve(100), 0.0);
    }

    #[test]
    fn battery_reserve_is_non_increasing() {
        let mut prev = battery_reserve(0);
        for soc in 1..=100u8 {
            let cur = battery_reserve(soc);
            assert!(cur <= prev);
            prev = cur;
        }
    }

    #[test]
    fn scenario_1_sunny_midday() {
        let ex = excess(8000.0, 1200.0, 100.0);
        assert_eq!(ex, 6700.0);
        let reserve = 700.0;
        let avail = available_for_charge(ex, 0.0, 1200.0, 7000.0, reserve);
        assert_eq!(avail, 5800.0);
    }

    #[test]
    fn time_to_full_na_when_not_charging() {
        assert_eq!(time_to_full(50, 20.0, 0.0), "N/A");
        assert_eq!(time_to_full(100, 20.0, 2.0), "N/A");
    }

    #[test]
    fn time_to_full_computes_hh_mm() {
        // 50% to 100% of 20kWh = 10kWh, at 5kW = 2h00m
        assert_eq!(time_to_full(50, 20.0, 5.0), "02:00");
    }

    #[test]
    fn time_to_empty_na_when_at_or_below_floor() {
        assert_eq!(time_to_empty(30, 30, 20.0, 2.0), "N/A");
        assert_eq!(time_to_empty(50, 30, 20.0, 0.0), "N/A");
    }

    #[test]
    fn rolling_buffer_never_exceeds_capacity() {
        // 5 minute window at 10s cycles = 30 samples
        let mut buf = PowerAverageBuffer::new(5, 10);
        assert_eq!(buf.max_samples(), 30);
        for i in 0..100 {
            buf.push_and_average(i as f64);
            assert!(buf.len() <= 30);
        }
    }

    #[test]
    fn rolling_average_matches_manual_mean() {
        let mut buf = PowerAverageBuffer::new(1, 60); // 1 sample
        assert_eq!(buf.push_and_average(2.0), 2.0);
        assert_eq!(buf.push_and_average(4.0), 4.0);
    }
}
