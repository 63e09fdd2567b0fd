//! Inverter telemetry: the raw register array, its decode into a typed
//! reading, and the HTTP client that fetches it.

pub mod client;
pub mod registers;

use serde::Deserialize;

use crate::error::EngineError;
use crate::filter::{FilterState, MetricKey};

pub use client::HttpInverterClient;

/// Trait boundary so the control loop can be driven by a fake in tests.
#[async_trait::async_trait]
pub trait InverterClient: Send + Sync {
    async fn sample(&self) -> Result<RawInverterResponse, EngineError>;
}

/// The vendor's JSON envelope. Only `Data` is consumed; `Information` and
/// any other fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RawInverterResponse {
    #[serde(rename = "Data")]
    pub data: Vec<i64>,
}

/// Immutable snapshot of one successful inverter sample, after the spurious-
/// reading filter has run over every power-family field.
#[derive(Debug, Clone, PartialEq)]
pub struct InverterReading {
    pub solar_power_w: f64,
    pub house_consumption_w: f64,
    /// Signed; positive means exporting to the grid.
    pub grid_flow_w: f64,
    /// Signed; positive means the battery is charging.
    pub battery_flow_w: f64,
    pub battery_soc: u8,
    pub battery_voltage_v: f64,
    pub battery_temperature_c: f64,
    /// Signed AC bus power.
    pub ac_bus_power_w: f64,
    pub string_power_w: [f64; 3],
    pub string_voltage_v: [f64; 3],
    pub string_current_a: [f64; 3],
    pub ac_voltage_v: f64,
    pub ac_current_a: f64,
    pub ac_frequency_hz: f64,
    pub imported_energy_total_kwh: f64,
    pub imported_energy_today_kwh: f64,
    pub yield_energy_total_kwh: f64,
    pub yield_energy_today_kwh: f64,
    pub run_mode: u8,
}

impl InverterReading {
    /// Positive-direction view of the grid flow: power currently exported.
    pub fn to_grid_w(&self) -> f64 {
        registers::positive(self.grid_flow_w)
    }

    /// Positive-direction view of the grid flow: power currently imported.
    pub fn from_grid_w(&self) -> f64 {
        registers::invert_positive(self.grid_flow_w)
    }

    /// Positive-direction view of the battery flow: power charging in.
    pub fn to_battery_w(&self) -> f64 {
        registers::positive(self.battery_flow_w)
    }

    /// Positive-direction view of the battery flow: power discharging out.
    pub fn from_battery_w(&self) -> f64 {
        registers::invert_positive(self.battery_flow_w)
    }
}

/// Decodes a raw register array into a typed reading, routing every power
/// field through `filter` first. A short array is a protocol error and
/// aborts the cycle.
pub fn decode(raw: &RawInverterResponse, filter: &mut FilterState) -> Result<InverterReading, EngineError> {
    use registers::*;

    let d = &raw.data;
    if d.len() < MIN_ARRAY_LEN {
        return Err(EngineError::protocol(
            "inverter",
            format!("register array too short: got {} values, need at least {}", d.len(), MIN_ARRAY_LEN),
        ));
    }

    let string_power_w = [
        filter.validate(MetricKey::SolarString1, d[POS_STRING_POWER[0]] as f64),
        filter.validate(MetricKey::SolarString2, d[POS_STRING_POWER[1]] as f64),
        filter.validate(MetricKey::SolarString3, d[POS_STRING_POWER[2]] as f64),
    ];
    let solar_power_w = filter.validate(MetricKey::Solar, string_power_w.iter().sum());

    let grid_power_raw = signed_32(d[POS_GRID_POWER_LOW], d[POS_GRID_POWER_HIGH]) as f64;
    let grid_flow_w = filter.validate(MetricKey::Grid, grid_power_raw);
    // ToGrid/FromGrid are independently sticky, matching poll.py's per-key filter.
    filter.validate(MetricKey::ToGrid, positive(grid_flow_w));
    filter.validate(MetricKey::FromGrid, invert_positive(grid_flow_w));

    let house_consumption_w = filter.validate(MetricKey::ToHome, d[POS_TO_HOME] as f64);

    let battery_power_raw = signed_16(d[POS_BATTERY_POWER]) as f64;
    let battery_flow_w = filter.validate(MetricKey::Battery, battery_power_raw);
    filter.validate(MetricKey::ToBattery, positive(battery_flow_w));
    filter.validate(MetricKey::FromBattery, invert_positive(battery_flow_w));

    let ac_bus_power_w = filter.validate(MetricKey::AcPower, signed_16(d[POS_AC_POWER]) as f64);

    Ok(InverterReading {
        solar_power_w,
        house_consumption_w,
        grid_flow_w,
        battery_flow_w,
        battery_soc: d[POS_BATTERY_SOC].clamp(0, 100) as u8,
        battery_voltage_v: d[POS_BATTERY_VOLTAGE] as f64 / 100.0,
        battery_temperature_c: signed_16(d[POS_BATTERY_TEMPERATURE]) as f64,
        ac_bus_power_w,
        string_power_w,
        string_voltage_v: [
            d[POS_STRING_VOLTAGE[0]] as f64 / 10.0,
            d[POS_STRING_VOLTAGE[1]] as f64 / 10.0,
            d[POS_STRING_VOLTAGE[2]] as f64 / 10.0,
        ],
        string_current_a: [
            d[POS_STRING_CURRENT[0]] as f64 / 10.0,
            d[POS_STRING_CURRENT[1]] as f64 / 10.0,
            d[POS_STRING_CURRENT[2]] as f64 / 10.0,
        ],
        ac_voltage_v: d[POS_AC_VOLTAGE] as f64 / 10.0,
        ac_current_a: signed_16(d[POS_AC_CURRENT]) as f64 / 10.0,
        ac_frequency_hz: d[POS_AC_FREQUENCY] as f64 / 100.0,
        imported_energy_total_kwh: unsigned_32(d[POS_IMPORTED_TOTAL_LOW], d[POS_IMPORTED_TOTAL_HIGH]) as f64 / 10.0,
        imported_energy_today_kwh: d[POS_IMPORTED_TODAY] as f64 / 10.0,
        yield_energy_total_kwh: unsigned_32(d[POS_YIELD_TOTAL_LOW], d[POS_YIELD_TOTAL_HIGH]) as f64 / 10.0,
        yield_energy_today_kwh: d[POS_YIELD_TODAY] as f64 / 10.0,
        run_mode: unsigned_8(d[POS_RUN_MODE]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_array() -> Vec<i64> {
        let mut d = vec![0i64; 100];
        d[registers::POS_AC_VOLTAGE] = 2400; // 240.0 V
        d[registers::POS_AC_CURRENT] = 50; // 5.0 A
        d[registers::POS_AC_POWER] = 1200;
        d[registers::POS_AC_FREQUENCY] = 6000; // 60.0 Hz
        d[registers::POS_RUN_MODE] = 2;
        d[registers::POS_STRING_VOLTAGE[0]] = 3500;
        d[registers::POS_STRING_VOLTAGE[1]] = 3500;
        d[registers::POS_STRING_VOLTAGE[2]] = 0;
        d[registers::POS_STRING_CURRENT[0]] = 80;
        d[registers::POS_STRING_CURRENT[1]] = 80;
        d[registers::POS_STRING_CURRENT[2]] = 0;
        d[registers::POS_STRING_POWER[0]] = 2800;
        d[registers::POS_STRING_POWER[1]] = 2800;
        d[registers::POS_STRING_POWER[2]] = 0;
        d[registers::POS_GRID_POWER_LOW] = 400;
        d[registers::POS_GRID_POWER_HIGH] = 0;
        d[registers::POS_TO_HOME] = 1200;
        d[registers::POS_IMPORTED_TOTAL_LOW] = 100;
        d[registers::POS_IMPORTED_TOTAL_HIGH] = 0;
        d[registers::POS_IMPORTED_TODAY] = 5;
        d[registers::POS_YIELD_TOTAL_LOW] = 2000;
        d[registers::POS_YIELD_TOTAL_HIGH] = 0;
        d[registers::POS_YIELD_TODAY] = 30;
        d[registers::POS_BATTERY_VOLTAGE] = 48000;
        d[registers::POS_BATTERY_POWER] = 700;
        d[registers::POS_BATTERY_TEMPERATURE] = 25;
        d[registers::POS_BATTERY_SOC] = 90;
        d
    }

    #[test]
    fn decodes_a_well_formed_response() {
        let mut filter = FilterState::new(50_000.0);
        let raw = RawInverterResponse { data: sample_array() };
        let reading = decode(&raw, &mut filter).unwrap();
        assert_eq!(reading.solar_power_w, 5600.0);
        assert_eq!(reading.house_consumption_w, 1200.0);
        assert_eq!(reading.grid_flow_w, 400.0);
        assert_eq!(reading.to_grid_w(), 400.0);
        assert_eq!(reading.from_grid_w(), 0.0);
        assert_eq!(reading.battery_flow_w, 700.0);
        assert_eq!(reading.to_battery_w(), 700.0);
        assert_eq!(reading.battery_soc, 90);
        assert_eq!(reading.battery_voltage_v, 480.0);
        assert_eq!(reading.ac_voltage_v, 240.0);
        assert_eq!(reading.run_mode, 2);
    }

    #[test]
    fn short_array_is_a_protocol_error() {
        let mut filter = FilterState::new(50_000.0);
        let raw = RawInverterResponse { data: vec![0; 10] };
        let err = decode(&raw, &mut filter).unwrap_err();
        assert!(matches!(err, EngineError::Protocol { .. }));
    }

    #[test]
    fn spurious_solar_reading_is_clamped_by_the_filter() {
        let mut filter = FilterState::new(50_000.0);
        let mut d = sample_array();
        let raw_good = RawInverterResponse { data: d.clone() };
        decode(&raw_good, &mut filter).unwrap();

        d[registers::POS_STRING_POWER[0]] = 999_999;
        let raw_spurious = RawInverterResponse { data: d };
        let reading = decode(&raw_spurious, &mut filter).unwrap();
        // String1 substituted with its last good (2800), string2/3 unchanged.
        assert_eq!(reading.string_power_w[0], 2800.0);
    }
}
