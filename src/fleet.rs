//! Fleet coordinator: orchestrates one control cycle across every
//! per-charger controller, computing shared quantities exactly once so
//! every controller's decision sees an identical view of the cycle.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::charger::ChargerClient;
use crate::charger_controller::{ChargerAction, ChargerController, ChargerStatus, FleetContext};
use crate::error::EngineError;
use crate::filter::FilterState;
use crate::inverter::{InverterClient, InverterReading};
use crate::power::{self, PowerAverageBuffer};
use crate::time_policy::{TimePolicyConfig, TimePolicyState};

pub struct FleetConfig {
    pub buffer_w: f64,
    pub bus_maximum_w: f64,
    pub battery_capacity_kwh: f64,
    pub min_soc: u8,
    pub time_zone: Tz,
    pub time_policy: TimePolicyConfig,
}

/// Per-cycle aggregate, non-persistent, used only for the structured log
/// and console summary.
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub timestamp: DateTime<Utc>,
    pub battery_soc: u8,
    pub battery_voltage_v: f64,
    pub battery_temperature_c: f64,
    pub solar_production_w: f64,
    pub house_consumption_w: f64,
    pub grid_import_w: f64,
    pub grid_export_w: f64,
    pub battery_charge_w: f64,
    pub battery_discharge_w: f64,
    pub battery_reserve_w: f64,
    pub total_charger_power_w: f64,
    pub available_excess_w: f64,
    pub chargers: Vec<ChargerStatus>,
    pub primary_charger_active: bool,
    pub active_charger_names: Vec<String>,
    pub time_to_full: String,
    pub time_to_empty: String,
    pub battery_power_avg_kw: f64,
    pub min_soc: u8,
    pub inverter: InverterReading,
}

pub struct FleetCoordinator {
    config: FleetConfig,
    inverter_client: Box<dyn InverterClient>,
    charger_client: Box<dyn ChargerClient>,
    controllers: HashMap<String, ChargerController>,
    filter: FilterState,
    time_policy: TimePolicyState,
    power_average: PowerAverageBuffer,
}

impl FleetCoordinator {
    pub fn new(
        config: FleetConfig,
        inverter_client: Box<dyn InverterClient>,
        charger_client: Box<dyn ChargerClient>,
        controllers: HashMap<String, ChargerController>,
        filter_threshold_w: f64,
        power_average_window_minutes: u32,
        cycle_seconds: u32,
    ) -> Self {
        Self {
            config,
            inverter_client,
            charger_client,
            controllers,
            filter: FilterState::new(filter_threshold_w),
            time_policy: TimePolicyState::new(),
            power_average: PowerAverageBuffer::new(power_average_window_minutes, cycle_seconds),
        }
    }

    /// Runs one full cycle: sample, decode, fetch chargers, decide per
    /// charger, aggregate. Returns `Err` only for failures that abort the
    /// whole cycle (inverter sample/decode); a failed charger fetch or an
    /// individual controller error is logged and that charger is skipped.
    pub async fn run_cycle(&mut self) -> Result<(SystemStatus, Vec<ChargerAction>), EngineError> {
        let now = Utc::now();
        let local_now = now.with_timezone(&self.config.time_zone);

        let raw = self.inverter_client.sample().await?;
        let reading = crate::inverter::decode(&raw, &mut self.filter)?;

        let charger_readings = match self.charger_client.list().await {
            Ok(readings) => readings,
            Err(err) => {
                warn!(error = %err, "failed to fetch charger fleet, skipping actuation this cycle");
                HashMap::new()
            }
        };

        for (name, controller) in self.controllers.iter_mut() {
            if let Some(reading) = charger_readings.get(name) {
                controller.update(reading);
            } else {
                warn!(charger = %name, "charger not reported by cloud API this cycle");
            }
        }

        // Shared quantities, computed once from the snapshot taken above.
        let excess_w = power::excess(reading.solar_power_w, reading.house_consumption_w, self.config.buffer_w);
        let battery_reserve_w = power::battery_reserve(reading.battery_soc);
        let total_charger_load_w: f64 = self.controllers.values().map(|c| c.load_w()).sum();
        let available_for_charge_w = power::available_for_charge(
            excess_w,
            total_charger_load_w,
            reading.house_consumption_w,
            self.config.bus_maximum_w,
            battery_reserve_w,
        );

        let policy = self
            .time_policy
            .evaluate(&self.config.time_policy, local_now, excess_w, reading.battery_soc);
        let daily_disabled = self.time_policy.daily_disabled();

        let primary_connected = self.controllers.values().any(|c| c.is_primary() && c.connected());
        let primary_charging = self.controllers.values().any(|c| c.is_primary() && c.connected() && c.charging());
        let total_secondaries = self.controllers.values().filter(|c| !c.is_primary()).count();

        let mut statuses = Vec::with_capacity(self.controllers.len());
        let mut actions = Vec::new();

        for controller in self.controllers.values_mut() {
            let other_secondary_count = if controller.is_primary() {
                0
            } else {
                total_secondaries.saturating_sub(1)
            };

            let ctx = FleetContext {
                policy,
                daily_disabled,
                excess_w,
                house_consumption_w: reading.house_consumption_w,
                battery_soc: reading.battery_soc,
                total_charger_load_w,
                battery_reserve_w,
                available_for_charge_w,
                primary_connected,
                primary_charging,
                other_secondary_count,
            };

            let (status, action) = controller.decide(now, &ctx, self.charger_client.as_ref()).await;
            statuses.push(status);
            if let Some(action) = action {
                actions.push(action);
            }
        }

        let current_battery_power_kw = reading.battery_flow_w / 1000.0;
        let battery_power_avg_kw = self.power_average.push_and_average(current_battery_power_kw);

        let time_to_full = power::time_to_full(reading.battery_soc, self.config.battery_capacity_kwh, battery_power_avg_kw.max(0.0));
        let time_to_empty = power::time_to_empty(
            reading.battery_soc,
            self.config.min_soc,
            self.config.battery_capacity_kwh,
            (-battery_power_avg_kw).max(0.0),
        );

        let total_charger_power_w: f64 = statuses.iter().map(|s| s.power_watts).sum();
        let active_charger_names: Vec<String> = statuses.iter().filter(|s| s.charging).map(|s| s.name.clone()).collect();
        let primary_charger_active = statuses.iter().any(|s| s.is_primary && s.charging);

        let status = SystemStatus {
            timestamp: now,
            battery_soc: reading.battery_soc,
            battery_voltage_v: reading.battery_voltage_v,
            battery_temperature_c: reading.battery_temperature_c,
            solar_production_w: reading.solar_power_w,
            house_consumption_w: reading.house_consumption_w,
            grid_import_w: reading.from_grid_w(),
            grid_export_w: reading.to_grid_w(),
            battery_charge_w: reading.to_battery_w(),
            battery_discharge_w: reading.from_battery_w(),
            battery_reserve_w,
            total_charger_power_w,
            available_excess_w: available_for_charge_w,
            chargers: statuses,
            primary_charger_active,
            active_charger_names,
            time_to_full,
            time_to_empty,
            battery_power_avg_kw,
            min_soc: self.config.min_soc,
            inverter: reading,
        };

        Ok((status, actions))
    }
}
