//! Owns cadence, shutdown, and the structured per-cycle log. The only
//! task in the process; every other module is driven synchronously from
//! here once per tick.

use std::time::Duration;

use tracing::{info, warn};

use crate::fleet::FleetCoordinator;
use crate::sensors::SensorPublisher;
use crate::telemetry::shutdown_signal;

pub struct ControlLoop {
    fleet: FleetCoordinator,
    sensors: SensorPublisher,
    sleep_interval: Duration,
}

impl ControlLoop {
    pub fn new(fleet: FleetCoordinator, sensors: SensorPublisher, sleep_interval: Duration) -> Self {
        Self { fleet, sensors, sleep_interval }
    }

    /// Runs cycles until a shutdown signal arrives at a sleep boundary.
    /// In-flight external calls from the cycle that was running when the
    /// signal arrived are allowed to finish; cancellation never interrupts
    /// mid-cycle.
    pub async fn run(mut self) {
        self.sensors.publish_inverter_discovery().await;

        loop {
            match self.fleet.run_cycle().await {
                Ok((status, actions)) => {
                    self.sensors
                        .publish_inverter_state(
                            &status.inverter,
                            &status.time_to_full,
                            &status.time_to_empty,
                            status.battery_power_avg_kw,
                            status.min_soc,
                        )
                        .await;
                    for charger in &status.chargers {
                        self.sensors.publish_charger_discovery(&charger.name).await;
                        self.sensors.publish_charger_state(&charger.name, charger).await;
                    }

                    tracing::info!(
                        target: "cycle",
                        timestamp = %status.timestamp,
                        battery_soc = status.battery_soc,
                        solar_w = status.solar_production_w,
                        house_w = status.house_consumption_w,
                        available_excess_w = status.available_excess_w,
                        actions = actions.len(),
                        "cycle complete"
                    );

                    info!(
                        "battery {}% ({:+.2}kW) | solar {:.1}kW | house {:.1}kW | available {:.1}kW | chargers active: {}",
                        status.battery_soc,
                        status.battery_power_avg_kw,
                        status.solar_production_w / 1000.0,
                        status.house_consumption_w / 1000.0,
                        status.available_excess_w / 1000.0,
                        status.active_charger_names.join(", "),
                    );
                }
                Err(err) if err.is_retryable() => {
                    warn!(error = %err, "cycle aborted, retrying at next tick");
                }
                Err(err) => {
                    warn!(error = %err, "cycle failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.sleep_interval) => {}
                _ = shutdown_signal() => {
                    info!("shutdown signal received, exiting at sleep boundary");
                    break;
                }
            }
        }
    }
}
