//! Home-automation sensor/switch publication over MQTT, using Home
//! Assistant's MQTT-discovery convention: a retained config payload per
//! entity on `homeassistant/<component>/<node>/<object>/config`, and state
//! updates on the topic that config payload names.

use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::charger_controller::ChargerStatus;
use crate::inverter::InverterReading;

pub struct SensorPublisherConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
}

/// Derives a sensor's unique id from its metric path: lower-cased, `/` to
/// `_`. Deterministic and injective over the catalog below since no two
/// metric paths collide after the substitution.
pub fn sensor_id(metric_path: &str) -> String {
    metric_path.to_lowercase().replace('/', "_")
}

#[derive(Debug, Clone, Copy)]
struct InverterSensorSpec {
    metric: &'static str,
    device_class: &'static str,
    unit: &'static str,
}

const INVERTER_SENSORS: &[InverterSensorSpec] = &[
    InverterSensorSpec { metric: "Power/FromSolar", device_class: "power", unit: "W" },
    InverterSensorSpec { metric: "Power/Battery", device_class: "power", unit: "W" },
    InverterSensorSpec { metric: "Power/FromBattery", device_class: "power", unit: "W" },
    InverterSensorSpec { metric: "Power/ToBattery", device_class: "power", unit: "W" },
    InverterSensorSpec { metric: "Power/FromGrid", device_class: "power", unit: "W" },
    InverterSensorSpec { metric: "Power/Grid", device_class: "power", unit: "W" },
    InverterSensorSpec { metric: "Power/ToGrid", device_class: "power", unit: "W" },
    InverterSensorSpec { metric: "Power/ToHome", device_class: "power", unit: "W" },
    InverterSensorSpec { metric: "Battery/SOC", device_class: "battery", unit: "%" },
    InverterSensorSpec { metric: "Battery/Voltage", device_class: "voltage", unit: "V" },
    InverterSensorSpec { metric: "Battery/Temperature", device_class: "temperature", unit: "C" },
    InverterSensorSpec { metric: "Battery/TimeToFull", device_class: "duration", unit: "min" },
    InverterSensorSpec { metric: "Battery/TimeToEmpty", device_class: "duration", unit: "min" },
    InverterSensorSpec { metric: "Battery/Power", device_class: "power", unit: "kW" },
    InverterSensorSpec { metric: "Battery/MinSOC", device_class: "battery", unit: "%" },
    InverterSensorSpec { metric: "AC/Power", device_class: "power", unit: "W" },
    InverterSensorSpec { metric: "AC/Voltage", device_class: "voltage", unit: "V" },
    InverterSensorSpec { metric: "AC/Current", device_class: "current", unit: "A" },
    InverterSensorSpec { metric: "AC/Frequency", device_class: "frequency", unit: "Hz" },
];

#[derive(Debug, Serialize)]
struct DeviceInfo {
    name: String,
    identifiers: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SensorDiscoveryPayload {
    name: String,
    device_class: String,
    unique_id: String,
    unit_of_measurement: String,
    state_topic: String,
    device: DeviceInfo,
}

#[derive(Debug, Serialize)]
struct SwitchDiscoveryPayload {
    name: String,
    unique_id: String,
    state_topic: String,
    command_topic: String,
    device: DeviceInfo,
}

/// Publishes the fixed sensor/switch catalog and per-cycle state to an MQTT
/// broker, keeping the live connection alive via a background poll task.
pub struct SensorPublisher {
    client: AsyncClient,
}

impl SensorPublisher {
    /// Returns the publisher and the raw event loop; the caller spawns the
    /// loop-driving task (the control loop's shutdown signal stops it by
    /// dropping the client).
    pub fn new(config: SensorPublisherConfig) -> (Self, EventLoop) {
        let mut opts = MqttOptions::new(config.client_id, config.host, config.port);
        opts.set_credentials(config.username, config.password);
        opts.set_keep_alive(std::time::Duration::from_secs(30));

        let (client, event_loop) = AsyncClient::new(opts, 64);
        (Self { client }, event_loop)
    }

    pub async fn publish_inverter_discovery(&self) {
        let device = DeviceInfo { name: "Solax Hybrid Inverter".to_string(), identifiers: vec!["solax".to_string()] };
        for spec in INVERTER_SENSORS {
            let id = sensor_id(spec.metric);
            let payload = SensorDiscoveryPayload {
                name: spec.metric.replace('/', " "),
                device_class: spec.device_class.to_string(),
                unique_id: id.clone(),
                unit_of_measurement: spec.unit.to_string(),
                state_topic: format!("solax/{}/state", id),
                device: DeviceInfo { name: device.name.clone(), identifiers: device.identifiers.clone() },
            };
            self.publish_retained(&format!("homeassistant/sensor/solax/{}/config", id), &payload).await;
        }
    }

    pub async fn publish_charger_discovery(&self, charger_name: &str) {
        let slug = charger_name.to_lowercase().replace(' ', "_");
        let device = DeviceInfo { name: charger_name.to_string(), identifiers: vec![slug.clone()] };

        for (suffix, device_class, unit) in [("current", "current", "A"), ("power", "power", "W")] {
            let id = format!("{}_{}", slug, suffix);
            let payload = SensorDiscoveryPayload {
                name: suffix.to_string(),
                device_class: device_class.to_string(),
                unique_id: id.clone(),
                unit_of_measurement: unit.to_string(),
                state_topic: format!("{}/{}/state", slug, suffix),
                device: DeviceInfo { name: device.name.clone(), identifiers: device.identifiers.clone() },
            };
            self.publish_retained(&format!("homeassistant/sensor/{}/{}/config", slug, id), &payload).await;
        }

        let switch_id = format!("{}_use_excess", slug);
        let switch_payload = SwitchDiscoveryPayload {
            name: format!("{} Use Excess Solar", charger_name),
            unique_id: switch_id.clone(),
            state_topic: format!("{}/use_excess/state", slug),
            command_topic: format!("{}/use_excess/set", slug),
            device,
        };
        self.publish_retained(&format!("homeassistant/switch/{}/{}/config", slug, switch_id), &switch_payload).await;
    }

    pub async fn publish_inverter_state(&self, reading: &InverterReading, time_to_full: &str, time_to_empty: &str, avg_power_kw: f64, min_soc: u8) {
        self.publish_state("solax/power_fromsolar/state", reading.solar_power_w).await;
        self.publish_state("solax/power_battery/state", reading.battery_flow_w).await;
        self.publish_state("solax/power_frombattery/state", reading.from_battery_w()).await;
        self.publish_state("solax/power_tobattery/state", reading.to_battery_w()).await;
        self.publish_state("solax/power_fromgrid/state", reading.from_grid_w()).await;
        self.publish_state("solax/power_grid/state", reading.grid_flow_w).await;
        self.publish_state("solax/power_togrid/state", reading.to_grid_w()).await;
        self.publish_state("solax/power_tohome/state", reading.house_consumption_w).await;
        self.publish_state("solax/battery_soc/state", reading.battery_soc as f64).await;
        self.publish_state("solax/battery_voltage/state", reading.battery_voltage_v).await;
        self.publish_state("solax/battery_temperature/state", reading.battery_temperature_c).await;
        self.publish_state("solax/battery_power/state", avg_power_kw).await;
        self.publish_state("solax/battery_minsoc/state", min_soc as f64).await;
        self.publish_string("solax/battery_timetofull/state", time_to_full).await;
        self.publish_string("solax/battery_timetoempty/state", time_to_empty).await;
        self.publish_state("solax/ac_power/state", reading.ac_bus_power_w).await;
        self.publish_state("solax/ac_voltage/state", reading.ac_voltage_v).await;
        self.publish_state("solax/ac_current/state", reading.ac_current_a).await;
        self.publish_state("solax/ac_frequency/state", reading.ac_frequency_hz).await;
    }

    pub async fn publish_charger_state(&self, charger_name: &str, status: &ChargerStatus) {
        let slug = charger_name.to_lowercase().replace(' ', "_");
        self.publish_state(&format!("{}/current/state", slug), status.current_amps as f64).await;
        self.publish_state(&format!("{}/power/state", slug), status.power_watts).await;
        self.publish_string(&format!("{}/use_excess/state", slug), if status.state_active { "ON" } else { "OFF" }).await;
    }

    async fn publish_retained<T: Serialize>(&self, topic: &str, payload: &T) {
        match serde_json::to_vec(payload) {
            Ok(bytes) => {
                if let Err(err) = self.client.publish(topic, QoS::AtLeastOnce, true, bytes).await {
                    error!(topic, error = %err, "failed to publish discovery payload");
                } else {
                    debug!(topic, "published discovery payload");
                }
            }
            Err(err) => error!(topic, error = %err, "failed to serialize discovery payload"),
        }
    }

    async fn publish_state(&self, topic: &str, value: f64) {
        self.publish_string(topic, &value.to_string()).await;
    }

    async fn publish_string(&self, topic: &str, value: &str) {
        if let Err(err) = self.client.publish(topic, QoS::AtMostOnce, false, value.as_bytes()).await {
            error!(topic, error = %err, "failed to publish sensor state");
        }
    }
}

pub fn spawn_event_loop_driver(mut event_loop: EventLoop) {
    tokio::spawn(async move {
        loop {
            match event_loop.poll().await {
                Ok(_) => {}
                Err(err) => {
                    error!(error = %err, "mqtt event loop error, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_id_derivation_matches_the_rule() {
        assert_eq!(sensor_id("Power/FromSolar"), "power_fromsolar");
        assert_eq!(sensor_id("Battery/SOC"), "battery_soc");
    }

    #[test]
    fn sensor_id_is_injective_over_the_catalog() {
        let mut ids: Vec<String> = INVERTER_SENSORS.iter().map(|s| sensor_id(s.metric)).collect();
        let before = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), before);
    }
}
