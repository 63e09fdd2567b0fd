use std::collections::HashMap;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::EngineError;

use super::{ChargerClient, ChargerCommand, ChargerReading};

/// The only device model this fleet enumerates; other models on the account
/// are ignored.
const CHARGER_MODEL: &str = "VVDN01";

#[derive(Debug, Deserialize)]
struct DeviceListResponse {
    devices: Vec<DeviceEnvelope>,
}

#[derive(Debug, Deserialize)]
struct DeviceEnvelope {
    id: String,
    name: String,
    model: String,
    #[serde(default)]
    on: bool,
    #[serde(default)]
    charge_rate_amps: u32,
    #[serde(default)]
    max_charging_rate: u32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    fault_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    /// kWh at second scale, matching the vendor API's instantaneous usage
    /// sample.
    usage_kwh: f64,
}

/// REST-shaped view over the EV-charger vendor cloud API: device
/// enumeration, per-device usage, and command submission.
pub struct CloudChargerClient {
    http: Client,
    base_url: String,
}

impl CloudChargerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::builder().build().expect("reqwest client builds with static config"),
            base_url: base_url.into(),
        }
    }

    /// `usage` is kWh sampled at one-second scale; converting to
    /// instantaneous watts multiplies by seconds-per-hour and by
    /// watts-per-kilowatt, exactly as the vendor SDK's own convention.
    fn usage_to_watts(usage_kwh: f64) -> f64 {
        usage_kwh * 3600.0 * 1000.0
    }
}

#[async_trait::async_trait]
impl ChargerClient for CloudChargerClient {
    async fn list(&self) -> Result<HashMap<String, ChargerReading>, EngineError> {
        let url = format!("{}/devices", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::transient("charger", e))?
            .error_for_status()
            .map_err(|e| EngineError::transient("charger", e))?
            .json::<DeviceListResponse>()
            .await
            .map_err(|e| EngineError::transient("charger", e))?;

        let mut out = HashMap::new();
        for device in response.devices.into_iter().filter(|d| d.model == CHARGER_MODEL) {
            let usage_url = format!("{}/devices/{}/usage", self.base_url, device.id);
            let usage = self
                .http
                .get(&usage_url)
                .send()
                .await
                .map_err(|e| EngineError::transient("charger", e))?
                .error_for_status()
                .map_err(|e| EngineError::transient("charger", e))?
                .json::<UsageResponse>()
                .await
                .map_err(|e| EngineError::transient("charger", e))?;

            let power_draw_w = Self::usage_to_watts(usage.usage_kwh);
            debug!(charger = %device.name, power_draw_w, "fetched charger usage");

            out.insert(
                device.name,
                ChargerReading {
                    power_draw_w,
                    commanded_current_a: device.charge_rate_amps,
                    on: device.on,
                    message: device.message,
                    fault_text: device.fault_text,
                    max_current_a: device.max_charging_rate,
                    device_handle: device.id,
                },
            );
        }

        Ok(out)
    }

    async fn command(&self, device_handle: &str, command: ChargerCommand) -> Result<ChargerReading, EngineError> {
        let url = format!("{}/devices/{}/command", self.base_url, device_handle);
        let body = serde_json::json!({
            "on": command.enabled,
            "charge_rate_amps": command.current_a,
        });

        self.http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::transient("charger", e))?
            .error_for_status()
            .map_err(|e| EngineError::transient("charger", e))?;

        let verify_url = format!("{}/devices/{}", self.base_url, device_handle);
        let device = self
            .http
            .get(&verify_url)
            .send()
            .await
            .map_err(|e| EngineError::transient("charger", e))?
            .error_for_status()
            .map_err(|e| EngineError::transient("charger", e))?
            .json::<DeviceEnvelope>()
            .await
            .map_err(|e| EngineError::transient("charger", e))?;

        Ok(ChargerReading {
            power_draw_w: 0.0,
            commanded_current_a: device.charge_rate_amps,
            on: device.on,
            message: device.message,
            fault_text: device.fault_text,
            max_current_a: device.max_charging_rate,
            device_handle: device.id,
        })
    }
}
