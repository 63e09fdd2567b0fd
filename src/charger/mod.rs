//! Charger telemetry: the cloud-API snapshot and the predicates the
//! controller derives from it.

pub mod client;

pub use client::CloudChargerClient;

use crate::error::EngineError;

/// Message strings the vendor API returns when a vehicle is plugged in and
/// the session is in a state the controller can act on. Extracted to a
/// named constant rather than scattered string-literal comparisons.
pub const CONNECTED_MESSAGES: [&str; 3] = ["Connected to EV", "Charging", "Please Wait"];

/// Load above which a connected charger counts as actively drawing power,
/// distinguishing "plugged in and idle" from "plugged in and charging".
pub const CHARGING_LOAD_THRESHOLD_W: f64 = 100.0;

pub fn is_connected_message(message: &str) -> bool {
    CONNECTED_MESSAGES.contains(&message)
}

/// Immutable per-cycle snapshot of one physical charger, as reported by the
/// cloud API.
#[derive(Debug, Clone)]
pub struct ChargerReading {
    pub power_draw_w: f64,
    pub commanded_current_a: u32,
    pub on: bool,
    pub message: String,
    pub fault_text: Option<String>,
    pub max_current_a: u32,
    /// Opaque identifier the client needs to submit a command for this
    /// device; the engine never interprets it.
    pub device_handle: String,
}

impl ChargerReading {
    pub fn connected(&self) -> bool {
        is_connected_message(&self.message)
    }

    pub fn charging(&self) -> bool {
        self.power_draw_w > CHARGING_LOAD_THRESHOLD_W
    }
}

/// A command to submit to a specific charger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargerCommand {
    pub current_a: u32,
    pub enabled: bool,
}

/// Trait boundary over the charger cloud API so the control loop and
/// per-charger controller can be exercised against a fake in tests.
#[async_trait::async_trait]
pub trait ChargerClient: Send + Sync {
    /// Enumerates every charger the account has and its current telemetry,
    /// keyed by device name.
    async fn list(&self) -> Result<std::collections::HashMap<String, ChargerReading>, EngineError>;

    /// Submits a command to the named device and returns the freshly
    /// re-read state, used for verify-after-actuate.
    async fn command(&self, device_handle: &str, command: ChargerCommand) -> Result<ChargerReading, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_messages_match_the_documented_set() {
        assert!(is_connected_message("Connected to EV"));
        assert!(is_connected_message("Charging"));
        assert!(is_connected_message("Please Wait"));
        assert!(!is_connected_message("Disconnected"));
        assert!(!is_connected_message(""));
    }

    #[test]
    fn charging_threshold_is_strict() {
        let mut reading = ChargerReading {
            power_draw_w: 100.0,
            commanded_current_a: 6,
            on: true,
            message: "Charging".into(),
            fault_text: None,
            max_current_a: 32,
            device_handle: "dev-1".into(),
        };
        assert!(!reading.charging());
        reading.power_draw_w = 100.1;
        assert!(reading.charging());
    }
}
