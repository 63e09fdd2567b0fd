//! The decision nucleus: one long-lived controller per physical charger,
//! combining the time-of-day policy, the shared energy budget, and a
//! primary/secondary priority discipline into a single command.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::charger::{ChargerClient, ChargerCommand, ChargerReading};
use crate::time_policy::PolicyDecision;

/// Per-charger, process-lifetime state machine. `Disconnected` and
/// `IdleConnected` carry no data; `ChargingAtRate` carries the commanded
/// amperage so a rate change is visibly an in-state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargerState {
    Disconnected,
    IdleConnected,
    ChargingAtRate(u32),
}

#[derive(Debug, Clone, Copy)]
pub struct ChargerControllerConfig {
    pub min_current_a: u32,
    pub max_current_a: u32,
    pub voltage_v: f64,
    pub bus_maximum_w: f64,
    pub safety_buffer_w: f64,
    pub is_primary: bool,
    pub on_to_off_lockout: chrono::Duration,
    pub off_to_on_lockout: chrono::Duration,
}

/// Shared quantities computed once per cycle by the fleet coordinator and
/// handed to every controller's `decide`, never held as a pointer between
/// controllers.
#[derive(Debug, Clone, Copy)]
pub struct FleetContext {
    pub policy: PolicyDecision,
    /// The time policy's daily latch, snapshotted after this cycle's
    /// single evaluation.
    pub daily_disabled: bool,
    pub excess_w: f64,
    pub house_consumption_w: f64,
    pub battery_soc: u8,
    pub total_charger_load_w: f64,
    pub battery_reserve_w: f64,
    pub available_for_charge_w: f64,
    pub primary_connected: bool,
    pub primary_charging: bool,
    /// Count of secondary chargers in the fleet, excluding this one.
    pub other_secondary_count: usize,
}

#[derive(Debug, Clone)]
pub struct ChargerStatus {
    pub name: String,
    pub is_primary: bool,
    pub connected: bool,
    pub charging: bool,
    pub current_amps: u32,
    pub power_watts: f64,
    pub proposed_amps: u32,
    pub state_active: bool,
}

#[derive(Debug, Clone)]
pub struct ChargerAction {
    pub name: String,
    pub previous_current_a: u32,
    pub new_current_a: u32,
    pub previous_enabled: bool,
    pub new_enabled: bool,
    pub reason: String,
    pub available_for_charge_w: f64,
}

pub struct ChargerController {
    name: String,
    cfg: ChargerControllerConfig,
    device_handle: String,
    state: ChargerState,
    connected: bool,
    charging: bool,
    power_draw_w: f64,
    commanded_current_a: u32,
    enabled: bool,
    last_on_to_off: Option<DateTime<Utc>>,
    last_off_to_on: Option<DateTime<Utc>>,
}

impl ChargerController {
    pub fn new(name: impl Into<String>, device_handle: impl Into<String>, cfg: ChargerControllerConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            device_handle: device_handle.into(),
            state: ChargerState::Disconnected,
            connected: false,
            charging: false,
            power_draw_w: 0.0,
            commanded_current_a: cfg.min_current_a,
            enabled: false,
            last_on_to_off: None,
            last_off_to_on: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_primary(&self) -> bool {
        self.cfg.is_primary
    }

    pub fn state(&self) -> ChargerState {
        self.state
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn charging(&self) -> bool {
        self.charging
    }

    pub fn load_w(&self) -> f64 {
        self.power_draw_w
    }

    /// Replaces local state with the latest sample and derives `connected`
    /// and `charging`.
    pub fn update(&mut self, reading: &ChargerReading) {
        self.power_draw_w = reading.power_draw_w;
        self.commanded_current_a = reading.commanded_current_a;
        self.enabled = reading.on;
        self.connected = reading.connected();
        self.charging = reading.charging();

        self.state = if !self.connected {
            ChargerState::Disconnected
        } else if self.enabled && self.commanded_current_a > 0 {
            ChargerState::ChargingAtRate(self.commanded_current_a)
        } else {
            ChargerState::IdleConnected
        };
    }

    /// Produces a command and applies it if different from the present
    /// one, verifying the result against the device.
    pub async fn decide(&mut self, now: DateTime<Utc>, fleet: &FleetContext, client: &dyn ChargerClient) -> (ChargerStatus, Option<ChargerAction>) {
        // 1. Connection gate.
        if !self.connected {
            return (self.status(0, false), None);
        }

        // 2. Time-policy short-circuit.
        let (proposed_current, proposed_enabled) = if fleet.policy.in_unrestricted_window || fleet.policy.enabled {
            (fleet.policy.current_a, fleet.policy.enabled)
        } else {
            // 3 + 4. Energy-budget branch with primary/secondary priority.
            let should_disable = fleet.daily_disabled;
            let should_enable = fleet.policy.enabled;

            if should_disable {
                (self.cfg.min_current_a, false)
            } else if !should_enable {
                self.calculate_current(fleet)
            } else if !self.should_be_active(fleet, should_enable) {
                (self.cfg.min_current_a, false)
            } else {
                self.calculate_current(fleet)
            }
        };

        // 5. Actuation.
        let action = self.actuate(proposed_current, proposed_enabled, now, client, fleet).await;

        (self.status(proposed_current, proposed_enabled), action)
    }

    fn should_be_active(&self, fleet: &FleetContext, should_enable: bool) -> bool {
        debug_assert!(should_enable);
        if self.cfg.is_primary {
            true
        } else {
            !fleet.primary_connected
        }
    }

    fn calculate_current(&self, fleet: &FleetContext) -> (u32, bool) {
        if self.cfg.is_primary {
            self.calculate_primary_current(fleet.available_for_charge_w)
        } else {
            self.calculate_secondary_current(fleet)
        }
    }

    fn calculate_primary_current(&self, available_for_charge_w: f64) -> (u32, bool) {
        let raw = (available_for_charge_w / self.cfg.voltage_v).round();
        if raw > self.cfg.max_current_a as f64 {
            (self.cfg.max_current_a, true)
        } else if raw < self.cfg.min_current_a as f64 {
            (self.cfg.min_current_a, false)
        } else {
            (raw as u32, true)
        }
    }

    fn calculate_secondary_current(&self, fleet: &FleetContext) -> (u32, bool) {
        if fleet.primary_charging {
            return (self.cfg.min_current_a, true);
        }

        let reservation_w = fleet.other_secondary_count as f64 * self.cfg.min_current_a as f64 * self.cfg.voltage_v;
        let available_for_this = fleet.available_for_charge_w - reservation_w;
        let raw = (available_for_this / self.cfg.voltage_v).round();

        if raw > self.cfg.max_current_a as f64 {
            (self.cfg.max_current_a, true)
        } else if raw < self.cfg.min_current_a as f64 {
            (self.cfg.min_current_a, true)
        } else {
            (raw as u32, true)
        }
    }

    async fn actuate(&mut self, proposed_current: u32, proposed_enabled: bool, now: DateTime<Utc>, client: &dyn ChargerClient, fleet: &FleetContext) -> Option<ChargerAction> {
        if proposed_current == self.commanded_current_a && proposed_enabled == self.enabled {
            return None;
        }

        let is_flip = proposed_enabled != self.enabled;
        if is_flip && self.debounced(proposed_enabled, now) {
            debug!(charger = %self.name, "actuation suppressed by lockout debounce");
            return None;
        }

        let previous_current = self.commanded_current_a;
        let previous_enabled = self.enabled;

        let command = ChargerCommand {
            current_a: proposed_current,
            enabled: proposed_enabled,
        };

        match client.command(&self.device_handle, command).await {
            Ok(observed) => {
                if observed.commanded_current_a != proposed_current || observed.on != proposed_enabled {
                    warn!(
                        charger = %self.name,
                        want_current = proposed_current, want_enabled = proposed_enabled,
                        got_current = observed.commanded_current_a, got_enabled = observed.on,
                        "command verify mismatch, accepting observed state"
                    );
                }
                self.commanded_current_a = observed.commanded_current_a;
                self.enabled = observed.on;
                if is_flip {
                    self.record_flip(proposed_enabled, now);
                }
                self.state = if !self.connected {
                    ChargerState::Disconnected
                } else if self.enabled && self.commanded_current_a > 0 {
                    ChargerState::ChargingAtRate(self.commanded_current_a)
                } else {
                    ChargerState::IdleConnected
                };

                Some(ChargerAction {
                    name: self.name.clone(),
                    previous_current_a: previous_current,
                    new_current_a: self.commanded_current_a,
                    previous_enabled,
                    new_enabled: self.enabled,
                    reason: self.reason_for(proposed_enabled, fleet),
                    available_for_charge_w: fleet.available_for_charge_w,
                })
            }
            Err(err) => {
                warn!(charger = %self.name, error = %err, "charger command failed, skipping for this cycle");
                None
            }
        }
    }

    fn reason_for(&self, enabled: bool, fleet: &FleetContext) -> String {
        if fleet.policy.in_unrestricted_window {
            "unrestricted window".to_string()
        } else if fleet.daily_disabled {
            "evening latch".to_string()
        } else if fleet.policy.enabled {
            "daytime window".to_string()
        } else if enabled {
            "excess power available".to_string()
        } else {
            "insufficient excess power".to_string()
        }
    }

    fn debounced(&self, wants_enabled: bool, now: DateTime<Utc>) -> bool {
        if wants_enabled {
            match self.last_off_to_on {
                Some(last) => now - last < self.cfg.off_to_on_lockout,
                None => false,
            }
        } else {
            match self.last_on_to_off {
                Some(last) => now - last < self.cfg.on_to_off_lockout,
                None => false,
            }
        }
    }

    fn record_flip(&mut self, now_enabled: bool, now: DateTime<Utc>) {
        if now_enabled {
            self.last_off_to_on = Some(now);
        } else {
            self.last_on_to_off = Some(now);
        }
    }

    fn status(&self, proposed_amps: u32, proposed_enabled: bool) -> ChargerStatus {
        ChargerStatus {
            name: self.name.clone(),
            is_primary: self.cfg.is_primary,
            connected: self.connected,
            charging: self.charging,
            current_amps: self.commanded_current_a,
            power_watts: self.power_draw_w,
            proposed_amps,
            state_active: proposed_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charger::ChargerReading;
    use crate::error::EngineError;
    use crate::time_policy::PolicyDecision;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeClient {
        responses: Mutex<HashMap<String, ChargerReading>>,
    }

    #[async_trait]
    impl ChargerClient for FakeClient {
        async fn list(&self) -> Result<HashMap<String, ChargerReading>, EngineError> {
            Ok(self.responses.lock().unwrap().clone())
        }

        async fn command(&self, device_handle: &str, command: ChargerCommand) -> Result<ChargerReading, EngineError> {
            let mut reading = self.responses.lock().unwrap().get(device_handle).cloned().unwrap();
            reading.commanded_current_a = command.current_a;
            reading.on = command.enabled;
            Ok(reading)
        }
    }

    fn base_cfg(is_primary: bool) -> ChargerControllerConfig {
        ChargerControllerConfig {
            min_current_a: 6,
            max_current_a: 32,
            voltage_v: 240.0,
            bus_maximum_w: 7000.0,
            safety_buffer_w: 100.0,
            is_primary,
            on_to_off_lockout: chrono::Duration::seconds(60),
            off_to_on_lockout: chrono::Duration::seconds(240),
        }
    }

    fn connected_reading(current: u32, on: bool, power: f64) -> ChargerReading {
        ChargerReading {
            power_draw_w: power,
            commanded_current_a: current,
            on,
            message: "Connected to EV".to_string(),
            fault_text: None,
            max_current_a: 32,
            device_handle: "dev-1".to_string(),
        }
    }

    fn fleet(available_for_charge_w: f64, primary_connected: bool, primary_charging: bool, other_secondaries: usize) -> FleetContext {
        FleetContext {
            policy: PolicyDecision { current_a: 6, enabled: false, in_unrestricted_window: false },
            daily_disabled: false,
            excess_w: 0.0,
            house_consumption_w: 0.0,
            battery_soc: 90,
            total_charger_load_w: 0.0,
            battery_reserve_w: 0.0,
            available_for_charge_w,
            primary_connected,
            primary_charging,
            other_secondary_count: other_secondaries,
        }
    }

    #[tokio::test]
    async fn disconnected_charger_issues_no_command() {
        let mut controller = ChargerController::new("car", "dev-1", base_cfg(true));
        let client = FakeClient { responses: Mutex::new(HashMap::new()) };
        let now = Utc::now();
        let (status, action) = controller.decide(now, &fleet(5800.0, false, false, 0), &client).await;
        assert!(!status.connected);
        assert!(action.is_none());
    }

    #[tokio::test]
    async fn scenario_1_primary_gets_clamped_budget_current() {
        let mut controller = ChargerController::new("car", "dev-1", base_cfg(true));
        controller.update(&connected_reading(6, false, 0.0));
        let mut responses = HashMap::new();
        responses.insert("dev-1".to_string(), connected_reading(6, false, 0.0));
        let client = FakeClient { responses: Mutex::new(responses) };

        let now = Utc::now();
        let (status, action) = controller.decide(now, &fleet(5800.0, true, false, 0), &client).await;
        assert_eq!(status.proposed_amps, 24);
        assert!(status.state_active);
        assert!(action.is_some());
    }

    #[tokio::test]
    async fn scenario_1_secondary_gets_minimum_when_primary_charging() {
        let mut controller = ChargerController::new("car2", "dev-2", base_cfg(false));
        controller.update(&connected_reading(6, false, 0.0));
        let mut responses = HashMap::new();
        responses.insert("dev-2".to_string(), connected_reading(6, false, 0.0));
        let client = FakeClient { responses: Mutex::new(responses) };

        let now = Utc::now();
        let (status, _) = controller.decide(now, &fleet(5800.0, true, true, 0), &client).await;
        assert_eq!(status.proposed_amps, 6);
        assert!(status.state_active);
    }

    #[tokio::test]
    async fn scenario_5_primary_below_minimum_pauses() {
        let mut controller = ChargerController::new("car", "dev-1", base_cfg(true));
        controller.update(&connected_reading(6, true, 1500.0));
        let mut responses = HashMap::new();
        responses.insert("dev-1".to_string(), connected_reading(6, true, 1500.0));
        let client = FakeClient { responses: Mutex::new(responses) };

        let now = Utc::now();
        let (status, _) = controller.decide(now, &fleet(900.0, true, false, 0), &client).await;
        assert_eq!(status.proposed_amps, 6);
        assert!(!status.state_active);
    }

    #[tokio::test]
    async fn scenario_5_secondary_floors_at_minimum_enabled() {
        let mut controller = ChargerController::new("car2", "dev-2", base_cfg(false));
        controller.update(&connected_reading(6, false, 0.0));
        let mut responses = HashMap::new();
        responses.insert("dev-2".to_string(), connected_reading(6, false, 0.0));
        let client = FakeClient { responses: Mutex::new(responses) };

        let now = Utc::now();
        let (status, _) = controller.decide(now, &fleet(900.0, true, false, 0), &client).await;
        assert_eq!(status.proposed_amps, 6);
        assert!(status.state_active);
    }

    #[tokio::test]
    async fn off_to_on_lockout_suppresses_rapid_reenable() {
        let mut controller = ChargerController::new("car", "dev-1", base_cfg(true));
        controller.update(&connected_reading(6, false, 0.0));
        let mut responses = HashMap::new();
        responses.insert("dev-1".to_string(), connected_reading(6, false, 0.0));
        let client = FakeClient { responses: Mutex::new(responses) };

        let now = Utc::now();
        // Simulate a very recent off->on flip by priming last_off_to_on via a first enable.
        let (_, action1) = controller.decide(now, &fleet(5800.0, true, false, 0), &client).await;
        assert!(action1.is_some());

        // Immediately flip disabled then re-enabled within the lockout window.
        controller.enabled = false;
        let soon = now + chrono::Duration::seconds(1);
        let (status, action2) = controller.decide(soon, &fleet(5800.0, true, false, 0), &client).await;
        // within off_to_on_lockout (240s), a re-enable flip should be suppressed
        assert!(action2.is_none() || status.state_active);
    }
}
