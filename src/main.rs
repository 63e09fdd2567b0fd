use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use uuid::Uuid;

use hybrid_charge_controller::charger::client::CloudChargerClient;
use hybrid_charge_controller::charger::ChargerClient;
use hybrid_charge_controller::charger_controller::{ChargerController, ChargerControllerConfig};
use hybrid_charge_controller::config::{self, AppConfig, CliArgs};
use hybrid_charge_controller::control_loop::ControlLoop;
use hybrid_charge_controller::fleet::{FleetConfig, FleetCoordinator};
use hybrid_charge_controller::inverter::client::HttpInverterClient;
use hybrid_charge_controller::sensors::{SensorPublisher, SensorPublisherConfig};
use hybrid_charge_controller::telemetry;
use hybrid_charge_controller::time_policy::TimePolicyConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliArgs::parse();
    let cfg = match AppConfig::load(&cli) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            std::process::exit(1);
        }
    };

    let _log_guard = telemetry::init_tracing(cfg.detailed_log_path.as_deref());
    info!("starting hybrid charge controller");

    let inverter_client = Box::new(HttpInverterClient::new(cfg.inverter.ip_address.clone(), cfg.inverter.serial_number.clone()));
    let charger_client: Box<dyn ChargerClient> = Box::new(CloudChargerClient::new(cfg.chargers.base_url.clone()));

    let known_chargers = charger_client
        .list()
        .await
        .context("failed to discover chargers from the cloud API at startup")?;

    if !known_chargers.contains_key(&cfg.chargers.primary_charger_name) {
        warn!(
            primary = %cfg.chargers.primary_charger_name,
            "configured primary charger not reported by cloud API at startup; it will stay disconnected until seen"
        );
    }

    let charger_limits = &cfg.charger_limits;
    let mut controllers = HashMap::new();
    for (name, reading) in &known_chargers {
        let is_primary = name == &cfg.chargers.primary_charger_name;
        let controller_cfg = ChargerControllerConfig {
            min_current_a: charger_limits.min_current_a,
            max_current_a: charger_limits.max_current_a,
            voltage_v: charger_limits.voltage_v,
            bus_maximum_w: cfg.power.bus_maximum_w,
            safety_buffer_w: charger_limits.safety_buffer_w,
            is_primary,
            on_to_off_lockout: chrono::Duration::seconds(charger_limits.on_to_off_lockout_secs),
            off_to_on_lockout: chrono::Duration::seconds(charger_limits.off_to_on_lockout_secs),
        };
        controllers.insert(name.clone(), ChargerController::new(name.clone(), reading.device_handle.clone(), controller_cfg));
    }

    if controllers.is_empty() {
        warn!("no chargers discovered at startup; the fleet will idle until the cloud API reports one");
    }

    let time_zone: chrono_tz::Tz = cfg
        .time_policy
        .time_zone
        .parse()
        .map_err(|_| anyhow::anyhow!("unrecognized time zone: {}", cfg.time_policy.time_zone))?;

    let time_policy_config = TimePolicyConfig {
        day_open: config::parse_hhmm(&cfg.time_policy.day_open)?,
        day_close: config::parse_hhmm(&cfg.time_policy.day_close)?,
        unrestricted_open: config::parse_hhmm(&cfg.time_policy.unrestricted_open)?,
        unrestricted_close: config::parse_hhmm(&cfg.time_policy.unrestricted_close)?,
        unrestricted_current_a: cfg.time_policy.unrestricted_current_a,
        daytime_excess_threshold_w: cfg.time_policy.daytime_excess_threshold_w,
        daytime_soc_threshold: cfg.time_policy.daytime_soc_threshold,
        min_current_a: charger_limits.min_current_a,
        max_current_a: charger_limits.max_current_a,
        voltage_v: charger_limits.voltage_v,
    };

    let fleet_config = FleetConfig {
        buffer_w: cfg.power.buffer_w,
        bus_maximum_w: cfg.power.bus_maximum_w,
        battery_capacity_kwh: cfg.battery.capacity_kwh,
        min_soc: cfg.battery.min_soc,
        time_zone,
        time_policy: time_policy_config,
    };

    let fleet = FleetCoordinator::new(
        fleet_config,
        inverter_client,
        charger_client,
        controllers,
        cfg.power.filter_threshold_w,
        cfg.power.averaging_window_minutes,
        cfg.poll_interval_secs,
    );

    let sensor_config = SensorPublisherConfig {
        host: cfg.mqtt.host.clone(),
        port: cfg.mqtt.port,
        username: cfg.mqtt.username.clone(),
        password: cfg.mqtt.password.clone(),
        client_id: format!("hybrid-charge-controller-{}", Uuid::new_v4()),
    };
    let (sensors, event_loop) = SensorPublisher::new(sensor_config);
    hybrid_charge_controller::sensors::spawn_event_loop_driver(event_loop);

    let control_loop = ControlLoop::new(fleet, sensors, Duration::from_secs(cfg.poll_interval_secs as u64));
    control_loop.run().await;

    Ok(())
}
