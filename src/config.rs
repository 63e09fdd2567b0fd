//! Configuration surface: TOML file, merged with `OEC__`-prefixed
//! environment variables, merged last with CLI flags (CLI wins).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

fn default_poll_interval_secs() -> u32 {
    10
}
fn default_battery_capacity_kwh() -> f64 {
    20.0
}
fn default_min_soc() -> u8 {
    30
}
fn default_power_averaging_window_minutes() -> u32 {
    5
}
fn default_filter_threshold_w() -> f64 {
    50_000.0
}
fn default_buffer_w() -> f64 {
    100.0
}
fn default_bus_maximum_w() -> f64 {
    7000.0
}
fn default_time_zone() -> String {
    "America/Denver".to_string()
}
fn default_day_open() -> String {
    "10:00".to_string()
}
fn default_day_close() -> String {
    "18:00".to_string()
}
fn default_unrestricted_open() -> String {
    "00:10".to_string()
}
fn default_unrestricted_close() -> String {
    "06:00".to_string()
}
fn default_unrestricted_current_a() -> u32 {
    40
}
fn default_daytime_excess_threshold_w() -> f64 {
    0.0
}
fn default_daytime_soc_threshold() -> u8 {
    85
}
fn default_min_current_a() -> u32 {
    6
}
fn default_max_current_a() -> u32 {
    32
}
fn default_voltage_v() -> f64 {
    240.0
}
fn default_safety_buffer_w() -> f64 {
    100.0
}
fn default_on_to_off_lockout_secs() -> i64 {
    60
}
fn default_off_to_on_lockout_secs() -> i64 {
    240
}
fn default_credentials_file() -> PathBuf {
    PathBuf::from("keys.json")
}
fn default_mqtt_port() -> u16 {
    1883
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct InverterConfig {
    #[validate(length(min = 1))]
    pub ip_address: String,
    #[validate(length(min = 1))]
    pub serial_number: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct MqttConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ChargerFleetConfig {
    #[validate(length(min = 1))]
    pub primary_charger_name: String,
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
    #[validate(length(min = 1))]
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct BatteryConfig {
    #[serde(default = "default_battery_capacity_kwh")]
    #[validate(range(min = 0.1))]
    pub capacity_kwh: f64,
    #[serde(default = "default_min_soc")]
    #[validate(range(max = 100))]
    pub min_soc: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PowerConfig {
    #[serde(default = "default_power_averaging_window_minutes")]
    pub averaging_window_minutes: u32,
    #[serde(default = "default_filter_threshold_w")]
    #[validate(range(min = 1.0))]
    pub filter_threshold_w: f64,
    #[serde(default = "default_buffer_w")]
    pub buffer_w: f64,
    #[serde(default = "default_bus_maximum_w")]
    #[validate(range(min = 1.0))]
    pub bus_maximum_w: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_time_policy_config"))]
pub struct TimePolicyFileConfig {
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    #[serde(default = "default_day_open")]
    pub day_open: String,
    #[serde(default = "default_day_close")]
    pub day_close: String,
    #[serde(default = "default_unrestricted_open")]
    pub unrestricted_open: String,
    #[serde(default = "default_unrestricted_close")]
    pub unrestricted_close: String,
    #[serde(default = "default_unrestricted_current_a")]
    pub unrestricted_current_a: u32,
    #[serde(default = "default_daytime_excess_threshold_w")]
    pub daytime_excess_threshold_w: f64,
    #[serde(default = "default_daytime_soc_threshold")]
    #[validate(range(max = 100))]
    pub daytime_soc_threshold: u8,
}

fn validate_time_policy_config(cfg: &TimePolicyFileConfig) -> Result<(), validator::ValidationError> {
    let day_open = parse_hhmm(&cfg.day_open).map_err(|_| validator::ValidationError::new("day_open_unparseable"))?;
    let day_close = parse_hhmm(&cfg.day_close).map_err(|_| validator::ValidationError::new("day_close_unparseable"))?;
    if day_open >= day_close {
        return Err(validator::ValidationError::new("day_open_must_precede_day_close"));
    }
    if cfg.unrestricted_open == cfg.unrestricted_close {
        return Err(validator::ValidationError::new("unrestricted_window_cannot_be_empty"));
    }
    Ok(())
}

pub fn parse_hhmm(value: &str) -> Result<chrono::NaiveTime> {
    chrono::NaiveTime::parse_from_str(value, "%H:%M").with_context(|| format!("unparseable time of day: {value}"))
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ChargerLimitsConfig {
    #[serde(default = "default_min_current_a")]
    pub min_current_a: u32,
    #[serde(default = "default_max_current_a")]
    pub max_current_a: u32,
    #[serde(default = "default_voltage_v")]
    #[validate(range(min = 1.0))]
    pub voltage_v: f64,
    #[serde(default = "default_safety_buffer_w")]
    pub safety_buffer_w: f64,
    #[serde(default = "default_on_to_off_lockout_secs")]
    pub on_to_off_lockout_secs: i64,
    #[serde(default = "default_off_to_on_lockout_secs")]
    pub off_to_on_lockout_secs: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub inverter: InverterConfig,
    #[validate(nested)]
    pub mqtt: MqttConfig,
    #[validate(nested)]
    pub chargers: ChargerFleetConfig,
    #[validate(nested)]
    pub battery: BatteryConfig,
    #[validate(nested)]
    pub power: PowerConfig,
    #[validate(nested)]
    pub time_policy: TimePolicyFileConfig,
    #[validate(nested)]
    pub charger_limits: ChargerLimitsConfig,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u32,
    #[serde(default)]
    pub detailed_log_path: Option<PathBuf>,
}

impl AppConfig {
    /// Loads `config/default.toml`, merges `OEC__`-prefixed environment
    /// variables, then applies any CLI overrides present (CLI wins).
    pub fn load(cli: &CliArgs) -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file(cli.config_file.as_deref().unwrap_or("config/default.toml")))
            .merge(Env::prefixed("OEC__").split("__"));

        let mut config: AppConfig = figment.extract().context("failed to parse configuration")?;
        cli.apply_overrides(&mut config);

        config.validate().context("configuration validation failed")?;
        Ok(config)
    }
}

/// Command-line overrides. Every field is optional so an unset flag leaves
/// the file/environment-merged value untouched.
#[derive(Debug, Parser)]
#[command(name = "hybrid-charge-controller", about = "Solar/battery/EV charging control engine")]
pub struct CliArgs {
    #[arg(long)]
    pub config_file: Option<String>,

    #[arg(long)]
    pub inverter_ip: Option<String>,
    #[arg(long)]
    pub inverter_serial: Option<String>,

    #[arg(long)]
    pub mqtt_host: Option<String>,
    #[arg(long)]
    pub mqtt_username: Option<String>,
    #[arg(long)]
    pub mqtt_password: Option<String>,

    #[arg(long)]
    pub primary_charger: Option<String>,
    #[arg(long)]
    pub credentials_file: Option<PathBuf>,

    #[arg(long)]
    pub poll_interval_secs: Option<u32>,
    #[arg(long)]
    pub battery_capacity_kwh: Option<f64>,
    #[arg(long)]
    pub min_soc: Option<u8>,
    #[arg(long)]
    pub power_avg_window_minutes: Option<u32>,
    #[arg(long)]
    pub filter_threshold_w: Option<f64>,
    #[arg(long)]
    pub detailed_log: Option<PathBuf>,
}

impl CliArgs {
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(v) = &self.inverter_ip {
            config.inverter.ip_address = v.clone();
        }
        if let Some(v) = &self.inverter_serial {
            config.inverter.serial_number = v.clone();
        }
        if let Some(v) = &self.mqtt_host {
            config.mqtt.host = v.clone();
        }
        if let Some(v) = &self.mqtt_username {
            config.mqtt.username = v.clone();
        }
        if let Some(v) = &self.mqtt_password {
            config.mqtt.password = v.clone();
        }
        if let Some(v) = &self.primary_charger {
            config.chargers.primary_charger_name = v.clone();
        }
        if let Some(v) = &self.credentials_file {
            config.chargers.credentials_file = v.clone();
        }
        if let Some(v) = self.poll_interval_secs {
            config.poll_interval_secs = v;
        }
        if let Some(v) = self.battery_capacity_kwh {
            config.battery.capacity_kwh = v;
        }
        if let Some(v) = self.min_soc {
            config.battery.min_soc = v;
        }
        if let Some(v) = self.power_avg_window_minutes {
            config.power.averaging_window_minutes = v;
        }
        if let Some(v) = self.filter_threshold_w {
            config.power.filter_threshold_w = v;
        }
        if let Some(v) = &self.detailed_log {
            config.detailed_log_path = Some(v.clone());
        }
    }
}
