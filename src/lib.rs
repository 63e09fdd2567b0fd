pub mod charger;
pub mod charger_controller;
pub mod config;
pub mod control_loop;
pub mod error;
pub mod filter;
pub mod fleet;
pub mod inverter;
pub mod power;
pub mod sensors;
pub mod telemetry;
pub mod time_policy;
