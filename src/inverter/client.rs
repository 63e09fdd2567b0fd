use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::error::EngineError;

use super::{InverterClient, RawInverterResponse};

const SAMPLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Talks the Solax register-poll protocol: a form-encoded POST that returns
/// the live register array as JSON.
pub struct HttpInverterClient {
    http: Client,
    ip_address: String,
    serial_number: String,
}

impl HttpInverterClient {
    pub fn new(ip_address: impl Into<String>, serial_number: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(SAMPLE_TIMEOUT)
                .build()
                .expect("reqwest client builds with static config"),
            ip_address: ip_address.into(),
            serial_number: serial_number.into(),
        }
    }
}

#[async_trait::async_trait]
impl InverterClient for HttpInverterClient {
    async fn sample(&self) -> Result<RawInverterResponse, EngineError> {
        let url = format!("http://{}/", self.ip_address);
        debug!(ip = %self.ip_address, "polling inverter");

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .form(&[("optType", "ReadRealTimeData"), ("pwd", self.serial_number.as_str())])
            .send()
            .await
            .map_err(|e| EngineError::transient("inverter", e))?;

        let response = response
            .error_for_status()
            .map_err(|e| EngineError::transient("inverter", e))?;

        response
            .json::<RawInverterResponse>()
            .await
            .map_err(|e| EngineError::transient("inverter", e))
    }
}
