#![allow(dead_code)]
use thiserror::Error;

/// Error taxonomy for the control engine.
///
/// `Transient` and `Protocol` abort only the operation that raised them — the
/// control loop logs the failure and retries at the next cycle, it never
/// crashes the process. `VerifyMismatch` is surfaced but the newly observed
/// charger state is still accepted as truth. `Configuration` is fatal and is
/// only ever raised during startup.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transient error talking to {device}: {source}")]
    Transient {
        device: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("protocol error decoding {device} response: {reason}")]
    Protocol {
        device: &'static str,
        reason: String,
    },

    #[error("command verify mismatch on charger {charger}: wanted ({want_current}A, enabled={want_enabled}), observed ({got_current}A, enabled={got_enabled})")]
    VerifyMismatch {
        charger: String,
        want_current: u32,
        want_enabled: bool,
        got_current: u32,
        got_enabled: bool,
    },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    pub fn transient(device: &'static str, source: impl Into<anyhow::Error>) -> Self {
        EngineError::Transient {
            device,
            source: source.into(),
        }
    }

    pub fn protocol(device: &'static str, reason: impl Into<String>) -> Self {
        EngineError::Protocol {
            device,
            reason: reason.into(),
        }
    }

    /// True for errors the control loop should shrug off and retry next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Transient { .. } | EngineError::Protocol { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
