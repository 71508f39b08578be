use thiserror::Error;

/// Hard failures of the jitter buffer. Packet loss is never one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JitterError {
    /// Construction-time misconfiguration; fix the configuration and retry
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T> = std::result::Result<T, JitterError>;
