use std::time::Duration;

use thiserror::Error;

use crate::alloc::{AllocationId, Groups};
use crate::common::error::AllocError::GenericError;

/// Message fragment a broker uses when it does not know an allocation id.
const INVALID_ALLOCATION_PATTERN: &str = "invalid allocation";

#[derive(Debug, Error)]
pub enum AllocError {
    /// The broker could not be reached at all.
    #[error("{broker}: connection failed: {message}")]
    Transport { broker: String, message: String },
    /// The broker answered with a non-success HTTP status.
    #[error("{broker}: HTTP {status}: {message}")]
    BrokerHttp {
        broker: String,
        status: u16,
        message: String,
    },
    #[error("allocation failed: {state}: {message}")]
    Rejected { state: String, message: String },
    #[error("can't acquire targets, still busy after {}s", .timeout.as_secs())]
    Blocked { timeout: Duration, groups: Groups },
    #[error("allocation ID {allocation_id}: released due to interruption")]
    Interrupted { allocation_id: AllocationId },
    #[error("{0}: unknown server name")]
    UnknownBroker(String),
    #[error("Targets span more than one server: {}", .0.join(", "))]
    MixedBrokers(Vec<String>),
    #[error("No servers available, did you configure?")]
    NoBrokers,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl AllocError {
    /// Connectivity level failure, the broker may simply be down.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, AllocError::Transport { .. })
    }

    /// The broker reported that it does not know the allocation.
    pub fn is_invalid_allocation(&self) -> bool {
        match self {
            AllocError::BrokerHttp { message, .. } => message
                .to_lowercase()
                .contains(INVALID_ALLOCATION_PATTERN),
            _ => false,
        }
    }
}

impl From<serde_json::error::Error> for AllocError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<anyhow::Error> for AllocError {
    fn from(error: anyhow::Error) -> Self {
        Self::Config(format!("{error:#}"))
    }
}

impl From<toml::de::Error> for AllocError {
    fn from(error: toml::de::Error) -> Self {
        Self::DeserializationError(error.to_string())
    }
}

impl From<String> for AllocError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}

#[cfg(test)]
mod tests {
    use super::AllocError;
    use std::time::Duration;

    #[test]
    fn invalid_allocation_is_detected_in_http_errors_only() {
        let http = AllocError::BrokerHttp {
            broker: "b1".to_string(),
            status: 400,
            message: "abc123: invalid allocation".to_string(),
        };
        assert!(http.is_invalid_allocation());

        let other = AllocError::BrokerHttp {
            broker: "b1".to_string(),
            status: 403,
            message: "not allowed".to_string(),
        };
        assert!(!other.is_invalid_allocation());

        let transport = AllocError::Transport {
            broker: "b1".to_string(),
            message: "invalid allocation".to_string(),
        };
        assert!(!transport.is_invalid_allocation());
        assert!(transport.is_connectivity());
    }

    #[test]
    fn blocked_message() {
        let error = AllocError::Blocked {
            timeout: Duration::from_secs(5),
            groups: Default::default(),
        };
        assert_eq!(
            error.to_string(),
            "can't acquire targets, still busy after 5s"
        );
    }
}
