//! Error taxonomy for capabilities, the model contract and the kernel.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification reported to the model and the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or malformed arguments
    InputValidation,
    /// Refused by the safety gate, never retried automatically
    SafetyBlocked,
    /// Size or time ceiling exceeded
    ResourceLimit,
    /// Path or URL absent
    NotFound,
    /// Network or model call failure
    Transient,
    /// The capability ran and failed
    Execution,
    /// Task never became ready
    Unresolved,
}

/// Errors produced while running a single capability.
///
/// These never escape the dispatcher as `Err`; they are folded into a
/// [`CapabilityResult`](crate::capabilities::CapabilityResult).
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Blocked by safety policy: {0}")]
    SafetyBlocked(String),

    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Output too large: exceeded limit of {limit} bytes")]
    OutputTooLarge { limit: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("{0}")]
    Execution(String),
}

impl CapabilityError {
    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownCapability(_) | Self::MissingArgument(_) | Self::InvalidArgument { .. } => {
                ErrorKind::InputValidation
            }
            Self::SafetyBlocked(_) => ErrorKind::SafetyBlocked,
            Self::FileTooLarge { .. } | Self::Timeout(_) | Self::OutputTooLarge { .. } => {
                ErrorKind::ResourceLimit
            }
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Network(_) => ErrorKind::Transient,
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            Self::Io(_) | Self::Execution(_) => ErrorKind::Execution,
        }
    }

    /// Stable snake_case code placed in the result envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownCapability(_) => "unknown_capability",
            Self::MissingArgument(_) => "missing_argument",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::SafetyBlocked(_) => "safety_blocked",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::Timeout(_) => "timeout",
            Self::OutputTooLarge { .. } => "output_too_large",
            Self::NotFound(_) => "not_found",
            Self::Io(e) if e.kind() == std::io::ErrorKind::NotFound => "not_found",
            Self::Io(_) => "io",
            Self::Network(_) => "network",
            Self::Execution(_) => "execution",
        }
    }
}

/// Failures talking to the model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model request failed: {0}")]
    Transport(String),

    #[error("Model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode model response: {0}")]
    Decode(String),

    #[error("Model client not configured: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Turn-level failures. Only these abort a loop or swarm run.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Decomposition failed: {0}")]
    Decomposition(String),

    #[error("Capability registry invalid: {0}")]
    Registry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_errors_map_to_taxonomy() {
        assert_eq!(
            CapabilityError::MissingArgument("path".into()).kind(),
            ErrorKind::InputValidation
        );
        assert_eq!(
            CapabilityError::SafetyBlocked("rm".into()).kind(),
            ErrorKind::SafetyBlocked
        );
        assert_eq!(CapabilityError::Timeout(30).kind(), ErrorKind::ResourceLimit);
        assert_eq!(
            CapabilityError::OutputTooLarge { limit: 10 }.code(),
            "output_too_large"
        );
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(CapabilityError::Io(missing).kind(), ErrorKind::NotFound);
    }
}
