use thiserror::Error;

use crate::player::PlayerStatus;

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Everything the engine can reject. All errors are reported synchronously by
/// the call that triggered them; nothing fails mid-playback.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The composition descriptor (or a synthesis parameter derived from it)
    /// breaks the producer contract. Engine state is left untouched.
    #[error("contract violation at {path}: {reason}")]
    ContractViolation { path: String, reason: String },

    /// The operation is not valid in the player's current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: PlayerStatus,
    },

    /// The audio output could not be acquired. Fatal for the session.
    #[error("audio device unavailable: {reason}")]
    DeviceUnavailable { reason: String },
}

impl EngineError {
    pub(crate) fn contract(path: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::ContractViolation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    #[cfg_attr(not(feature = "device"), allow(dead_code))]
    pub(crate) fn device(reason: impl std::fmt::Display) -> Self {
        EngineError::DeviceUnavailable {
            reason: reason.to_string(),
        }
    }

    /// Stable machine-readable code, handed to the UI layer.
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::ContractViolation { .. } => "CONTRACT_VIOLATION",
            EngineError::InvalidState { .. } => "INVALID_STATE",
            EngineError::DeviceUnavailable { .. } => "DEVICE_UNAVAILABLE",
        }
    }
}
