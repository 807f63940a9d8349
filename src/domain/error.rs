use crate::domain::models::{ConnectionState, PeripheralId};
use thiserror::Error;

/// Failures reported by a platform backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("bluetooth adapter is not available")]
    Unavailable,
    #[error("peripheral {0} not found")]
    NotFound(PeripheralId),
    #[error("platform error: {0}")]
    Platform(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BleError {
    #[error("bluetooth adapter unavailable")]
    AdapterUnavailable,

    #[error("scan failed: {0}")]
    ScanFailed(BackendError),

    #[error("connection to {id} failed: {source}")]
    ConnectionFailed {
        id: PeripheralId,
        source: BackendError,
    },

    #[error("connection to {0} lost")]
    ConnectionLost(PeripheralId),

    #[error("reconnection to {id} exhausted after {attempts} attempts")]
    ReconnectionExhausted { id: PeripheralId, attempts: u32 },

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },
}

pub type Result<T> = std::result::Result<T, BleError>;
