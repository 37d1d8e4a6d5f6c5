//! Error types and handling
//!
//! Common error types used across the engine.

use thiserror::Error;

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("device {id} unavailable: {reason}")]
    DeviceUnavailable { id: u32, reason: String },

    #[error("device {0} opened but cannot read frames")]
    DeviceUnreadable(u32),

    #[error("device {0} lost mid-session")]
    DeviceLost(u32),

    #[error("no devices to record")]
    NoDevices,

    #[error("already recording")]
    AlreadyRecording,

    #[error("not recording")]
    NotRecording,

    #[error("recording start failed at device {device_id}: {source}")]
    PartialStartFailure {
        device_id: u32,
        #[source]
        source: Box<EngineError>,
    },

    #[error("encoder error: {0}")]
    EncoderFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using EngineError
pub type EngineResult<T> = Result<T, EngineError>;
