//! Capture trait definitions
//!
//! Backend-agnostic types and traits for capture devices.

use crate::utils::error::EngineResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Static metadata about a discoverable capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Device index as exposed by the backend
    pub id: u32,

    /// Reported frame width in pixels
    pub width: u32,

    /// Reported frame height in pixels
    pub height: u32,

    /// Frame rate the device claims to deliver
    pub declared_fps: u32,
}

/// One decoded frame from a capture device
///
/// Frames are immutable snapshots; the pixel buffer is shared, so cloning a
/// frame never copies image data.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Device the frame was captured from
    pub device_id: u32,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Raw RGB24 pixel data (width * height * 3 bytes)
    pub data: Arc<[u8]>,

    /// Monotonic capture timestamp
    pub timestamp: Instant,
}

impl Frame {
    /// Create a frame captured now.
    pub fn new(device_id: u32, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            device_id,
            width,
            height,
            data: data.into(),
            timestamp: Instant::now(),
        }
    }
}

/// An open capture device handle
///
/// A source is exclusively owned by whoever opened it: the prober for the
/// duration of one validation read, or a capture session for its whole life.
/// Dropping the source releases the underlying device exactly once.
pub trait VideoSource: Send {
    /// Frame width the device reports (0 if unknown)
    fn width(&self) -> u32;

    /// Frame height the device reports (0 if unknown)
    fn height(&self) -> u32;

    /// Frame rate the device reports (0 if unknown)
    fn fps(&self) -> u32;

    /// Read the next frame, blocking until the device delivers one.
    fn read_frame(&mut self) -> EngineResult<Frame>;
}

/// A capture backend that can enumerate and open devices
pub trait CaptureBackend: Send + Sync {
    /// Candidate device ids worth probing, unvalidated.
    fn candidates(&self) -> Vec<u32>;

    /// Open the device with the given id.
    fn open(&self, id: u32) -> EngineResult<Box<dyn VideoSource>>;
}
