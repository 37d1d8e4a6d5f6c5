//! Device capture
//!
//! This module provides device discovery, the capture backend seam, the
//! nokhwa-backed webcam implementation and per-device capture sessions.

pub mod probe;
pub mod session;
pub mod traits;
pub mod webcam;

// Re-export the core capture types
pub use probe::probe_devices;
pub use session::{SessionContext, SessionManager};
pub use traits::{CaptureBackend, DeviceDescriptor, Frame, VideoSource};
pub use webcam::WebcamBackend;
