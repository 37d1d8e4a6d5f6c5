//! multicam - multi-camera capture and recording engine.
//!
//! Discovers usable video-capture devices, runs one capture loop per active
//! device, fans frames out to a display sink at a bounded rate and records
//! any set of devices to disk as one atomic operation: either every device
//! gets an encoder or none does.
//!
//! The hardware seams ([`CaptureBackend`](capture::CaptureBackend),
//! [`EncoderFactory`](recorder::EncoderFactory),
//! [`DisplaySink`](display::DisplaySink)) are traits, with nokhwa and FFmpeg
//! as the production implementations.

pub mod capture;
pub mod display;
pub mod engine;
pub mod recorder;
pub mod utils;

pub use capture::{CaptureBackend, DeviceDescriptor, Frame, VideoSource, WebcamBackend};
pub use display::DisplaySink;
pub use engine::{EngineController, EngineEvent};
pub use recorder::{EncoderFactory, RecordingState, RecordingSummary, SavedFile, VideoEncoder};
pub use utils::error::{EngineError, EngineResult};
