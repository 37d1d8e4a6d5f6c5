//! Recording system module
//!
//! This module implements multi-device recording:
//! - VideoEncoder/EncoderFactory seam plus the FFmpeg implementation
//! - RecordingOrchestrator for atomic start/stop of a whole device set
//! - Per-job state and rate-limited write bookkeeping

pub mod encoder;
pub mod orchestrator;
pub mod state;

pub use encoder::{EncoderFactory, FfmpegEncoderFactory, VideoEncoder};
pub use orchestrator::RecordingOrchestrator;
pub use state::{RecordingJob, RecordingState, RecordingSummary, SavedFile};
