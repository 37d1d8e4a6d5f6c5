//! Recording state management
//!
//! Defines the recording state machine and the per-device job bookkeeping.

use crate::capture::traits::Frame;
use crate::recorder::encoder::VideoEncoder;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Current state of the recording system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    Idle,
    /// Encoders are being opened
    Starting,
    /// Recording in progress
    Active,
    /// Encoders are being finalized
    Stopping,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Live binding between a device and its encoder during a recording run
///
/// A job exists for a device iff that device has an open encoder. Writes are
/// gated to the job's frame interval so the encoder sees its target rate no
/// matter how fast the device captures.
pub struct RecordingJob {
    /// Device the job records
    pub device_id: u32,

    /// Destination file
    pub path: PathBuf,

    encoder: Mutex<Option<Box<dyn VideoEncoder>>>,
    frames_written: AtomicU64,
    last_write: Mutex<Option<Instant>>,
    frame_interval: Duration,
}

impl RecordingJob {
    pub fn new(device_id: u32, path: PathBuf, encoder: Box<dyn VideoEncoder>, fps: u32) -> Self {
        Self {
            device_id,
            path,
            encoder: Mutex::new(Some(encoder)),
            frames_written: AtomicU64::new(0),
            last_write: Mutex::new(None),
            frame_interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
        }
    }

    /// Offer a frame to the encoder.
    ///
    /// Frames arriving faster than the frame interval are dropped, not
    /// buffered. A failed write is logged and recording continues.
    pub fn offer(&self, frame: &Frame) {
        let now = Instant::now();
        {
            let mut last = self.last_write.lock();
            if let Some(t) = *last {
                if now.duration_since(t) < self.frame_interval {
                    return;
                }
            }
            *last = Some(now);
        }

        let mut encoder = self.encoder.lock();
        if let Some(encoder) = encoder.as_mut() {
            match encoder.write_frame(frame) {
                Ok(()) => {
                    self.frames_written.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::warn!("error writing frame for device {}: {e}", self.device_id);
                }
            }
        }
    }

    /// Number of frames accepted so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Take the encoder out of the job, leaving later writes as no-ops.
    pub(crate) fn take_encoder(&self) -> Option<Box<dyn VideoEncoder>> {
        self.encoder.lock().take()
    }
}

impl std::fmt::Debug for RecordingJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingJob")
            .field("device_id", &self.device_id)
            .field("path", &self.path)
            .field("frames_written", &self.frames_written())
            .field("frame_interval", &self.frame_interval)
            .finish()
    }
}

/// All jobs of one recording run
#[derive(Debug)]
pub struct RecordingSet {
    /// Identifier shared by every event of this run
    pub run_id: Uuid,

    /// When the run went active
    pub started_at: Instant,

    /// One job per engaged device, keyed by device id
    pub jobs: HashMap<u32, Arc<RecordingJob>>,
}

/// One successfully saved output file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedFile {
    /// Device the file was recorded from
    pub device_id: u32,

    /// Path of the saved file
    pub path: PathBuf,

    /// Frames accepted by the encoder
    pub frames_written: u64,
}

/// Result of a completed recording run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSummary {
    /// Run identifier
    pub run_id: Uuid,

    /// Files that passed validation, in device-id order
    pub files: Vec<SavedFile>,

    /// Wall-clock duration of the run in milliseconds
    pub duration_ms: f64,
}
