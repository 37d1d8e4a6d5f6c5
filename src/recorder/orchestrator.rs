//! Recording orchestrator
//!
//! Coordinates starting and stopping encoders for a set of devices as one
//! logical operation. `start_all` is all-or-nothing: encoders opened before a
//! failure are closed again and their partial files removed, and the job set
//! is only installed once every device engaged, so no caller ever observes a
//! half-started run.

use crate::capture::traits::{DeviceDescriptor, Frame};
use crate::engine::EngineEvent;
use crate::recorder::encoder::EncoderFactory;
use crate::recorder::state::{
    RecordingJob, RecordingSet, RecordingState, RecordingSummary, SavedFile,
};
use crate::utils::error::{EngineError, EngineResult};
use chrono::Local;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Encoder fps used when a device does not report one.
const DEFAULT_ENCODER_FPS: u32 = 20;

/// Output files at or below this size are considered failed and deleted.
const MIN_VALID_FILE_BYTES: u64 = 1024;

struct Inner {
    state: RecordingState,
    set: Option<RecordingSet>,
}

/// Owns recording state and per-device encoders for the whole engine.
pub struct RecordingOrchestrator {
    inner: RwLock<Inner>,
    factory: Arc<dyn EncoderFactory>,
    events: broadcast::Sender<EngineEvent>,
}

impl RecordingOrchestrator {
    pub fn new(factory: Arc<dyn EncoderFactory>, events: broadcast::Sender<EngineEvent>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: RecordingState::Idle,
                set: None,
            }),
            factory,
            events,
        }
    }

    /// Current state of the recording state machine.
    pub fn state(&self) -> RecordingState {
        self.inner.read().state
    }

    /// Start recording the given devices into `dest_dir`.
    ///
    /// `ensure_session` must leave a capture session running for the id and
    /// return the live device metadata; the orchestrator calls it once per
    /// device in ascending id order. All files of the run share one
    /// timestamp. On any failure the entire start is rolled back and
    /// [`EngineError::PartialStartFailure`] names the offending device.
    pub fn start_all(
        &self,
        device_ids: &[u32],
        dest_dir: &Path,
        ensure_session: &mut dyn FnMut(u32) -> EngineResult<DeviceDescriptor>,
    ) -> EngineResult<Uuid> {
        {
            let mut inner = self.inner.write();
            if inner.state != RecordingState::Idle {
                return Err(EngineError::AlreadyRecording);
            }
            inner.state = RecordingState::Starting;
        }

        let mut ids = device_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let run_id = Uuid::new_v4();
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        tracing::info!(
            "starting recording {run_id} for {} device(s) into {}",
            ids.len(),
            dest_dir.display()
        );

        let mut jobs: HashMap<u32, Arc<RecordingJob>> = HashMap::new();
        for id in &ids {
            match self.engage_device(*id, dest_dir, &stamp, ensure_session) {
                Ok(job) => {
                    jobs.insert(*id, Arc::new(job));
                }
                Err(e) => {
                    tracing::warn!("recording start failed at device {id}: {e}, rolling back");
                    self.rollback(jobs);
                    self.inner.write().state = RecordingState::Idle;
                    return Err(EngineError::PartialStartFailure {
                        device_id: *id,
                        source: Box::new(e),
                    });
                }
            }
        }

        {
            let mut inner = self.inner.write();
            inner.set = Some(RecordingSet {
                run_id,
                started_at: Instant::now(),
                jobs,
            });
            inner.state = RecordingState::Active;
        }

        let _ = self.events.send(EngineEvent::RecordingStarted {
            run_id,
            device_ids: ids,
        });
        tracing::info!("recording {run_id} active");
        Ok(run_id)
    }

    fn engage_device(
        &self,
        id: u32,
        dest_dir: &Path,
        stamp: &str,
        ensure_session: &mut dyn FnMut(u32) -> EngineResult<DeviceDescriptor>,
    ) -> EngineResult<RecordingJob> {
        let descriptor = ensure_session(id)?;

        let path = dest_dir.join(format!("camera_{id}_{stamp}.mp4"));
        let fps = if descriptor.declared_fps == 0 {
            DEFAULT_ENCODER_FPS
        } else {
            descriptor.declared_fps
        };

        let encoder = self
            .factory
            .open(&path, descriptor.width, descriptor.height, fps)?;
        Ok(RecordingJob::new(id, path, encoder, fps))
    }

    /// Close encoders opened during a failed start and remove their files.
    fn rollback(&self, jobs: HashMap<u32, Arc<RecordingJob>>) {
        for job in jobs.into_values() {
            if let Some(encoder) = job.take_encoder() {
                if let Err(e) = encoder.finish() {
                    tracing::warn!(
                        "error closing encoder for device {} during rollback: {e}",
                        job.device_id
                    );
                }
            }
            if job.path.exists() {
                if let Err(e) = std::fs::remove_file(&job.path) {
                    tracing::warn!(
                        "could not remove partial file {}: {e}",
                        job.path.display()
                    );
                }
            }
        }
    }

    /// Offer a captured frame to the device's encoder, if one is active.
    ///
    /// Called inline from capture loops; cheap when not recording. Rate
    /// gating and write-error isolation happen inside the job.
    pub fn write_frame(&self, frame: &Frame) {
        let job = {
            let inner = self.inner.read();
            if inner.state != RecordingState::Active {
                return;
            }
            match inner
                .set
                .as_ref()
                .and_then(|set| set.jobs.get(&frame.device_id))
            {
                Some(job) => Arc::clone(job),
                None => return,
            }
        };
        job.offer(frame);
    }

    /// Stop the current run, finalize every encoder and validate the files.
    ///
    /// Capture sessions are left running; only encoders are torn down. An
    /// empty file list is surfaced as an [`EngineEvent::Error`] in addition
    /// to the returned summary, never silently.
    pub fn stop_all(&self) -> EngineResult<RecordingSummary> {
        let set = {
            let mut inner = self.inner.write();
            if inner.state != RecordingState::Active {
                return Err(EngineError::NotRecording);
            }
            let Some(set) = inner.set.take() else {
                inner.state = RecordingState::Idle;
                return Err(EngineError::NotRecording);
            };
            inner.state = RecordingState::Stopping;
            set
        };

        let RecordingSet {
            run_id,
            started_at,
            jobs,
        } = set;
        tracing::info!("stopping recording {run_id}");

        let mut jobs: Vec<Arc<RecordingJob>> = jobs.into_values().collect();
        jobs.sort_by_key(|job| job.device_id);

        let mut files = Vec::new();
        for job in &jobs {
            files.extend(self.close_job(job));
        }

        let duration_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        self.inner.write().state = RecordingState::Idle;

        let _ = self.events.send(EngineEvent::RecordingStopped { run_id, duration_ms });
        if files.is_empty() {
            tracing::error!("recording {run_id} produced no valid output files");
            let _ = self.events.send(EngineEvent::Error(
                "no video files were successfully created".to_string(),
            ));
        } else {
            tracing::info!(
                "recording {run_id} stopped: {} file(s), {:.0}ms",
                files.len(),
                duration_ms
            );
        }

        Ok(RecordingSummary {
            run_id,
            files,
            duration_ms,
        })
    }

    /// Finalize and remove the job for one device mid-run.
    ///
    /// Used when a device's session stops or dies while recording: a job must
    /// never outlive its capture session. The run stays active for the
    /// remaining devices.
    pub fn finalize_job(&self, device_id: u32) -> Option<SavedFile> {
        let job = {
            let mut inner = self.inner.write();
            inner
                .set
                .as_mut()
                .and_then(|set| set.jobs.remove(&device_id))
        }?;

        tracing::info!("finalizing recording job for device {device_id} ahead of the run");
        self.close_job(&job)
    }

    /// Close one job's encoder and validate its output file.
    fn close_job(&self, job: &RecordingJob) -> Option<SavedFile> {
        if let Some(encoder) = job.take_encoder() {
            if let Err(e) = encoder.finish() {
                tracing::warn!("error closing encoder for device {}: {e}", job.device_id);
            }
        }

        match std::fs::metadata(&job.path) {
            Ok(meta) if meta.len() > MIN_VALID_FILE_BYTES => {
                let saved = SavedFile {
                    device_id: job.device_id,
                    path: job.path.clone(),
                    frames_written: job.frames_written(),
                };
                tracing::info!(
                    "saved {} ({} frames)",
                    saved.path.display(),
                    saved.frames_written
                );
                let _ = self.events.send(EngineEvent::FileSaved(saved.clone()));
                Some(saved)
            }
            Ok(_) => {
                if let Err(e) = std::fs::remove_file(&job.path) {
                    tracing::warn!(
                        "could not remove invalid file {}: {e}",
                        job.path.display()
                    );
                }
                tracing::warn!("discarded undersized recording {}", job.path.display());
                let _ = self.events.send(EngineEvent::FileDiscarded {
                    device_id: job.device_id,
                    path: job.path.clone(),
                });
                None
            }
            Err(e) => {
                tracing::warn!(
                    "recording for device {} never materialized at {}: {e}",
                    job.device_id,
                    job.path.display()
                );
                let _ = self.events.send(EngineEvent::FileDiscarded {
                    device_id: job.device_id,
                    path: job.path.clone(),
                });
                None
            }
        }
    }
}
