//! Engine controller
//!
//! Top-level facade over discovery, capture sessions, frame distribution and
//! recording orchestration. Owns all engine state explicitly; constructed
//! once, torn down once. Control operations are serialized through one lock,
//! matching the single-coordinator model: capture threads only ever send
//! frames and status, they never drive control flow.

use crate::capture::probe::probe_devices;
use crate::capture::session::{SessionContext, SessionManager};
use crate::capture::traits::{CaptureBackend, DeviceDescriptor};
use crate::capture::webcam::WebcamBackend;
use crate::display::{DisplaySink, FrameDistributor};
use crate::recorder::encoder::{EncoderFactory, FfmpegEncoderFactory};
use crate::recorder::orchestrator::RecordingOrchestrator;
use crate::recorder::state::{RecordingState, RecordingSummary, SavedFile};
use crate::utils::error::{EngineError, EngineResult};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Status events emitted by the engine
///
/// Every externally visible state change surfaces here; nothing fails
/// silently.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A discovery pass completed
    DevicesDiscovered(Vec<DeviceDescriptor>),
    /// A capture session started
    DeviceStarted { device_id: u32 },
    /// A capture session was stopped
    DeviceStopped { device_id: u32 },
    /// A device failed mid-session and its session was torn down
    DeviceLost { device_id: u32 },
    /// All encoders of a run opened successfully
    RecordingStarted { run_id: Uuid, device_ids: Vec<u32> },
    /// One output file passed validation
    FileSaved(SavedFile),
    /// One output file was missing or too small and was deleted
    FileDiscarded { device_id: u32, path: PathBuf },
    /// A recording run finished
    RecordingStopped { run_id: Uuid, duration_ms: f64 },
    /// Anything the operator should know about that is not a state change
    Error(String),
}

/// Top-level engine facade
pub struct EngineController {
    backend: Arc<dyn CaptureBackend>,
    sessions: SessionManager,
    orchestrator: Arc<RecordingOrchestrator>,
    distributor: Arc<FrameDistributor>,
    known_devices: Mutex<Vec<DeviceDescriptor>>,
    events: broadcast::Sender<EngineEvent>,
    control: Mutex<()>,
}

impl EngineController {
    /// Create an engine over explicit backend, encoder factory and sink.
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        factory: Arc<dyn EncoderFactory>,
        sink: Arc<dyn DisplaySink>,
    ) -> EngineResult<Self> {
        let (events, _) = broadcast::channel(100);
        Ok(Self {
            backend,
            sessions: SessionManager::new(),
            orchestrator: Arc::new(RecordingOrchestrator::new(factory, events.clone())),
            distributor: Arc::new(FrameDistributor::new(sink)?),
            known_devices: Mutex::new(Vec::new()),
            events,
            control: Mutex::new(()),
        })
    }

    /// Create an engine with the production backend and FFmpeg encoding.
    pub fn with_defaults(sink: Arc<dyn DisplaySink>) -> EngineResult<Self> {
        let factory = Arc::new(FfmpegEncoderFactory::new()?);
        Self::new(Arc::new(WebcamBackend::new()), factory, sink)
    }

    /// Subscribe to engine status events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn context(&self) -> SessionContext {
        SessionContext {
            orchestrator: Arc::clone(&self.orchestrator),
            distributor: Arc::clone(&self.distributor),
            events: self.events.clone(),
        }
    }

    /// Run a discovery pass and remember the result.
    ///
    /// Devices currently held open by a running session may not probe and are
    /// then skipped; discovery is typically run before sessions start.
    pub fn discover(&self) -> Vec<DeviceDescriptor> {
        let _guard = self.control.lock();
        let found = probe_devices(self.backend.as_ref());
        *self.known_devices.lock() = found.clone();
        let _ = self
            .events
            .send(EngineEvent::DevicesDiscovered(found.clone()));
        found
    }

    /// Devices found by the most recent discovery pass.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.known_devices.lock().clone()
    }

    /// Ids of devices with a running capture session, ascending.
    pub fn active_devices(&self) -> Vec<u32> {
        self.sessions.active_ids()
    }

    /// Start live capture for one device. No-op if already running.
    pub fn start_device(&self, id: u32) -> EngineResult<()> {
        let _guard = self.control.lock();
        self.start_device_locked(id).map(|_| ())
    }

    fn start_device_locked(&self, id: u32) -> EngineResult<DeviceDescriptor> {
        let (descriptor, newly_started) =
            self.sessions
                .ensure_running(self.backend.as_ref(), id, self.context())?;
        if newly_started {
            let _ = self.events.send(EngineEvent::DeviceStarted { device_id: id });
        }
        Ok(descriptor)
    }

    /// Stop live capture for one device, finalizing any recording job for it.
    pub fn stop_device(&self, id: u32) {
        let _guard = self.control.lock();
        self.stop_device_locked(id);
    }

    fn stop_device_locked(&self, id: u32) {
        if self.sessions.stop(id) {
            // A recording job must never outlive its capture session.
            self.orchestrator.finalize_job(id);
            let _ = self.events.send(EngineEvent::DeviceStopped { device_id: id });
        }
    }

    /// Start live capture for every known device.
    pub fn start_all_devices(&self) {
        let _guard = self.control.lock();
        let known = self.known_devices.lock().clone();
        for descriptor in known {
            if let Err(e) = self.start_device_locked(descriptor.id) {
                tracing::warn!("failed to start device {}: {e}", descriptor.id);
                let _ = self.events.send(EngineEvent::Error(format!(
                    "failed to start device {}: {e}",
                    descriptor.id
                )));
            }
        }
    }

    /// Stop every capture session, ending any active recording first.
    pub fn stop_all_devices(&self) {
        let _guard = self.control.lock();
        self.stop_everything();
    }

    fn stop_everything(&self) {
        if self.orchestrator.state() == RecordingState::Active {
            if let Err(e) = self.orchestrator.stop_all() {
                tracing::warn!("error stopping recording: {e}");
            }
        }
        for id in self.sessions.active_ids() {
            self.stop_device_locked(id);
        }
    }

    /// Start recording the given devices (all known devices when empty).
    ///
    /// All-or-nothing: on failure no job survives and the error names the
    /// device that caused the abort. Sessions started along the way stay
    /// running for live view.
    pub fn start_recording(&self, device_ids: &[u32], dest_dir: &Path) -> EngineResult<Uuid> {
        let _guard = self.control.lock();

        let ids: Vec<u32> = if device_ids.is_empty() {
            self.known_devices.lock().iter().map(|d| d.id).collect()
        } else {
            device_ids.to_vec()
        };
        if ids.is_empty() {
            return Err(EngineError::NoDevices);
        }

        std::fs::create_dir_all(dest_dir)?;

        let orchestrator = Arc::clone(&self.orchestrator);
        orchestrator.start_all(&ids, dest_dir, &mut |id| self.start_device_locked(id))
    }

    /// Stop the active recording run and report the saved files.
    pub fn stop_recording(&self) -> EngineResult<RecordingSummary> {
        let _guard = self.control.lock();
        self.orchestrator.stop_all()
    }

    /// Current recording state.
    pub fn recording_state(&self) -> RecordingState {
        self.orchestrator.state()
    }

    /// Tear the engine down: recording first (finalizing files), then every
    /// capture session, then the display pipeline.
    pub fn shutdown(&self) {
        let _guard = self.control.lock();
        tracing::info!("shutting down engine");
        self.stop_everything();
        self.distributor.shutdown();
    }
}

impl Drop for EngineController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
