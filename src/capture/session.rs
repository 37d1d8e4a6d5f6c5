//! Capture sessions
//!
//! One session per started device: an exclusively-owned device handle plus a
//! dedicated capture thread reading frames and fanning them out to the
//! recording write path and the frame distributor. Cancellation is
//! cooperative; the loop observes its active flag each iteration and a frame
//! whose read raced a stop is discarded.

use crate::capture::traits::{CaptureBackend, DeviceDescriptor, VideoSource};
use crate::display::FrameDistributor;
use crate::engine::EngineEvent;
use crate::recorder::orchestrator::RecordingOrchestrator;
use crate::utils::error::{EngineError, EngineResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Minimum spacing between frames handed to the distributor (~30/s).
const DISPLAY_INTERVAL: Duration = Duration::from_millis(33);

/// Everything a capture loop needs besides its device handle.
#[derive(Clone)]
pub struct SessionContext {
    pub orchestrator: Arc<RecordingOrchestrator>,
    pub distributor: Arc<FrameDistributor>,
    pub events: broadcast::Sender<EngineEvent>,
}

struct SessionHandle {
    active: Arc<AtomicBool>,
    descriptor: DeviceDescriptor,
    thread: Option<JoinHandle<()>>,
}

/// Registry of running capture sessions, keyed by device id.
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<u32, SessionHandle>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a capture session for `id` unless one is already running.
    ///
    /// Starting an already-running device is a no-op returning the session's
    /// metadata; the map lock is held across open/validate/spawn so
    /// concurrent starts for one id can never produce two sessions. Returns
    /// the live device metadata and whether a session was newly started.
    pub fn ensure_running(
        &self,
        backend: &dyn CaptureBackend,
        id: u32,
        ctx: SessionContext,
    ) -> EngineResult<(DeviceDescriptor, bool)> {
        let mut sessions = self.sessions.lock();
        if let Some(handle) = sessions.get(&id) {
            tracing::debug!("device {id} already running");
            return Ok((handle.descriptor, false));
        }

        let mut source = backend.open(id)?;

        // Validate before spawning: a device that opens but never yields
        // frames must not get a session. The handle is released on failure.
        if let Err(e) = source.read_frame() {
            tracing::warn!("device {id} opened but cannot read frames: {e}");
            return Err(EngineError::DeviceUnreadable(id));
        }

        let descriptor = DeviceDescriptor {
            id,
            width: source.width(),
            height: source.height(),
            declared_fps: source.fps(),
        };

        let active = Arc::new(AtomicBool::new(true));
        let thread = std::thread::Builder::new()
            .name(format!("capture-{id}"))
            .spawn({
                let active = Arc::clone(&active);
                let sessions = Arc::clone(&self.sessions);
                move || capture_loop(id, source, active, sessions, ctx)
            })?;

        sessions.insert(
            id,
            SessionHandle {
                active,
                descriptor,
                thread: Some(thread),
            },
        );
        tracing::info!(
            "device {id} started: {}x{} @ {}fps",
            descriptor.width,
            descriptor.height,
            descriptor.declared_fps
        );
        Ok((descriptor, true))
    }

    /// Stop the session for `id`, joining its capture thread.
    ///
    /// Returns whether a session was actually running. Idempotent.
    pub fn stop(&self, id: u32) -> bool {
        let handle = self.sessions.lock().remove(&id);
        let Some(mut handle) = handle else {
            return false;
        };

        handle.active.store(false, Ordering::SeqCst);
        // The join must happen outside the map lock: the loop's failure path
        // takes that lock to unregister itself.
        if let Some(thread) = handle.thread.take() {
            if thread.join().is_err() {
                tracing::error!("capture thread for device {id} panicked");
            }
        }
        tracing::info!("device {id} stopped");
        true
    }

    pub fn is_running(&self, id: u32) -> bool {
        self.sessions.lock().contains_key(&id)
    }

    /// Ids of all running sessions, ascending.
    pub fn active_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.sessions.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn capture_loop(
    id: u32,
    mut source: Box<dyn VideoSource>,
    active: Arc<AtomicBool>,
    sessions: Arc<Mutex<HashMap<u32, SessionHandle>>>,
    ctx: SessionContext,
) {
    tracing::debug!("capture loop for device {id} running");
    let mut last_publish: Option<Instant> = None;

    while active.load(Ordering::SeqCst) {
        // The read blocks until the device delivers; the device paces the loop.
        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                // A read racing a stop is expected; anything else means the
                // device is gone. The swap makes exactly one path report it.
                if active.swap(false, Ordering::SeqCst) {
                    tracing::error!("lost device {id}: {e}");
                    sessions.lock().remove(&id);
                    ctx.orchestrator.finalize_job(id);
                    let _ = ctx.events.send(EngineEvent::DeviceLost { device_id: id });
                }
                break;
            }
        };

        // A read in flight when stop() flipped the flag still completes;
        // that frame must not reach any consumer.
        if !active.load(Ordering::SeqCst) {
            break;
        }

        ctx.orchestrator.write_frame(&frame);

        let now = Instant::now();
        if last_publish.map_or(true, |t| now.duration_since(t) >= DISPLAY_INTERVAL) {
            last_publish = Some(now);
            ctx.distributor.publish(frame);
        }
    }

    tracing::debug!("capture loop for device {id} exited");
    // source dropped here: the device handle is released exactly once
}
