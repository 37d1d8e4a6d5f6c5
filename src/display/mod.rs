//! Frame distribution to the display sink
//!
//! Capture loops publish frames into per-device latest-wins slots; a single
//! drain thread owns the sink, scales each frame to the sink's viewport and
//! renders it. Delivery is best-effort and lossy: if the sink cannot keep up,
//! newer frames supersede older ones and nothing backpressures the capture
//! loops.

use crate::capture::traits::Frame;
use crate::utils::error::EngineResult;
use image::imageops::FilterType;
use image::RgbImage;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Smallest size a frame is ever rendered at.
pub const MIN_RENDER_WIDTH: u32 = 100;
pub const MIN_RENDER_HEIGHT: u32 = 75;

/// Rendering surface for live frames
///
/// All calls are made from the distributor's single drain thread, so a sink
/// never observes concurrent access to its own state.
pub trait DisplaySink: Send + Sync {
    /// Current viewport size for a device's display area.
    fn viewport(&self, device_id: u32) -> (u32, u32);

    /// Present a scaled RGB24 frame.
    fn render(&self, device_id: u32, data: &[u8], width: u32, height: u32);
}

struct Shared {
    sink: Arc<dyn DisplaySink>,
    slots: Mutex<HashMap<u32, Frame>>,
    cv: Condvar,
    shutdown: AtomicBool,
}

/// Rate-decoupled fan-out from capture loops to the display sink.
pub struct FrameDistributor {
    shared: Arc<Shared>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl FrameDistributor {
    pub fn new(sink: Arc<dyn DisplaySink>) -> EngineResult<Self> {
        let shared = Arc::new(Shared {
            sink,
            slots: Mutex::new(HashMap::new()),
            cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let drain = std::thread::Builder::new().name("display-drain".into()).spawn({
            let shared = Arc::clone(&shared);
            move || drain_loop(shared)
        })?;

        Ok(Self {
            shared,
            drain: Mutex::new(Some(drain)),
        })
    }

    /// Hand a frame to the display path. Never blocks on the sink.
    pub fn publish(&self, frame: Frame) {
        {
            let mut slots = self.shared.slots.lock();
            // Latest frame wins; an undelivered predecessor is simply dropped.
            slots.insert(frame.device_id, frame);
        }
        self.shared.cv.notify_one();
    }

    /// Stop and join the drain thread. Idempotent.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.cv.notify_one();
        if let Some(thread) = self.drain.lock().take() {
            if thread.join().is_err() {
                tracing::error!("display drain thread panicked");
            }
        }
    }
}

impl Drop for FrameDistributor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn drain_loop(shared: Arc<Shared>) {
    tracing::debug!("display drain thread running");
    loop {
        let pending: Vec<Frame> = {
            let mut slots = shared.slots.lock();
            while slots.is_empty() && !shared.shutdown.load(Ordering::SeqCst) {
                shared.cv.wait(&mut slots);
            }
            if shared.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let mut pending: Vec<Frame> = slots.drain().map(|(_, frame)| frame).collect();
            pending.sort_by_key(|frame| frame.device_id);
            pending
        };

        for frame in pending {
            deliver(shared.sink.as_ref(), &frame);
        }
    }
    tracing::debug!("display drain thread exited");
}

fn deliver(sink: &dyn DisplaySink, frame: &Frame) {
    if frame.width == 0 || frame.height == 0 {
        return;
    }

    let (view_width, view_height) = sink.viewport(frame.device_id);
    // Viewports this small are not realized yet; skip rather than render junk.
    if view_width <= 10 || view_height <= 10 {
        return;
    }

    let (target_width, target_height) =
        fit_dimensions(frame.width, frame.height, view_width, view_height);

    let Some(image) = RgbImage::from_raw(frame.width, frame.height, frame.data.to_vec()) else {
        tracing::warn!(
            "frame from device {} has inconsistent buffer size",
            frame.device_id
        );
        return;
    };

    let scaled = image::imageops::resize(&image, target_width, target_height, FilterType::Triangle);
    sink.render(frame.device_id, scaled.as_raw(), target_width, target_height);
}

/// Largest size with the frame's aspect ratio fitting the viewport, floored
/// at [`MIN_RENDER_WIDTH`]×[`MIN_RENDER_HEIGHT`].
pub fn fit_dimensions(
    frame_width: u32,
    frame_height: u32,
    view_width: u32,
    view_height: u32,
) -> (u32, u32) {
    let aspect = frame_width as f64 / frame_height as f64;

    let (width, height) = if view_width as f64 / view_height as f64 > aspect {
        // Viewport is wider than the frame: height constrains.
        ((view_height as f64 * aspect) as u32, view_height)
    } else {
        (view_width, (view_width as f64 / aspect) as u32)
    };

    (width.max(MIN_RENDER_WIDTH), height.max(MIN_RENDER_HEIGHT))
}
