//! Device discovery
//!
//! Walks the backend's candidate ids and keeps every device that can be
//! opened and actually yields a frame. Discovery never fails as a whole;
//! unusable candidates are logged and skipped.

use crate::capture::traits::{CaptureBackend, DeviceDescriptor};
use std::time::Duration;

/// Fallback dimensions for devices that report zero/invalid metadata.
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
pub const DEFAULT_FPS: u32 = 30;

/// Settle time between opening a device and the validation read.
const OPEN_GRACE: Duration = Duration::from_millis(200);

/// Discover usable capture devices.
///
/// Probes candidates in ascending id order; each device is opened, read once
/// and released before the next candidate is tried. An empty result means no
/// usable devices, not an error.
pub fn probe_devices(backend: &dyn CaptureBackend) -> Vec<DeviceDescriptor> {
    probe_devices_with(backend, OPEN_GRACE)
}

/// [`probe_devices`] with an explicit grace delay after open.
pub fn probe_devices_with(backend: &dyn CaptureBackend, grace: Duration) -> Vec<DeviceDescriptor> {
    let mut candidates = backend.candidates();
    candidates.sort_unstable();
    candidates.dedup();

    let mut found = Vec::new();
    for id in candidates {
        let mut source = match backend.open(id) {
            Ok(source) => source,
            Err(e) => {
                tracing::debug!("device {id} failed to open: {e}");
                continue;
            }
        };

        // Some devices need a moment after open before the first read succeeds.
        if !grace.is_zero() {
            std::thread::sleep(grace);
        }

        match source.read_frame() {
            Ok(_) => {
                let descriptor = DeviceDescriptor {
                    id,
                    width: non_zero_or(source.width(), DEFAULT_WIDTH),
                    height: non_zero_or(source.height(), DEFAULT_HEIGHT),
                    declared_fps: non_zero_or(source.fps(), DEFAULT_FPS),
                };
                tracing::info!(
                    "found working device {id}: {}x{} @ {}fps",
                    descriptor.width,
                    descriptor.height,
                    descriptor.declared_fps
                );
                found.push(descriptor);
            }
            Err(e) => {
                tracing::debug!("device {id} opened but could not read a frame: {e}");
            }
        }
        // source dropped here: the handle is released before the next candidate
    }

    if found.is_empty() {
        tracing::warn!("no working capture devices detected");
    }
    found
}

fn non_zero_or(value: u32, fallback: u32) -> u32 {
    if value == 0 {
        fallback
    } else {
        value
    }
}
