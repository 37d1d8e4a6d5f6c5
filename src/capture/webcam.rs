//! Webcam capture using nokhwa
//!
//! Production [`CaptureBackend`] backed by the nokhwa crate. Frames are
//! decoded to RGB24 before they enter the engine.

use crate::capture::traits::{CaptureBackend, Frame, VideoSource};
use crate::utils::error::{EngineError, EngineResult};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

/// Device ids probed when the backend cannot enumerate anything.
const FALLBACK_ID_RANGE: std::ops::RangeInclusive<u32> = 0..=5;

/// Webcam backend backed by the platform's native capture API.
#[derive(Debug, Default)]
pub struct WebcamBackend;

impl WebcamBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for WebcamBackend {
    fn candidates(&self) -> Vec<u32> {
        match nokhwa::query(ApiBackend::Auto) {
            Ok(cameras) if !cameras.is_empty() => cameras
                .iter()
                .filter_map(|info| match info.index() {
                    CameraIndex::Index(i) => Some(*i),
                    CameraIndex::String(s) => {
                        tracing::debug!("skipping non-numeric camera id {s:?}");
                        None
                    }
                })
                .collect(),
            Ok(_) => {
                tracing::debug!("no cameras enumerated, falling back to numeric probe range");
                FALLBACK_ID_RANGE.collect()
            }
            Err(e) => {
                tracing::warn!("failed to enumerate cameras: {e}, falling back to numeric probe range");
                FALLBACK_ID_RANGE.collect()
            }
        }
    }

    fn open(&self, id: u32) -> EngineResult<Box<dyn VideoSource>> {
        let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);

        let mut camera = Camera::new(CameraIndex::Index(id), format).map_err(|e| {
            EngineError::DeviceUnavailable {
                id,
                reason: e.to_string(),
            }
        })?;

        camera
            .open_stream()
            .map_err(|e| EngineError::DeviceUnavailable {
                id,
                reason: e.to_string(),
            })?;

        let camera_format = camera.camera_format();
        let width = camera_format.resolution().width();
        let height = camera_format.resolution().height();
        let fps = camera_format.frame_rate();

        tracing::info!(
            "opened camera {id}: {width}x{height} @ {fps}fps, format={:?}",
            camera_format.format()
        );

        Ok(Box::new(WebcamSource {
            id,
            camera,
            width,
            height,
            fps,
        }))
    }
}

/// An open webcam stream.
pub struct WebcamSource {
    id: u32,
    camera: Camera,
    width: u32,
    height: u32,
    fps: u32,
}

impl VideoSource for WebcamSource {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn fps(&self) -> u32 {
        self.fps
    }

    fn read_frame(&mut self) -> EngineResult<Frame> {
        // Blocks until the camera delivers the next frame; the device paces us.
        let buffer = self.camera.frame().map_err(|e| {
            tracing::debug!("camera {} frame read failed: {e}", self.id);
            EngineError::DeviceLost(self.id)
        })?;

        let image = buffer.decode_image::<RgbFormat>().map_err(|e| {
            tracing::debug!("camera {} frame decode failed: {e}", self.id);
            EngineError::DeviceLost(self.id)
        })?;

        let (width, height) = (image.width(), image.height());
        Ok(Frame::new(self.id, width, height, image.into_raw()))
    }
}

impl Drop for WebcamSource {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("error stopping camera {} stream: {e}", self.id);
        }
    }
}
