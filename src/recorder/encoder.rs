//! Video encoders
//!
//! The encoder seam plus the production implementation: an FFmpeg child
//! process consuming raw RGB24 frames on stdin and producing H.264 MP4.

use crate::capture::traits::Frame;
use crate::utils::error::{EngineError, EngineResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

/// An open encoder for one output file
///
/// Exclusively owned by one [`RecordingJob`](crate::recorder::RecordingJob);
/// `finish` consumes the encoder so it can be closed exactly once.
pub trait VideoEncoder: Send {
    /// Append one frame to the output.
    fn write_frame(&mut self, frame: &Frame) -> EngineResult<()>;

    /// Flush and close the output file.
    fn finish(self: Box<Self>) -> EngineResult<()>;
}

/// Opens encoders for recording jobs
pub trait EncoderFactory: Send + Sync {
    /// Open an encoder writing to `path`, sized to the given stream.
    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> EngineResult<Box<dyn VideoEncoder>>;
}

/// Factory spawning one FFmpeg process per output file.
pub struct FfmpegEncoderFactory;

impl FfmpegEncoderFactory {
    /// Create the factory, verifying FFmpeg is on the PATH.
    pub fn new() -> EngineResult<Self> {
        if Command::new("ffmpeg").arg("-version").output().is_err() {
            return Err(EngineError::EncoderFailure(
                "FFmpeg not found. Please install FFmpeg and make sure it is on the PATH"
                    .to_string(),
            ));
        }
        Ok(Self)
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> EngineResult<Box<dyn VideoEncoder>> {
        FfmpegEncoder::spawn(path, width, height, fps).map(|e| Box::new(e) as Box<dyn VideoEncoder>)
    }
}

/// FFmpeg-backed encoder for one MP4 output file.
pub struct FfmpegEncoder {
    child: Option<Child>,
    path: PathBuf,
    frame_len: usize,
}

impl FfmpegEncoder {
    fn spawn(path: &Path, width: u32, height: u32, fps: u32) -> EngineResult<Self> {
        // Input: raw RGB24 frames on stdin. Output: H.264 MP4.
        let child = Command::new("ffmpeg")
            .args([
                "-y", // Overwrite output
                "-f",
                "rawvideo",
                "-pixel_format",
                "rgb24",
                "-video_size",
                &format!("{width}x{height}"),
                "-framerate",
                &fps.to_string(),
                "-i",
                "-", // Read from stdin
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-pix_fmt",
                "yuv420p", // Required for broad player compatibility
                "-crf",
                "18",
                "-g",
                &(fps * 2).to_string(), // GOP size = 2 seconds
                "-movflags",
                "+faststart",
            ])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::EncoderFailure(format!("failed to spawn ffmpeg: {e}")))?;

        tracing::info!(
            "started encoder: {width}x{height} @ {fps}fps -> {}",
            path.display()
        );

        Ok(Self {
            child: Some(child),
            path: path.to_path_buf(),
            frame_len: (width * height * 3) as usize,
        })
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn write_frame(&mut self, frame: &Frame) -> EngineResult<()> {
        if frame.data.len() != self.frame_len {
            return Err(EngineError::EncoderFailure(format!(
                "frame size {} does not match encoder input size {}",
                frame.data.len(),
                self.frame_len
            )));
        }

        let child = self
            .child
            .as_mut()
            .ok_or_else(|| EngineError::EncoderFailure("encoder already closed".to_string()))?;
        let stdin = child
            .stdin
            .as_mut()
            .ok_or_else(|| EngineError::EncoderFailure("encoder stdin closed".to_string()))?;

        stdin.write_all(&frame.data)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> EngineResult<()> {
        if let Some(mut child) = self.child.take() {
            // Closing stdin signals EOF; ffmpeg flushes and finalizes the file.
            drop(child.stdin.take());
            let output = child.wait_with_output()?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                tracing::warn!(
                    "ffmpeg exited with status {} for {}: {stderr}",
                    output.status,
                    self.path.display()
                );
            }
        }
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            tracing::warn!("encoder for {} dropped without finish, killing ffmpeg", self.path.display());
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
