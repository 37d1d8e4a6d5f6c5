//! End-to-end engine tests over simulated devices, encoders and sinks.

use multicam::{
    CaptureBackend, DisplaySink, EncoderFactory, EngineController, EngineError, EngineEvent,
    EngineResult, Frame, RecordingState, VideoEncoder, VideoSource,
};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Per-device simulation parameters.
#[derive(Clone, Copy)]
struct SimDevice {
    width: u32,
    height: u32,
    fps: u32,
    /// Time between delivered frames (the device's native rate).
    interval: Duration,
    /// Reads start failing after this many successes.
    fail_after: Option<usize>,
}

struct SimSource {
    id: u32,
    device: SimDevice,
    reads: usize,
    releases: Arc<AtomicUsize>,
}

impl VideoSource for SimSource {
    fn width(&self) -> u32 {
        self.device.width
    }

    fn height(&self) -> u32 {
        self.device.height
    }

    fn fps(&self) -> u32 {
        self.device.fps
    }

    fn read_frame(&mut self) -> EngineResult<Frame> {
        std::thread::sleep(self.device.interval);
        if let Some(limit) = self.device.fail_after {
            if self.reads >= limit {
                return Err(EngineError::DeviceLost(self.id));
            }
        }
        self.reads += 1;
        let len = (self.device.width * self.device.height * 3) as usize;
        Ok(Frame::new(
            self.id,
            self.device.width,
            self.device.height,
            vec![0; len],
        ))
    }
}

impl Drop for SimSource {
    fn drop(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

struct SimBackend {
    candidates: Vec<u32>,
    devices: HashMap<u32, SimDevice>,
    opens: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl SimBackend {
    fn new(candidates: Vec<u32>, devices: HashMap<u32, SimDevice>) -> Self {
        Self {
            candidates,
            devices,
            opens: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl CaptureBackend for SimBackend {
    fn candidates(&self) -> Vec<u32> {
        self.candidates.clone()
    }

    fn open(&self, id: u32) -> EngineResult<Box<dyn VideoSource>> {
        let device = *self
            .devices
            .get(&id)
            .ok_or(EngineError::DeviceUnavailable {
                id,
                reason: "no such device".into(),
            })?;
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimSource {
            id,
            device,
            reads: 0,
            releases: self.releases.clone(),
        }))
    }
}

struct FileEncoder {
    file: std::fs::File,
    closes: Arc<AtomicUsize>,
}

impl VideoEncoder for FileEncoder {
    fn write_frame(&mut self, frame: &Frame) -> EngineResult<()> {
        self.file.write_all(&frame.data)?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> EngineResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FileFactory {
    fail_for: Vec<u32>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl FileFactory {
    fn new(fail_for: Vec<u32>) -> Self {
        Self {
            fail_for,
            opens: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl EncoderFactory for FileFactory {
    fn open(
        &self,
        path: &Path,
        _width: u32,
        _height: u32,
        _fps: u32,
    ) -> EngineResult<Box<dyn VideoEncoder>> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let id: u32 = name
            .trim_start_matches("camera_")
            .split('_')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(u32::MAX);
        if self.fail_for.contains(&id) {
            return Err(EngineError::EncoderFailure(format!(
                "simulated encoder failure for device {id}"
            )));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FileEncoder {
            file: std::fs::File::create(path)?,
            closes: self.closes.clone(),
        }))
    }
}

struct NullSink;

impl DisplaySink for NullSink {
    fn viewport(&self, _device_id: u32) -> (u32, u32) {
        (320, 240)
    }

    fn render(&self, _device_id: u32, _data: &[u8], _width: u32, _height: u32) {}
}

fn steady(width: u32, height: u32, fps: u32, interval_ms: u64) -> SimDevice {
    SimDevice {
        width,
        height,
        fps,
        interval: Duration::from_millis(interval_ms),
        fail_after: None,
    }
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn discovery_reports_usable_devices_in_ascending_order() {
    let mut devices = HashMap::new();
    devices.insert(0, steady(640, 480, 30, 1));
    devices.insert(3, steady(1280, 720, 25, 1));
    let backend = SimBackend::new((0..=5).collect(), devices);
    let releases = backend.releases.clone();

    let engine = EngineController::new(
        Arc::new(backend),
        Arc::new(FileFactory::new(vec![])),
        Arc::new(NullSink),
    )
    .unwrap();
    let mut rx = engine.subscribe();

    let found = engine.discover();
    let ids: Vec<u32> = found.iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![0, 3]);
    assert_eq!(found[1].width, 1280);
    assert_eq!(engine.devices().len(), 2);

    // Probing released both handles.
    assert_eq!(releases.load(Ordering::SeqCst), 2);

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::DevicesDiscovered(d) if d.len() == 2)));

    // Every discovered device can be brought up and down in one call.
    engine.start_all_devices();
    assert_eq!(engine.active_devices(), vec![0, 3]);
    engine.stop_all_devices();
    assert!(engine.active_devices().is_empty());
    assert_eq!(releases.load(Ordering::SeqCst), 4);
}

#[test]
fn start_then_stop_leaves_no_session_and_no_job() {
    let mut devices = HashMap::new();
    devices.insert(0, steady(64, 48, 30, 2));
    let backend = SimBackend::new(vec![0], devices);
    let opens = backend.opens.clone();
    let releases = backend.releases.clone();

    let engine = EngineController::new(
        Arc::new(backend),
        Arc::new(FileFactory::new(vec![])),
        Arc::new(NullSink),
    )
    .unwrap();
    let mut rx = engine.subscribe();

    engine.start_device(0).unwrap();
    assert_eq!(engine.active_devices(), vec![0]);

    engine.stop_device(0);
    assert!(engine.active_devices().is_empty());
    assert_eq!(engine.recording_state(), RecordingState::Idle);
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert_eq!(releases.load(Ordering::SeqCst), 1);

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::DeviceStarted { device_id: 0 })));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::DeviceStopped { device_id: 0 })));
}

#[test]
fn concurrent_starts_produce_a_single_session() {
    let mut devices = HashMap::new();
    devices.insert(0, steady(64, 48, 30, 2));
    let backend = Arc::new(SimBackend::new(vec![0], devices));
    let opens = backend.opens.clone();

    let engine = Arc::new(
        EngineController::new(
            backend,
            Arc::new(FileFactory::new(vec![])),
            Arc::new(NullSink),
        )
        .unwrap(),
    );

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.start_device(0))
        })
        .collect();
    for t in threads {
        assert!(t.join().unwrap().is_ok());
    }

    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert_eq!(engine.active_devices(), vec![0]);
}

#[test]
fn two_device_recording_end_to_end() {
    multicam::utils::logging::init();

    let mut devices = HashMap::new();
    // Native capture well above the declared 30 fps; the write gate must
    // bring the accepted rate back down to ~30.
    devices.insert(0, steady(64, 48, 30, 1));
    devices.insert(1, steady(64, 48, 30, 1));
    let backend = SimBackend::new(vec![0, 1], devices);

    let factory = Arc::new(FileFactory::new(vec![]));
    let engine = EngineController::new(Arc::new(backend), factory.clone(), Arc::new(NullSink))
        .unwrap();
    let mut rx = engine.subscribe();
    let dir = tempfile::tempdir().unwrap();

    let run_id = engine.start_recording(&[0, 1], dir.path()).unwrap();
    assert_eq!(engine.recording_state(), RecordingState::Active);
    assert_eq!(engine.active_devices(), vec![0, 1]);

    std::thread::sleep(Duration::from_secs(2));

    let summary = engine.stop_recording().unwrap();
    assert_eq!(summary.run_id, run_id);
    assert_eq!(summary.files.len(), 2);
    assert!((1900.0..3000.0).contains(&summary.duration_ms));

    for file in &summary.files {
        assert!(file.path.exists());
        let name = file.path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(&format!("camera_{}_", file.device_id)));
        assert!(name.ends_with(".mp4"));
        // ~30 fps over ~2s of frames, with slack for scheduler jitter.
        assert!(
            (50..=68).contains(&file.frames_written),
            "device {} wrote {} frames",
            file.device_id,
            file.frames_written
        );
    }

    // Both files carry the shared run timestamp.
    let stamp = |f: &multicam::SavedFile| {
        let name = f.path.file_name().unwrap().to_str().unwrap().to_string();
        name.trim_start_matches(&format!("camera_{}_", f.device_id))
            .to_string()
    };
    assert_eq!(stamp(&summary.files[0]), stamp(&summary.files[1]));

    // Recording teardown leaves live view running.
    assert_eq!(engine.active_devices(), vec![0, 1]);
    assert_eq!(engine.recording_state(), RecordingState::Idle);

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::RecordingStarted { device_ids, .. } if device_ids == &vec![0, 1])));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, EngineEvent::FileSaved(_)))
            .count(),
        2
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::RecordingStopped { .. })));

    engine.shutdown();
}

#[test]
fn partial_start_failure_rolls_back_and_leaves_a_clean_engine() {
    let mut devices = HashMap::new();
    devices.insert(0, steady(64, 48, 30, 2));
    devices.insert(1, steady(64, 48, 30, 2));
    let backend = SimBackend::new(vec![0, 1], devices);

    let factory = Arc::new(FileFactory::new(vec![1]));
    let opens = factory.opens.clone();
    let closes = factory.closes.clone();
    let engine =
        EngineController::new(Arc::new(backend), factory, Arc::new(NullSink)).unwrap();
    let dir = tempfile::tempdir().unwrap();

    let err = engine.start_recording(&[0, 1], dir.path()).unwrap_err();
    assert!(matches!(
        err,
        EngineError::PartialStartFailure { device_id: 1, .. }
    ));

    // Device 0's encoder was opened before device 1 failed; both counters
    // agree, so nothing leaked.
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    assert_eq!(engine.recording_state(), RecordingState::Idle);

    // Sessions engaged during the attempt stay up for live view.
    assert_eq!(engine.active_devices(), vec![0, 1]);

    // The engine is reusable: recording just device 0 succeeds.
    engine.start_recording(&[0], dir.path()).unwrap();
    std::thread::sleep(Duration::from_millis(200));
    let summary = engine.stop_recording().unwrap();
    assert_eq!(summary.files.len(), 1);

    engine.shutdown();
}

#[test]
fn losing_a_device_mid_run_finalizes_only_its_job() {
    let mut devices = HashMap::new();
    devices.insert(0, steady(64, 48, 30, 1));
    // Device 1 dies ~20ms in, having produced one tiny accepted write, so
    // its output falls under the validity threshold and must be deleted.
    devices.insert(
        1,
        SimDevice {
            width: 16,
            height: 12,
            fps: 30,
            interval: Duration::from_millis(1),
            fail_after: Some(20),
        },
    );
    let backend = SimBackend::new(vec![0, 1], devices);

    let engine = EngineController::new(
        Arc::new(backend),
        Arc::new(FileFactory::new(vec![])),
        Arc::new(NullSink),
    )
    .unwrap();
    let mut rx = engine.subscribe();
    let dir = tempfile::tempdir().unwrap();

    engine.start_recording(&[0, 1], dir.path()).unwrap();
    std::thread::sleep(Duration::from_millis(600));

    // The failed device tore its own session down; device 0 is unaffected.
    assert_eq!(engine.active_devices(), vec![0]);
    assert_eq!(engine.recording_state(), RecordingState::Active);

    let summary = engine.stop_recording().unwrap();
    assert_eq!(summary.files.len(), 1);
    assert_eq!(summary.files[0].device_id, 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::DeviceLost { device_id: 1 })));
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::FileDiscarded { device_id: 1, .. })));

    engine.shutdown();
}

#[test]
fn recording_misuse_is_rejected() {
    let mut devices = HashMap::new();
    devices.insert(0, steady(64, 48, 30, 2));
    let backend = SimBackend::new(vec![0], devices);
    let engine = EngineController::new(
        Arc::new(backend),
        Arc::new(FileFactory::new(vec![])),
        Arc::new(NullSink),
    )
    .unwrap();
    let dir = tempfile::tempdir().unwrap();

    assert!(matches!(
        engine.stop_recording(),
        Err(EngineError::NotRecording)
    ));

    // No discovery pass ran and no ids were given.
    assert!(matches!(
        engine.start_recording(&[], dir.path()),
        Err(EngineError::NoDevices)
    ));

    engine.start_recording(&[0], dir.path()).unwrap();
    assert!(matches!(
        engine.start_recording(&[0], dir.path()),
        Err(EngineError::AlreadyRecording)
    ));

    engine.stop_recording().unwrap();
    engine.shutdown();
}
