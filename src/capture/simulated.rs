//! Simulated capture rig
//!
//! A deterministic, in-process implementation of [`CaptureHardware`]. It
//! mirrors two quirks real capture stacks have: committing a format resets the
//! zoom factor to the device minimum, and changing the output orientation
//! resets mirroring. Handles are cheap clones sharing one rig, so a caller can
//! keep one for inspection after moving another into the session controller.

use crate::capture::traits::{
    AudioDeviceInfo, CameraPosition, CaptureDevice, CaptureFormat, CaptureHardware, DeviceId,
    DeviceKind, FrameRateRange, HardwareError, HardwareResult, PointOfInterest, RecordingCallback,
    StabilizationMode, TorchCapability, VideoCodec, VideoOrientation,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Something the rig was asked to do, in order
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareEvent {
    VideoInputBound(DeviceId),
    VideoInputRemoved,
    AudioInputBound(String),
    AudioInputRemoved,
    OutputAdded,
    FormatSet { device: DeviceId, width: u32, height: u32, frame_rate: f64 },
    ZoomSet { device: DeviceId, factor: f64 },
    RampStarted { device: DeviceId, target: f64, rate: f32 },
    RampCancelled { device: DeviceId },
    TorchSet { device: DeviceId, level: Option<f32> },
    HdrSet { device: DeviceId, enabled: bool },
    Focused { device: DeviceId },
    OrientationSet(VideoOrientation),
    MirroringSet(bool),
    StabilizationSet(StabilizationMode),
    CodecSet(VideoCodec),
    Running(bool),
    RecordingStarted(PathBuf),
    RecordingStopped,
}

struct Inner {
    devices: Vec<CaptureDevice>,
    audio: Option<AudioDeviceInfo>,
    video_input: Option<DeviceId>,
    audio_input: Option<String>,
    has_output: bool,
    running: bool,
    zoom: HashMap<DeviceId, f64>,
    ramps: HashMap<DeviceId, (f64, f32)>,
    torch: HashMap<DeviceId, Option<f32>>,
    hdr: HashMap<DeviceId, bool>,
    formats: HashMap<DeviceId, (CaptureFormat, f64)>,
    orientation: VideoOrientation,
    mirrored: bool,
    stabilization: StabilizationMode,
    codec: VideoCodec,
    codecs: Vec<VideoCodec>,
    recording: Option<(PathBuf, RecordingCallback)>,
    events: Vec<HardwareEvent>,
    locked: bool,
    failing_binds: HashSet<DeviceId>,
    fail_next_recording: bool,
}

/// Simulated camera rig
#[derive(Clone)]
pub struct SimulatedCamera {
    inner: Arc<Mutex<Inner>>,
}

impl SimulatedCamera {
    /// Create a rig exposing the given devices and a default microphone
    pub fn new(devices: Vec<CaptureDevice>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                devices,
                audio: Some(AudioDeviceInfo {
                    id: "sim-mic".to_string(),
                    name: "Simulated Microphone".to_string(),
                    is_default: true,
                }),
                video_input: None,
                audio_input: None,
                has_output: false,
                running: false,
                zoom: HashMap::new(),
                ramps: HashMap::new(),
                torch: HashMap::new(),
                hdr: HashMap::new(),
                formats: HashMap::new(),
                orientation: VideoOrientation::Portrait,
                mirrored: false,
                stabilization: StabilizationMode::Off,
                codec: VideoCodec::Default,
                codecs: vec![VideoCodec::Hevc, VideoCodec::H264],
                recording: None,
                events: Vec::new(),
                locked: false,
                failing_binds: HashSet::new(),
                fail_next_recording: false,
            })),
        }
    }

    /// Phone with a virtual triple camera, its physical lenses, and a depth front camera
    pub fn phone() -> Self {
        let mut triple = test_device("back-triple", CameraPosition::Back, DeviceKind::TripleCamera, 0.5, 15.0);
        triple.torch = Some(TorchCapability { max_level: 1.0 });
        let mut wide = test_device("back-wide", CameraPosition::Back, DeviceKind::WideAngle, 1.0, 10.0);
        wide.torch = Some(TorchCapability { max_level: 1.0 });
        let mut ultra = test_device("back-ultra", CameraPosition::Back, DeviceKind::UltraWide, 1.0, 5.0);
        ultra.torch = Some(TorchCapability { max_level: 1.0 });
        let front = test_device("front-truedepth", CameraPosition::Front, DeviceKind::TrueDepth, 1.0, 4.0);
        Self::new(vec![triple, wide, ultra, front])
    }

    /// Phone without any virtual device: separate wide and ultra-wide lenses
    pub fn dual_lens_phone() -> Self {
        let mut wide = test_device("back-wide", CameraPosition::Back, DeviceKind::WideAngle, 1.0, 10.0);
        wide.torch = Some(TorchCapability { max_level: 0.8 });
        let mut ultra = test_device("back-ultra", CameraPosition::Back, DeviceKind::UltraWide, 1.0, 5.0);
        ultra.torch = Some(TorchCapability { max_level: 0.8 });
        let front = test_device("front-wide", CameraPosition::Front, DeviceKind::WideAngle, 1.0, 4.0);
        Self::new(vec![wide, ultra, front])
    }

    /// Remove the default microphone
    pub fn without_audio(self) -> Self {
        self.inner.lock().audio = None;
        self
    }

    /// Make every device-lock operation fail until cleared
    pub fn set_locked(&self, locked: bool) {
        self.inner.lock().locked = locked;
    }

    /// Make binding this device as video input fail
    pub fn fail_bind(&self, device: &str) {
        self.inner.lock().failing_binds.insert(DeviceId::new(device));
    }

    /// Make the next recording finish with an error
    pub fn fail_next_recording(&self) {
        self.inner.lock().fail_next_recording = true;
    }

    /// End the take in progress with an error, as if the encoder died mid-take
    pub fn fail_active_recording(&self) {
        let finished = self.inner.lock().recording.take();
        if let Some((_, on_finish)) = finished {
            on_finish(Err(HardwareError::Io("simulated disk full".to_string())));
        }
    }

    /// Finalize the take in progress without a stop request
    pub fn finish_active_recording(&self) {
        let finished = self.inner.lock().recording.take();
        if let Some((path, on_finish)) = finished {
            on_finish(Ok(path));
        }
    }

    pub fn events(&self) -> Vec<HardwareEvent> {
        self.inner.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.inner.lock().events.clear();
    }

    pub fn bound_device(&self) -> Option<DeviceId> {
        self.inner.lock().video_input.clone()
    }

    pub fn bound_audio(&self) -> Option<String> {
        self.inner.lock().audio_input.clone()
    }

    pub fn zoom_of(&self, device: &str) -> f64 {
        self.inner.lock().zoom.get(&DeviceId::new(device)).copied().unwrap_or(1.0)
    }

    pub fn torch_level(&self, device: &str) -> Option<f32> {
        self.inner
            .lock()
            .torch
            .get(&DeviceId::new(device))
            .copied()
            .flatten()
    }

    pub fn active_format(&self, device: &str) -> Option<(CaptureFormat, f64)> {
        self.inner.lock().formats.get(&DeviceId::new(device)).cloned()
    }

    pub fn is_mirrored(&self) -> bool {
        self.inner.lock().mirrored
    }

    pub fn orientation(&self) -> VideoOrientation {
        self.inner.lock().orientation
    }

    pub fn stabilization(&self) -> StabilizationMode {
        self.inner.lock().stabilization
    }

    pub fn codec(&self) -> VideoCodec {
        self.inner.lock().codec
    }

    fn check_lock(inner: &Inner) -> HardwareResult<()> {
        if inner.locked {
            Err(HardwareError::Locked("simulated device busy".to_string()))
        } else {
            Ok(())
        }
    }

    fn device(inner: &Inner, id: &DeviceId) -> HardwareResult<CaptureDevice> {
        inner
            .devices
            .iter()
            .find(|d| &d.id == id)
            .cloned()
            .ok_or_else(|| HardwareError::Unavailable(format!("unknown device {id}")))
    }
}

impl CaptureHardware for SimulatedCamera {
    fn enumerate_devices(&self, position: CameraPosition) -> Vec<CaptureDevice> {
        self.inner
            .lock()
            .devices
            .iter()
            .filter(|d| d.position == position)
            .cloned()
            .collect()
    }

    fn default_audio_device(&self) -> Option<AudioDeviceInfo> {
        self.inner.lock().audio.clone()
    }

    fn begin_configuration(&mut self) {}

    fn commit_configuration(&mut self) {}

    fn bind_video_input(&mut self, device: &CaptureDevice) -> HardwareResult<()> {
        let mut inner = self.inner.lock();
        if inner.failing_binds.contains(&device.id) {
            return Err(HardwareError::Unavailable(format!("cannot add input {}", device.id)));
        }
        inner.video_input = Some(device.id.clone());
        inner.events.push(HardwareEvent::VideoInputBound(device.id.clone()));
        Ok(())
    }

    fn remove_video_input(&mut self) {
        let mut inner = self.inner.lock();
        if inner.video_input.take().is_some() {
            inner.events.push(HardwareEvent::VideoInputRemoved);
        }
    }

    fn bind_audio_input(&mut self, device: &AudioDeviceInfo) -> HardwareResult<()> {
        let mut inner = self.inner.lock();
        inner.audio_input = Some(device.id.clone());
        inner.events.push(HardwareEvent::AudioInputBound(device.id.clone()));
        Ok(())
    }

    fn remove_audio_input(&mut self) {
        let mut inner = self.inner.lock();
        if inner.audio_input.take().is_some() {
            inner.events.push(HardwareEvent::AudioInputRemoved);
        }
    }

    fn has_recording_output(&self) -> bool {
        self.inner.lock().has_output
    }

    fn add_recording_output(&mut self) -> HardwareResult<()> {
        let mut inner = self.inner.lock();
        inner.has_output = true;
        inner.events.push(HardwareEvent::OutputAdded);
        Ok(())
    }

    fn start_running(&mut self) {
        let mut inner = self.inner.lock();
        inner.running = true;
        inner.events.push(HardwareEvent::Running(true));
    }

    fn stop_running(&mut self) {
        let mut inner = self.inner.lock();
        inner.running = false;
        inner.events.push(HardwareEvent::Running(false));
    }

    fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    fn set_active_format(
        &mut self,
        device: &DeviceId,
        format: &CaptureFormat,
        frame_rate: f64,
    ) -> HardwareResult<()> {
        let mut inner = self.inner.lock();
        Self::check_lock(&inner)?;
        let snapshot = Self::device(&inner, device)?;
        inner.formats.insert(device.clone(), (format.clone(), frame_rate));
        // Format commits reset zoom to the device minimum
        inner.zoom.insert(device.clone(), snapshot.min_zoom);
        inner.ramps.remove(device);
        inner.events.push(HardwareEvent::FormatSet {
            device: device.clone(),
            width: format.width,
            height: format.height,
            frame_rate,
        });
        Ok(())
    }

    fn zoom_factor(&self, device: &DeviceId) -> f64 {
        self.inner.lock().zoom.get(device).copied().unwrap_or(1.0)
    }

    fn set_zoom_factor(&mut self, device: &DeviceId, factor: f64) -> HardwareResult<()> {
        let mut inner = self.inner.lock();
        Self::check_lock(&inner)?;
        inner.ramps.remove(device);
        inner.zoom.insert(device.clone(), factor);
        inner.events.push(HardwareEvent::ZoomSet { device: device.clone(), factor });
        Ok(())
    }

    fn ramp_zoom(&mut self, device: &DeviceId, target: f64, rate: f32) -> HardwareResult<()> {
        let mut inner = self.inner.lock();
        Self::check_lock(&inner)?;
        // The rig lands on the target immediately but reports the ramp as
        // in flight until it is cancelled or overwritten.
        inner.ramps.insert(device.clone(), (target, rate));
        inner.zoom.insert(device.clone(), target);
        inner.events.push(HardwareEvent::RampStarted { device: device.clone(), target, rate });
        Ok(())
    }

    fn is_ramping_zoom(&self, device: &DeviceId) -> bool {
        self.inner.lock().ramps.contains_key(device)
    }

    fn cancel_zoom_ramp(&mut self, device: &DeviceId) -> HardwareResult<()> {
        let mut inner = self.inner.lock();
        Self::check_lock(&inner)?;
        if inner.ramps.remove(device).is_some() {
            inner.events.push(HardwareEvent::RampCancelled { device: device.clone() });
        }
        Ok(())
    }

    fn set_torch(&mut self, device: &DeviceId, level: Option<f32>) -> HardwareResult<()> {
        let mut inner = self.inner.lock();
        Self::check_lock(&inner)?;
        if !Self::device(&inner, device)?.has_torch() {
            return Err(HardwareError::Unsupported(format!("{device} has no torch")));
        }
        inner.torch.insert(device.clone(), level);
        inner.events.push(HardwareEvent::TorchSet { device: device.clone(), level });
        Ok(())
    }

    fn set_hdr(&mut self, device: &DeviceId, enabled: bool) -> HardwareResult<()> {
        let mut inner = self.inner.lock();
        Self::check_lock(&inner)?;
        inner.hdr.insert(device.clone(), enabled);
        inner.events.push(HardwareEvent::HdrSet { device: device.clone(), enabled });
        Ok(())
    }

    fn focus_and_expose(&mut self, device: &DeviceId, _point: PointOfInterest) -> HardwareResult<()> {
        let mut inner = self.inner.lock();
        Self::check_lock(&inner)?;
        inner.events.push(HardwareEvent::Focused { device: device.clone() });
        Ok(())
    }

    fn set_video_orientation(&mut self, orientation: VideoOrientation) -> HardwareResult<()> {
        let mut inner = self.inner.lock();
        inner.orientation = orientation;
        // Touching orientation drops mirroring on this connection
        inner.mirrored = false;
        inner.events.push(HardwareEvent::OrientationSet(orientation));
        Ok(())
    }

    fn set_video_mirrored(&mut self, mirrored: bool) -> HardwareResult<()> {
        let mut inner = self.inner.lock();
        inner.mirrored = mirrored;
        inner.events.push(HardwareEvent::MirroringSet(mirrored));
        Ok(())
    }

    fn set_stabilization_mode(&mut self, mode: StabilizationMode) -> HardwareResult<()> {
        let mut inner = self.inner.lock();
        inner.stabilization = mode;
        inner.events.push(HardwareEvent::StabilizationSet(mode));
        Ok(())
    }

    fn available_codecs(&self) -> Vec<VideoCodec> {
        self.inner.lock().codecs.clone()
    }

    fn set_video_codec(&mut self, codec: VideoCodec) -> HardwareResult<()> {
        let mut inner = self.inner.lock();
        inner.codec = codec;
        inner.events.push(HardwareEvent::CodecSet(codec));
        Ok(())
    }

    fn start_recording(&mut self, path: &Path, on_finish: RecordingCallback) -> HardwareResult<()> {
        let mut inner = self.inner.lock();
        if !inner.has_output {
            return Err(HardwareError::Unavailable("no recording output".to_string()));
        }
        if inner.recording.is_some() {
            return Err(HardwareError::Unavailable("already recording".to_string()));
        }
        std::fs::write(path, b"simulated take")?;
        inner.recording = Some((path.to_path_buf(), on_finish));
        inner.events.push(HardwareEvent::RecordingStarted(path.to_path_buf()));
        Ok(())
    }

    fn stop_recording(&mut self) -> HardwareResult<()> {
        let (finished, fail) = {
            let mut inner = self.inner.lock();
            let finished = inner.recording.take();
            if finished.is_some() {
                inner.events.push(HardwareEvent::RecordingStopped);
            }
            let fail = std::mem::take(&mut inner.fail_next_recording);
            (finished, fail)
        };

        if let Some((path, on_finish)) = finished {
            if fail {
                on_finish(Err(HardwareError::Io("simulated encoder failure".to_string())));
            } else {
                on_finish(Ok(path));
            }
        }
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.inner.lock().recording.is_some()
    }
}

/// Formats every simulated device exposes
pub fn standard_formats() -> Vec<CaptureFormat> {
    vec![
        CaptureFormat {
            width: 3840,
            height: 2160,
            frame_rate_ranges: vec![FrameRateRange::new(1.0, 30.0)],
            hdr_supported: true,
        },
        CaptureFormat {
            width: 1920,
            height: 1080,
            frame_rate_ranges: vec![FrameRateRange::new(1.0, 60.0)],
            hdr_supported: true,
        },
        CaptureFormat {
            width: 1280,
            height: 720,
            frame_rate_ranges: vec![FrameRateRange::new(1.0, 120.0)],
            hdr_supported: false,
        },
    ]
}

/// Build a torchless device with the standard formats
pub fn test_device(
    id: &str,
    position: CameraPosition,
    kind: DeviceKind,
    min_zoom: f64,
    max_zoom: f64,
) -> CaptureDevice {
    CaptureDevice {
        id: DeviceId::new(id),
        name: format!("Simulated {id}"),
        position,
        kind,
        min_zoom,
        max_zoom,
        torch: None,
        formats: standard_formats(),
    }
}
