//! Native capture backend using nokhwa and cpal
//!
//! Webcams are enumerated and read through nokhwa; raw frames are piped into
//! an ffmpeg process that writes the take. The default microphone is
//! discovered through cpal. Desktop webcams face the user, have a single
//! fixed lens and no torch, so zoom is pinned to 1.0.

use super::traits::{
    AudioDeviceInfo, CameraPosition, CaptureDevice, CaptureFormat, CaptureHardware, DeviceId,
    DeviceKind, FrameRateRange, HardwareError, HardwareResult, PointOfInterest, RecordingCallback,
    StabilizationMode, VideoCodec, VideoOrientation,
};
use crate::utils::process::StderrTail;
use cpal::traits::{DeviceTrait, HostTrait};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Resolutions and top frame rates offered for every webcam; nokhwa picks
/// the closest mode the camera really has
const COMMON_MODES: [(u32, u32, f64); 3] = [(1920, 1080, 30.0), (1280, 720, 60.0), (640, 480, 60.0)];

fn webcam_formats() -> Vec<CaptureFormat> {
    COMMON_MODES
        .iter()
        .map(|&(width, height, max_fps)| CaptureFormat {
            width,
            height,
            frame_rate_ranges: vec![FrameRateRange::new(1.0, max_fps)],
            hdr_supported: false,
        })
        .collect()
}

fn index_to_id(index: &CameraIndex) -> DeviceId {
    match index {
        CameraIndex::Index(i) => DeviceId::new(i.to_string()),
        CameraIndex::String(s) => DeviceId::new(s.clone()),
    }
}

fn id_to_index(id: &DeviceId) -> CameraIndex {
    match id.0.parse::<u32>() {
        Ok(i) => CameraIndex::Index(i),
        Err(_) => CameraIndex::String(id.0.clone()),
    }
}

/// Everything the capture thread needs for one take
struct TakeSettings {
    index: CameraIndex,
    width: u32,
    height: u32,
    fps: u32,
    rotation: u32,
    mirrored: bool,
    path: PathBuf,
}

struct ActiveTake {
    running: Arc<AtomicBool>,
    thread: std::thread::JoinHandle<()>,
}

/// Webcam-backed capture hardware
pub struct NativeCamera {
    bound: Option<CaptureDevice>,
    audio: Option<AudioDeviceInfo>,
    format: Option<(CaptureFormat, f64)>,
    has_output: bool,
    running: bool,
    orientation: VideoOrientation,
    mirrored: bool,
    take: Option<ActiveTake>,
}

impl Default for NativeCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeCamera {
    pub fn new() -> Self {
        Self {
            bound: None,
            audio: None,
            format: None,
            has_output: false,
            running: false,
            orientation: VideoOrientation::Portrait,
            mirrored: false,
            take: None,
        }
    }

    /// Microphone discovered for the session; takes do not record it yet
    pub fn bound_audio(&self) -> Option<&AudioDeviceInfo> {
        self.audio.as_ref()
    }

    /// Check that ffmpeg can be spawned
    pub fn ffmpeg_available() -> bool {
        Command::new("ffmpeg").arg("-version").output().is_ok()
    }

    fn bound_id(&self, device: &DeviceId) -> HardwareResult<()> {
        match &self.bound {
            Some(bound) if &bound.id == device => Ok(()),
            _ => Err(HardwareError::Unavailable(format!("{} is not bound", device))),
        }
    }

}

impl CaptureHardware for NativeCamera {
    fn enumerate_devices(&self, position: CameraPosition) -> Vec<CaptureDevice> {
        if position != CameraPosition::Front {
            return Vec::new();
        }
        match nokhwa::query(ApiBackend::Auto) {
            Ok(cameras) => cameras
                .into_iter()
                .map(|info| CaptureDevice {
                    id: index_to_id(info.index()),
                    name: info.human_name(),
                    position: CameraPosition::Front,
                    kind: DeviceKind::WideAngle,
                    min_zoom: 1.0,
                    max_zoom: 1.0,
                    torch: None,
                    formats: webcam_formats(),
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to enumerate cameras: {:?}", e);
                Vec::new()
            }
        }
    }

    fn default_audio_device(&self) -> Option<AudioDeviceInfo> {
        let device = cpal::default_host().default_input_device()?;
        let name = device.name().unwrap_or_else(|_| "Default input".to_string());
        Some(AudioDeviceInfo {
            id: name.clone(),
            name,
            is_default: true,
        })
    }

    fn begin_configuration(&mut self) {}

    fn commit_configuration(&mut self) {}

    fn bind_video_input(&mut self, device: &CaptureDevice) -> HardwareResult<()> {
        if self.take.is_some() {
            return Err(HardwareError::Locked("recording in progress".to_string()));
        }
        tracing::info!("Binding webcam {} ({})", device.name, device.id);
        self.bound = Some(device.clone());
        self.format = None;
        Ok(())
    }

    fn remove_video_input(&mut self) {
        self.bound = None;
        self.format = None;
    }

    fn bind_audio_input(&mut self, device: &AudioDeviceInfo) -> HardwareResult<()> {
        tracing::debug!("Audio input {} bound; takes are recorded video-only", device.name);
        self.audio = Some(device.clone());
        Ok(())
    }

    fn remove_audio_input(&mut self) {
        self.audio = None;
    }

    fn has_recording_output(&self) -> bool {
        self.has_output
    }

    fn add_recording_output(&mut self) -> HardwareResult<()> {
        if !Self::ffmpeg_available() {
            return Err(HardwareError::Unavailable("ffmpeg not found".to_string()));
        }
        self.has_output = true;
        Ok(())
    }

    fn start_running(&mut self) {
        self.running = true;
    }

    fn stop_running(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn set_active_format(
        &mut self,
        device: &DeviceId,
        format: &CaptureFormat,
        frame_rate: f64,
    ) -> HardwareResult<()> {
        self.bound_id(device)?;
        self.format = Some((format.clone(), frame_rate));
        Ok(())
    }

    fn zoom_factor(&self, _device: &DeviceId) -> f64 {
        1.0
    }

    fn set_zoom_factor(&mut self, device: &DeviceId, factor: f64) -> HardwareResult<()> {
        self.bound_id(device)?;
        if (factor - 1.0).abs() > f64::EPSILON {
            tracing::debug!("Webcam has a fixed lens; ignoring zoom {}", factor);
        }
        Ok(())
    }

    fn ramp_zoom(&mut self, device: &DeviceId, target: f64, _rate: f32) -> HardwareResult<()> {
        self.set_zoom_factor(device, target)
    }

    fn is_ramping_zoom(&self, _device: &DeviceId) -> bool {
        false
    }

    fn cancel_zoom_ramp(&mut self, _device: &DeviceId) -> HardwareResult<()> {
        Ok(())
    }

    fn set_torch(&mut self, device: &DeviceId, level: Option<f32>) -> HardwareResult<()> {
        self.bound_id(device)?;
        match level {
            None => Ok(()),
            Some(_) => Err(HardwareError::Unsupported("webcam has no torch".to_string())),
        }
    }

    fn set_hdr(&mut self, device: &DeviceId, enabled: bool) -> HardwareResult<()> {
        self.bound_id(device)?;
        if enabled {
            return Err(HardwareError::Unsupported("webcam has no HDR mode".to_string()));
        }
        Ok(())
    }

    fn focus_and_expose(&mut self, device: &DeviceId, point: PointOfInterest) -> HardwareResult<()> {
        self.bound_id(device)?;
        tracing::debug!("Webcam handles focus itself; ignoring ({}, {})", point.x, point.y);
        Ok(())
    }

    fn set_video_orientation(&mut self, orientation: VideoOrientation) -> HardwareResult<()> {
        self.orientation = orientation;
        Ok(())
    }

    fn set_video_mirrored(&mut self, mirrored: bool) -> HardwareResult<()> {
        self.mirrored = mirrored;
        Ok(())
    }

    fn set_stabilization_mode(&mut self, mode: StabilizationMode) -> HardwareResult<()> {
        if !matches!(mode, StabilizationMode::Off) {
            tracing::debug!("Webcam cannot stabilize ({:?})", mode);
        }
        Ok(())
    }

    fn available_codecs(&self) -> Vec<VideoCodec> {
        vec![VideoCodec::H264]
    }

    fn set_video_codec(&mut self, codec: VideoCodec) -> HardwareResult<()> {
        match codec {
            VideoCodec::Hevc => Err(HardwareError::Unsupported("HEVC".to_string())),
            _ => Ok(()),
        }
    }

    fn start_recording(&mut self, path: &Path, on_finish: RecordingCallback) -> HardwareResult<()> {
        if self.take.is_some() {
            return Err(HardwareError::Locked("already recording".to_string()));
        }
        let device = self
            .bound
            .as_ref()
            .ok_or_else(|| HardwareError::Unavailable("no camera bound".to_string()))?;
        let (width, height, fps) = match &self.format {
            Some((format, rate)) => (format.width, format.height, rate.round() as u32),
            None => (1280, 720, 30),
        };

        let settings = TakeSettings {
            index: id_to_index(&device.id),
            width,
            height,
            fps,
            rotation: self.orientation.rotation_degrees(),
            mirrored: self.mirrored,
            path: path.to_path_buf(),
        };
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();

        let thread = std::thread::Builder::new()
            .name("webcam-take".to_string())
            .spawn(move || {
                let result = capture_take(&settings, &thread_running);
                if let Err(e) = &result {
                    tracing::error!("Webcam take failed: {}", e);
                }
                on_finish(result);
            })?;

        self.take = Some(ActiveTake { running, thread });
        Ok(())
    }

    fn stop_recording(&mut self) -> HardwareResult<()> {
        let Some(take) = self.take.take() else {
            return Err(HardwareError::Unavailable("not recording".to_string()));
        };
        take.running.store(false, Ordering::SeqCst);
        // The capture thread finalizes the file and fires the callback
        if take.thread.join().is_err() {
            return Err(HardwareError::Io("webcam capture thread panicked".to_string()));
        }
        Ok(())
    }

    fn is_recording(&self) -> bool {
        self.take.is_some()
    }
}

/// Map the camera's native frame format to ffmpeg input arguments
fn ffmpeg_input_args(format: FrameFormat, width: u32, height: u32, fps: u32) -> Vec<String> {
    let rate = fps.to_string();
    let size = format!("{width}x{height}");
    let raw = |pix_fmt: &str| {
        vec![
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pixel_format".to_string(),
            pix_fmt.to_string(),
            "-video_size".to_string(),
            size.clone(),
            "-framerate".to_string(),
            rate.clone(),
        ]
    };
    match format {
        FrameFormat::MJPEG => vec![
            "-f".to_string(),
            "mjpeg".to_string(),
            "-framerate".to_string(),
            rate.clone(),
        ],
        FrameFormat::NV12 => raw("nv12"),
        FrameFormat::RAWRGB => raw("rgb24"),
        FrameFormat::GRAY => raw("gray"),
        _ => raw("yuyv422"),
    }
}

fn build_take_args(settings: &TakeSettings, format: FrameFormat, width: u32, height: u32, fps: u32) -> Vec<String> {
    let mut args = vec!["-y".to_string()];
    args.extend(ffmpeg_input_args(format, width, height, fps));
    args.extend(["-i".to_string(), "-".to_string()]);
    if settings.mirrored {
        args.extend(["-vf".to_string(), "hflip".to_string()]);
    }
    args.extend(
        [
            "-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p", "-crf", "18",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.extend([
        "-g".to_string(),
        (fps * 2).to_string(),
        "-metadata:s:v:0".to_string(),
        format!("rotate={}", settings.rotation),
        "-movflags".to_string(),
        "+faststart".to_string(),
        settings.path.to_string_lossy().to_string(),
    ]);
    args
}

fn capture_take(settings: &TakeSettings, running: &AtomicBool) -> HardwareResult<PathBuf> {
    let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::Closest(CameraFormat::new_from(
        settings.width,
        settings.height,
        FrameFormat::MJPEG,
        settings.fps,
    )));
    let mut camera = Camera::new(settings.index.clone(), requested)
        .map_err(|e| HardwareError::Unavailable(format!("open camera: {e}")))?;
    camera
        .open_stream()
        .map_err(|e| HardwareError::Unavailable(format!("open stream: {e}")))?;

    let actual = camera.camera_format();
    let (width, height) = (actual.resolution().width(), actual.resolution().height());
    let fps = actual.frame_rate();
    tracing::info!(
        "Webcam take: {}x{} @ {}fps {:?} -> {:?}",
        width,
        height,
        fps,
        actual.format(),
        settings.path
    );

    let (mut encoder, stderr) =
        spawn_encoder("ffmpeg", &build_take_args(settings, actual.format(), width, height, fps))?;
    let mut frames: u64 = 0;
    let mut write_error = None;

    if let Some(stdin) = encoder.stdin.as_mut() {
        while running.load(Ordering::SeqCst) {
            match camera.frame() {
                Ok(frame) => {
                    if let Err(e) = stdin.write_all(frame.buffer()) {
                        write_error = Some(e);
                        break;
                    }
                    frames += 1;
                }
                Err(e) => tracing::debug!("Dropped webcam frame: {:?}", e),
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        tracing::warn!("Error stopping camera stream: {:?}", e);
    }
    drop(encoder.stdin.take());
    let status = encoder.wait()?;
    let stderr = stderr.finish();

    if let Some(e) = write_error {
        return Err(HardwareError::Io(format!("ffmpeg stdin: {e}")));
    }
    if !status.success() {
        return Err(HardwareError::Io(format!("ffmpeg exited with {}: {}", status, stderr)));
    }
    tracing::info!("Webcam take finished after {} frames", frames);
    Ok(settings.path.clone())
}

/// Start the take encoder with its stderr drained in the background
fn spawn_encoder(program: &str, args: &[String]) -> HardwareResult<(Child, StderrTail)> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| HardwareError::Unavailable(format!("{program}: {e}")))?;
    let stderr = child
        .stderr
        .take()
        .map(StderrTail::spawn)
        .ok_or_else(|| HardwareError::Io(format!("{program}: stderr not captured")))?;
    Ok((child, stderr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(mirrored: bool) -> TakeSettings {
        TakeSettings {
            index: CameraIndex::Index(0),
            width: 1280,
            height: 720,
            fps: 30,
            rotation: 90,
            mirrored,
            path: PathBuf::from("/tmp/segment_x.mp4"),
        }
    }

    #[test]
    fn test_mjpeg_input_is_demuxed() {
        let args = ffmpeg_input_args(FrameFormat::MJPEG, 1280, 720, 30);
        assert_eq!(args[..2], ["-f".to_string(), "mjpeg".to_string()]);
    }

    #[test]
    fn test_take_args_mirror_and_rotate() {
        let args = build_take_args(&settings(true), FrameFormat::YUYV, 1280, 720, 30);
        assert!(args.windows(2).any(|w| w == ["-vf", "hflip"]));
        assert!(args.contains(&"rotate=90".to_string()));
        assert!(args.contains(&"yuyv422".to_string()));

        let args = build_take_args(&settings(false), FrameFormat::NV12, 1280, 720, 30);
        assert!(!args.contains(&"hflip".to_string()));
    }

    #[test]
    fn test_device_id_round_trips_index() {
        assert_eq!(id_to_index(&DeviceId::new("2")), CameraIndex::Index(2));
        assert_eq!(index_to_id(&CameraIndex::Index(2)), DeviceId::new("2"));
    }

    #[cfg(unix)]
    #[test]
    fn test_encoder_stderr_is_drained_while_feeding_frames() {
        let script = "head -c 200000 /dev/zero >&2; cat > /dev/null; echo done >&2".to_string();
        let (mut child, stderr) = spawn_encoder("sh", &["-c".to_string(), script]).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let mut stdin = child.stdin.take().unwrap();
        std::thread::spawn(move || {
            let frame = vec![0u8; 4 * 1024 * 1024];
            let result = (0..3).try_for_each(|_| stdin.write_all(&frame));
            let _ = tx.send(result.is_ok());
        });

        assert!(rx.recv_timeout(std::time::Duration::from_secs(20)).unwrap());
        assert!(child.wait().unwrap().success());
        assert!(stderr.finish().ends_with("done"));
    }

}
