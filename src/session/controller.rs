//! Session controller
//!
//! All hardware calls run on one dedicated queue thread. The public
//! [`SessionController`] handle only enqueues commands, so UI callers never
//! block on device locks or session reconfiguration.

use crate::capture::resolver;
use crate::capture::traits::{
    CameraPosition, CaptureDevice, CaptureHardware, DeviceId, HardwareError, HardwareResult,
    PointOfInterest, RecordingCallback, StabilizationMode, VideoCodec, VideoOrientation,
};
use crate::config::CameraConfig;
use crate::session::format;
use crate::session::state::{FrameRate, SessionEvent, SessionPhase, SessionSnapshot, SessionState};
use crate::session::zoom::{clamp_zoom, plan_quick_zoom, ZoomPlan, ZoomPreset, ZoomRequest};
use crate::utils::error::{CameraError, CameraResult};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Resolves once the hardware has finalized a recording
pub type RecordingFinished = oneshot::Receiver<HardwareResult<PathBuf>>;

/// Tunables the queue thread needs from the configuration
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub quality_ceiling: f64,
    pub preset_ramp_rate: f32,
    pub device_ready_timeout: Duration,
    pub stabilization: StabilizationMode,
    pub prefer_hevc: bool,
}

impl From<&CameraConfig> for SessionSettings {
    fn from(config: &CameraConfig) -> Self {
        Self {
            quality_ceiling: config.zoom.quality_ceiling,
            preset_ramp_rate: config.zoom.preset_ramp_rate,
            device_ready_timeout: config.session.device_ready_timeout(),
            stabilization: config.session.stabilization,
            prefer_hevc: config.session.prefer_hevc,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&CameraConfig::default())
    }
}

enum Command {
    Configure {
        frame_rate: FrameRate,
        position: CameraPosition,
        reply: oneshot::Sender<CameraResult<()>>,
    },
    Start {
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    SetZoom {
        request: ZoomRequest,
        generation: u64,
    },
    CancelZoomRamp,
    CurrentZoom {
        reply: std::sync::mpsc::SyncSender<f64>,
    },
    QuickZoom {
        preset: ZoomPreset,
        reply: oneshot::Sender<()>,
    },
    SetFrameRate {
        frame_rate: FrameRate,
        reply: oneshot::Sender<bool>,
    },
    ToggleCameraPosition {
        reply: oneshot::Sender<CameraResult<CameraPosition>>,
    },
    SetTorch(bool),
    TorchSupported {
        reply: oneshot::Sender<bool>,
    },
    SetOrientation(VideoOrientation),
    SetStabilization(StabilizationMode),
    SetHdr(bool),
    SetPreferredCodecHevc(bool),
    FocusAndExpose(PointOfInterest),
    StartRecording {
        path: PathBuf,
        orientation: VideoOrientation,
        reply: oneshot::Sender<CameraResult<RecordingFinished>>,
    },
    StopRecording {
        reply: oneshot::Sender<CameraResult<()>>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Configure { .. } => "configure",
            Command::Start { .. } => "start",
            Command::Stop { .. } => "stop",
            Command::SetZoom { .. } => "set_zoom",
            Command::CancelZoomRamp => "cancel_zoom_ramp",
            Command::CurrentZoom { .. } => "current_zoom",
            Command::QuickZoom { .. } => "quick_zoom",
            Command::SetFrameRate { .. } => "set_frame_rate",
            Command::ToggleCameraPosition { .. } => "toggle_camera_position",
            Command::SetTorch(_) => "set_torch",
            Command::TorchSupported { .. } => "torch_supported",
            Command::SetOrientation(_) => "set_orientation",
            Command::SetStabilization(_) => "set_stabilization",
            Command::SetHdr(_) => "set_hdr",
            Command::SetPreferredCodecHevc(_) => "set_preferred_codec",
            Command::FocusAndExpose(_) => "focus_and_expose",
            Command::StartRecording { .. } => "start_recording",
            Command::StopRecording { .. } => "stop_recording",
            Command::Flush { .. } => "flush",
        }
    }
}

/// Handle to the capture session
///
/// Cheap to clone. The queue thread exits once every handle is dropped.
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::UnboundedSender<Command>,
    zoom_generation: Arc<AtomicU64>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    /// Start the queue thread that owns `hardware`
    pub fn spawn<H: CaptureHardware>(hardware: H, settings: SessionSettings) -> CameraResult<Self> {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(SessionState::new(settings.stabilization).snapshot());
        let (events, _) = broadcast::channel(64);
        let zoom_generation = Arc::new(AtomicU64::new(0));

        let actor = SessionActor {
            hardware,
            state: SessionState::new(settings.stabilization),
            settings,
            zoom_generation: zoom_generation.clone(),
            snapshot_tx,
            events: events.clone(),
        };

        std::thread::Builder::new()
            .name("camera-session".to_string())
            .spawn(move || actor.run(receiver))?;

        Ok(Self {
            commands,
            zoom_generation,
            snapshot,
            events,
        })
    }

    fn send(&self, command: Command) -> CameraResult<()> {
        let name = command.name();
        self.commands.send(command).map_err(|_| {
            tracing::warn!("Session queue closed; dropped {}", name);
            CameraError::SessionClosed
        })
    }

    /// Enqueue a command and wait for its reply
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> CameraResult<T> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx))?;
        rx.await.map_err(|_| CameraError::SessionClosed)
    }

    /// Bind inputs and output for `position` at `frame_rate`.
    ///
    /// On failure the session is left stopped with no inputs bound.
    pub async fn configure(&self, frame_rate: FrameRate, position: CameraPosition) -> CameraResult<()> {
        self.request(|reply| Command::Configure {
            frame_rate,
            position,
            reply,
        })
        .await?
    }

    pub async fn start(&self) -> CameraResult<()> {
        self.request(|reply| Command::Start { reply }).await
    }

    pub async fn stop(&self) -> CameraResult<()> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Request a zoom factor. A newer request supersedes any still queued.
    pub fn set_zoom(&self, request: ZoomRequest) {
        let generation = self.zoom_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.send(Command::SetZoom { request, generation });
    }

    pub fn cancel_zoom_ramp(&self) {
        let _ = self.send(Command::CancelZoomRamp);
    }

    /// Zoom factor the hardware reports right now
    ///
    /// Blocks until the queue thread answers, so never call it from the queue
    /// thread itself.
    pub fn current_zoom_factor(&self) -> f64 {
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        if self.send(Command::CurrentZoom { reply: tx }).is_err() {
            return 1.0;
        }
        rx.recv().unwrap_or(1.0)
    }

    pub async fn quick_zoom(&self, preset: ZoomPreset) -> CameraResult<()> {
        self.request(|reply| Command::QuickZoom { preset, reply }).await
    }

    /// Switch formats for `frame_rate`; false when the device could not be reconfigured
    pub async fn set_frame_rate(&self, frame_rate: FrameRate) -> bool {
        self.request(|reply| Command::SetFrameRate { frame_rate, reply })
            .await
            .unwrap_or(false)
    }

    /// Flip between front and back cameras, returning the new position
    pub async fn toggle_camera_position(&self) -> CameraResult<CameraPosition> {
        self.request(|reply| Command::ToggleCameraPosition { reply }).await?
    }

    pub fn set_torch(&self, enabled: bool) {
        let _ = self.send(Command::SetTorch(enabled));
    }

    pub async fn is_torch_supported(&self) -> bool {
        self.request(|reply| Command::TorchSupported { reply })
            .await
            .unwrap_or(false)
    }

    pub fn set_video_orientation(&self, orientation: VideoOrientation) {
        let _ = self.send(Command::SetOrientation(orientation));
    }

    pub fn set_stabilization_mode(&self, mode: StabilizationMode) {
        let _ = self.send(Command::SetStabilization(mode));
    }

    pub fn set_hdr_enabled(&self, enabled: bool) {
        let _ = self.send(Command::SetHdr(enabled));
    }

    pub fn set_preferred_codec_hevc(&self, prefer: bool) {
        let _ = self.send(Command::SetPreferredCodecHevc(prefer));
    }

    pub fn focus_and_expose(&self, point: PointOfInterest) {
        let _ = self.send(Command::FocusAndExpose(point));
    }

    /// Begin writing a take to `path` with `orientation` latched for its duration
    pub async fn start_recording(
        &self,
        path: PathBuf,
        orientation: VideoOrientation,
    ) -> CameraResult<RecordingFinished> {
        self.request(|reply| Command::StartRecording {
            path,
            orientation,
            reply,
        })
        .await?
    }

    pub async fn stop_recording(&self) -> CameraResult<()> {
        self.request(|reply| Command::StopRecording { reply }).await?
    }

    /// Wait until every previously enqueued command has been applied
    pub async fn flush(&self) -> CameraResult<()> {
        self.request(|reply| Command::Flush { reply }).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

/// Owns the hardware and the session state; lives on the queue thread
struct SessionActor<H: CaptureHardware> {
    hardware: H,
    state: SessionState,
    settings: SessionSettings,
    zoom_generation: Arc<AtomicU64>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl<H: CaptureHardware> SessionActor<H> {
    fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!("Session queue started");

        while let Some(command) = receiver.blocking_recv() {
            tracing::trace!("Session command: {}", command.name());
            self.handle(command);
            self.publish();
        }

        if self.hardware.is_recording() {
            if let Err(e) = self.hardware.stop_recording() {
                tracing::warn!("Failed to stop recording on shutdown: {}", e);
            }
        }
        if self.hardware.is_running() {
            self.hardware.stop_running();
        }
        tracing::debug!("Session queue stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Configure {
                frame_rate,
                position,
                reply,
            } => {
                let _ = reply.send(self.configure(frame_rate, position));
            }
            Command::Start { reply } => {
                self.start();
                let _ = reply.send(());
            }
            Command::Stop { reply } => {
                self.stop();
                let _ = reply.send(());
            }
            Command::SetZoom { request, generation } => {
                if generation < self.zoom_generation.load(Ordering::SeqCst) {
                    tracing::trace!("Zoom request {} superseded", generation);
                } else {
                    self.apply_zoom(request);
                }
            }
            Command::CancelZoomRamp => self.cancel_zoom_ramp(),
            Command::CurrentZoom { reply } => {
                let zoom = match &self.state.device {
                    Some(device) => self.hardware.zoom_factor(&device.id),
                    None => 1.0,
                };
                let _ = reply.send(zoom);
            }
            Command::QuickZoom { preset, reply } => {
                self.quick_zoom(preset);
                let _ = reply.send(());
            }
            Command::SetFrameRate { frame_rate, reply } => {
                let _ = reply.send(self.set_frame_rate(frame_rate));
            }
            Command::ToggleCameraPosition { reply } => {
                let _ = reply.send(self.toggle_camera_position());
            }
            Command::SetTorch(enabled) => {
                self.state.torch.desired = enabled;
                self.apply_torch();
            }
            Command::TorchSupported { reply } => {
                let supported = self.state.device.as_ref().is_some_and(CaptureDevice::has_torch);
                let _ = reply.send(supported);
            }
            Command::SetOrientation(orientation) => self.apply_orientation(orientation),
            Command::SetStabilization(mode) => {
                self.state.stabilization = mode;
                self.apply_stabilization();
            }
            Command::SetHdr(enabled) => self.set_hdr(enabled),
            Command::SetPreferredCodecHevc(prefer) => self.apply_codec(prefer),
            Command::FocusAndExpose(point) => {
                if let Some(device) = &self.state.device {
                    if let Err(e) = self.hardware.focus_and_expose(&device.id, point) {
                        self.absorb("focus and expose", e);
                    }
                }
            }
            Command::StartRecording {
                path,
                orientation,
                reply,
            } => {
                let _ = reply.send(self.start_recording(path, orientation));
            }
            Command::StopRecording { reply } => {
                let _ = reply.send(self.stop_recording());
            }
            Command::Flush { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn publish(&mut self) {
        if self.state.recording.is_some() && !self.hardware.is_recording() {
            self.state.recording = None;
        }
        self.snapshot_tx.send_replace(self.state.snapshot());
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.state.phase != phase {
            tracing::debug!("Session phase {:?} -> {:?}", self.state.phase, phase);
            self.state.phase = phase;
            self.emit(SessionEvent::PhaseChanged(phase));
        }
    }

    /// Log and report a hardware failure that leaves the session usable
    fn absorb(&self, operation: &str, error: HardwareError) {
        tracing::warn!("{} failed: {}", operation, error);
        self.emit(SessionEvent::Warning(format!("{operation} failed: {error}")));
    }

    /// Run `f` with the phase set to `Configuring`, restoring it afterwards
    fn reconfigure<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let previous = self.state.phase;
        self.set_phase(SessionPhase::Configuring);
        let result = f(self);
        self.set_phase(previous);
        result
    }

    // Session lifecycle

    fn configure(&mut self, frame_rate: FrameRate, position: CameraPosition) -> CameraResult<()> {
        tracing::info!("Configuring session: {} camera at {}", position, frame_rate.label());
        let was_running = self.hardware.is_running();
        self.set_phase(SessionPhase::Configuring);

        self.hardware.begin_configuration();
        let result = self.configure_inputs(frame_rate, position);
        self.hardware.commit_configuration();

        match result {
            Ok(device) => {
                // The format commit can reset zoom; land on 1x again
                self.apply_zoom(ZoomRequest::immediate(1.0));
                self.set_phase(if was_running {
                    SessionPhase::Running
                } else {
                    SessionPhase::Idle
                });
                self.emit(SessionEvent::DeviceChanged {
                    device: device.id.0.clone(),
                    position: device.position,
                });
                tracing::info!("Session configured with {}", device.name);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Session configuration failed: {}", e);
                self.hardware.begin_configuration();
                self.hardware.remove_video_input();
                self.hardware.remove_audio_input();
                self.hardware.commit_configuration();
                if self.hardware.is_running() {
                    self.hardware.stop_running();
                }
                self.state.device = None;
                self.state.audio_device = None;
                self.state.active_format = None;
                self.set_phase(SessionPhase::Unconfigured);
                Err(e)
            }
        }
    }

    fn configure_inputs(
        &mut self,
        frame_rate: FrameRate,
        position: CameraPosition,
    ) -> CameraResult<CaptureDevice> {
        let devices = self.hardware.enumerate_devices(position);
        let device = resolver::resolve(position, &devices)?;

        self.hardware.remove_video_input();
        self.hardware.remove_audio_input();
        self.state.device = None;
        self.state.audio_device = None;
        self.state.active_format = None;

        self.hardware.bind_video_input(&device).map_err(|e| {
            CameraError::Configuration(format!("cannot add video input {}: {}", device.name, e))
        })?;
        self.state.device = Some(device.clone());

        match self.hardware.default_audio_device() {
            Some(audio) => {
                self.hardware.bind_audio_input(&audio).map_err(|e| {
                    CameraError::Configuration(format!("cannot add audio input {}: {}", audio.name, e))
                })?;
                self.state.audio_device = Some(audio);
            }
            None => tracing::warn!("No audio input available; recording video only"),
        }

        self.select_format(&device, frame_rate)
            .map_err(|e| CameraError::Configuration(format!("cannot set capture format: {e}")))?;
        self.state.frame_rate = frame_rate;

        if !self.hardware.has_recording_output() {
            self.hardware
                .add_recording_output()
                .map_err(|e| CameraError::Configuration(format!("cannot add recording output: {e}")))?;
        }
        self.state.has_output = true;

        self.apply_stabilization();
        self.apply_mirroring();
        self.apply_codec(self.settings.prefer_hevc);

        let start = clamp_zoom(1.0, &device, self.settings.quality_ceiling);
        if let Err(e) = self.hardware.set_zoom_factor(&device.id, start) {
            tracing::debug!("Initial zoom deferred until after commit: {}", e);
        }

        Ok(device)
    }

    fn start(&mut self) {
        match self.state.phase {
            SessionPhase::Idle => {
                self.hardware.start_running();
                self.set_phase(SessionPhase::Running);
            }
            SessionPhase::Running => {}
            phase => tracing::warn!("Cannot start session while {:?}", phase),
        }
    }

    fn stop(&mut self) {
        if self.state.phase == SessionPhase::Running {
            self.hardware.stop_running();
            self.set_phase(SessionPhase::Idle);
        }
    }

    // Device selection

    fn select_format(&mut self, device: &CaptureDevice, frame_rate: FrameRate) -> HardwareResult<()> {
        let choice = format::select_format(
            &device.formats,
            self.state.active_format.as_ref(),
            frame_rate.fps() as f64,
        )
        .ok_or_else(|| HardwareError::Unsupported(format!("{} has no capture formats", device.name)))?;

        self.hardware
            .set_active_format(&device.id, &choice.format, choice.frame_rate)?;
        tracing::debug!(
            "Active format {}x{} at {}fps",
            choice.format.width,
            choice.format.height,
            choice.frame_rate
        );
        if !choice.format.hdr_supported {
            self.state.hdr_enabled = false;
        }
        self.state.active_format = Some(choice.format);
        Ok(())
    }

    /// Swap the bound video input for `device`, restoring the previous one on failure
    fn use_device(&mut self, device: CaptureDevice) -> CameraResult<()> {
        let previous = self.state.device.clone();

        self.hardware.begin_configuration();
        self.hardware.remove_video_input();

        if let Err(e) = self.hardware.bind_video_input(&device) {
            if let Some(previous) = &previous {
                if let Err(restore) = self.hardware.bind_video_input(previous) {
                    tracing::error!("Failed to restore {}: {}", previous.name, restore);
                    self.state.device = None;
                }
            }
            self.hardware.commit_configuration();
            return Err(CameraError::Configuration(format!(
                "cannot add video input {}: {}",
                device.name, e
            )));
        }

        self.state.device = Some(device.clone());
        self.state.active_format = None;
        if !self.hardware.has_recording_output() {
            if let Err(e) = self.hardware.add_recording_output() {
                self.absorb("add recording output", e);
            }
        }
        self.hardware.commit_configuration();

        tracing::info!("Switched to {} ({:?})", device.name, device.kind);
        self.emit(SessionEvent::DeviceChanged {
            device: device.id.0.clone(),
            position: device.position,
        });
        Ok(())
    }

    fn toggle_camera_position(&mut self) -> CameraResult<CameraPosition> {
        let next = self
            .state
            .position()
            .map_or(CameraPosition::Front, CameraPosition::opposite);
        let devices = self.hardware.enumerate_devices(next);
        let device = resolver::resolve(next, &devices)?;

        self.reconfigure(|this| {
            this.use_device(device.clone())?;
            if let Err(e) = this.select_format(&device, this.state.frame_rate) {
                this.absorb("set capture format", e);
            }
            this.apply_stabilization();
            this.apply_zoom(ZoomRequest::immediate(1.0));
            this.rearm_torch();
            this.apply_mirroring();
            Ok(next)
        })
    }

    fn set_frame_rate(&mut self, frame_rate: FrameRate) -> bool {
        let Some(device) = self.state.device.clone() else {
            tracing::warn!("Cannot change frame rate before configure");
            return false;
        };
        let zoom = self.state.zoom_factor;

        let changed = self.reconfigure(|this| match this.select_format(&device, frame_rate) {
            Ok(()) => {
                this.state.frame_rate = frame_rate;
                this.apply_stabilization();
                true
            }
            Err(e) => {
                this.absorb("set frame rate", e);
                false
            }
        });
        if changed {
            self.apply_zoom(ZoomRequest::immediate(zoom));
        }
        changed
    }

    // Zoom

    fn apply_zoom(&mut self, request: ZoomRequest) -> bool {
        let Some(device) = self.state.device.clone() else {
            return false;
        };
        let target = clamp_zoom(request.factor, &device, self.settings.quality_ceiling);

        match drive_zoom(&mut self.hardware, &device.id, target, request) {
            Ok(()) => {
                self.state.zoom_factor = target;
                true
            }
            Err(e) => {
                self.absorb("zoom", e);
                false
            }
        }
    }

    fn cancel_zoom_ramp(&mut self) {
        let Some(device) = self.state.device.clone() else {
            return;
        };
        if let Err(e) = self.hardware.cancel_zoom_ramp(&device.id) {
            self.absorb("cancel zoom ramp", e);
            return;
        }
        self.state.zoom_factor = self.hardware.zoom_factor(&device.id);
    }

    fn quick_zoom(&mut self, preset: ZoomPreset) {
        let Some(device) = self.state.device.clone() else {
            return;
        };
        let rate = self.settings.preset_ramp_rate;

        match plan_quick_zoom(preset, &device) {
            ZoomPlan::ZoomInPlace(factor) => {
                self.apply_zoom(ZoomRequest::ramp(factor, rate));
            }
            ZoomPlan::SwitchLens { kind, zoom } => {
                let devices = self.hardware.enumerate_devices(device.position);
                let lens = resolver::find_lens(device.position, kind, &devices)
                    .filter(|lens| lens.id != device.id);

                let Some(lens) = lens else {
                    tracing::debug!("No {:?} lens; zooming in place", kind);
                    self.apply_zoom(ZoomRequest::ramp(preset.factor(), rate));
                    return;
                };

                let switched = self.reconfigure(|this| {
                    this.use_device(lens.clone())?;
                    if let Err(e) = this.select_format(&lens, this.state.frame_rate) {
                        this.absorb("set capture format", e);
                    }
                    this.apply_stabilization();
                    Ok::<_, CameraError>(())
                });

                match switched {
                    Ok(()) => {
                        self.apply_zoom(ZoomRequest::immediate(zoom));
                        self.rearm_torch();
                        self.apply_mirroring();
                    }
                    Err(e) => {
                        tracing::warn!("Lens switch failed, zooming in place: {}", e);
                        self.apply_zoom(ZoomRequest::ramp(preset.factor(), rate));
                    }
                }
            }
        }
    }

    // Torch

    fn apply_torch(&mut self) {
        let Some(device) = self.state.device.clone() else {
            return;
        };
        let Some(torch) = device.torch else {
            self.state.torch.active = false;
            return;
        };

        let enabled = self.state.torch.desired;
        let level = enabled.then(|| torch.max_level.clamp(0.0, 1.0));
        match self.hardware.set_torch(&device.id, level) {
            Ok(()) => self.state.torch.active = enabled,
            Err(e) => self.absorb("set torch", e),
        }
    }

    /// Re-apply the desired torch once a freshly bound device is ready
    fn rearm_torch(&mut self) {
        let Some(device) = self.state.device.clone() else {
            return;
        };
        self.state.torch.active = false;
        if !self.state.torch.desired || !device.has_torch() {
            return;
        }

        let timeout = self.settings.device_ready_timeout;
        if let Err(e) = self.hardware.await_device_ready(&device.id, timeout) {
            tracing::warn!("{} not ready, torch stays off until requested again: {}", device.name, e);
            return;
        }
        self.apply_torch();
    }

    // Output connection

    fn apply_stabilization(&mut self) {
        if !self.state.has_output {
            return;
        }
        if let Err(e) = self.hardware.set_stabilization_mode(self.state.stabilization) {
            tracing::debug!("Stabilization {:?} not applied: {}", self.state.stabilization, e);
        }
    }

    fn apply_mirroring(&mut self) {
        if !self.state.has_output {
            return;
        }
        let mirrored = self.state.should_mirror();
        match self.hardware.set_video_mirrored(mirrored) {
            Ok(()) => self.state.mirrored = mirrored,
            Err(e) => self.absorb("set mirroring", e),
        }
    }

    /// Set the output orientation, then re-assert mirroring it may have reset
    fn apply_orientation(&mut self, orientation: VideoOrientation) {
        self.state.orientation = orientation;
        if !self.state.has_output {
            return;
        }
        if let Err(e) = self.hardware.set_video_orientation(orientation) {
            self.absorb("set orientation", e);
        }
        self.apply_mirroring();
    }

    fn apply_codec(&mut self, prefer_hevc: bool) {
        self.settings.prefer_hevc = prefer_hevc;
        if !self.state.has_output {
            return;
        }
        let available = self.hardware.available_codecs();
        let codec = if prefer_hevc && available.contains(&VideoCodec::Hevc) {
            VideoCodec::Hevc
        } else if available.contains(&VideoCodec::H264) {
            VideoCodec::H264
        } else {
            VideoCodec::Default
        };

        match self.hardware.set_video_codec(codec) {
            Ok(()) => self.state.codec = codec,
            Err(e) => self.absorb("set codec", e),
        }
    }

    fn set_hdr(&mut self, enabled: bool) {
        let Some(device) = self.state.device.clone() else {
            return;
        };
        let supported = self
            .state
            .active_format
            .as_ref()
            .is_some_and(|f| f.hdr_supported);
        if enabled && !supported {
            tracing::debug!("HDR not supported by the active format");
            self.state.hdr_enabled = false;
            return;
        }
        match self.hardware.set_hdr(&device.id, enabled) {
            Ok(()) => self.state.hdr_enabled = enabled,
            Err(e) => self.absorb("set hdr", e),
        }
    }

    // Recording

    fn start_recording(
        &mut self,
        path: PathBuf,
        orientation: VideoOrientation,
    ) -> CameraResult<RecordingFinished> {
        if self.hardware.is_recording() {
            return Err(CameraError::Recording("already recording".to_string()));
        }
        if !self.state.has_output {
            return Err(CameraError::Recording("session has no recording output".to_string()));
        }

        self.apply_orientation(orientation);

        let (tx, rx) = oneshot::channel();
        let events = self.events.clone();
        let on_finish: RecordingCallback = Box::new(move |result| {
            let event = match &result {
                Ok(path) => SessionEvent::RecordingFinished(path.clone()),
                Err(e) => SessionEvent::RecordingFailed(e.to_string()),
            };
            let _ = events.send(event);
            let _ = tx.send(result);
        });

        self.hardware
            .start_recording(&path, on_finish)
            .map_err(|e| CameraError::Recording(e.to_string()))?;

        tracing::info!("Recording to {:?}", path);
        self.state.recording = Some(path.clone());
        self.emit(SessionEvent::RecordingStarted(path));
        Ok(rx)
    }

    fn stop_recording(&mut self) -> CameraResult<()> {
        self.state.recording = None;
        if !self.hardware.is_recording() {
            return Ok(());
        }
        self.hardware
            .stop_recording()
            .map_err(|e| CameraError::Recording(e.to_string()))
    }
}

/// Cancel any ramp in flight, then start the new zoom
fn drive_zoom<H: CaptureHardware>(
    hardware: &mut H,
    device: &DeviceId,
    target: f64,
    request: ZoomRequest,
) -> HardwareResult<()> {
    if hardware.is_ramping_zoom(device) {
        hardware.cancel_zoom_ramp(device)?;
    }
    if request.animated {
        hardware.ramp_zoom(device, target, request.rate)
    } else {
        hardware.set_zoom_factor(device, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::simulated::{HardwareEvent, SimulatedCamera};
    use crate::capture::traits::DeviceKind;
    use tempfile::TempDir;

    fn spawn(camera: &SimulatedCamera) -> SessionController {
        SessionController::spawn(camera.clone(), SessionSettings::default()).unwrap()
    }

    async fn configured(camera: &SimulatedCamera, position: CameraPosition) -> SessionController {
        let controller = spawn(camera);
        controller.configure(FrameRate::Fps60, position).await.unwrap();
        controller
    }

    #[tokio::test]
    async fn test_configure_binds_inputs_and_lands_on_one() {
        let camera = SimulatedCamera::phone();
        let controller = configured(&camera, CameraPosition::Back).await;

        assert_eq!(camera.bound_device(), Some(DeviceId::new("back-triple")));
        assert_eq!(camera.bound_audio().as_deref(), Some("sim-mic"));
        assert_eq!(camera.zoom_of("back-triple"), 1.0);
        assert_eq!(controller.current_zoom_factor(), 1.0);
        assert_eq!(camera.codec(), VideoCodec::Hevc);
        assert_eq!(camera.stabilization(), StabilizationMode::Cinematic);

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert_eq!(snapshot.device_kind, Some(DeviceKind::TripleCamera));
        assert!(!snapshot.mirrored);
    }

    #[tokio::test]
    async fn test_front_camera_is_mirrored() {
        let camera = SimulatedCamera::phone();
        let controller = configured(&camera, CameraPosition::Front).await;
        assert!(camera.is_mirrored());
        assert!(controller.snapshot().mirrored);
    }

    #[tokio::test]
    async fn test_configure_without_microphone() {
        let camera = SimulatedCamera::phone().without_audio();
        let controller = configured(&camera, CameraPosition::Back).await;
        assert_eq!(camera.bound_audio(), None);
        assert!(!controller.snapshot().has_audio);
    }

    #[tokio::test]
    async fn test_configure_failure_leaves_session_unconfigured() {
        let camera = SimulatedCamera::phone();
        camera.fail_bind("front-truedepth");
        let controller = spawn(&camera);
        controller.configure(FrameRate::Fps60, CameraPosition::Back).await.unwrap();
        controller.start().await.unwrap();

        let err = controller
            .configure(FrameRate::Fps60, CameraPosition::Front)
            .await
            .unwrap_err();
        assert!(matches!(err, CameraError::Configuration(_)));
        assert_eq!(camera.bound_device(), None);
        assert_eq!(camera.bound_audio(), None);
        assert_eq!(controller.snapshot().phase, SessionPhase::Unconfigured);
        assert!(camera.events().contains(&HardwareEvent::Running(false)));
    }

    #[tokio::test]
    async fn test_configure_with_no_devices() {
        let camera = SimulatedCamera::new(Vec::new());
        let controller = spawn(&camera);
        let err = controller
            .configure(FrameRate::Fps30, CameraPosition::Back)
            .await
            .unwrap_err();
        assert!(matches!(err, CameraError::NoDeviceAvailable(CameraPosition::Back)));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let camera = SimulatedCamera::phone();
        let controller = spawn(&camera);

        controller.start().await.unwrap();
        assert_eq!(controller.snapshot().phase, SessionPhase::Unconfigured);

        controller.configure(FrameRate::Fps60, CameraPosition::Back).await.unwrap();
        controller.start().await.unwrap();
        assert_eq!(controller.snapshot().phase, SessionPhase::Running);
        controller.stop().await.unwrap();
        assert_eq!(controller.snapshot().phase, SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_zoom_is_clamped() {
        let camera = SimulatedCamera::phone();
        let controller = configured(&camera, CameraPosition::Back).await;

        for factor in [0.1, 3.0, 14.0, 100.0] {
            controller.set_zoom(ZoomRequest::immediate(factor));
            controller.flush().await.unwrap();
            let zoom = controller.current_zoom_factor();
            assert!((0.5..=6.0).contains(&zoom), "{factor} gave {zoom}");
        }
        assert_eq!(controller.current_zoom_factor(), 6.0);
    }

    #[tokio::test]
    async fn test_new_ramp_cancels_previous() {
        let camera = SimulatedCamera::phone();
        let controller = configured(&camera, CameraPosition::Back).await;
        let id = DeviceId::new("back-triple");

        controller.set_zoom(ZoomRequest::ramp(2.0, 8.0));
        controller.flush().await.unwrap();
        camera.clear_events();
        controller.set_zoom(ZoomRequest::ramp(3.0, 8.0));
        controller.flush().await.unwrap();

        assert_eq!(
            camera.events(),
            vec![
                HardwareEvent::RampCancelled { device: id.clone() },
                HardwareEvent::RampStarted { device: id, target: 3.0, rate: 8.0 },
            ]
        );
    }

    #[tokio::test]
    async fn test_zoom_lock_failure_keeps_state() {
        let camera = SimulatedCamera::phone();
        let controller = configured(&camera, CameraPosition::Back).await;
        let mut events = controller.subscribe();

        camera.set_locked(true);
        controller.set_zoom(ZoomRequest::immediate(3.0));
        controller.flush().await.unwrap();

        assert_eq!(controller.snapshot().zoom_factor, 1.0);
        assert_eq!(camera.zoom_of("back-triple"), 1.0);
        assert!(matches!(events.try_recv(), Ok(SessionEvent::Warning(_))));
    }

    #[tokio::test]
    async fn test_quick_zoom_half_switches_to_ultra_wide() {
        let camera = SimulatedCamera::dual_lens_phone();
        let controller = configured(&camera, CameraPosition::Back).await;
        assert_eq!(camera.bound_device(), Some(DeviceId::new("back-wide")));

        controller.quick_zoom(ZoomPreset::Half).await.unwrap();
        assert_eq!(camera.bound_device(), Some(DeviceId::new("back-ultra")));
        assert_eq!(camera.zoom_of("back-ultra"), 1.0);

        controller.quick_zoom(ZoomPreset::Two).await.unwrap();
        assert_eq!(camera.bound_device(), Some(DeviceId::new("back-wide")));
        assert_eq!(camera.zoom_of("back-wide"), 2.0);
    }

    #[tokio::test]
    async fn test_quick_zoom_on_virtual_device_stays_bound() {
        let camera = SimulatedCamera::phone();
        let controller = configured(&camera, CameraPosition::Back).await;

        controller.quick_zoom(ZoomPreset::Half).await.unwrap();
        assert_eq!(camera.bound_device(), Some(DeviceId::new("back-triple")));
        assert_eq!(controller.current_zoom_factor(), 0.5);
    }

    #[tokio::test]
    async fn test_toggle_twice_restores_position_and_torch() {
        let camera = SimulatedCamera::phone();
        let controller = configured(&camera, CameraPosition::Back).await;
        controller.set_torch(true);
        controller.flush().await.unwrap();
        assert_eq!(camera.torch_level("back-triple"), Some(1.0));

        let position = controller.toggle_camera_position().await.unwrap();
        assert_eq!(position, CameraPosition::Front);
        let snapshot = controller.snapshot();
        assert!(snapshot.torch.desired);
        assert!(!snapshot.torch.active);
        assert!(snapshot.mirrored);
        assert_eq!(controller.current_zoom_factor(), 1.0);

        let position = controller.toggle_camera_position().await.unwrap();
        assert_eq!(position, CameraPosition::Back);
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.position, Some(CameraPosition::Back));
        assert!(snapshot.torch.active);
        assert!(!snapshot.mirrored);
        assert_eq!(camera.torch_level("back-triple"), Some(1.0));
    }

    #[tokio::test]
    async fn test_toggle_failure_keeps_previous_device() {
        let camera = SimulatedCamera::phone();
        camera.fail_bind("front-truedepth");
        let controller = configured(&camera, CameraPosition::Back).await;

        assert!(controller.toggle_camera_position().await.is_err());
        assert_eq!(camera.bound_device(), Some(DeviceId::new("back-triple")));
        assert_eq!(controller.snapshot().position, Some(CameraPosition::Back));
        assert_eq!(controller.snapshot().phase, SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_torch_level_is_clamped_to_capability() {
        let camera = SimulatedCamera::dual_lens_phone();
        let controller = configured(&camera, CameraPosition::Back).await;
        assert!(controller.is_torch_supported().await);

        controller.set_torch(true);
        controller.flush().await.unwrap();
        assert_eq!(camera.torch_level("back-wide"), Some(0.8));

        controller.set_torch(false);
        controller.flush().await.unwrap();
        assert_eq!(camera.torch_level("back-wide"), None);
    }

    #[tokio::test]
    async fn test_frame_rate_change_reselects_format() {
        let camera = SimulatedCamera::phone();
        let controller = configured(&camera, CameraPosition::Back).await;
        let (format, fps) = camera.active_format("back-triple").unwrap();
        assert_eq!((format.width, fps), (1920, 60.0));

        controller.set_zoom(ZoomRequest::immediate(2.0));
        assert!(controller.set_frame_rate(FrameRate::Fps30).await);
        let (format, fps) = camera.active_format("back-triple").unwrap();
        assert_eq!((format.width, fps), (3840, 30.0));
        assert_eq!(controller.current_zoom_factor(), 2.0);
        assert_eq!(controller.snapshot().frame_rate, FrameRate::Fps30);
    }

    #[tokio::test]
    async fn test_frame_rate_lock_failure_keeps_rate() {
        let camera = SimulatedCamera::phone();
        let controller = configured(&camera, CameraPosition::Back).await;
        camera.set_locked(true);
        assert!(!controller.set_frame_rate(FrameRate::Fps30).await);
        assert_eq!(controller.snapshot().frame_rate, FrameRate::Fps60);
    }

    #[tokio::test]
    async fn test_orientation_change_reasserts_mirroring() {
        let camera = SimulatedCamera::phone();
        let controller = configured(&camera, CameraPosition::Front).await;

        controller.set_video_orientation(VideoOrientation::LandscapeLeft);
        controller.flush().await.unwrap();
        assert_eq!(camera.orientation(), VideoOrientation::LandscapeLeft);
        assert!(camera.is_mirrored());
    }

    #[tokio::test]
    async fn test_hdr_follows_active_format() {
        let camera = SimulatedCamera::phone();
        let controller = configured(&camera, CameraPosition::Back).await;
        controller.set_hdr_enabled(true);
        controller.flush().await.unwrap();
        assert!(controller.snapshot().hdr_enabled);

        // A lens whose only format is 720p without HDR
        let mut lens = crate::capture::simulated::test_device(
            "back-wide",
            CameraPosition::Back,
            DeviceKind::WideAngle,
            1.0,
            10.0,
        );
        lens.formats.retain(|f| !f.hdr_supported);
        let camera = SimulatedCamera::new(vec![lens]);
        let controller = configured(&camera, CameraPosition::Back).await;
        assert_eq!(camera.active_format("back-wide").unwrap().0.width, 1280);

        controller.set_hdr_enabled(true);
        controller.flush().await.unwrap();
        assert!(!controller.snapshot().hdr_enabled);
        assert!(!camera
            .events()
            .iter()
            .any(|e| matches!(e, HardwareEvent::HdrSet { .. })));
    }

    #[tokio::test]
    async fn test_stabilization_survives_frame_rate_change() {
        let camera = SimulatedCamera::phone();
        let controller = configured(&camera, CameraPosition::Back).await;

        controller.set_stabilization_mode(StabilizationMode::Standard);
        controller.flush().await.unwrap();
        assert_eq!(camera.stabilization(), StabilizationMode::Standard);
        assert_eq!(controller.snapshot().stabilization, StabilizationMode::Standard);

        camera.clear_events();
        assert!(controller.set_frame_rate(FrameRate::Fps30).await);
        let events = camera.events();
        let format_at = events
            .iter()
            .position(|e| matches!(e, HardwareEvent::FormatSet { .. }))
            .unwrap();
        let stabilized_at = events
            .iter()
            .position(|e| *e == HardwareEvent::StabilizationSet(StabilizationMode::Standard))
            .unwrap();
        assert!(stabilized_at > format_at);
        assert_eq!(camera.stabilization(), StabilizationMode::Standard);
    }

    #[tokio::test]
    async fn test_focus_lock_failure_warns_and_keeps_state() {
        let camera = SimulatedCamera::phone();
        let controller = configured(&camera, CameraPosition::Back).await;
        let before = controller.snapshot();
        let mut events = controller.subscribe();

        camera.set_locked(true);
        camera.clear_events();
        controller.focus_and_expose(PointOfInterest { x: 0.25, y: 0.75 });
        controller.flush().await.unwrap();

        assert!(matches!(events.try_recv(), Ok(SessionEvent::Warning(_))));
        assert!(camera.events().is_empty());
        assert_eq!(controller.snapshot(), before);

        camera.set_locked(false);
        controller.focus_and_expose(PointOfInterest { x: 0.5, y: 0.5 });
        controller.flush().await.unwrap();
        assert_eq!(
            camera.events(),
            vec![HardwareEvent::Focused {
                device: DeviceId::new("back-triple")
            }]
        );
    }

    #[tokio::test]
    async fn test_prefer_h264_when_asked() {
        let camera = SimulatedCamera::phone();
        let controller = configured(&camera, CameraPosition::Back).await;
        controller.set_preferred_codec_hevc(false);
        controller.flush().await.unwrap();
        assert_eq!(camera.codec(), VideoCodec::H264);
    }

    #[tokio::test]
    async fn test_recording_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("take.mp4");
        let camera = SimulatedCamera::phone();
        let controller = configured(&camera, CameraPosition::Front).await;

        let finished = controller
            .start_recording(path.clone(), VideoOrientation::LandscapeRight)
            .await
            .unwrap();
        assert!(controller.snapshot().is_recording);
        assert!(camera.is_mirrored());
        assert!(controller
            .start_recording(dir.path().join("other.mp4"), VideoOrientation::Portrait)
            .await
            .is_err());

        controller.stop_recording().await.unwrap();
        assert_eq!(finished.await.unwrap().unwrap(), path);
        assert!(!controller.snapshot().is_recording);
    }

    #[tokio::test]
    async fn test_recording_requires_configure() {
        let dir = TempDir::new().unwrap();
        let camera = SimulatedCamera::phone();
        let controller = spawn(&camera);
        let err = controller
            .start_recording(dir.path().join("take.mp4"), VideoOrientation::Portrait)
            .await
            .unwrap_err();
        assert!(matches!(err, CameraError::Recording(_)));
    }
}
