//! Camera screen commands
//!
//! `CameraApp` is what a camera screen talks to: it owns the session handle,
//! the recorder and the take store, keeps the screen's own toggles, and
//! publishes a [`UiState`] that can be rendered directly.

use super::export::{self, ExportContext, ExportState, FinishedExport};
use crate::capture::traits::{CameraPosition, CaptureHardware, DeviceOrientation};
use crate::config::CameraConfig;
use crate::export::{ExportOptions, ExportProgress, MediaEngine, PersistenceSink};
use crate::recorder::{thumbnail, RecordedSegment, SegmentRecorder, SegmentStore};
use crate::session::{SessionController, SessionPhase, SessionSettings, ZoomPreset, ZoomRequest};
use crate::utils::error::{CameraError, CameraResult};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Everything the camera screen renders
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    pub is_recording: bool,
    pub is_session_running: bool,
    pub frame_rate_label: String,
    pub quick_zoom_index: usize,
    pub is_torch_on: bool,
    pub is_filter_on: bool,
    pub show_grid: bool,
    pub is_exporting: bool,
    pub segments: Vec<RecordedSegment>,
}

/// Toggles owned by the screen rather than the session
#[derive(Debug)]
struct ScreenFlags {
    quick_zoom_index: usize,
    is_filter_on: bool,
    show_grid: bool,
    /// Zoom factor when the current pinch began
    pinch_baseline: Option<f64>,
}

impl Default for ScreenFlags {
    fn default() -> Self {
        Self {
            quick_zoom_index: ZoomPreset::One.index(),
            is_filter_on: false,
            show_grid: false,
            pinch_baseline: None,
        }
    }
}

pub struct CameraApp {
    config: CameraConfig,
    session: SessionController,
    recorder: Arc<SegmentRecorder>,
    store: Arc<RwLock<SegmentStore>>,
    flags: RwLock<ScreenFlags>,
    export_state: ExportState,
    engine: Arc<dyn MediaEngine>,
    sink: Arc<dyn PersistenceSink>,
}

impl CameraApp {
    /// Spawn the session for `hardware` and wire up the recorder and store
    pub fn new<H: CaptureHardware>(
        hardware: H,
        config: CameraConfig,
        engine: Arc<dyn MediaEngine>,
        sink: Arc<dyn PersistenceSink>,
    ) -> CameraResult<Self> {
        config.validate()?;
        let scratch_dir = config.ensure_scratch_dir()?.to_path_buf();

        let session = SessionController::spawn(hardware, SessionSettings::from(&config))?;
        let recorder = Arc::new(SegmentRecorder::new(session.clone(), scratch_dir));

        tracing::info!("Camera app ready (scratch: {:?})", config.scratch_dir);
        Ok(Self {
            config,
            session,
            recorder,
            store: Arc::new(RwLock::new(SegmentStore::new())),
            flags: RwLock::new(ScreenFlags::default()),
            export_state: ExportState::default(),
            engine,
            sink,
        })
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn ui_state(&self) -> UiState {
        let snapshot = self.session.snapshot();
        let flags = self.flags.read();
        UiState {
            is_recording: self.recorder.is_recording(),
            is_session_running: snapshot.phase == SessionPhase::Running,
            frame_rate_label: snapshot.frame_rate.label(),
            quick_zoom_index: flags.quick_zoom_index,
            is_torch_on: snapshot.torch.desired,
            is_filter_on: flags.is_filter_on,
            show_grid: flags.show_grid,
            is_exporting: self.export_state.is_exporting(),
            segments: self.store.read().snapshot(),
        }
    }

    pub fn subscribe_export_progress(&self) -> broadcast::Receiver<ExportProgress> {
        self.export_state.subscribe()
    }

    // ---- session ----

    /// Configure with the configured defaults and start delivering frames
    pub async fn open(&self) -> CameraResult<()> {
        let defaults = &self.config.session;
        self.session
            .configure(defaults.default_frame_rate, defaults.default_position)
            .await?;
        self.session.start().await
    }

    pub async fn start_session(&self) -> CameraResult<()> {
        self.session.start().await
    }

    pub async fn stop_session(&self) -> CameraResult<()> {
        self.session.stop().await
    }

    // ---- screen toggles ----

    pub fn toggle_grid(&self) -> bool {
        let mut flags = self.flags.write();
        flags.show_grid = !flags.show_grid;
        flags.show_grid
    }

    pub fn toggle_filter(&self) -> bool {
        let mut flags = self.flags.write();
        flags.is_filter_on = !flags.is_filter_on;
        flags.is_filter_on
    }

    pub fn toggle_torch(&self) -> bool {
        let enabled = !self.session.snapshot().torch.desired;
        self.session.set_torch(enabled);
        enabled
    }

    /// Flip between 30 and 60 fps, returning the label now in effect
    pub async fn toggle_frame_rate(&self) -> String {
        let current = self.session.snapshot().frame_rate;
        if !self.session.set_frame_rate(current.toggled()).await {
            tracing::warn!("Frame rate stays at {}", current.label());
        }
        self.session.snapshot().frame_rate.label()
    }

    // ---- zoom ----

    pub async fn select_quick_zoom(&self, index: usize) -> CameraResult<()> {
        let preset = ZoomPreset::from_index(index);
        self.flags.write().quick_zoom_index = preset.index();
        self.session.quick_zoom(preset).await
    }

    /// Remember the zoom factor the pinch is relative to
    pub fn pinch_began(&self) {
        let baseline = self.session.current_zoom_factor();
        self.flags.write().pinch_baseline = Some(baseline);
    }

    pub fn pinch_changed(&self, scale: f64) {
        let baseline = self
            .flags
            .read()
            .pinch_baseline
            .unwrap_or_else(|| self.session.snapshot().zoom_factor);
        self.session.set_zoom(ZoomRequest::ramp(
            baseline * scale,
            self.config.zoom.pinch_ramp_rate,
        ));
    }

    pub fn pinch_ended(&self) {
        self.flags.write().pinch_baseline = None;
        self.session.cancel_zoom_ramp();
    }

    // ---- camera ----

    pub async fn toggle_camera_position(&self) -> CameraResult<CameraPosition> {
        let position = self.session.toggle_camera_position().await?;
        self.flags.write().quick_zoom_index = ZoomPreset::One.index();
        Ok(position)
    }

    /// Latch the orientation the next take will be tagged with
    pub fn update_device_orientation(&self, orientation: DeviceOrientation) {
        self.recorder.update_orientation(orientation);
    }

    // ---- takes ----

    pub async fn start_take(&self) -> CameraResult<Uuid> {
        if self.export_state.is_exporting() {
            return Err(CameraError::ExportInProgress);
        }
        if let Some(segment) = self.recorder.take_unclaimed() {
            self.keep(&segment);
        }
        self.recorder.start_segment().await
    }

    /// Stop the take, store it and render its thumbnail in the background
    pub async fn stop_take(&self) -> CameraResult<Option<RecordedSegment>> {
        let Some(segment) = self.recorder.stop_segment().await? else {
            return Ok(None);
        };
        self.keep(&segment);
        Ok(Some(segment))
    }

    fn keep(&self, segment: &RecordedSegment) {
        self.store.write().append(segment.clone());
        self.spawn_thumbnail(segment);
    }

    /// Record button: start a take, or stop the running one
    pub async fn toggle_recording(&self) -> CameraResult<bool> {
        if self.recorder.is_recording() {
            self.stop_take().await?;
            Ok(false)
        } else {
            self.start_take().await?;
            Ok(true)
        }
    }

    fn spawn_thumbnail(&self, segment: &RecordedSegment) {
        let engine = self.engine.clone();
        let store = self.store.clone();
        let id = segment.id;
        let path = segment.path.clone();
        let width = self.config.export.thumbnail_width;

        tokio::spawn(async move {
            let rendered =
                tokio::task::spawn_blocking(move || thumbnail::generate(engine.as_ref(), &path, width))
                    .await;
            match rendered {
                Ok(Ok(thumb)) => {
                    if !store.write().set_thumbnail(id, thumb) {
                        tracing::debug!("Segment {} left the store before its thumbnail", id);
                    }
                }
                Ok(Err(e)) => tracing::warn!("Thumbnail for segment {} failed: {}", id, e),
                Err(e) => tracing::warn!("Thumbnail task for segment {} panicked: {}", id, e),
            }
        });
    }

    pub async fn delete_segment(&self, id: Uuid) -> CameraResult<bool> {
        if self.export_state.is_exporting() {
            return Err(CameraError::ExportInProgress);
        }
        self.store.write().delete(id)
    }

    /// Export every take and persist the result.
    ///
    /// A running take is stopped first. Returns `Ok(None)` when nothing was
    /// recorded.
    pub async fn finish(&self) -> CameraResult<Option<FinishedExport>> {
        // Also collects a take the hardware ended on its own
        self.stop_take().await?;

        let filter = self
            .flags
            .read()
            .is_filter_on
            .then_some(self.config.export.filter);
        export::finish(&self.export_state, &self.store, &self.export_context(), filter).await
    }

    fn export_context(&self) -> ExportContext {
        let export = &self.config.export;
        ExportContext {
            engine: self.engine.clone(),
            sink: self.sink.clone(),
            scratch_dir: self.config.scratch_dir.clone(),
            options: ExportOptions {
                format: export.format,
                quality: export.quality,
                fps: export.fps,
            },
            cleanup_grace: export.cleanup_grace(),
        }
    }
}
