//! Segment recorder
//!
//! Drives one take at a time against the session controller's recording
//! output and turns the hardware's completion into a [`RecordedSegment`].

use super::state::RecordedSegment;
use crate::capture::traits::{CameraPosition, DeviceOrientation, VideoOrientation};
use crate::session::{RecordingFinished, SessionController};
use crate::utils::error::{CameraError, CameraResult};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

/// Current state of the segment recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No take in progress
    #[default]
    Idle,
    /// Writing a take
    Recording,
    /// Stop requested, waiting for the file to be finalized
    Finalizing,
}

/// Events emitted per take
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    Started(Uuid),
    Finished(Uuid),
    Failed(String),
}

/// Outcome of a take as reported by the hardware
type TakeOutcome = oneshot::Receiver<CameraResult<PathBuf>>;

struct ActiveSegment {
    id: Uuid,
    path: PathBuf,
    orientation: VideoOrientation,
    position: CameraPosition,
    outcome: TakeOutcome,
}

impl ActiveSegment {
    fn into_segment(self, path: PathBuf) -> RecordedSegment {
        RecordedSegment::new(
            self.id,
            path,
            self.orientation,
            self.position,
            self.position == CameraPosition::Front,
        )
    }
}

/// Records takes into the scratch directory
pub struct SegmentRecorder {
    session: SessionController,

    scratch_dir: PathBuf,

    state: Arc<RwLock<RecordingState>>,

    /// Orientation the next take will be tagged with
    orientation: RwLock<VideoOrientation>,

    /// Serializes start and stop so a stop never lands mid-start
    transition: tokio::sync::Mutex<()>,

    active: Arc<Mutex<Option<ActiveSegment>>>,

    /// Take the hardware finalized on its own, waiting to be collected
    unclaimed: Arc<Mutex<Option<RecordedSegment>>>,

    event_tx: broadcast::Sender<RecordingEvent>,
}

impl SegmentRecorder {
    pub fn new(session: SessionController, scratch_dir: PathBuf) -> Self {
        let (event_tx, _) = broadcast::channel(32);
        Self {
            session,
            scratch_dir,
            state: Arc::new(RwLock::new(RecordingState::Idle)),
            orientation: RwLock::new(VideoOrientation::Portrait),
            transition: tokio::sync::Mutex::new(()),
            active: Arc::new(Mutex::new(None)),
            unclaimed: Arc::new(Mutex::new(None)),
            event_tx,
        }
    }

    pub fn state(&self) -> RecordingState {
        *self.state.read()
    }

    pub fn is_recording(&self) -> bool {
        self.state() != RecordingState::Idle
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    /// Latched orientation for the next take
    pub fn orientation(&self) -> VideoOrientation {
        *self.orientation.read()
    }

    /// Track the device orientation. Flat and unknown readings keep the last value.
    pub fn update_orientation(&self, orientation: DeviceOrientation) {
        if let Some(video) = orientation.video_orientation() {
            *self.orientation.write() = video;
        }
    }

    /// Collect a take the hardware ended without a stop request
    pub fn take_unclaimed(&self) -> Option<RecordedSegment> {
        self.unclaimed.lock().take()
    }

    /// Start a new take, returning its identity
    pub async fn start_segment(&self) -> CameraResult<Uuid> {
        let _transition = self.transition.lock().await;
        {
            let mut state = self.state.write();
            if *state != RecordingState::Idle {
                return Err(CameraError::Recording("already recording".to_string()));
            }
            *state = RecordingState::Recording;
        }

        match self.begin().await {
            Ok(id) => {
                let _ = self.event_tx.send(RecordingEvent::Started(id));
                Ok(id)
            }
            Err(e) => {
                tracing::error!("Failed to start segment: {}", e);
                *self.state.write() = RecordingState::Idle;
                Err(e)
            }
        }
    }

    async fn begin(&self) -> CameraResult<Uuid> {
        let position = self
            .session
            .snapshot()
            .position
            .ok_or_else(|| CameraError::Recording("session not configured".to_string()))?;

        std::fs::create_dir_all(&self.scratch_dir)?;
        let id = Uuid::new_v4();
        let path = self.scratch_dir.join(format!("segment_{id}.mp4"));
        let orientation = self.orientation();

        tracing::info!("Starting segment {} ({:?})", id, orientation);
        let finished = match self.session.start_recording(path.clone(), orientation).await {
            Ok(finished) => finished,
            Err(e) => {
                remove_partial(&path);
                return Err(e);
            }
        };

        let (outcome_tx, outcome) = oneshot::channel();
        *self.active.lock() = Some(ActiveSegment {
            id,
            path,
            orientation,
            position,
            outcome,
        });
        self.watch_take(id, finished, outcome_tx);
        Ok(id)
    }

    /// Route the hardware's completion either to a pending stop, or, when
    /// nobody asked to stop, end the take here.
    fn watch_take(
        &self,
        id: Uuid,
        finished: RecordingFinished,
        outcome_tx: oneshot::Sender<CameraResult<PathBuf>>,
    ) {
        let active = self.active.clone();
        let state = self.state.clone();
        let unclaimed = self.unclaimed.clone();
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let outcome = finished
                .await
                .map_err(|_| CameraError::Recording("recording dropped before finalizing".to_string()))
                .and_then(|r| r.map_err(|e| CameraError::Recording(e.to_string())));

            let orphan = {
                let mut active = active.lock();
                match active.as_ref() {
                    Some(take) if take.id == id => active.take(),
                    _ => None,
                }
            };
            let Some(take) = orphan else {
                let _ = outcome_tx.send(outcome);
                return;
            };

            *state.write() = RecordingState::Idle;
            match outcome {
                Ok(path) => {
                    tracing::warn!("Segment {} ended without a stop request: {:?}", id, path);
                    *unclaimed.lock() = Some(take.into_segment(path));
                    let _ = event_tx.send(RecordingEvent::Finished(id));
                }
                Err(e) => {
                    tracing::error!("Segment {} failed while recording: {}", id, e);
                    remove_partial(&take.path);
                    let _ = event_tx.send(RecordingEvent::Failed(e.to_string()));
                }
            }
        });
    }

    /// Stop the active take and wait for the file to be finalized.
    ///
    /// When nothing is recording this hands back a take the hardware ended on
    /// its own, if any, and `Ok(None)` otherwise.
    pub async fn stop_segment(&self) -> CameraResult<Option<RecordedSegment>> {
        let _transition = self.transition.lock().await;
        let Some(active) = self.active.lock().take() else {
            return Ok(self.take_unclaimed());
        };
        *self.state.write() = RecordingState::Finalizing;

        let result = self.finish(active).await;
        *self.state.write() = RecordingState::Idle;

        match &result {
            Ok(segment) => {
                let _ = self.event_tx.send(RecordingEvent::Finished(segment.id));
            }
            Err(e) => {
                let _ = self.event_tx.send(RecordingEvent::Failed(e.to_string()));
            }
        }
        result.map(Some)
    }

    async fn finish(&self, mut active: ActiveSegment) -> CameraResult<RecordedSegment> {
        if let Err(e) = self.session.stop_recording().await {
            remove_partial(&active.path);
            return Err(e);
        }

        let outcome = (&mut active.outcome)
            .await
            .map_err(|_| CameraError::Recording("recording dropped before finalizing".to_string()))
            .and_then(|r| r);

        match outcome {
            Ok(path) => {
                tracing::info!("Segment {} finished: {:?}", active.id, path);
                Ok(active.into_segment(path))
            }
            Err(e) => {
                tracing::error!("Segment {} failed: {}", active.id, e);
                remove_partial(&active.path);
                Err(e)
            }
        }
    }
}

fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed partial segment {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove partial segment {:?}: {}", path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::simulated::SimulatedCamera;
    use crate::session::{FrameRate, SessionSettings};
    use tempfile::TempDir;

    async fn recorder(camera: &SimulatedCamera, dir: &TempDir) -> SegmentRecorder {
        let session = SessionController::spawn(camera.clone(), SessionSettings::default()).unwrap();
        session.configure(FrameRate::Fps30, CameraPosition::Back).await.unwrap();
        SegmentRecorder::new(session, dir.path().to_path_buf())
    }

    #[tokio::test]
    async fn test_take_produces_segment() {
        let dir = TempDir::new().unwrap();
        let camera = SimulatedCamera::phone();
        let recorder = recorder(&camera, &dir).await;

        recorder.update_orientation(DeviceOrientation::LandscapeLeft);
        let id = recorder.start_segment().await.unwrap();
        assert!(recorder.is_recording());
        // Rotation mid-take only affects the next one
        recorder.update_orientation(DeviceOrientation::Portrait);

        let segment = recorder.stop_segment().await.unwrap().unwrap();
        assert_eq!(segment.id, id);
        assert_eq!(segment.orientation, VideoOrientation::LandscapeRight);
        assert_eq!(segment.position, CameraPosition::Back);
        assert!(!segment.mirrored);
        assert_eq!(segment.file_name(), format!("segment_{id}.mp4"));
        assert!(segment.path.exists());
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let dir = TempDir::new().unwrap();
        let recorder = recorder(&SimulatedCamera::phone(), &dir).await;
        assert!(recorder.stop_segment().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let dir = TempDir::new().unwrap();
        let recorder = recorder(&SimulatedCamera::phone(), &dir).await;
        recorder.start_segment().await.unwrap();
        assert!(matches!(recorder.start_segment().await, Err(CameraError::Recording(_))));
        assert!(recorder.stop_segment().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_take_resets_flag_and_removes_file() {
        let dir = TempDir::new().unwrap();
        let camera = SimulatedCamera::phone();
        let recorder = recorder(&camera, &dir).await;
        let mut events = recorder.subscribe();

        let id = recorder.start_segment().await.unwrap();
        camera.fail_next_recording();
        assert!(matches!(recorder.stop_segment().await, Err(CameraError::Recording(_))));

        assert!(!recorder.is_recording());
        assert!(!dir.path().join(format!("segment_{id}.mp4")).exists());
        assert!(matches!(events.recv().await, Ok(RecordingEvent::Started(_))));
        assert!(matches!(events.recv().await, Ok(RecordingEvent::Failed(_))));
    }

    #[tokio::test]
    async fn test_start_before_configure_fails() {
        let dir = TempDir::new().unwrap();
        let session = SessionController::spawn(SimulatedCamera::phone(), SessionSettings::default()).unwrap();
        let recorder = SegmentRecorder::new(session, dir.path().to_path_buf());
        assert!(recorder.start_segment().await.is_err());
        assert!(!recorder.is_recording());
    }

    async fn next_event(events: &mut broadcast::Receiver<RecordingEvent>) -> RecordingEvent {
        tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .expect("no recording event")
            .unwrap()
    }

    #[tokio::test]
    async fn test_hardware_failure_mid_take_resets_flag() {
        let dir = TempDir::new().unwrap();
        let camera = SimulatedCamera::phone();
        let recorder = recorder(&camera, &dir).await;
        let mut events = recorder.subscribe();

        let id = recorder.start_segment().await.unwrap();
        assert!(matches!(next_event(&mut events).await, RecordingEvent::Started(_)));

        camera.fail_active_recording();
        assert!(matches!(next_event(&mut events).await, RecordingEvent::Failed(_)));
        assert!(!recorder.is_recording());
        assert!(!dir.path().join(format!("segment_{id}.mp4")).exists());
        assert!(recorder.stop_segment().await.unwrap().is_none());

        let next = recorder.start_segment().await.unwrap();
        assert_eq!(recorder.stop_segment().await.unwrap().unwrap().id, next);
    }

    #[tokio::test]
    async fn test_take_finalized_by_hardware_is_handed_back() {
        let dir = TempDir::new().unwrap();
        let camera = SimulatedCamera::phone();
        let recorder = recorder(&camera, &dir).await;
        let mut events = recorder.subscribe();

        let id = recorder.start_segment().await.unwrap();
        next_event(&mut events).await;
        camera.finish_active_recording();

        assert!(matches!(next_event(&mut events).await, RecordingEvent::Finished(done) if done == id));
        assert!(!recorder.is_recording());
        let segment = recorder.stop_segment().await.unwrap().unwrap();
        assert_eq!(segment.id, id);
        assert!(segment.path.exists());
        assert!(recorder.take_unclaimed().is_none());
    }

    #[tokio::test]
    async fn test_stop_during_start_waits_for_the_take() {
        let dir = TempDir::new().unwrap();
        let recorder = recorder(&SimulatedCamera::phone(), &dir).await;

        let (started, stopped) = tokio::join!(recorder.start_segment(), recorder.stop_segment());
        let id = started.unwrap();
        assert_eq!(stopped.unwrap().unwrap().id, id);
        assert!(!recorder.is_recording());
    }

}
