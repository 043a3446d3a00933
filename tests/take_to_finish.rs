//! End-to-end: record takes on the simulated camera, then finish them into
//! one exported file.

use async_trait::async_trait;
use parking_lot::Mutex;
use segment_camera::capture::SimulatedCamera;
use segment_camera::export::engine::FrameProgress;
use segment_camera::export::{
    ColorFilter, Composition, ExportError, ExportOptions, ExportStage, MediaEngine, MediaInfo,
    MediaKind, PersistenceSink, RgbaFrame,
};
use segment_camera::{CameraApp, CameraConfig, CameraError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Engine that treats every existing file as a 2 second clip
#[derive(Default)]
struct StubEngine {
    renders: AtomicUsize,
    fail_filter: bool,
}

impl MediaEngine for StubEngine {
    fn probe(&self, path: &Path) -> Result<MediaInfo, ExportError> {
        if !path.exists() {
            return Err(ExportError::Probe(format!("missing {path:?}")));
        }
        Ok(MediaInfo {
            width: 1920,
            height: 1080,
            fps: 60.0,
            duration_secs: 2.0,
            has_audio: true,
            rotation: 90,
        })
    }

    fn render(&self, _: &Composition, _: &ExportOptions, output: &Path) -> Result<(), ExportError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        std::fs::write(output, b"composed")?;
        Ok(())
    }

    fn apply_filter(
        &self,
        _: &Path,
        output: &Path,
        _: &ColorFilter,
        _: &ExportOptions,
        progress: FrameProgress<'_>,
    ) -> Result<(), ExportError> {
        if self.fail_filter {
            std::fs::write(output, b"partial")?;
            return Err(ExportError::Encoding("encoder crashed".to_string()));
        }
        progress(1, 1);
        std::fs::write(output, b"filtered")?;
        Ok(())
    }

    fn thumbnail(&self, _: &Path, _: u32) -> Result<RgbaFrame, ExportError> {
        Ok(RgbaFrame {
            width: 1,
            height: 1,
            data: vec![255, 0, 0, 255],
        })
    }
}

/// Sink that records what it was handed, copying the bytes
#[derive(Default)]
struct CapturingSink {
    saved: Mutex<Vec<(PathBuf, Vec<u8>)>>,
    fail: bool,
}

#[async_trait]
impl PersistenceSink for CapturingSink {
    async fn save(&self, path: &Path, kind: MediaKind) -> anyhow::Result<()> {
        assert_eq!(kind, MediaKind::Video);
        if self.fail {
            anyhow::bail!("library is full");
        }
        let bytes = tokio::fs::read(path).await?;
        self.saved.lock().push((path.to_path_buf(), bytes));
        Ok(())
    }
}

fn config(dir: &TempDir) -> CameraConfig {
    let mut config = CameraConfig {
        scratch_dir: dir.path().join("scratch"),
        ..Default::default()
    };
    config.export.cleanup_grace_ms = 10;
    config
}

async fn record_takes(app: &CameraApp, count: usize) {
    app.open().await.unwrap();
    for _ in 0..count {
        app.start_take().await.unwrap();
        app.stop_take().await.unwrap();
    }
}

#[tokio::test]
async fn finish_without_takes_never_renders() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(StubEngine::default());
    let sink = Arc::new(CapturingSink::default());
    let app = CameraApp::new(SimulatedCamera::phone(), config(&dir), engine.clone(), sink.clone()).unwrap();
    app.open().await.unwrap();

    assert!(app.finish().await.unwrap().is_none());
    assert_eq!(engine.renders.load(Ordering::SeqCst), 0);
    assert!(sink.saved.lock().is_empty());

    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("scratch")).unwrap().collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn finish_consumes_takes_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(StubEngine::default());
    let sink = Arc::new(CapturingSink::default());
    let app = CameraApp::new(SimulatedCamera::phone(), config(&dir), engine.clone(), sink.clone()).unwrap();
    record_takes(&app, 2).await;

    let takes = app.ui_state().segments;
    assert_eq!(takes.len(), 2);
    let mut progress = app.subscribe_export_progress();

    let finished = app.finish().await.unwrap().unwrap();
    assert_eq!(finished.job.duration_secs, 4.0);
    assert_eq!(
        finished.job.segment_ids,
        takes.iter().map(|t| t.id).collect::<Vec<_>>()
    );
    assert!(!finished.job.filtered);
    assert_eq!(sink.saved.lock()[0].1, b"composed");
    assert!(app.ui_state().segments.is_empty());

    let removed = finished.cleanup.await.unwrap();
    assert_eq!(removed, 3);
    assert!(takes.iter().all(|t| !t.path.exists()));
    assert!(!finished.job.output.exists());

    let mut last = None;
    while let Ok(update) = progress.try_recv() {
        last = Some(update.stage);
    }
    assert_eq!(last, Some(ExportStage::Complete));
}

#[tokio::test]
async fn filter_failure_still_persists_unfiltered_export() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(StubEngine {
        fail_filter: true,
        ..Default::default()
    });
    let sink = Arc::new(CapturingSink::default());
    let app = CameraApp::new(SimulatedCamera::phone(), config(&dir), engine, sink.clone()).unwrap();
    record_takes(&app, 1).await;
    assert!(app.toggle_filter());

    let finished = app.finish().await.unwrap().unwrap();
    assert!(!finished.job.filtered);
    assert!(finished.job.output.file_name().unwrap().to_string_lossy().starts_with("composed_"));
    assert_eq!(sink.saved.lock()[0].1, b"composed");

    let partial = dir
        .path()
        .join("scratch")
        .join(format!("filtered_{}.mp4", finished.job.id));
    assert!(!partial.exists());
}

#[tokio::test]
async fn filter_success_persists_filtered_export() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(CapturingSink::default());
    let app = CameraApp::new(
        SimulatedCamera::phone(),
        config(&dir),
        Arc::new(StubEngine::default()),
        sink.clone(),
    )
    .unwrap();
    record_takes(&app, 1).await;
    app.toggle_filter();

    let finished = app.finish().await.unwrap().unwrap();
    assert!(finished.job.filtered);
    assert_eq!(sink.saved.lock()[0].1, b"filtered");
    assert_eq!(finished.cleanup.await.unwrap(), 3);
}

#[tokio::test]
async fn sink_failure_keeps_takes() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(CapturingSink {
        fail: true,
        ..Default::default()
    });
    let app = CameraApp::new(
        SimulatedCamera::phone(),
        config(&dir),
        Arc::new(StubEngine::default()),
        sink,
    )
    .unwrap();
    record_takes(&app, 2).await;

    let err = app.finish().await.unwrap_err();
    assert!(matches!(err, CameraError::Export(ExportError::Persistence(_))));

    let takes = app.ui_state().segments;
    assert_eq!(takes.len(), 2);
    assert!(takes.iter().all(|t| t.path.exists()));
    assert!(!app.ui_state().is_exporting);
}
