//! Export command handlers
//!
//! The "finish" flow: export every stored take, hand the result to the
//! persistence sink, then clean up temporary files after a grace delay.

use crate::export::{
    schedule_cleanup, ColorFilter, ExportError, ExportJob, ExportOptions, ExportPipeline,
    ExportProgress, MediaEngine, MediaKind, PersistenceSink,
};
use crate::recorder::SegmentStore;
use crate::utils::error::{CameraError, CameraResult};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// State for tracking the active export
pub struct ExportState {
    /// Whether an export is currently running
    is_exporting: Arc<AtomicBool>,
    progress_tx: broadcast::Sender<ExportProgress>,
}

impl Default for ExportState {
    fn default() -> Self {
        let (progress_tx, _) = broadcast::channel(64);
        Self {
            is_exporting: Arc::new(AtomicBool::new(false)),
            progress_tx,
        }
    }
}

impl ExportState {
    /// Check if an export is currently in progress
    pub fn is_exporting(&self) -> bool {
        self.is_exporting.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExportProgress> {
        self.progress_tx.subscribe()
    }

    /// Claim the export slot; released when the guard drops
    fn begin(&self) -> CameraResult<ExportGuard> {
        if self
            .is_exporting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CameraError::ExportInProgress);
        }
        Ok(ExportGuard(self.is_exporting.clone()))
    }
}

struct ExportGuard(Arc<AtomicBool>);

impl Drop for ExportGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Everything the finish flow needs besides the takes themselves
#[derive(Clone)]
pub struct ExportContext {
    pub engine: Arc<dyn MediaEngine>,
    pub sink: Arc<dyn PersistenceSink>,
    pub scratch_dir: PathBuf,
    pub options: ExportOptions,
    pub cleanup_grace: Duration,
}

/// A persisted export and its pending cleanup
#[derive(Debug)]
pub struct FinishedExport {
    pub job: ExportJob,
    /// Resolves to the number of temporary files removed
    pub cleanup: JoinHandle<usize>,
}

/// Export the stored takes and persist the result.
///
/// With no takes this returns `Ok(None)` without touching the pipeline. On
/// success the exported takes leave the store and their files are deleted
/// after the grace delay; on failure the takes stay and only the export's own
/// temporary files are removed.
pub async fn finish(
    state: &ExportState,
    store: &Arc<RwLock<SegmentStore>>,
    context: &ExportContext,
    filter: Option<ColorFilter>,
) -> CameraResult<Option<FinishedExport>> {
    let segments = store.read().snapshot();
    if segments.is_empty() {
        tracing::info!("Nothing recorded; finish ignored");
        return Ok(None);
    }

    let _guard = state.begin()?;
    tracing::info!(
        "Exporting {} takes (filter: {})",
        segments.len(),
        filter.is_some()
    );

    let pipeline = ExportPipeline::new(
        context.engine.clone(),
        context.scratch_dir.clone(),
        context.options.clone(),
    );
    let progress_tx = state.progress_tx.clone();

    let job = tokio::task::spawn_blocking(move || {
        pipeline.run(&segments, filter.as_ref(), |progress| {
            let _ = progress_tx.send(progress);
        })
    })
    .await
    .map_err(|e| ExportError::Encoding(format!("Export task panicked: {}", e)))??;

    match context.sink.save(&job.output, MediaKind::Video).await {
        Ok(()) => {
            let consumed = store.write().take_consumed(&job.segment_ids);
            let mut paths: Vec<PathBuf> = consumed.into_iter().map(|s| s.path).collect();
            paths.extend(job.temp_files());

            tracing::info!("Export {} persisted; cleaning up {} files", job.id, paths.len());
            let cleanup = schedule_cleanup(paths, context.cleanup_grace);
            Ok(Some(FinishedExport { job, cleanup }))
        }
        Err(e) => {
            tracing::error!("Failed to persist export {}: {:#}", job.id, e);
            schedule_cleanup(job.temp_files(), context.cleanup_grace);
            Err(ExportError::Persistence(format!("{:#}", e)).into())
        }
    }
}
