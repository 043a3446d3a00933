//! Export pipeline orchestration
//!
//! Builds the composition, renders it, optionally runs the color filter pass,
//! and reports the files produced.

use crate::export::composition::Composition;
use crate::export::engine::MediaEngine;
use crate::export::filter::ColorFilter;
use crate::export::types::{ExportError, ExportJob, ExportOptions, ExportProgress};
use crate::recorder::state::RecordedSegment;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Export pipeline for concatenating and encoding segments
pub struct ExportPipeline {
    engine: Arc<dyn MediaEngine>,
    scratch_dir: PathBuf,
    options: ExportOptions,
}

impl ExportPipeline {
    pub fn new(engine: Arc<dyn MediaEngine>, scratch_dir: PathBuf, options: ExportOptions) -> Self {
        Self {
            engine,
            scratch_dir,
            options,
        }
    }

    /// Run the export pipeline
    ///
    /// Blocks for the whole render, so call it from a blocking worker.
    pub fn run<F>(
        &self,
        segments: &[RecordedSegment],
        filter: Option<&ColorFilter>,
        progress_callback: F,
    ) -> Result<ExportJob, ExportError>
    where
        F: Fn(ExportProgress) + Send + Sync,
    {
        let result = self.execute(segments, filter, &progress_callback);
        match &result {
            Ok(job) => {
                tracing::info!("Export {} finished: {:?}", job.id, job.output);
                progress_callback(ExportProgress::complete());
            }
            Err(e) => {
                tracing::error!("Export failed: {}", e);
                progress_callback(ExportProgress::error(e.to_string()));
            }
        }
        result
    }

    fn execute<F>(
        &self,
        segments: &[RecordedSegment],
        filter: Option<&ColorFilter>,
        progress_callback: &F,
    ) -> Result<ExportJob, ExportError>
    where
        F: Fn(ExportProgress) + Send + Sync,
    {
        tracing::info!("Starting export of {} segments", segments.len());

        // 1. Probe segments onto one timeline
        progress_callback(ExportProgress::preparing());
        std::fs::create_dir_all(&self.scratch_dir)?;
        let composition = Composition::build(segments, self.engine.as_ref());
        if composition.is_empty() {
            return Err(ExportError::NothingToExport);
        }

        let id = Uuid::new_v4();
        let extension = self.options.format.extension();

        // 2. Render the concatenated timeline
        progress_callback(ExportProgress::composing());
        let composed = self.scratch_dir.join(format!("composed_{id}.{extension}"));
        if let Err(e) = self.engine.render(&composition, &self.options, &composed) {
            remove_quietly(&composed);
            return Err(e);
        }

        // 3. Optional filter pass; failure keeps the unfiltered render
        let mut output = composed.clone();
        let mut intermediates = Vec::new();
        let mut filtered = false;

        if let Some(filter) = filter {
            progress_callback(ExportProgress::filtering(0, 0));
            let target = self.scratch_dir.join(format!("filtered_{id}.{extension}"));
            let report = |done: u64, total: u64| progress_callback(ExportProgress::filtering(done, total));

            match self
                .engine
                .apply_filter(&composed, &target, filter, &self.options, &report)
            {
                Ok(()) => {
                    intermediates.push(composed);
                    output = target;
                    filtered = true;
                }
                Err(e) => {
                    tracing::warn!("Filter pass failed, exporting unfiltered: {}", e);
                    remove_quietly(&target);
                }
            }
        }

        progress_callback(ExportProgress::finalizing());

        Ok(ExportJob {
            id,
            output,
            intermediates,
            filtered,
            duration_secs: composition.duration_secs(),
            segment_ids: composition.segment_ids(),
            skipped: composition.skipped().to_vec(),
        })
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed partial output {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {:?}: {}", path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::composition::tests::{info, segment};
    use crate::export::engine::FrameProgress;
    use crate::export::types::{ExportStage, MediaInfo, RgbaFrame};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Engine that writes placeholder files and can be told to fail
    struct FakeEngine {
        infos: HashMap<PathBuf, MediaInfo>,
        fail_render: bool,
        fail_filter: bool,
    }

    impl MediaEngine for FakeEngine {
        fn probe(&self, path: &Path) -> Result<MediaInfo, ExportError> {
            self.infos
                .get(path)
                .cloned()
                .ok_or_else(|| ExportError::Probe("unreadable".to_string()))
        }

        fn render(&self, _: &Composition, _: &ExportOptions, output: &Path) -> Result<(), ExportError> {
            std::fs::write(output, b"partial")?;
            if self.fail_render {
                return Err(ExportError::Ffmpeg("render failed".to_string()));
            }
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
            std::fs::write(output, b"partial")?;
            progress(10, 10);
            if self.fail_filter {
                return Err(ExportError::Encoding("filter failed".to_string()));
            }
            Ok(())
        }

        fn thumbnail(&self, _: &Path, _: u32) -> Result<RgbaFrame, ExportError> {
            Err(ExportError::Decoding("unused".to_string()))
        }
    }

    fn setup(fail_render: bool, fail_filter: bool) -> (Vec<RecordedSegment>, FakeEngine) {
        let a = segment("a.mp4");
        let b = segment("b.mp4");
        let engine = FakeEngine {
            infos: HashMap::from([
                (a.path.clone(), info(5.0, true)),
                (b.path.clone(), info(3.0, false)),
            ]),
            fail_render,
            fail_filter,
        };
        (vec![a, b], engine)
    }

    fn pipeline(engine: FakeEngine, dir: &TempDir) -> ExportPipeline {
        ExportPipeline::new(Arc::new(engine), dir.path().to_path_buf(), ExportOptions::default())
    }

    #[test]
    fn test_filtered_export() {
        let dir = TempDir::new().unwrap();
        let (segments, engine) = setup(false, false);
        let stages = Mutex::new(Vec::new());

        let job = pipeline(engine, &dir)
            .run(&segments, Some(&ColorFilter::rose()), |p| stages.lock().push(p.stage))
            .unwrap();

        assert!(job.filtered);
        assert_eq!(job.duration_secs, 8.0);
        assert_eq!(job.intermediates.len(), 1);
        assert!(job.output.file_name().unwrap().to_string_lossy().starts_with("filtered_"));
        assert_eq!(job.segment_ids, vec![segments[0].id, segments[1].id]);

        let stages = stages.into_inner();
        assert_eq!(stages.first(), Some(&ExportStage::Preparing));
        assert!(stages.contains(&ExportStage::Filtering));
        assert_eq!(stages.last(), Some(&ExportStage::Complete));
    }

    #[test]
    fn test_filter_failure_falls_back_to_unfiltered() {
        let dir = TempDir::new().unwrap();
        let (segments, engine) = setup(false, true);

        let job = pipeline(engine, &dir)
            .run(&segments, Some(&ColorFilter::rose()), |_| {})
            .unwrap();

        assert!(!job.filtered);
        assert!(job.intermediates.is_empty());
        assert!(job.output.exists());
        assert!(job.output.file_name().unwrap().to_string_lossy().starts_with("composed_"));
        assert!(!dir.path().join(format!("filtered_{}.mp4", job.id)).exists());
    }

    #[test]
    fn test_render_failure_removes_partial_output() {
        let dir = TempDir::new().unwrap();
        let (segments, engine) = setup(true, false);
        let stages = Mutex::new(Vec::new());

        let result = pipeline(engine, &dir).run(&segments, None, |p| stages.lock().push(p.stage));

        assert!(matches!(result, Err(ExportError::Ffmpeg(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(matches!(stages.into_inner().last(), Some(ExportStage::Error { .. })));
    }

    #[test]
    fn test_single_segment_without_filter() {
        let dir = TempDir::new().unwrap();
        let (segments, engine) = setup(false, false);

        let job = pipeline(engine, &dir).run(&segments[..1], None, |_| {}).unwrap();
        assert!(!job.filtered);
        assert_eq!(job.duration_secs, 5.0);
        assert_eq!(job.temp_files(), vec![job.output.clone()]);
    }

    #[test]
    fn test_all_segments_unreadable() {
        let dir = TempDir::new().unwrap();
        let (_, engine) = setup(false, false);
        let result = pipeline(engine, &dir).run(&[segment("missing.mp4")], None, |_| {});
        assert!(matches!(result, Err(ExportError::NothingToExport)));
    }
}
