//! Export composition
//!
//! The timeline built for one export: every readable segment placed back to
//! back in store order. Lives only for the duration of the export.

use crate::export::engine::MediaEngine;
use crate::export::types::MediaInfo;
use crate::recorder::state::RecordedSegment;
use std::path::PathBuf;
use uuid::Uuid;

/// A span of time in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start_secs: f64,
    pub duration_secs: f64,
}

impl TimeRange {
    pub fn new(start_secs: f64, duration_secs: f64) -> Self {
        Self {
            start_secs,
            duration_secs,
        }
    }

    pub fn end_secs(&self) -> f64 {
        self.start_secs + self.duration_secs
    }
}

/// One segment placed on the timeline
#[derive(Debug, Clone, PartialEq)]
pub struct TrackEntry {
    pub segment_id: Uuid,
    pub source: PathBuf,
    /// Portion of the source used (always the whole take)
    pub source_range: TimeRange,
    /// Timeline position the source range is inserted at
    pub insert_at_secs: f64,
    pub info: MediaInfo,
}

impl TrackEntry {
    /// Range this entry occupies on the output timeline
    pub fn timeline_range(&self) -> TimeRange {
        TimeRange::new(self.insert_at_secs, self.source_range.duration_secs)
    }

    pub fn has_audio(&self) -> bool {
        self.info.has_audio
    }
}

#[derive(Debug, Clone, Default)]
pub struct Composition {
    entries: Vec<TrackEntry>,
    skipped: Vec<Uuid>,
    cursor_secs: f64,
}

impl Composition {
    /// Probe each segment and append it at the running cursor.
    ///
    /// Segments whose video cannot be read are skipped; a missing audio track
    /// leaves that span silent.
    pub fn build(segments: &[RecordedSegment], engine: &dyn MediaEngine) -> Self {
        let mut composition = Self::default();

        for segment in segments {
            match engine.probe(&segment.path) {
                Ok(info) if info.duration_secs > 0.0 => composition.insert(segment, info),
                Ok(_) => {
                    tracing::warn!("Skipping segment {}: empty video track", segment.id);
                    composition.skipped.push(segment.id);
                }
                Err(e) => {
                    tracing::warn!("Skipping segment {}: {}", segment.id, e);
                    composition.skipped.push(segment.id);
                }
            }
        }

        tracing::info!(
            "Composition: {} segments, {:.3}s, {} skipped",
            composition.entries.len(),
            composition.duration_secs(),
            composition.skipped.len()
        );
        composition
    }

    fn insert(&mut self, segment: &RecordedSegment, info: MediaInfo) {
        if !info.has_audio {
            tracing::debug!("Segment {} has no audio; span will be silent", segment.id);
        }
        let duration = info.duration_secs;
        self.entries.push(TrackEntry {
            segment_id: segment.id,
            source: segment.path.clone(),
            source_range: TimeRange::new(0.0, duration),
            insert_at_secs: self.cursor_secs,
            info,
        });
        self.cursor_secs += duration;
    }

    /// Video track entries in timeline order
    pub fn entries(&self) -> &[TrackEntry] {
        &self.entries
    }

    /// Entries contributing to the audio track
    pub fn audio_entries(&self) -> impl Iterator<Item = &TrackEntry> {
        self.entries.iter().filter(|e| e.has_audio())
    }

    pub fn has_audio(&self) -> bool {
        self.entries.iter().any(TrackEntry::has_audio)
    }

    pub fn skipped(&self) -> &[Uuid] {
        &self.skipped
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.cursor_secs
    }

    /// Output canvas: the first entry's upright dimensions, rounded down to even
    pub fn canvas(&self) -> Option<(u32, u32)> {
        self.entries.first().map(|e| {
            let (w, h) = e.info.display_dimensions();
            ((w & !1).max(2), (h & !1).max(2))
        })
    }

    /// Output frame rate: the first entry's rate
    pub fn frame_rate(&self) -> Option<f64> {
        self.entries.first().map(|e| e.info.fps)
    }

    pub fn segment_ids(&self) -> Vec<Uuid> {
        self.entries.iter().map(|e| e.segment_id).collect()
    }
}
