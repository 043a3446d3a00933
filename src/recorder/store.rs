//! Segment store
//!
//! Ordered collection of finished takes. Append order is display order and
//! export order.

use super::state::{RecordedSegment, Thumbnail};
use crate::utils::error::CameraResult;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct SegmentStore {
    segments: Vec<RecordedSegment>,
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, segment: RecordedSegment) {
        tracing::debug!("Stored segment {} ({} total)", segment.id, self.segments.len() + 1);
        self.segments.push(segment);
    }

    /// Delete a segment together with its backing file.
    ///
    /// The file goes first; if it cannot be removed the entry stays. Unknown
    /// ids are a no-op returning `Ok(false)`.
    pub fn delete(&mut self, id: Uuid) -> CameraResult<bool> {
        let Some(index) = self.segments.iter().position(|s| s.id == id) else {
            return Ok(false);
        };

        let path = &self.segments[index].path;
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Segment file already gone: {:?}", path);
            }
            Err(e) => {
                tracing::error!("Failed to delete segment file {:?}: {}", path, e);
                return Err(e.into());
            }
        }

        self.segments.remove(index);
        tracing::info!("Deleted segment {}", id);
        Ok(true)
    }

    pub fn get(&self, id: Uuid) -> Option<&RecordedSegment> {
        self.segments.iter().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecordedSegment> {
        self.segments.iter()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Owned copy in store order
    pub fn snapshot(&self) -> Vec<RecordedSegment> {
        self.segments.clone()
    }

    /// Attach a thumbnail; false if the segment is gone by now
    pub fn set_thumbnail(&mut self, id: Uuid, thumbnail: Thumbnail) -> bool {
        match self.segments.iter_mut().find(|s| s.id == id) {
            Some(segment) => {
                segment.thumbnail = Some(thumbnail);
                true
            }
            None => false,
        }
    }

    /// Remove entries handed off to an export without touching their files
    pub fn take_consumed(&mut self, ids: &[Uuid]) -> Vec<RecordedSegment> {
        let (taken, kept) = std::mem::take(&mut self.segments)
            .into_iter()
            .partition(|s| ids.contains(&s.id));
        self.segments = kept;
        taken
    }
}
