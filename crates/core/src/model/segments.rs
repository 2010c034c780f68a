use std::collections::BTreeSet;

use thiserror::Error;

use crate::model::LessonId;

/// Error raised when a persisted coverage entry cannot be decoded.
#[derive(Debug, Error)]
#[error("malformed segment coverage: {0}")]
pub struct SegmentDecodeError(#[from] serde_json::Error);

/// Watched segment indices of one lesson video.
///
/// A segment is a fixed-width bucket of the timeline; index `n` covers
/// `[n * width, (n + 1) * width)`. The set only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentSet {
    indices: BTreeSet<u32>,
}

impl SegmentSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Local storage key under which a lesson's coverage is mirrored.
    #[must_use]
    pub fn storage_key(lesson_id: &LessonId) -> String {
        format!("watched-segments-{lesson_id}")
    }

    /// Segment index containing `time`, or `None` for non-finite input.
    #[must_use]
    pub fn segment_for(time: f64, width: f64) -> Option<u32> {
        if !time.is_finite() || !width.is_finite() || width <= 0.0 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = (time.max(0.0) / width).floor().min(f64::from(u32::MAX)) as u32;
        Some(index)
    }

    /// Number of segments spanning a video of `duration` seconds.
    #[must_use]
    pub fn total_segments(duration: f64, width: f64) -> u32 {
        if !duration.is_finite() || duration <= 0.0 || width <= 0.0 {
            return 0;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let total = (duration / width).ceil().min(f64::from(u32::MAX)) as u32;
        total
    }

    /// Inserts a segment. Returns `false` when it was already present.
    pub fn insert(&mut self, index: u32) -> bool {
        self.indices.insert(index)
    }

    #[must_use]
    pub fn contains(&self, index: u32) -> bool {
        self.indices.contains(&index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.indices.iter().copied()
    }

    /// Integer percent of `total` segments covered, clamped to `0..=100`.
    ///
    /// Indices beyond `total` still count; the result is clamped rather than
    /// renormalized.
    #[must_use]
    pub fn percent_of(&self, total: u32) -> u8 {
        if total == 0 {
            return 0;
        }
        #[allow(clippy::cast_precision_loss)]
        let fraction = (self.indices.len() as f64 / f64::from(total)).clamp(0.0, 1.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percent = (fraction * 100.0).round() as u8;
        percent
    }

    /// Encodes the set as a JSON array of ascending indices.
    #[must_use]
    pub fn to_json(&self) -> String {
        let indices: Vec<u32> = self.iter().collect();
        serde_json::to_string(&indices).unwrap_or_else(|_| "[]".to_owned())
    }

    /// Decodes a JSON array of indices. Duplicates collapse.
    ///
    /// # Errors
    ///
    /// Returns `SegmentDecodeError` if the text is not an array of
    /// non-negative integers.
    pub fn from_json(raw: &str) -> Result<Self, SegmentDecodeError> {
        let indices: Vec<u32> = serde_json::from_str(raw)?;
        Ok(indices.into_iter().collect())
    }
}

impl FromIterator<u32> for SegmentSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self {
            indices: iter.into_iter().collect(),
        }
    }
}
