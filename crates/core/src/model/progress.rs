use serde::{Deserialize, Serialize};

/// Body of a progress flush: the current cumulative state, never a delta.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub watched_duration: f64,
    pub video_progress_percent: u8,
}

/// Server-side lesson progress as returned by the progress store.
///
/// Only the fields the tracker reads are modelled; anything else in the
/// payload is ignored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonProgress {
    #[serde(default)]
    pub watched_duration: f64,
    #[serde(default)]
    pub video_progress_percent: f64,
    #[serde(default)]
    pub is_completed: bool,
}
