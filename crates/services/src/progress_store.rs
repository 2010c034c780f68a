use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lesson_core::model::{LessonId, LessonProgress, ProgressUpdate};

use crate::error::ProgressStoreError;

/// Server-side record of lesson progress.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Persist the cumulative watch state for a lesson.
    ///
    /// # Errors
    ///
    /// Returns `ProgressStoreError` if the store is unreachable or refuses
    /// the update.
    async fn save_lesson_progress(
        &self,
        lesson_id: &LessonId,
        update: &ProgressUpdate,
    ) -> Result<LessonProgress, ProgressStoreError>;

    /// Ask the server to mark a lesson complete.
    ///
    /// The server applies its own rules (quizzes passed, etc.) before
    /// accepting.
    ///
    /// # Errors
    ///
    /// Returns `ProgressStoreError::Rejected` when those rules are not met.
    async fn complete_lesson(
        &self,
        lesson_id: &LessonId,
    ) -> Result<LessonProgress, ProgressStoreError>;
}

#[derive(Default)]
struct InMemoryState {
    progress: HashMap<LessonId, LessonProgress>,
    updates: Vec<(LessonId, ProgressUpdate)>,
    auto_complete_at: Option<u8>,
    prerequisite: Option<String>,
    offline: bool,
}

/// In-memory progress store for tests and offline runs.
///
/// Stores the last update per lesson (last arrival wins) and records every
/// update it receives.
#[derive(Clone, Default)]
pub struct InMemoryProgressStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryProgressStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report lessons as completed once an update reaches `percent`.
    #[must_use]
    pub fn with_auto_complete_at(self, percent: u8) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.auto_complete_at = Some(percent);
        }
        self
    }

    /// Refuse explicit completion with `message` until cleared.
    pub fn set_prerequisite(&self, message: Option<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.prerequisite = message;
        }
    }

    /// Make every call fail as if the network were down.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.offline = offline;
        }
    }

    /// Every update received so far, in arrival order.
    #[must_use]
    pub fn updates(&self) -> Vec<(LessonId, ProgressUpdate)> {
        self.state
            .lock()
            .map(|state| state.updates.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn progress(&self, lesson_id: &LessonId) -> Option<LessonProgress> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.progress.get(lesson_id).cloned())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>, ProgressStoreError> {
        let state = self
            .state
            .lock()
            .map_err(|e| ProgressStoreError::Unavailable(e.to_string()))?;
        if state.offline {
            return Err(ProgressStoreError::Unavailable("offline".into()));
        }
        Ok(state)
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn save_lesson_progress(
        &self,
        lesson_id: &LessonId,
        update: &ProgressUpdate,
    ) -> Result<LessonProgress, ProgressStoreError> {
        let mut state = self.lock()?;
        state.updates.push((lesson_id.clone(), *update));

        let auto_complete = state
            .auto_complete_at
            .is_some_and(|threshold| update.video_progress_percent >= threshold);
        let entry = state.progress.entry(lesson_id.clone()).or_default();
        entry.watched_duration = update.watched_duration;
        entry.video_progress_percent = f64::from(update.video_progress_percent);
        entry.is_completed |= auto_complete;
        Ok(entry.clone())
    }

    async fn complete_lesson(
        &self,
        lesson_id: &LessonId,
    ) -> Result<LessonProgress, ProgressStoreError> {
        let mut state = self.lock()?;
        if let Some(message) = state.prerequisite.clone() {
            return Err(ProgressStoreError::Rejected {
                status: 400,
                message,
            });
        }
        let entry = state.progress.entry(lesson_id.clone()).or_default();
        entry.is_completed = true;
        Ok(entry.clone())
    }
}
