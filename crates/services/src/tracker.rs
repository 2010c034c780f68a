use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use lesson_core::model::{
    FlushReason, LessonId, LessonProgress, SegmentSet, Tick, WatchPolicy, WatchSession,
};
use storage::repository::KeyValueStore;

use crate::error::{ProgressStoreError, TrackerError};
use crate::playback::PlaybackEvent;
use crate::progress_store::ProgressStore;
use crate::Clock;

/// Read-only view of the active lesson's progress, useful for UI.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchSnapshot {
    pub lesson_id: LessonId,
    pub percent: u8,
    pub watched_duration: f64,
    pub segments_watched: usize,
    pub completed: bool,
    pub last_saved_percent: Option<u8>,
    pub last_saved_at: Option<DateTime<Utc>>,
}

impl WatchSnapshot {
    fn of(session: &WatchSession) -> Self {
        Self {
            lesson_id: session.lesson_id().clone(),
            percent: session.percent(),
            watched_duration: session.watched_duration(),
            segments_watched: session.segments().len(),
            completed: session.is_completed(),
            last_saved_percent: session.last_saved_percent(),
            last_saved_at: session.last_saved_at(),
        }
    }
}

/// Owns the watch session of the lesson currently on screen.
///
/// Coverage is loaded from the local store when a lesson opens and written
/// back whenever a new segment is seen and when the lesson closes. Progress
/// flushes go to the remote store; their failures are logged and dropped
/// because the next flush carries the full state again.
pub struct WatchTracker {
    clock: Clock,
    policy: WatchPolicy,
    remote: Arc<dyn ProgressStore>,
    local: Arc<dyn KeyValueStore>,
    session: Option<WatchSession>,
}

impl WatchTracker {
    #[must_use]
    pub fn new(
        clock: Clock,
        remote: Arc<dyn ProgressStore>,
        local: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            clock,
            policy: WatchPolicy::default(),
            remote,
            local,
            session: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: WatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn session(&self) -> Option<&WatchSession> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn lesson_id(&self) -> Option<&LessonId> {
        self.session.as_ref().map(WatchSession::lesson_id)
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<WatchSnapshot> {
        self.session.as_ref().map(WatchSnapshot::of)
    }

    /// Switch to `lesson_id`, abandoning the current session.
    ///
    /// The previous lesson's coverage is saved first. Missing, unreadable or
    /// malformed coverage for the new lesson starts it from scratch.
    pub async fn open_lesson(&mut self, lesson_id: LessonId) {
        if let Err(err) = self.close().await {
            warn!(error = %err, "failed to save coverage of previous lesson");
        }

        let segments = self.load_coverage(&lesson_id).await;
        debug!(lesson = %lesson_id, segments = segments.len(), "lesson opened");
        self.session = Some(WatchSession::restore(lesson_id, segments).with_policy(self.policy));
    }

    /// Save coverage and drop the active session.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the coverage cannot be written; the
    /// session is dropped regardless.
    pub async fn close(&mut self) -> Result<Option<WatchSnapshot>, TrackerError> {
        let Some(session) = self.session.take() else {
            return Ok(None);
        };
        let snapshot = WatchSnapshot::of(&session);
        self.store_coverage(&session).await?;
        Ok(Some(snapshot))
    }

    /// Write the active session's coverage to the local store.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if the write fails.
    pub async fn persist_coverage(&self) -> Result<(), TrackerError> {
        match &self.session {
            Some(session) => self.store_coverage(session).await,
            None => Ok(()),
        }
    }

    /// Apply one playback event.
    ///
    /// Returns the resulting tick for time updates.
    pub async fn handle(&mut self, event: PlaybackEvent) -> Option<Tick> {
        let Some(session) = self.session.as_mut() else {
            debug!(?event, "playback event without an open lesson");
            return None;
        };

        match event {
            PlaybackEvent::MetadataLoaded { duration } => {
                if session.load_metadata(duration) {
                    debug!(
                        lesson = %session.lesson_id(),
                        percent = session.percent(),
                        "restored coverage applied"
                    );
                }
                None
            }
            PlaybackEvent::TimeUpdate(sample) => {
                let tick = session.observe(sample);
                if tick.new_segment {
                    if let Err(err) = self.persist_coverage().await {
                        warn!(error = %err, "failed to mirror coverage locally");
                    }
                }
                if let Some(reason) = tick.flush {
                    self.send_progress(reason).await;
                }
                Some(tick)
            }
            PlaybackEvent::Error { message } => {
                warn!(lesson = %session.lesson_id(), %message, "playback error");
                None
            }
        }
    }

    /// Send the current state to the remote store outside the tick cadence.
    ///
    /// Returns true when the store accepted it.
    pub async fn flush(&mut self) -> bool {
        self.send_progress(FlushReason::Backstop).await
    }

    /// Ask the server to mark the active lesson complete.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::CompletionRejected` with the server's message
    /// when completion rules are not met; the local flag stays unset.
    pub async fn mark_complete(&mut self) -> Result<LessonProgress, TrackerError> {
        let session = self.session.as_mut().ok_or(TrackerError::NoActiveLesson)?;
        let result = self.remote.complete_lesson(session.lesson_id()).await;
        match result {
            Ok(progress) => {
                if progress.is_completed && session.mark_completed() {
                    info!(lesson = %session.lesson_id(), "lesson marked complete");
                }
                Ok(progress)
            }
            Err(ProgressStoreError::Rejected { message, .. }) => {
                info!(lesson = %session.lesson_id(), %message, "completion rejected");
                Err(TrackerError::CompletionRejected { message })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn send_progress(&mut self, reason: FlushReason) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        let update = session.flush_payload();

        let result = self
            .remote
            .save_lesson_progress(session.lesson_id(), &update)
            .await;
        match result {
            Ok(progress) => {
                let became_complete = session.record_saved(update, &progress, self.clock.now());
                debug!(
                    lesson = %session.lesson_id(),
                    percent = update.video_progress_percent,
                    ?reason,
                    "progress saved"
                );
                if became_complete {
                    info!(lesson = %session.lesson_id(), "lesson completed");
                }
                true
            }
            Err(err) => {
                warn!(
                    lesson = %session.lesson_id(),
                    percent = update.video_progress_percent,
                    ?reason,
                    error = %err,
                    "progress flush failed"
                );
                false
            }
        }
    }

    async fn load_coverage(&self, lesson_id: &LessonId) -> SegmentSet {
        let key = SegmentSet::storage_key(lesson_id);
        let raw = match self.local.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return SegmentSet::new(),
            Err(err) => {
                warn!(%key, error = %err, "coverage unreadable, starting fresh");
                return SegmentSet::new();
            }
        };
        SegmentSet::from_json(&raw).unwrap_or_else(|err| {
            warn!(%key, error = %err, "coverage malformed, starting fresh");
            SegmentSet::new()
        })
    }

    async fn store_coverage(&self, session: &WatchSession) -> Result<(), TrackerError> {
        let key = SegmentSet::storage_key(session.lesson_id());
        self.local.put(&key, &session.segments().to_json()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lesson_core::model::PlaybackSample;
    use lesson_core::time::fixed_now;
    use storage::repository::InMemoryRepository;

    use crate::progress_store::InMemoryProgressStore;

    fn lesson(id: &str) -> LessonId {
        LessonId::new(id).unwrap()
    }

    fn tracker(remote: &InMemoryProgressStore, local: &InMemoryRepository) -> WatchTracker {
        WatchTracker::new(
            Clock::fixed(fixed_now()),
            Arc::new(remote.clone()),
            Arc::new(local.clone()),
        )
    }

    async fn play(tracker: &mut WatchTracker, from: f64, to: f64, duration: f64) {
        let mut t = from;
        while t < to {
            tracker
                .handle(PlaybackEvent::TimeUpdate(PlaybackSample::new(t, duration)))
                .await;
            t += 0.25;
        }
    }

    #[tokio::test]
    async fn events_without_lesson_are_ignored() {
        let remote = InMemoryProgressStore::new();
        let local = InMemoryRepository::new();
        let mut tracker = tracker(&remote, &local);
        let tick = tracker
            .handle(PlaybackEvent::TimeUpdate(PlaybackSample::new(1.0, 10.0)))
            .await;
        assert!(tick.is_none());
        assert!(remote.updates().is_empty());
    }

    #[tokio::test]
    async fn milestones_are_flushed_and_coverage_mirrored() {
        let remote = InMemoryProgressStore::new();
        let local = InMemoryRepository::new();
        let mut tracker = tracker(&remote, &local);
        tracker.open_lesson(lesson("l1")).await;

        // 20 segments of 5% each: every new segment is a milestone.
        play(&mut tracker, 0.0, 10.0, 100.0).await;

        let sent: Vec<u8> = remote
            .updates()
            .iter()
            .map(|(_, u)| u.video_progress_percent)
            .collect();
        assert_eq!(sent, vec![5, 10]);
        assert_eq!(
            local.get("watched-segments-l1").await.unwrap().as_deref(),
            Some("[0,1]")
        );

        let snapshot = tracker.snapshot().unwrap();
        assert_eq!(snapshot.percent, 10);
        assert_eq!(snapshot.last_saved_percent, Some(10));
        assert_eq!(snapshot.last_saved_at, Some(fixed_now()));
    }

    #[tokio::test]
    async fn flush_failures_are_swallowed_and_retried_with_latest_state() {
        let remote = InMemoryProgressStore::new();
        let local = InMemoryRepository::new();
        let mut tracker = tracker(&remote, &local);
        tracker.open_lesson(lesson("l1")).await;

        remote.set_offline(true);
        play(&mut tracker, 0.0, 10.0, 100.0).await;
        assert!(remote.updates().is_empty());
        assert!(tracker.session().unwrap().is_dirty());

        remote.set_offline(false);
        play(&mut tracker, 10.0, 15.0, 100.0).await;
        let updates = remote.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].1.video_progress_percent, 15);
        assert!(!tracker.session().unwrap().is_dirty());
    }

    #[tokio::test]
    async fn server_completion_sets_flag_once() {
        let remote = InMemoryProgressStore::new().with_auto_complete_at(100);
        let local = InMemoryRepository::new();
        let mut tracker = tracker(&remote, &local);
        tracker.open_lesson(lesson("l1")).await;

        play(&mut tracker, 0.0, 10.0, 10.0).await;
        assert!(tracker.snapshot().unwrap().completed);

        // Backstop resends after completion are harmless.
        assert!(tracker.flush().await);
        assert!(tracker.snapshot().unwrap().completed);
    }

    #[tokio::test]
    async fn reload_restores_saved_coverage() {
        let remote = InMemoryProgressStore::new();
        let local = InMemoryRepository::new();
        local.put("watched-segments-l1", "[0,1,2,3]").await.unwrap();

        let mut tracker = tracker(&remote, &local);
        tracker.open_lesson(lesson("l1")).await;
        tracker
            .handle(PlaybackEvent::MetadataLoaded { duration: 80.0 })
            .await;

        // 4 of 16 segments.
        assert_eq!(tracker.snapshot().unwrap().percent, 25);
    }

    #[tokio::test]
    async fn reload_without_metadata_never_sends_less_than_restored() {
        let remote = InMemoryProgressStore::new();
        let local = InMemoryRepository::new();
        local.put("watched-segments-l1", "[0,1,2,3]").await.unwrap();

        let mut tracker = tracker(&remote, &local);
        tracker.open_lesson(lesson("l1")).await;
        // Replays the watched range through the 15 s backstop.
        play(&mut tracker, 0.0, 16.0, 80.0).await;

        assert_eq!(tracker.snapshot().unwrap().percent, 25);
        let sent: Vec<u8> = remote
            .updates()
            .iter()
            .map(|(_, u)| u.video_progress_percent)
            .collect();
        assert_eq!(sent, vec![25, 25]);
    }

    #[tokio::test]
    async fn malformed_coverage_starts_fresh() {
        let remote = InMemoryProgressStore::new();
        let local = InMemoryRepository::new();
        local.put("watched-segments-l1", "{oops").await.unwrap();

        let mut tracker = tracker(&remote, &local);
        tracker.open_lesson(lesson("l1")).await;
        tracker
            .handle(PlaybackEvent::MetadataLoaded { duration: 80.0 })
            .await;

        let snapshot = tracker.snapshot().unwrap();
        assert_eq!(snapshot.percent, 0);
        assert_eq!(snapshot.segments_watched, 0);
    }

    #[tokio::test]
    async fn switching_lessons_saves_previous_and_loads_next() {
        let remote = InMemoryProgressStore::new();
        let local = InMemoryRepository::new();
        local.put("watched-segments-l2", "[3]").await.unwrap();

        let mut tracker = tracker(&remote, &local);
        tracker.open_lesson(lesson("l1")).await;
        play(&mut tracker, 0.0, 5.0, 50.0).await;

        tracker.open_lesson(lesson("l2")).await;
        assert_eq!(tracker.lesson_id(), Some(&lesson("l2")));
        assert_eq!(tracker.snapshot().unwrap().segments_watched, 1);
        assert_eq!(
            local.get("watched-segments-l1").await.unwrap().as_deref(),
            Some("[0]")
        );
    }

    #[tokio::test]
    async fn rejected_completion_keeps_flag_unset() {
        let remote = InMemoryProgressStore::new();
        remote.set_prerequisite(Some("Pass the quiz first".into()));
        let local = InMemoryRepository::new();
        let mut tracker = tracker(&remote, &local);
        tracker.open_lesson(lesson("l1")).await;

        let err = tracker.mark_complete().await.unwrap_err();
        assert!(matches!(
            err,
            TrackerError::CompletionRejected { ref message } if message == "Pass the quiz first"
        ));
        assert!(!tracker.snapshot().unwrap().completed);

        remote.set_prerequisite(None);
        let progress = tracker.mark_complete().await.unwrap();
        assert!(progress.is_completed);
        assert!(tracker.snapshot().unwrap().completed);
    }

    #[tokio::test]
    async fn mark_complete_requires_open_lesson() {
        let remote = InMemoryProgressStore::new();
        let local = InMemoryRepository::new();
        let mut tracker = tracker(&remote, &local);
        let err = tracker.mark_complete().await.unwrap_err();
        assert!(matches!(err, TrackerError::NoActiveLesson));
    }

    #[tokio::test]
    async fn close_returns_final_snapshot() {
        let remote = InMemoryProgressStore::new();
        let local = InMemoryRepository::new();
        let mut tracker = tracker(&remote, &local);
        tracker.open_lesson(lesson("l1")).await;
        play(&mut tracker, 0.0, 25.0, 50.0).await;

        let snapshot = tracker.close().await.unwrap().unwrap();
        assert_eq!(snapshot.percent, 50);
        assert!(tracker.session().is_none());
        assert!(tracker.close().await.unwrap().is_none());
    }
}
