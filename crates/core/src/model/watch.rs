use chrono::{DateTime, Utc};

use crate::model::{LessonId, LessonProgress, ProgressUpdate, SegmentSet};

//
// ─── POLICY ────────────────────────────────────────────────────────────────────
//

/// Tuning knobs for segment accounting and flush throttling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchPolicy {
    segment_secs: f64,
    milestone_step: u8,
    backstop_secs: u64,
}

impl WatchPolicy {
    pub const DEFAULT_SEGMENT_SECS: f64 = 5.0;
    pub const DEFAULT_MILESTONE_STEP: u8 = 5;
    pub const DEFAULT_BACKSTOP_SECS: u64 = 15;

    /// Builds a policy, falling back to defaults for zero or non-finite values.
    #[must_use]
    pub fn new(segment_secs: f64, milestone_step: u8, backstop_secs: u64) -> Self {
        let segment_secs = if segment_secs.is_finite() && segment_secs > 0.0 {
            segment_secs
        } else {
            Self::DEFAULT_SEGMENT_SECS
        };
        Self {
            segment_secs,
            milestone_step: if milestone_step == 0 {
                Self::DEFAULT_MILESTONE_STEP
            } else {
                milestone_step
            },
            backstop_secs: if backstop_secs == 0 {
                Self::DEFAULT_BACKSTOP_SECS
            } else {
                backstop_secs
            },
        }
    }

    #[must_use]
    pub fn segment_secs(&self) -> f64 {
        self.segment_secs
    }

    #[must_use]
    pub fn milestone_step(&self) -> u8 {
        self.milestone_step
    }

    #[must_use]
    pub fn backstop_secs(&self) -> u64 {
        self.backstop_secs
    }
}

impl Default for WatchPolicy {
    fn default() -> Self {
        Self {
            segment_secs: Self::DEFAULT_SEGMENT_SECS,
            milestone_step: Self::DEFAULT_MILESTONE_STEP,
            backstop_secs: Self::DEFAULT_BACKSTOP_SECS,
        }
    }
}

//
// ─── TICKS ─────────────────────────────────────────────────────────────────────
//

/// One `timeupdate` callback from the playback engine, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSample {
    pub current_time: f64,
    pub duration: f64,
}

impl PlaybackSample {
    #[must_use]
    pub fn new(current_time: f64, duration: f64) -> Self {
        Self {
            current_time,
            duration,
        }
    }
}

/// Why a tick asked for a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Coverage reached 100%.
    Completed,
    /// Coverage crossed a multiple of the milestone step.
    Milestone,
    /// Periodic send on a whole multiple of the backstop interval.
    Backstop,
}

/// What a single sample changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tick {
    pub new_segment: bool,
    pub percent_changed: bool,
    pub flush: Option<FlushReason>,
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// Watch coverage of one lesson view.
///
/// Samples are folded into a set of watched segments. The reported percent
/// is the share of segments seen, so seeking ahead does not count the
/// skipped range, and it never decreases for the lifetime of the session.
#[derive(Debug, Clone)]
pub struct WatchSession {
    lesson_id: LessonId,
    policy: WatchPolicy,
    current_time: f64,
    duration: f64,
    segments: SegmentSet,
    percent: u8,
    watched_duration: f64,
    dirty: bool,
    last_flush_second: Option<u64>,
    last_saved_percent: Option<u8>,
    last_saved_at: Option<DateTime<Utc>>,
    completed: bool,
}

impl WatchSession {
    /// Starts a session with no prior coverage.
    #[must_use]
    pub fn new(lesson_id: LessonId) -> Self {
        Self::restore(lesson_id, SegmentSet::new())
    }

    /// Starts a session from coverage saved by an earlier view.
    ///
    /// The percent stays at zero until the duration is known.
    #[must_use]
    pub fn restore(lesson_id: LessonId, segments: SegmentSet) -> Self {
        Self {
            lesson_id,
            policy: WatchPolicy::default(),
            current_time: 0.0,
            duration: 0.0,
            segments,
            percent: 0,
            watched_duration: 0.0,
            dirty: false,
            last_flush_second: None,
            last_saved_percent: None,
            last_saved_at: None,
            completed: false,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: WatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn lesson_id(&self) -> &LessonId {
        &self.lesson_id
    }

    #[must_use]
    pub fn policy(&self) -> WatchPolicy {
        self.policy
    }

    #[must_use]
    pub fn percent(&self) -> u8 {
        self.percent
    }

    #[must_use]
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Playback position at which the percent last increased.
    #[must_use]
    pub fn watched_duration(&self) -> f64 {
        self.watched_duration
    }

    #[must_use]
    pub fn segments(&self) -> &SegmentSet {
        &self.segments
    }

    /// True while the percent has moved past what was last saved.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    #[must_use]
    pub fn last_saved_percent(&self) -> Option<u8> {
        self.last_saved_percent
    }

    #[must_use]
    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        self.last_saved_at
    }

    /// Applies a `loadedmetadata` event.
    ///
    /// Returns true when the restored coverage raised the percent.
    pub fn load_metadata(&mut self, duration: f64) -> bool {
        if !duration.is_finite() || duration <= 0.0 {
            return false;
        }
        self.duration = duration;
        self.refresh_percent()
    }

    /// Folds one playback sample into the session.
    ///
    /// Samples are ignored until the duration is known. A sample landing in
    /// an already-watched segment adds no coverage but can still trigger the
    /// periodic backstop flush.
    pub fn observe(&mut self, sample: PlaybackSample) -> Tick {
        if !sample.duration.is_finite() || sample.duration <= 0.0 {
            return Tick::default();
        }
        if !sample.current_time.is_finite() {
            return Tick::default();
        }

        // Recomputed per tick; a changed duration is taken as-is.
        let duration_changed = (sample.duration - self.duration).abs() > f64::EPSILON;
        self.duration = sample.duration;
        self.current_time = sample.current_time.max(0.0);

        let mut tick = Tick::default();
        // Restored coverage counts as soon as any duration is known, even
        // without a metadata event.
        if duration_changed {
            tick.percent_changed = self.refresh_percent();
        }
        if let Some(segment) = SegmentSet::segment_for(self.current_time, self.policy.segment_secs)
        {
            if self.segments.insert(segment) {
                tick.new_segment = true;
                tick.percent_changed |= self.refresh_percent();
            }
        }

        tick.flush = self.flush_reason(tick.percent_changed);
        if tick.flush.is_some() {
            self.last_flush_second = Some(self.whole_second());
        }
        tick
    }

    /// Payload for the remote store reflecting the current state.
    #[must_use]
    pub fn flush_payload(&self) -> ProgressUpdate {
        ProgressUpdate {
            watched_duration: self.current_time,
            video_progress_percent: self.percent,
        }
    }

    /// Applies a successful store reply for `sent`.
    ///
    /// Returns true only on the transition to completed.
    pub fn record_saved(
        &mut self,
        sent: ProgressUpdate,
        reply: &LessonProgress,
        at: DateTime<Utc>,
    ) -> bool {
        self.last_saved_percent = Some(sent.video_progress_percent);
        self.last_saved_at = Some(at);
        if sent.video_progress_percent >= self.percent {
            self.dirty = false;
        }
        if reply.is_completed {
            self.mark_completed()
        } else {
            false
        }
    }

    /// Sets the completed flag. Returns false when it was already set.
    pub fn mark_completed(&mut self) -> bool {
        if self.completed {
            return false;
        }
        self.completed = true;
        true
    }

    fn refresh_percent(&mut self) -> bool {
        let total = SegmentSet::total_segments(self.duration, self.policy.segment_secs);
        let next = self.segments.percent_of(total);
        if next <= self.percent {
            return false;
        }
        self.percent = next;
        self.watched_duration = self.current_time;
        self.dirty = true;
        true
    }

    fn flush_reason(&self, percent_changed: bool) -> Option<FlushReason> {
        if percent_changed && self.percent >= 100 {
            return Some(FlushReason::Completed);
        }
        if percent_changed && self.percent % self.policy.milestone_step == 0 {
            return Some(FlushReason::Milestone);
        }
        let second = self.whole_second();
        if second > 0
            && second % self.policy.backstop_secs == 0
            && self.last_flush_second != Some(second)
        {
            return Some(FlushReason::Backstop);
        }
        None
    }

    fn whole_second(&self) -> u64 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let second = self.current_time.floor() as u64;
        second
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
