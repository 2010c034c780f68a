use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use lesson_core::model::{LessonId, LessonProgress, PlaybackSample};

use crate::error::TrackerError;
use crate::tracker::{WatchSnapshot, WatchTracker};

const DEFAULT_CAPACITY: usize = 256;

/// Callbacks raised by a video element.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    MetadataLoaded { duration: f64 },
    TimeUpdate(PlaybackSample),
    Error { message: String },
}

/// Anything that emits playback events.
pub trait PlaybackSource: Send + Sync {
    /// Start receiving events emitted from now on.
    fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent>;
}

/// Broadcast-backed source; the host pushes events with `emit`.
#[derive(Clone)]
pub struct ChannelPlaybackSource {
    tx: broadcast::Sender<PlaybackEvent>,
}

impl ChannelPlaybackSource {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Source buffering up to `capacity` undelivered events per subscriber.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Push an event to every subscriber. Returns how many received it.
    pub fn emit(&self, event: PlaybackEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for ChannelPlaybackSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackSource for ChannelPlaybackSource {
    fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.tx.subscribe()
    }
}

/// Disposer for an attached tracker.
///
/// `dispose` drains events already queued and then stops. Dropping without
/// disposing aborts the task.
pub struct Subscription {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub async fn dispose(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "playback task ended abnormally");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn pump(
    mut events: broadcast::Receiver<PlaybackEvent>,
    mut stop: oneshot::Receiver<()>,
    tracker: Arc<Mutex<WatchTracker>>,
) {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(event) => {
                    tracker.lock().await.handle(event).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "playback events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut stop => break,
        }
    }
}

/// Lesson view controller: one tracker, one subscription at a time.
pub struct LessonPlayer {
    source: Arc<dyn PlaybackSource>,
    tracker: Arc<Mutex<WatchTracker>>,
    subscription: Option<Subscription>,
}

impl LessonPlayer {
    #[must_use]
    pub fn new(source: Arc<dyn PlaybackSource>, tracker: WatchTracker) -> Self {
        Self {
            source,
            tracker: Arc::new(Mutex::new(tracker)),
            subscription: None,
        }
    }

    #[must_use]
    pub fn tracker(&self) -> Arc<Mutex<WatchTracker>> {
        Arc::clone(&self.tracker)
    }

    /// Feed events from `source` into `tracker` until the subscription is
    /// disposed.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn attach(
        source: &dyn PlaybackSource,
        tracker: Arc<Mutex<WatchTracker>>,
    ) -> Subscription {
        let events = source.subscribe();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(pump(events, stop_rx, tracker));
        Subscription {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Show `lesson_id`: detach from the previous lesson, load the new one
    /// and start listening.
    pub async fn switch_lesson(&mut self, lesson_id: LessonId) {
        if let Some(subscription) = self.subscription.take() {
            subscription.dispose().await;
        }
        debug!(lesson = %lesson_id, "switching lesson");
        self.tracker.lock().await.open_lesson(lesson_id).await;
        self.subscription = Some(Self::attach(
            self.source.as_ref(),
            Arc::clone(&self.tracker),
        ));
    }

    /// Stop listening and close the active lesson.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Storage` if coverage cannot be saved.
    pub async fn close(&mut self) -> Result<Option<WatchSnapshot>, TrackerError> {
        if let Some(subscription) = self.subscription.take() {
            subscription.dispose().await;
        }
        self.tracker.lock().await.close().await
    }

    /// Ask the server to complete the active lesson.
    ///
    /// # Errors
    ///
    /// See `WatchTracker::mark_complete`.
    pub async fn mark_complete(&self) -> Result<LessonProgress, TrackerError> {
        self.tracker.lock().await.mark_complete().await
    }

    pub async fn snapshot(&self) -> Option<WatchSnapshot> {
        self.tracker.lock().await.snapshot()
    }
}
