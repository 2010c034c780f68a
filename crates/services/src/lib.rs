#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod http_store;
pub mod playback;
pub mod progress_store;
pub mod tracker;

pub use lesson_core::Clock;

pub use config::ProgressApiConfig;
pub use error::{ConfigError, ProgressStoreError, TrackerError};
pub use http_store::HttpProgressStore;
pub use playback::{
    ChannelPlaybackSource, LessonPlayer, PlaybackEvent, PlaybackSource, Subscription,
};
pub use progress_store::{InMemoryProgressStore, ProgressStore};
pub use tracker::{WatchSnapshot, WatchTracker};
