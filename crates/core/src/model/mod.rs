mod ids;
mod progress;
mod segments;
mod watch;

pub use ids::{LessonId, LessonIdError};
pub use progress::{LessonProgress, ProgressUpdate};
pub use segments::{SegmentDecodeError, SegmentSet};
pub use watch::{FlushReason, PlaybackSample, Tick, WatchPolicy, WatchSession};
