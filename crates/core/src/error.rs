use thiserror::Error;

use crate::model::{LessonIdError, SegmentDecodeError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    LessonId(#[from] LessonIdError),
    #[error(transparent)]
    Segments(#[from] SegmentDecodeError),
}
