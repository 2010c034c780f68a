use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a lesson id is blank or contains a path separator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid lesson id: {raw:?}")]
pub struct LessonIdError {
    raw: String,
}

/// Backend identifier of a lesson.
///
/// Ids are opaque strings; they end up in request paths and local storage
/// keys, so whitespace-only values and `/` are rejected.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LessonId(String);

impl LessonId {
    /// Creates a `LessonId` from raw text.
    ///
    /// # Errors
    ///
    /// Returns `LessonIdError` if the trimmed text is empty or contains `/`.
    pub fn new(raw: impl Into<String>) -> Result<Self, LessonIdError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.contains('/') {
            return Err(LessonIdError { raw });
        }
        Ok(Self(trimmed.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LessonId {
    type Error = LessonIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LessonId> for String {
    fn from(id: LessonId) -> Self {
        id.0
    }
}

impl fmt::Debug for LessonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LessonId({})", self.0)
    }
}

impl fmt::Display for LessonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LessonId {
    type Err = LessonIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lesson_id_display() {
        let id = LessonId::new("65f1c0ffee").unwrap();
        assert_eq!(id.to_string(), "65f1c0ffee");
    }

    #[test]
    fn test_lesson_id_trims_whitespace() {
        let id: LessonId = "  intro-1 ".parse().unwrap();
        assert_eq!(id.as_str(), "intro-1");
    }

    #[test]
    fn test_lesson_id_rejects_blank() {
        assert!("   ".parse::<LessonId>().is_err());
    }

    #[test]
    fn test_lesson_id_rejects_separator() {
        assert!(LessonId::new("a/b").is_err());
    }

    #[test]
    fn test_lesson_id_serde_validates() {
        let id: LessonId = serde_json::from_str("\"l-42\"").unwrap();
        assert_eq!(id.as_str(), "l-42");
        assert!(serde_json::from_str::<LessonId>("\"\"").is_err());
    }
}
