use std::fmt;

use lesson_core::model::PlaybackSample;

/// Error raised for an unparsable line in a playback trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceError {
    line: usize,
    reason: String,
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trace line {}: {}", self.line, self.reason)
    }
}

impl std::error::Error for TraceError {}

/// Parse `current_time,duration` lines. Blank lines and `#` comments are
/// skipped.
pub fn parse(text: &str) -> Result<Vec<PlaybackSample>, TraceError> {
    let mut samples = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let err = |reason: &str| TraceError {
            line: idx + 1,
            reason: reason.to_owned(),
        };
        let (time, duration) = line
            .split_once(',')
            .ok_or_else(|| err("expected `current_time,duration`"))?;
        let current_time: f64 = time
            .trim()
            .parse()
            .map_err(|_| err("current_time is not a number"))?;
        let duration: f64 = duration
            .trim()
            .parse()
            .map_err(|_| err("duration is not a number"))?;
        samples.push(PlaybackSample::new(current_time, duration));
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_samples_and_skips_comments() {
        let samples = parse("# t,d\n0.0,50\n\n 0.25 , 50 \n").unwrap();
        assert_eq!(
            samples,
            vec![PlaybackSample::new(0.0, 50.0), PlaybackSample::new(0.25, 50.0)]
        );
    }

    #[test]
    fn reports_line_numbers() {
        let err = parse("0,10\n1;10\n").unwrap_err();
        assert_eq!(err.to_string(), "trace line 2: expected `current_time,duration`");

        let err = parse("x,10").unwrap_err();
        assert_eq!(err.to_string(), "trace line 1: current_time is not a number");
    }
}
