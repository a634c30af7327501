//! Encoder progress parsing.

/// Turns encoder output lines into elapsed output time.
pub trait ProgressParser: Send + Sync {
    /// Elapsed output seconds reported by `line`, if it carries any.
    fn parse_line(&self, line: &str) -> Option<f64>;
}

/// Parser for ffmpeg's `-progress` key/value output.
///
/// Both `out_time_ms` and `out_time_us` hold microseconds (the former is
/// misnamed upstream).
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegProgress;

impl ProgressParser for FfmpegProgress {
    fn parse_line(&self, line: &str) -> Option<f64> {
        let (key, value) = line.trim().split_once('=')?;
        match key {
            "out_time_ms" | "out_time_us" => {
                let micros: i64 = value.trim().parse().ok()?;
                Some(micros.max(0) as f64 / 1_000_000.0)
            }
            _ => None,
        }
    }
}

/// Whether `line` is part of the `-progress` block rather than a log line.
pub(crate) fn is_progress_line(line: &str) -> bool {
    line.split_once('=').is_some_and(|(key, _)| {
        !key.is_empty()
            && key
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
    })
}

/// Completion percentage for `elapsed` seconds of a `duration` long media.
///
/// Unknown durations report 0.
pub fn percent(elapsed: f64, duration: f64) -> f32 {
    if duration <= 0.0 {
        return 0.0;
    }
    (elapsed / duration * 100.0).clamp(0.0, 100.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_out_time_markers() {
        let parser = FfmpegProgress;
        assert_eq!(parser.parse_line("out_time_ms=5000000"), Some(5.0));
        assert_eq!(parser.parse_line("out_time_us=2500000\n"), Some(2.5));
        assert_eq!(parser.parse_line("out_time=00:00:05.000000"), None);
        assert_eq!(parser.parse_line("progress=continue"), None);
        assert_eq!(parser.parse_line("out_time_ms=N/A"), None);
    }

    #[test]
    fn percent_of_duration() {
        assert_eq!(percent(5.0, 10.0), 50.0);
        assert_eq!(percent(12.0, 10.0), 100.0);
        assert_eq!(percent(3.0, 0.0), 0.0);
    }

    #[test]
    fn separates_progress_from_log_lines() {
        assert!(is_progress_line("bitrate=N/A"));
        assert!(is_progress_line("out_time_us=0"));
        assert!(!is_progress_line("pipe:3: Invalid data found when processing input"));
        assert!(!is_progress_line("Error opening output file x=y"));
    }
}
