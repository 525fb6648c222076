//! Subtitle timestamp parsing and formatting

use crate::macros::regex;

/// Format seconds as an SRT timestamp: `HH:MM:SS,mmm`
pub fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round() as i64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let s = total_secs % 60;
    let total_mins = total_secs / 60;
    let m = total_mins % 60;
    let h = total_mins / 60;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

/// Format an SRT timing line: `HH:MM:SS,mmm --> HH:MM:SS,mmm`
pub fn format_srt_range(start_sec: f64, end_sec: f64) -> String {
    format!("{} --> {}", format_srt_time(start_sec), format_srt_time(end_sec))
}

/// Parse `HH:MM:SS,mmm` (comma or dot before the millis) into seconds.
pub fn parse_srt_timestamp(s: &str) -> Option<f64> {
    let re = regex!(r"^\s*(\d{1,2}):(\d{2}):(\d{2})[,.](\d{1,3})\s*$");
    let caps = re.captures(s)?;
    let h: f64 = caps[1].parse().ok()?;
    let m: f64 = caps[2].parse().ok()?;
    let sec: f64 = caps[3].parse().ok()?;
    // A short millis field is a truncated fraction: "5" means 500ms.
    let ms_str = &caps[4];
    let ms: f64 = ms_str.parse().ok()?;
    let ms = ms * 10f64.powi(3 - ms_str.len() as i32);
    Some(h * 3600.0 + m * 60.0 + sec + ms / 1000.0)
}

/// Parse `MM:SS` or `HH:MM:SS` into seconds.
pub fn parse_colon_timestamp(s: &str) -> Option<f64> {
    let re = regex!(r"^\s*(?:(\d{1,2}):)?(\d{1,3}):(\d{2})\s*$");
    let caps = re.captures(s)?;
    let h: f64 = caps
        .get(1)
        .map(|m| m.as_str().parse().unwrap_or(0.0))
        .unwrap_or(0.0);
    let m: f64 = caps[2].parse().ok()?;
    let sec: f64 = caps[3].parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + sec)
}

/// Parse a timing range in any of the accepted formats:
/// `HH:MM:SS,mmm --> HH:MM:SS,mmm`, `MM:SS - MM:SS`, `HH:MM:SS - HH:MM:SS`.
///
/// Returns the endpoints without any monotonicity check; callers decide what
/// a reversed range means.
pub fn parse_timing_range(s: &str) -> Option<(f64, f64)> {
    let s = s.trim();
    if let Some((lhs, rhs)) = s.split_once("-->") {
        let start = parse_srt_timestamp(lhs)?;
        let end = parse_srt_timestamp(rhs)?;
        return Some((start, end));
    }
    // Plain dash split: both `MM:SS - MM:SS` and `HH:MM:SS - HH:MM:SS`.
    if let Some((lhs, rhs)) = s.split_once('-') {
        let start = parse_colon_timestamp(lhs)?;
        let end = parse_colon_timestamp(rhs)?;
        return Some((start, end));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(1.234), "00:00:01,234");
        assert_eq!(format_srt_time(3661.234), "01:01:01,234");
    }

    #[test]
    fn test_format_srt_range() {
        assert_eq!(
            format_srt_range(0.5, 2.0),
            "00:00:00,500 --> 00:00:02,000"
        );
    }

    #[test]
    fn test_parse_srt_timestamp() {
        assert_eq!(parse_srt_timestamp("00:00:01,234"), Some(1.234));
        assert_eq!(parse_srt_timestamp("01:01:01.500"), Some(3661.5));
        assert_eq!(parse_srt_timestamp("garbage"), None);
    }

    #[test]
    fn test_parse_colon_timestamp() {
        assert_eq!(parse_colon_timestamp("01:30"), Some(90.0));
        assert_eq!(parse_colon_timestamp("1:01:30"), Some(3690.0));
        assert_eq!(parse_colon_timestamp("xx:30"), None);
    }

    #[test]
    fn test_parse_timing_range_srt_form() {
        let (start, end) = parse_timing_range("00:00:05,000 --> 00:00:07,500").unwrap();
        assert_eq!(start, 5.0);
        assert_eq!(end, 7.5);
    }

    #[test]
    fn test_parse_timing_range_short_forms() {
        assert_eq!(parse_timing_range("01:10 - 01:20"), Some((70.0, 80.0)));
        assert_eq!(
            parse_timing_range("01:00:10 - 01:00:20"),
            Some((3610.0, 3620.0))
        );
    }

    #[test]
    fn test_parse_timing_range_reversed_is_returned_unchecked() {
        // Monotonicity is the caller's concern.
        assert_eq!(
            parse_timing_range("00:00:05,000 --> 00:00:02,000"),
            Some((5.0, 2.0))
        );
    }

    #[test]
    fn test_parse_timing_range_rejects_garbage() {
        assert_eq!(parse_timing_range("no timing here"), None);
        assert_eq!(parse_timing_range("12 - 34"), None);
    }

    #[test]
    fn test_round_trip() {
        for &secs in &[0.0, 1.5, 59.999, 3600.0, 7325.042] {
            let formatted = format_srt_time(secs);
            let parsed = parse_srt_timestamp(&formatted).unwrap();
            assert!((parsed - secs).abs() < 0.001, "{} -> {}", secs, parsed);
        }
    }
}
