//! Timestamp rebasing
//!
//! Transcripts come back with chunk-relative `mm:ss` ranges. Rebasing shifts
//! them by the segment's absolute start and rewrites them in SRT form so the
//! translation prompt and the reference slice speak the same timeline.

use crate::macros::regex;
use crate::srt::time::format_srt_range;

/// Rewrite the first `mm:ss - mm:ss` range on each line as an absolute
/// `HH:MM:SS,mmm --> HH:MM:SS,mmm` range. Lines without a range pass through
/// unchanged.
pub fn rebase_transcript(raw: &str, offset_sec: f64) -> String {
    let re = regex!(r"(\d{1,3}):(\d{2})\s*-\s*(\d{1,3}):(\d{2})");
    let mut out = String::with_capacity(raw.len());
    for line in raw.lines() {
        let rebased = re.replace(line, |caps: &regex::Captures<'_>| {
            let start = caps[1].parse::<f64>().unwrap() * 60.0 + caps[2].parse::<f64>().unwrap();
            let end = caps[3].parse::<f64>().unwrap() * 60.0 + caps[4].parse::<f64>().unwrap();
            format_srt_range(start + offset_sec, end + offset_sec)
        });
        out.push_str(&rebased);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebase_shifts_by_offset() {
        let raw = "00:05 - 00:10 - hello there\n";
        let adjusted = rebase_transcript(raw, 900.0);
        assert_eq!(
            adjusted,
            "00:15:05,000 --> 00:15:10,000 - hello there\n"
        );
    }

    #[test]
    fn test_untimed_lines_pass_through() {
        let raw = "a narrator speaks\n01:00 - 01:02 - timed\nclosing note\n";
        let adjusted = rebase_transcript(raw, 0.0);
        assert_eq!(
            adjusted,
            "a narrator speaks\n00:01:00,000 --> 00:01:02,000 - timed\nclosing note\n"
        );
    }

    #[test]
    fn test_only_first_range_per_line_is_rewritten() {
        let raw = "00:05 - 00:10 also mentions 00:20 - 00:25\n";
        let adjusted = rebase_transcript(raw, 0.0);
        assert!(adjusted.contains("00:00:05,000 --> 00:00:10,000"));
        assert!(adjusted.contains("00:20 - 00:25"));
    }

    #[test]
    fn test_minutes_past_the_hour() {
        let raw = "75:00 - 75:30 - late line\n";
        let adjusted = rebase_transcript(raw, 0.0);
        assert_eq!(adjusted, "01:15:00,000 --> 01:15:30,000 - late line\n");
    }
}
