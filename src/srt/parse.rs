//! Tolerant SRT parser
//!
//! Accepts the messy files found in the wild: UTF-8 BOM, CRLF line endings,
//! stray blank lines, and the occasional malformed block. Malformed blocks
//! are skipped with a warning rather than failing the whole file.

use crate::issue::{Issue, IssueKind};
use crate::srt::time::parse_srt_timestamp;
use crate::srt::SrtEntry;

/// Parse SRT content, applying a signed time offset to every entry.
///
/// Entries whose offset-adjusted start time becomes negative are dropped with
/// a warning, not clipped. Issues are appended to `issues`.
pub fn parse_srt(content: &str, offset_seconds: f64, issues: &mut Vec<Issue>) -> Vec<SrtEntry> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut entries = Vec::new();

    let mut line_number = 0usize;
    let mut lines = content.lines().map(|l| l.trim_end_matches('\r'));

    loop {
        // Skip blank separator lines, tracking position for diagnostics.
        let (id_line, id_line_no) = loop {
            match lines.next() {
                Some(line) => {
                    line_number += 1;
                    if !line.trim().is_empty() {
                        break (line, line_number);
                    }
                }
                None => return entries,
            }
        };

        let id: Option<u32> = id_line.trim().parse().ok();

        let timing_line = match lines.next() {
            Some(line) => {
                line_number += 1;
                line
            }
            None => {
                issues.push(
                    Issue::warning(
                        IssueKind::Format,
                        "subtitle block truncated at end of file",
                    )
                    .with_line(id_line_no)
                    .with_context(id_line),
                );
                return entries;
            }
        };

        let timing = parse_timing(timing_line);

        // Collect text lines until the next blank separator.
        let mut text_lines: Vec<&str> = Vec::new();
        for line in lines.by_ref() {
            line_number += 1;
            if line.trim().is_empty() {
                break;
            }
            text_lines.push(line);
        }

        let (id, (start, end)) = match (id, timing) {
            (Some(id), Some(timing)) => (id, timing),
            _ => {
                issues.push(
                    Issue::warning(IssueKind::Format, "skipping malformed subtitle block")
                        .with_line(id_line_no)
                        .with_context(&format!("{} / {}", id_line, timing_line)),
                );
                continue;
            }
        };

        if end <= start {
            issues.push(
                Issue::warning(
                    IssueKind::Format,
                    format!("subtitle {} has non-positive duration, skipping", id),
                )
                .with_subtitle_id(id.to_string())
                .with_line(id_line_no),
            );
            continue;
        }

        let start = start + offset_seconds;
        let end = end + offset_seconds;
        if start < 0.0 {
            issues.push(
                Issue::warning(
                    IssueKind::Format,
                    format!(
                        "subtitle {} starts before 0s after offset {:+.3}s, dropping",
                        id, offset_seconds
                    ),
                )
                .with_subtitle_id(id.to_string())
                .with_line(id_line_no),
            );
            continue;
        }

        entries.push(SrtEntry {
            id,
            start_sec: start,
            end_sec: end,
            text: text_lines.join("\n"),
        });
    }
}

fn parse_timing(line: &str) -> Option<(f64, f64)> {
    let (lhs, rhs) = line.split_once("-->")?;
    Some((parse_srt_timestamp(lhs)?, parse_srt_timestamp(rhs)?))
}
