//! Transcript validation
//!
//! A transcript is only trusted when it contains enough timed lines and its
//! time span covers most of the chunk. When a reference slice is available
//! its span sets an additional floor: a transcript much shorter than the
//! reference means the model stopped early.

use crate::macros::regex;

/// Minimum number of valid `mm:ss - mm:ss` ranges.
pub const MIN_RANGES: usize = 5;

/// The transcript span must cover at least this fraction of the chunk.
pub const COVERAGE_RATIO: f64 = 0.75;

/// Allowed shortfall against the reference span.
pub const SPAN_MARGIN: f64 = 0.10;

/// Reference spans at or below this are too small to compare against.
const MIN_REFERENCE_SPAN: f64 = 1.0;

/// Summary of a transcript that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptCheck {
    pub range_count: usize,
    pub span_secs: f64,
}

/// Extract every `mm:ss - mm:ss` range, one per line, in document order.
pub fn extract_ranges(text: &str) -> Vec<(f64, f64)> {
    let re = regex!(r"(\d{1,3}):(\d{2})\s*-\s*(\d{1,3}):(\d{2})");
    let mut ranges = Vec::new();
    for line in text.lines() {
        if let Some(caps) = re.captures(line) {
            let start = caps[1].parse::<f64>().unwrap() * 60.0 + caps[2].parse::<f64>().unwrap();
            let end = caps[3].parse::<f64>().unwrap() * 60.0 + caps[4].parse::<f64>().unwrap();
            ranges.push((start, end));
        }
    }
    ranges
}

/// Validate a raw transcript. `Err` carries a human-readable reason that is
/// prepended to the failed-transcript artifact.
pub fn validate_transcript(
    text: &str,
    chunk_duration: f64,
    reference_span: Option<f64>,
) -> std::result::Result<TranscriptCheck, String> {
    let ranges = extract_ranges(text);

    if ranges.len() < MIN_RANGES {
        return Err(format!(
            "only {} timed ranges found, need at least {}",
            ranges.len(),
            MIN_RANGES
        ));
    }

    let first_start = ranges.first().unwrap().0;
    let last_end = ranges.last().unwrap().1;
    let span = last_end - first_start;

    let required = COVERAGE_RATIO * chunk_duration;
    if span < required {
        return Err(format!(
            "span {:.1}s covers less than {:.0}% of the {:.1}s chunk (need {:.1}s)",
            span,
            COVERAGE_RATIO * 100.0,
            chunk_duration,
            required
        ));
    }

    if let Some(ref_span) = reference_span {
        if ref_span > MIN_REFERENCE_SPAN {
            let floor = (1.0 - SPAN_MARGIN) * ref_span;
            if span < floor {
                return Err(format!(
                    "span {:.1}s falls short of the reference span {:.1}s (floor {:.1}s)",
                    span, ref_span, floor
                ));
            }
        }
    }

    Ok(TranscriptCheck {
        range_count: ranges.len(),
        span_secs: span,
    })
}
