//! Translation validation
//!
//! Scores a segment's parsed translation against its reference slice.
//! Coverage and parse-quality shortfalls are critical: they send the segment
//! back through the translator while retries remain. Timing drift is
//! critical too, except on the known-awkward final segment of a final
//! attempt, where it degrades to a warning.

use std::collections::BTreeSet;

use crate::srt::SrtEntry;
use crate::translate::parser::TranslationEntry;

/// Parse-stage errors per reference entry above this fail the segment.
pub const PARSE_ERROR_RATE_LIMIT: f64 = 0.05;

/// Parsed entries per reference entry below this fail the segment.
pub const COUNT_COVERAGE_FLOOR: f64 = 0.90;

/// Fraction of reference ids that must appear in the parsed set.
pub const ID_COVERAGE_FLOOR: f64 = 0.90;

/// Absolute tolerance for start offset and duration delta.
pub const TIMING_MARGIN_SECS: f64 = 3.0;

/// Timing mismatches per compared pair above this fail the segment.
pub const TIMING_MISMATCH_RATE_LIMIT: f64 = 0.10;

/// Validation verdict for one segment attempt
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// Failures that block completion
    pub critical: Vec<String>,
    /// Downgraded or informational findings
    pub warnings: Vec<String>,
    pub count_coverage: f64,
    pub id_coverage: f64,
    pub parse_error_rate: f64,
    pub timing_mismatch_rate: Option<f64>,
}

impl ValidationOutcome {
    pub fn passed(&self) -> bool {
        self.critical.is_empty()
    }
}

/// Validate parsed entries against the segment's reference slice.
///
/// `lenient_timing` applies the last-segment / final-retry concession: a
/// timing-consistency failure becomes a warning instead of a critical error.
pub fn validate_translation(
    entries: &[TranslationEntry],
    reference: &[SrtEntry],
    parse_error_count: usize,
    disable_timing: bool,
    lenient_timing: bool,
) -> ValidationOutcome {
    let ref_count = reference.len();
    let denom = ref_count.max(1) as f64;

    let mut critical = Vec::new();
    let mut warnings = Vec::new();

    let parse_error_rate = parse_error_count as f64 / denom;
    if parse_error_rate > PARSE_ERROR_RATE_LIMIT {
        critical.push(format!(
            "parse error rate {:.1}% exceeds {:.0}%",
            parse_error_rate * 100.0,
            PARSE_ERROR_RATE_LIMIT * 100.0
        ));
    }

    // Without a reference there is no anchor to measure coverage against.
    let (count_coverage, id_coverage) = if ref_count == 0 {
        (1.0, 1.0)
    } else {
        let count_coverage = entries.len() as f64 / denom;
        if count_coverage < COUNT_COVERAGE_FLOOR {
            critical.push(format!(
                "only {} of {} reference entries translated ({:.1}%)",
                entries.len(),
                ref_count,
                count_coverage * 100.0
            ));
        }

        let parsed_ids: BTreeSet<&str> =
            entries.iter().map(|e| e.original_id.as_str()).collect();
        let missing: Vec<u32> = reference
            .iter()
            .map(|r| r.id)
            .filter(|id| !parsed_ids.contains(id.to_string().as_str()))
            .collect();
        let id_coverage = 1.0 - missing.len() as f64 / denom;
        if id_coverage < ID_COVERAGE_FLOOR {
            critical.push(format!(
                "{} reference ids missing from the translation ({:.1}% coverage)",
                missing.len(),
                id_coverage * 100.0
            ));
        }
        (count_coverage, id_coverage)
    };

    let timing_mismatch_rate = if disable_timing || ref_count == 0 {
        None
    } else {
        let mut compared = 0usize;
        let mut mismatched = 0usize;
        for entry in entries {
            let (Some(start), Some(end)) = (entry.start_sec, entry.end_sec) else {
                continue;
            };
            let Some(reference_entry) = reference
                .iter()
                .find(|r| r.id.to_string() == entry.original_id)
            else {
                continue;
            };
            compared += 1;
            let start_delta = (start - reference_entry.start_sec).abs();
            let duration_delta = ((end - start) - reference_entry.duration()).abs();
            if start_delta > TIMING_MARGIN_SECS || duration_delta > TIMING_MARGIN_SECS {
                mismatched += 1;
            }
        }
        let rate = mismatched as f64 / compared.max(1) as f64;
        if rate > TIMING_MISMATCH_RATE_LIMIT {
            let finding = format!(
                "{} of {} timed entries drift more than {:.0}s from the reference",
                mismatched, compared, TIMING_MARGIN_SECS
            );
            if lenient_timing {
                warnings.push(format!("{} (tolerated on final attempt)", finding));
            } else {
                critical.push(finding);
            }
        }
        Some(rate)
    };

    ValidationOutcome {
        critical,
        warnings,
        count_coverage,
        id_coverage,
        parse_error_rate,
        timing_mismatch_rate,
    }
}
