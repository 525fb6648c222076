//! Final timing repair
//!
//! Two fixups run over the merged entries: overlap elimination (shorten the
//! earlier entry, never shift the later one) and duration clamping. Clamping
//! runs after the overlap passes and may reintroduce overlap; that is the
//! accepted terminal state, traded against violating the duration bounds.

use tracing::debug;

use crate::issue::{Issue, IssueKind};
use crate::merge::FinalEntry;

/// Maximum number of overlap-correction passes.
pub const MAX_PASSES: usize = 10;

/// Bounds on the duration of any emitted subtitle, seconds.
pub const MIN_DURATION: f64 = 0.5;
pub const MAX_DURATION: f64 = 7.0;

/// Gap left between a shortened entry and its successor, seconds.
pub const OVERLAP_GAP: f64 = 0.05;

/// Repair timings in place: eliminate overlaps, clamp durations, and re-sort
/// by numeric original id.
pub fn repair_timing(entries: &mut [FinalEntry], issues: &mut Vec<Issue>) {
    entries.sort_by(|a, b| a.start_sec.total_cmp(&b.start_sec));

    for pass in 0..MAX_PASSES {
        let mut changed = 0usize;
        for i in 0..entries.len().saturating_sub(1) {
            let next_start = entries[i + 1].start_sec;
            if entries[i].end_sec <= next_start {
                continue;
            }

            let target = (entries[i].start_sec + MAX_DURATION).min(next_start - OVERLAP_GAP);
            if target - entries[i].start_sec >= MIN_DURATION {
                debug!(
                    "pass {}: shortening {} from {:.3} to {:.3}",
                    pass + 1,
                    entries[i].original_id,
                    entries[i].end_sec,
                    target
                );
                entries[i].end_sec = target;
                changed += 1;
            } else {
                // Shortening below the minimum duration is worse than the
                // overlap itself.
                issues.push(
                    Issue::warning(
                        IssueKind::Format,
                        format!(
                            "cannot shorten subtitle {} below {:.1}s, overlap with {} remains",
                            entries[i].original_id,
                            MIN_DURATION,
                            entries[i + 1].original_id
                        ),
                    )
                    .with_subtitle_id(entries[i].original_id.clone()),
                );
            }
        }
        if changed == 0 {
            break;
        }
    }

    // Duration clamping. May reintroduce overlap; no further pass runs.
    for entry in entries.iter_mut() {
        let duration = entry.end_sec - entry.start_sec;
        if duration < MIN_DURATION {
            entry.end_sec = entry.start_sec + MIN_DURATION;
        } else if duration > MAX_DURATION {
            entry.end_sec = entry.start_sec + MAX_DURATION;
        }
    }

    entries.sort_by(|a, b| {
        let x = a.original_id.trim().parse::<i64>();
        let y = b.original_id.trim().parse::<i64>();
        match (x, y) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => a.original_id.cmp(&b.original_id),
        }
    });
}
