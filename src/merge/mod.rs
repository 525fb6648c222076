//! Cross-segment merge
//!
//! Adjacent segments overlap, so the same reference id can come back from
//! two segments. The later segment saw the subtitle with more surrounding
//! context (it sits in that segment's upstream overlap region), so the
//! highest source chunk wins. Skip-marked entries are dropped, timings are
//! chosen per configuration, and missing english text falls back to the
//! reference.

pub mod repair;

use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::issue::{Issue, IssueKind};
use crate::srt::SrtEntry;
use crate::translate::parser::TranslationEntry;

/// A translation value equal to this marker excludes the entry entirely.
pub const SKIP_MARKER: &str = "[SKIP THIS SUBTITLE]";

/// Where a final entry's timings came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingSource {
    /// Reference subtitle file
    Original,
    /// Parsed LLM response timing
    Llm,
}

/// One entry of the final bilingual subtitle
#[derive(Debug, Clone)]
pub struct FinalEntry {
    pub original_id: String,
    /// Assigned at emission, dense from 1
    pub final_id: u32,
    pub start_sec: f64,
    pub end_sec: f64,
    pub translations: BTreeMap<String, Option<String>>,
    /// True when the english text came from the reference, not the model
    pub is_fallback: bool,
    pub timing_source: TimingSource,
}

/// Options controlling the merge
#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    pub use_response_timings: bool,
}

/// Merge parsed entries from all segments into final entries.
pub fn merge_entries(
    all: Vec<TranslationEntry>,
    reference: &[SrtEntry],
    options: MergeOptions,
    issues: &mut Vec<Issue>,
) -> Result<Vec<FinalEntry>> {
    if !options.use_response_timings && reference.is_empty() {
        return Err(PipelineError::Merge(
            "no reference subtitles available and response timings are disabled".into(),
        ));
    }

    // Highest source chunk wins per id.
    let mut best: BTreeMap<String, TranslationEntry> = BTreeMap::new();
    for entry in all {
        match best.get(&entry.original_id) {
            Some(existing) if existing.source_chunk >= entry.source_chunk => {}
            _ => {
                best.insert(entry.original_id.clone(), entry);
            }
        }
    }
    debug!("{} distinct ids after overlap resolution", best.len());

    let by_id: BTreeMap<String, &SrtEntry> = reference
        .iter()
        .map(|r| (r.id.to_string(), r))
        .collect();

    let mut finals = Vec::new();
    for (id, entry) in best {
        if is_skipped(&entry) {
            issues.push(
                Issue::info(
                    IssueKind::Merge,
                    format!("subtitle {} skipped by the translator", id),
                )
                .with_subtitle_id(id.clone()),
            );
            continue;
        }

        let reference_entry = by_id.get(&id).copied();

        let llm_times = entry.start_sec.zip(entry.end_sec);
        let (start_sec, end_sec, timing_source) = if options.use_response_timings {
            match (llm_times, reference_entry) {
                (Some((start, end)), _) => (start, end, TimingSource::Llm),
                (None, Some(r)) => (r.start_sec, r.end_sec, TimingSource::Original),
                (None, None) => {
                    issues.push(
                        Issue::warning(
                            IssueKind::Merge,
                            format!("subtitle {} has no usable timing, dropping", id),
                        )
                        .with_subtitle_id(id.clone()),
                    );
                    continue;
                }
            }
        } else {
            match reference_entry {
                Some(r) => (r.start_sec, r.end_sec, TimingSource::Original),
                None => {
                    issues.push(
                        Issue::warning(
                            IssueKind::Merge,
                            format!("subtitle {} not found in the reference, dropping", id),
                        )
                        .with_subtitle_id(id.clone()),
                    );
                    continue;
                }
            }
        };

        let mut translations = entry.translations.clone();
        let mut is_fallback = false;
        let has_english = entry.translation("english").is_some();
        if !has_english {
            if let Some(r) = reference_entry {
                translations.insert("english".to_string(), Some(r.text.clone()));
                is_fallback = true;
            }
        }

        finals.push(FinalEntry {
            original_id: id,
            final_id: 0,
            start_sec,
            end_sec,
            translations,
            is_fallback,
            timing_source,
        });
    }

    if finals.is_empty() {
        return Err(PipelineError::Merge(
            "no subtitle entries survived the merge".into(),
        ));
    }
    info!("merged {} final entries", finals.len());
    Ok(finals)
}

/// Exact full-field match on either translation; partial matches pass.
fn is_skipped(entry: &TranslationEntry) -> bool {
    entry
        .translations
        .values()
        .any(|t| t.as_deref().map(str::trim) == Some(SKIP_MARKER))
}
