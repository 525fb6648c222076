//! Final subtitle emission and the run report
//!
//! Applies the output-wide time offset, assigns dense final ids, renders the
//! bilingual SRT with per-language color spans, and aggregates token costs
//! per model.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::issue::{Issue, IssueKind, Severity};
use crate::llm::pricing::{self, ModelCost};
use crate::merge::FinalEntry;
use crate::segment::{SegmentRecord, SegmentStatus, TokenRecord};
use crate::srt::time::format_srt_range;

/// Issues listed in the final report are bounded to this many.
pub const MAX_REPORT_ISSUES: usize = 50;

/// Shift every entry by the output offset; entries pushed before 0s are
/// dropped with a warning.
pub fn apply_output_offset(
    entries: Vec<FinalEntry>,
    offset_seconds: f64,
    issues: &mut Vec<Issue>,
) -> Vec<FinalEntry> {
    if offset_seconds == 0.0 {
        return entries;
    }
    entries
        .into_iter()
        .filter_map(|mut entry| {
            entry.start_sec += offset_seconds;
            entry.end_sec += offset_seconds;
            if entry.start_sec < 0.0 {
                issues.push(
                    Issue::warning(
                        IssueKind::Format,
                        format!(
                            "subtitle {} starts before 0s after output offset, dropping",
                            entry.original_id
                        ),
                    )
                    .with_subtitle_id(entry.original_id.clone()),
                );
                None
            } else {
                Some(entry)
            }
        })
        .collect()
}

/// Assign `final_id` sequentially from 1 in current order.
pub fn assign_final_ids(entries: &mut [FinalEntry]) {
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.final_id = i as u32 + 1;
    }
}

/// Render the bilingual SRT. The english line comes first, wrapped in its
/// color span and marked when it is a reference fallback; the target line
/// follows in its own color when present.
pub fn render_srt(entries: &[FinalEntry], config: &PipelineConfig) -> String {
    let target_language = config.target_language_lower();
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!("{}\n", entry.final_id));
        out.push_str(&format_srt_range(entry.start_sec, entry.end_sec));
        out.push('\n');

        if let Some(english) = entry.translations.get("english").and_then(|t| t.as_deref()) {
            let marker = if entry.is_fallback && config.mark_fallbacks {
                config.fallback_marker.as_str()
            } else {
                ""
            };
            out.push_str(&format!(
                "<font color=\"{}\">{}{}</font>\n",
                config.color_english, marker, english
            ));
        }
        if let Some(target) = entry.translations.get(&target_language).and_then(|t| t.as_deref()) {
            out.push_str(&format!(
                "<font color=\"{}\">{}</font>\n",
                config.color_target, target
            ));
        }
        out.push('\n');
    }
    out
}

/// Write the final file to the configured output path.
pub fn write_output(entries: &[FinalEntry], config: &PipelineConfig) -> Result<PathBuf> {
    let path = config.output_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, render_srt(entries, config))?;
    info!("wrote {} entries to {}", entries.len(), path.display());
    Ok(path)
}

/// Summary of one pipeline run
#[derive(Debug)]
pub struct PipelineReport {
    pub total_segments: usize,
    pub completed_segments: usize,
    pub failed_segments: usize,
    pub entries_emitted: usize,
    pub model_costs: Vec<ModelCost>,
    /// Sum over models with known rates; `None` when no rates were known
    pub total_cost_usd: Option<f64>,
    pub cost_per_minute_usd: Option<f64>,
    pub output_path: PathBuf,
    /// Bounded to [`MAX_REPORT_ISSUES`]; `issues_total` keeps the real count
    pub issues: Vec<Issue>,
    pub issues_total: usize,
    pub generated_at: DateTime<Utc>,
}

/// Build the final report from the finished segment records.
pub fn build_report(
    segments: &[SegmentRecord],
    entries_emitted: usize,
    video_duration_secs: Option<f64>,
    output_path: &Path,
    issues: &mut Vec<Issue>,
) -> PipelineReport {
    let all_tokens: Vec<TokenRecord> = segments
        .iter()
        .flat_map(|s| {
            s.transcription_tokens
                .iter()
                .chain(s.translation_tokens.iter())
                .cloned()
        })
        .collect();
    let model_costs = pricing::aggregate(&all_tokens);

    for cost in &model_costs {
        if cost.cost_usd.is_none() {
            issues.push(Issue::warning(
                IssueKind::Format,
                format!(
                    "no pricing known for model {}, reporting token counts only",
                    cost.model
                ),
            ));
        }
    }

    let known: Vec<f64> = model_costs.iter().filter_map(|c| c.cost_usd).collect();
    let total_cost_usd = if known.is_empty() {
        None
    } else {
        Some(known.iter().sum())
    };
    let cost_per_minute_usd = match (total_cost_usd, video_duration_secs) {
        (Some(total), Some(duration)) if duration > 0.0 => Some(total / (duration / 60.0)),
        _ => None,
    };

    let completed = segments
        .iter()
        .filter(|s| s.status == SegmentStatus::Completed)
        .count();
    let failed = segments.iter().filter(|s| s.is_failed()).count();

    let issues_total = issues.len();
    PipelineReport {
        total_segments: segments.len(),
        completed_segments: completed,
        failed_segments: failed,
        entries_emitted,
        model_costs,
        total_cost_usd,
        cost_per_minute_usd,
        output_path: output_path.to_path_buf(),
        issues: issues.iter().take(MAX_REPORT_ISSUES).cloned().collect(),
        issues_total,
        generated_at: Utc::now(),
    }
}

/// Log the report at info level.
pub fn log_report(report: &PipelineReport) {
    info!("pipeline finished at {}", report.generated_at.to_rfc3339());
    info!(
        "segments: {} total, {} completed, {} failed",
        report.total_segments, report.completed_segments, report.failed_segments
    );
    info!(
        "emitted {} subtitles to {}",
        report.entries_emitted,
        report.output_path.display()
    );
    for cost in &report.model_costs {
        match cost.cost_usd {
            Some(usd) => info!(
                "  {}: {} in / {} out tokens, ${:.4}",
                cost.model, cost.input_tokens, cost.output_tokens, usd
            ),
            None => info!(
                "  {}: {} in / {} out tokens (no pricing)",
                cost.model, cost.input_tokens, cost.output_tokens
            ),
        }
    }
    if let Some(total) = report.total_cost_usd {
        match report.cost_per_minute_usd {
            Some(per_minute) => info!("total cost ${:.4} (${:.4}/min)", total, per_minute),
            None => info!("total cost ${:.4}", total),
        }
    }
    let errors = report
        .issues
        .iter()
        .filter(|i| i.severity == Severity::Error)
        .count();
    if report.issues_total > 0 {
        warn!(
            "{} issues recorded ({} errors), showing up to {}:",
            report.issues_total, errors, MAX_REPORT_ISSUES
        );
        for issue in &report.issues {
            warn!("  {}", issue);
        }
    }
}
