//! Pipeline orchestrator
//!
//! Runs the stages strictly in order — split, transcribe (with rebase),
//! translate (with the parse/validate loop), merge, repair, emit — joining
//! every worker of a stage before the next stage starts. Segments move
//! through stages by exclusive handoff; the issue log is the only shared
//! mutable structure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::ffmpeg;
use crate::issue::{Issue, IssueKind, IssueLog};
use crate::llm::gemini::GeminiClient;
use crate::llm::openai::OpenAiClient;
use crate::llm::{provider_for_model, MediaModel, Provider, TextModel};
use crate::merge::{self, repair, MergeOptions};
use crate::output;
use crate::segment::{planner, splitter, ArtifactLayout, SegmentRecord};
use crate::srt::{self, SrtEntry};
use crate::transcribe;
use crate::translate::{self, parser::TranslationEntry};

/// Run the whole pipeline. Returns the final report; any error is fatal for
/// the run (per-segment failures are not errors at this level).
pub async fn run_pipeline(config: PipelineConfig) -> Result<output::PipelineReport> {
    config.validate()?;
    let issues = IssueLog::new();
    let cancelled = Arc::new(AtomicBool::new(false));
    spawn_cancel_listener(cancelled.clone());

    ffmpeg::check_available().await?;

    let layout = ArtifactLayout::new(&config.intermediate_dir);
    layout.create_all()?;

    let duration = probe_duration_cached(&config).await?;
    info!(
        "input {} is {:.1}s long",
        config.video_path.display(),
        duration
    );

    // Reference subtitles are parsed exactly once, offset applied on read.
    let reference: Option<Vec<SrtEntry>> = match &config.srt_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            let mut parse_issues = Vec::new();
            let entries = srt::parse_srt(&content, config.input_offset_seconds, &mut parse_issues);
            issues.extend(parse_issues);
            info!("reference subtitle: {} entries from {}", entries.len(), path.display());
            Some(entries)
        }
        None => None,
    };

    let segments = build_segments(&config, &layout, duration, reference.is_some())?;
    info!("planned {} segments", segments.len());

    // S1: split.
    let segments = splitter::run_split_stage(
        segments,
        &config,
        reference.as_deref(),
        &issues,
        &cancelled,
    )
    .await?;
    if segments.iter().all(|s| s.is_failed()) {
        return Err(PipelineError::Split("every segment failed to split".into()));
    }

    // S2 + S3: transcribe and rebase.
    let gemini_key = config
        .api_keys
        .gemini
        .clone()
        .ok_or_else(|| PipelineError::Config("Gemini API key missing".into()))?;
    let media_client: Arc<dyn MediaModel> = Arc::new(GeminiClient::new(
        gemini_key.clone(),
        Duration::from_secs(config.transcription_timeout_secs),
    )?);
    let segments =
        transcribe::run_transcription_stage(segments, media_client, &config, &issues, &cancelled)
            .await?;

    // S4-S6: translate, parse, validate.
    let translation_timeout = Duration::from_secs(config.translation_timeout_secs);
    let text_client: Arc<dyn TextModel> = match provider_for_model(&config.translation_model) {
        Provider::Gemini => Arc::new(GeminiClient::new(gemini_key, translation_timeout)?),
        Provider::OpenAi => {
            let openai_key = config
                .api_keys
                .openai
                .clone()
                .ok_or_else(|| PipelineError::Config("OpenAI API key missing".into()))?;
            Arc::new(OpenAiClient::new(openai_key, translation_timeout)?)
        }
    };
    let segments =
        translate::run_translation_stage(segments, text_client, &config, &issues, &cancelled)
            .await?;

    // S7-S9 run once over everything the segments produced. Failed segments
    // contribute their last parsed data on a best-effort basis.
    let mut stage_issues = Vec::new();
    let all_entries = gather_parsed_entries(&segments, &mut stage_issues);

    let mut finals = merge::merge_entries(
        all_entries,
        reference.as_deref().unwrap_or(&[]),
        MergeOptions {
            use_response_timings: config.use_response_timings,
        },
        &mut stage_issues,
    )?;
    repair::repair_timing(&mut finals, &mut stage_issues);
    let mut finals =
        output::apply_output_offset(finals, config.output_offset_seconds, &mut stage_issues);
    output::assign_final_ids(&mut finals);
    let output_path = output::write_output(&finals, &config)?;
    issues.extend(stage_issues);

    let mut all_issues = issues.snapshot();
    let report = output::build_report(
        &segments,
        finals.len(),
        Some(duration),
        &output_path,
        &mut all_issues,
    );
    output::log_report(&report);
    Ok(report)
}

fn spawn_cancel_listener(cancelled: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, draining in-flight work");
            cancelled.store(true, Ordering::Relaxed);
        }
    });
}

/// Probe the input duration, cached in the intermediate directory so a
/// re-run with `force=false` makes no external call at all.
async fn probe_duration_cached(config: &PipelineConfig) -> Result<f64> {
    let cache_path = config.intermediate_dir.join("duration.json");
    if !config.force {
        if let Some(duration) = read_duration_cache(&cache_path) {
            return Ok(duration);
        }
    }
    let duration = ffmpeg::probe_duration(&config.video_path).await?;
    let payload = serde_json::json!({ "duration_secs": duration });
    std::fs::write(&cache_path, payload.to_string())?;
    Ok(duration)
}

fn read_duration_cache(path: &std::path::Path) -> Option<f64> {
    let content = std::fs::read_to_string(path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&content).ok()?;
    value.get("duration_secs")?.as_f64().filter(|d| *d > 0.0)
}

/// Plan windows and materialize segment records, honoring
/// `process_only_part`.
fn build_segments(
    config: &PipelineConfig,
    layout: &ArtifactLayout,
    duration: f64,
    has_reference: bool,
) -> Result<Vec<SegmentRecord>> {
    let windows = planner::plan_windows(duration, config.chunk_duration, config.chunk_overlap);
    let mut segments: Vec<SegmentRecord> = windows
        .iter()
        .enumerate()
        .map(|(i, window)| {
            SegmentRecord::new(
                i as u32 + 1,
                window.start_sec,
                window.end_sec,
                layout,
                config.chunk_format,
                has_reference,
            )
        })
        .collect();

    if let Some(part) = config.process_only_part {
        segments.retain(|s| s.part_number == part);
        if segments.is_empty() {
            return Err(PipelineError::Config(format!(
                "process_only_part={} does not match any of the {} planned segments",
                part,
                windows.len()
            )));
        }
        info!("restricted to part {}", part);
    }
    Ok(segments)
}

/// Load every segment's parsed entries from disk. Completed segments must
/// have them; failed segments may still have a usable last attempt.
fn gather_parsed_entries(
    segments: &[SegmentRecord],
    issues: &mut Vec<Issue>,
) -> Vec<TranslationEntry> {
    let mut all = Vec::new();
    for segment in segments {
        let has_data = std::fs::metadata(&segment.parsed_path)
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !has_data {
            if segment.is_failed() {
                issues.push(
                    Issue::warning(
                        IssueKind::Merge,
                        "failed segment left no parsed data, skipping",
                    )
                    .with_part(segment.part_number),
                );
            }
            continue;
        }
        match translate::load_entries(&segment.parsed_path) {
            Ok(entries) => {
                if segment.is_failed() {
                    issues.push(
                        Issue::warning(
                            IssueKind::Merge,
                            format!(
                                "using {} best-effort entries from failed segment",
                                entries.len()
                            ),
                        )
                        .with_part(segment.part_number),
                    );
                }
                all.extend(entries);
            }
            Err(e) => issues.push(
                Issue::error(
                    IssueKind::Merge,
                    format!("unreadable parsed data: {}", e),
                )
                .with_part(segment.part_number),
            ),
        }
    }
    all
}
