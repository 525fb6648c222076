//! Translation stage
//!
//! For each transcribed segment: build the translation prompt, invoke the
//! text model, parse the semi-structured response, validate it against the
//! reference slice, and loop back to the model while the validator rejects
//! the output and retries remain. The loop is local to the worker that owns
//! the segment.

pub mod parser;
pub mod validate;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::issue::{Issue, IssueKind, IssueLog, Severity};
use crate::llm::TextModel;
use crate::segment::{SegmentRecord, SegmentStatus, TokenRecord};
use crate::srt::{self, SrtEntry};
use parser::TranslationEntry;

/// Run the translation stage over all segments. Segments already carrying
/// parsed data are completed without any external call.
pub async fn run_translation_stage(
    segments: Vec<SegmentRecord>,
    client: Arc<dyn TextModel>,
    config: &PipelineConfig,
    issues: &IssueLog,
    cancelled: &Arc<AtomicBool>,
) -> Result<Vec<SegmentRecord>> {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
    let total = segments.len();
    let last_part = segments.iter().map(|s| s.part_number).max().unwrap_or(0);
    info!("translating {} segments into {}", total, config.target_language);

    let mut join_set = JoinSet::new();
    for mut segment in segments {
        let semaphore = semaphore.clone();
        let client = client.clone();
        let issues = issues.clone();
        let cancelled = cancelled.clone();
        let config = config.clone();

        join_set.spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            if cancelled.load(Ordering::Relaxed) {
                return segment;
            }
            if segment.status == SegmentStatus::Prompting {
                let is_last = segment.part_number == last_part;
                translate_one(&mut segment, client.as_ref(), &config, is_last, &issues, &cancelled)
                    .await;
            }
            segment
        });
    }

    let mut done = Vec::with_capacity(total);
    while let Some(result) = join_set.join_next().await {
        let segment =
            result.map_err(|e| PipelineError::Translation(format!("worker panicked: {}", e)))?;
        done.push(segment);
    }
    done.sort_by_key(|s| s.part_number);

    if cancelled.load(Ordering::Relaxed) {
        return Err(PipelineError::Cancelled);
    }

    let ok = done
        .iter()
        .filter(|s| s.status == SegmentStatus::Completed)
        .count();
    info!("translation stage done: {}/{} segments completed", ok, total);
    Ok(done)
}

/// Compose the translation prompt from the adjusted transcript, the
/// reference slice and the target language.
pub fn build_translation_prompt(
    adjusted_transcript: &str,
    reference_srt: Option<&str>,
    target_language: &str,
) -> String {
    let target_lower = target_language.to_lowercase();
    let mut prompt = format!(
        "You are improving and translating subtitles.\n\n\
         Below is an LLM transcript of a media segment (timestamps are\n\
         absolute) and the original subtitle file for the same time range.\n\
         For EVERY subtitle in the original file, produce one <subline>\n\
         record inside a ```xml fenced block, in this exact shape:\n\n\
         <subline>\n\
         \x20 <original_number>ID</original_number>\n\
         \x20 <original_line>original text</original_line>\n\
         \x20 <original_timing>HH:MM:SS,mmm --> HH:MM:SS,mmm</original_timing>\n\
         \x20 <better_english_translation>improved english</better_english_translation>\n\
         \x20 <{target}_translation>{target} translation</{target}_translation>\n\
         </subline>\n\n\
         Keep the original numbering. If a subtitle should not appear at all\n\
         (a duplicate, or pure noise), put [SKIP THIS SUBTITLE] in both\n\
         translation tags instead of text.\n\n",
        target = target_lower
    );
    prompt.push_str("TRANSCRIPT:\n");
    prompt.push_str(adjusted_transcript);
    if let Some(reference) = reference_srt {
        prompt.push_str("\n\nORIGINAL SUBTITLES:\n");
        prompt.push_str(reference);
    }
    prompt
}

/// Invoke the text model, retrying API errors with exponential backoff.
async fn invoke_with_backoff(
    client: &dyn TextModel,
    model: &str,
    prompt: &str,
    retries: u32,
    cancelled: &Arc<AtomicBool>,
) -> Result<crate::llm::TextResponse> {
    let mut attempt = 0;
    loop {
        if cancelled.load(Ordering::Relaxed) {
            return Err(PipelineError::Cancelled);
        }
        match client.generate(model, prompt, cancelled.as_ref()).await {
            Ok(response) => return Ok(response),
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(e) => {
                if attempt >= retries {
                    return Err(e);
                }
                let backoff = Duration::from_secs(2u64.pow(attempt));
                warn!(
                    "translation call failed (attempt {}/{}), retrying in {:?}: {}",
                    attempt + 1,
                    retries + 1,
                    backoff,
                    e
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

async fn translate_one(
    segment: &mut SegmentRecord,
    client: &dyn TextModel,
    config: &PipelineConfig,
    is_last_segment: bool,
    issues: &IssueLog,
    cancelled: &Arc<AtomicBool>,
) {
    // Resume path: parsed data survives from a previous run.
    if !config.force && file_has_content(&segment.parsed_path) {
        debug!("part {} parsed data exists, skipping translation", segment.part_number);
        segment.status = SegmentStatus::Completed;
        return;
    }

    let adjusted = match std::fs::read_to_string(&segment.adjusted_transcript_path) {
        Ok(text) => text,
        Err(e) => {
            fail(segment, issues, format!("reading adjusted transcript: {}", e));
            return;
        }
    };
    let reference_srt = segment
        .reference_path
        .as_ref()
        .filter(|p| p.exists())
        .and_then(|p| std::fs::read_to_string(p).ok());
    let reference_entries: Vec<SrtEntry> = reference_srt
        .as_deref()
        .map(|content| {
            let mut sink = Vec::new();
            srt::parse_srt(content, 0.0, &mut sink)
        })
        .unwrap_or_default();

    let prompt = build_translation_prompt(
        &adjusted,
        reference_srt.as_deref(),
        &config.target_language,
    );

    for attempt in 0..=config.retries {
        if cancelled.load(Ordering::Relaxed) {
            return;
        }
        segment.status = SegmentStatus::Translating;

        let response = match invoke_with_backoff(
            client,
            &config.translation_model,
            &prompt,
            config.retries,
            cancelled,
        )
        .await
        {
            Ok(response) => response,
            Err(PipelineError::Cancelled) => return,
            Err(e) => {
                fail(segment, issues, format!("translation call failed: {}", e));
                return;
            }
        };

        segment.translation_tokens.push(TokenRecord {
            model: config.translation_model.clone(),
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        });
        if let Err(e) = std::fs::write(&segment.response_path, &response.text) {
            fail(segment, issues, format!("writing response: {}", e));
            return;
        }

        segment.status = SegmentStatus::Parsing;
        let mut parse_issues = Vec::new();
        let entries = parser::parse_response(
            &response.text,
            &config.target_language_lower(),
            segment.part_number,
            &mut parse_issues,
        );
        let parse_error_count = parse_issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count();
        issues.extend(
            parse_issues
                .into_iter()
                .map(|i| {
                    let mut i = i;
                    i.segment_part = Some(segment.part_number);
                    i
                })
                .collect(),
        );

        if let Err(e) = persist_entries(&segment.parsed_path, &entries) {
            fail(segment, issues, format!("writing parsed data: {}", e));
            return;
        }

        segment.status = SegmentStatus::Validating;
        let lenient = is_last_segment && attempt == config.retries;
        let outcome = validate::validate_translation(
            &entries,
            &reference_entries,
            parse_error_count,
            config.disable_timing_validation,
            lenient,
        );
        for warning in &outcome.warnings {
            issues.push(
                Issue::warning(IssueKind::Validation, warning.clone())
                    .with_part(segment.part_number),
            );
        }

        if outcome.passed() {
            debug!(
                "part {} validated: count {:.0}%, ids {:.0}%",
                segment.part_number,
                outcome.count_coverage * 100.0,
                outcome.id_coverage * 100.0
            );
            segment.status = SegmentStatus::Completed;
            return;
        }

        let summary = outcome.critical.join("; ");
        if attempt < config.retries {
            issues.push(
                Issue::warning(
                    IssueKind::Validation,
                    format!("attempt {} rejected, retrying: {}", attempt + 1, summary),
                )
                .with_part(segment.part_number),
            );
        } else {
            // Parsed data stays on disk for best-effort merging.
            fail(
                segment,
                issues,
                format!("translation invalid after {} attempts: {}", attempt + 1, summary),
            );
            return;
        }
    }
}

/// Persist parsed entries as the segment's JSON artifact.
pub fn persist_entries(path: &std::path::Path, entries: &[TranslationEntry]) -> Result<()> {
    let json = serde_json::to_string_pretty(entries)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Load a segment's parsed entries back from disk.
pub fn load_entries(path: &std::path::Path) -> Result<Vec<TranslationEntry>> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

fn fail(segment: &mut SegmentRecord, issues: &IssueLog, message: String) {
    issues.push(Issue::error(IssueKind::Translation, &message).with_part(segment.part_number));
    segment.mark_failed(message);
}

fn file_has_content(path: &std::path::Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkFormat;
    use crate::llm::{TextResponse, TokenUsage};
    use crate::segment::ArtifactLayout;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::Path;

    struct MockText {
        responses: Mutex<Vec<Result<TextResponse>>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl MockText {
        fn new(responses: Vec<Result<TextResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: std::sync::atomic::AtomicUsize::new(0),
            }
        }

        fn text(text: String) -> Result<TextResponse> {
            Ok(TextResponse {
                text,
                usage: TokenUsage { input_tokens: 1000, output_tokens: 400 },
            })
        }
    }

    #[async_trait]
    impl TextModel for MockText {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
            _cancelled: &std::sync::atomic::AtomicBool,
        ) -> Result<TextResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses.lock().remove(0)
        }
    }

    fn good_response(ids: std::ops::RangeInclusive<u32>) -> String {
        let mut out = String::from("```xml\n");
        for id in ids {
            out.push_str(&format!(
                "<subline>\n<original_number>{id}</original_number>\n\
                 <better_english_translation>english {id}</better_english_translation>\n\
                 <korean_translation>korean {id}</korean_translation>\n</subline>\n"
            ));
        }
        out.push_str("```\n");
        out
    }

    fn reference_srt(count: u32) -> String {
        let entries: Vec<crate::srt::SrtEntry> = (1..=count)
            .map(|id| crate::srt::SrtEntry {
                id,
                start_sec: id as f64 * 10.0,
                end_sec: id as f64 * 10.0 + 2.0,
                text: format!("ref {}", id),
            })
            .collect();
        srt::serialize(&entries)
    }

    fn setup(dir: &Path) -> (SegmentRecord, PipelineConfig) {
        let layout = ArtifactLayout::new(dir);
        layout.create_all().unwrap();
        let mut segment = SegmentRecord::new(1, 0.0, 100.0, &layout, ChunkFormat::Audio, true);
        segment.status = SegmentStatus::Prompting;
        std::fs::write(
            &segment.adjusted_transcript_path,
            "00:00:05,000 --> 00:00:07,000 - hello\n",
        )
        .unwrap();
        std::fs::write(segment.reference_path.as_ref().unwrap(), reference_srt(10)).unwrap();
        let config = PipelineConfig {
            video_path: dir.join("v.mkv"),
            target_language: "Korean".to_string(),
            retries: 1,
            max_concurrent: 2,
            ..Default::default()
        };
        (segment, config)
    }

    async fn run(
        segment: SegmentRecord,
        client: Arc<MockText>,
        config: &PipelineConfig,
        issues: &IssueLog,
    ) -> SegmentRecord {
        let cancelled = Arc::new(AtomicBool::new(false));
        let done = run_translation_stage(vec![segment], client, config, issues, &cancelled)
            .await
            .unwrap();
        done.into_iter().next().unwrap()
    }

    #[tokio::test]
    async fn test_valid_response_completes_segment() {
        let dir = tempfile::tempdir().unwrap();
        let (segment, config) = setup(dir.path());
        let client = Arc::new(MockText::new(vec![MockText::text(good_response(1..=10))]));
        let issues = IssueLog::new();

        let done = run(segment, client.clone(), &config, &issues).await;

        assert_eq!(done.status, SegmentStatus::Completed);
        assert!(done.response_path.exists());
        let entries = load_entries(&done.parsed_path).unwrap();
        assert_eq!(entries.len(), 10);
        assert_eq!(done.translation_tokens.len(), 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_low_coverage_retries_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let (segment, config) = setup(dir.path());
        let client = Arc::new(MockText::new(vec![
            MockText::text(good_response(1..=5)),
            MockText::text(good_response(1..=10)),
        ]));
        let issues = IssueLog::new();

        let done = run(segment, client.clone(), &config, &issues).await;

        assert_eq!(done.status, SegmentStatus::Completed);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(done.translation_tokens.len(), 2);
        assert!(issues
            .snapshot()
            .iter()
            .any(|i| i.message.contains("retrying")));
    }

    #[tokio::test]
    async fn test_exhausted_retries_fails_but_keeps_parsed_data() {
        let dir = tempfile::tempdir().unwrap();
        let (segment, config) = setup(dir.path());
        let client = Arc::new(MockText::new(vec![
            MockText::text(good_response(1..=5)),
            MockText::text(good_response(1..=5)),
        ]));
        let issues = IssueLog::new();

        let done = run(segment, client, &config, &issues).await;

        assert!(done.is_failed());
        // Best-effort data survives for the merger.
        let entries = load_entries(&done.parsed_path).unwrap();
        assert_eq!(entries.len(), 5);
    }

    #[tokio::test]
    async fn test_existing_parsed_data_skips_external_calls() {
        let dir = tempfile::tempdir().unwrap();
        let (segment, config) = setup(dir.path());
        std::fs::write(&segment.parsed_path, "[]").unwrap();
        let client = Arc::new(MockText::new(vec![]));
        let issues = IssueLog::new();

        let done = run(segment, client.clone(), &config, &issues).await;

        assert_eq!(done.status, SegmentStatus::Completed);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_api_errors_exhaust_backoff_and_fail() {
        let dir = tempfile::tempdir().unwrap();
        let (segment, mut config) = setup(dir.path());
        config.retries = 1;
        let client = Arc::new(MockText::new(vec![
            Err(PipelineError::Api("boom 1".into())),
            Err(PipelineError::Api("boom 2".into())),
        ]));
        let issues = IssueLog::new();

        let done = run(segment, client.clone(), &config, &issues).await;

        assert!(done.is_failed());
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_prompt_contains_contract() {
        let prompt = build_translation_prompt("T", Some("S"), "Korean");
        assert!(prompt.contains("<subline>"));
        assert!(prompt.contains("<korean_translation>"));
        assert!(prompt.contains("[SKIP THIS SUBTITLE]"));
        assert!(prompt.contains("TRANSCRIPT:\nT"));
        assert!(prompt.contains("ORIGINAL SUBTITLES:\nS"));
    }

    #[test]
    fn test_persist_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parsed.json");
        let mut issues = Vec::new();
        let entries = parser::parse_response(&good_response(1..=3), "korean", 2, &mut issues);
        persist_entries(&path, &entries).unwrap();
        let loaded = load_entries(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].original_id, "1");
        assert_eq!(loaded[0].source_chunk, 2);
    }
}
