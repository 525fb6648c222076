//! Transcription stage
//!
//! For each segment: upload the media slice to the multimodal model, collect
//! the streamed transcript, validate it, and retry on validation failure up
//! to the configured budget. API errors abort the segment immediately; only
//! validation failures are worth re-asking about. Every uploaded remote file
//! is deleted on every exit path.

pub mod rebase;
pub mod validate;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::issue::{Issue, IssueKind, IssueLog};
use crate::llm::{self, MediaModel};
use crate::segment::{SegmentRecord, SegmentStatus, TokenRecord};
use crate::srt;

/// Run the transcription stage over all segments. Segments already carrying
/// a raw transcript are rebased and advanced without any external call.
pub async fn run_transcription_stage(
    segments: Vec<SegmentRecord>,
    client: Arc<dyn MediaModel>,
    config: &PipelineConfig,
    issues: &IssueLog,
    cancelled: &Arc<AtomicBool>,
) -> Result<Vec<SegmentRecord>> {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
    let total = segments.len();
    info!("transcribing {} segments", total);

    let mut join_set = JoinSet::new();
    for mut segment in segments {
        let semaphore = semaphore.clone();
        let client = client.clone();
        let issues = issues.clone();
        let cancelled = cancelled.clone();
        let model = config.transcription_model.clone();
        let prompt = build_transcription_prompt(&config.source_languages);
        let mime_type = llm::mime_type_for(config.chunk_format);
        let force = config.force;
        let retries = config.transcription_retries;

        join_set.spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            if cancelled.load(Ordering::Relaxed) || segment.is_failed() {
                return segment;
            }
            transcribe_one(
                &mut segment,
                client.as_ref(),
                &model,
                &prompt,
                mime_type,
                force,
                retries,
                &issues,
                &cancelled,
            )
            .await;
            segment
        });
    }

    let mut done = Vec::with_capacity(total);
    while let Some(result) = join_set.join_next().await {
        let segment = result
            .map_err(|e| PipelineError::Transcription(format!("worker panicked: {}", e)))?;
        done.push(segment);
    }
    done.sort_by_key(|s| s.part_number);

    if cancelled.load(Ordering::Relaxed) {
        return Err(PipelineError::Cancelled);
    }

    let ok = done
        .iter()
        .filter(|s| s.status == SegmentStatus::Prompting)
        .count();
    info!("transcription stage done: {}/{} segments ok", ok, total);
    Ok(done)
}

/// Fixed transcript format requested from the model. The validator and the
/// rebaser both depend on it.
fn build_transcription_prompt(source_languages: &[String]) -> String {
    let language_clause = if source_languages.is_empty() {
        "the spoken language".to_string()
    } else {
        source_languages.join(" and ")
    };
    format!(
        "Transcribe all speech in this recording in {}.\n\
         Output plain text only, one utterance per line, each line formatted\n\
         exactly as `mm:ss - mm:ss - transcribed line` where the two\n\
         timestamps are the start and end of the utterance measured from the\n\
         beginning of the recording. Cover the entire recording. Do not skip\n\
         quiet sections, do not summarize, and do not add commentary.",
        language_clause
    )
}

#[allow(clippy::too_many_arguments)]
async fn transcribe_one(
    segment: &mut SegmentRecord,
    client: &dyn MediaModel,
    model: &str,
    prompt: &str,
    mime_type: &str,
    force: bool,
    retries: u32,
    issues: &IssueLog,
    cancelled: &Arc<AtomicBool>,
) {
    segment.status = SegmentStatus::Transcribing;

    // Resume path: a surviving raw transcript means the upload already
    // happened and validated on a previous run.
    if !force && file_has_content(&segment.raw_transcript_path) {
        debug!("part {} raw transcript exists, skipping upload", segment.part_number);
        if let Err(e) = write_adjusted(segment) {
            fail(segment, issues, format!("rebasing cached transcript: {}", e));
        } else {
            segment.status = SegmentStatus::Prompting;
        }
        return;
    }

    let reference_span = segment
        .reference_path
        .as_ref()
        .filter(|p| p.exists())
        .and_then(|p| std::fs::read_to_string(p).ok())
        .map(|content| {
            let mut sink = Vec::new();
            srt::span_seconds(&srt::parse_srt(&content, 0.0, &mut sink))
        });

    for attempt in 0..=retries {
        if cancelled.load(Ordering::Relaxed) {
            return;
        }

        let remote = match client
            .upload(&segment.media_path, mime_type, cancelled.as_ref())
            .await
        {
            Ok(remote) => remote,
            Err(PipelineError::Cancelled) => return,
            Err(e) => {
                fail(segment, issues, format!("upload failed: {}", e));
                return;
            }
        };

        let generated = client
            .generate_from_file(model, &remote, prompt, cancelled.as_ref())
            .await;
        // The remote file is deleted no matter how generation went,
        // cancellation included.
        if let Err(e) = client.delete_file(&remote).await {
            warn!("part {}: remote file cleanup failed: {}", segment.part_number, e);
        }

        let response = match generated {
            Ok(response) => response,
            Err(PipelineError::Cancelled) => return,
            Err(e) => {
                // API errors are not validation failures; no retry here.
                fail(segment, issues, format!("transcription call failed: {}", e));
                return;
            }
        };

        segment.transcription_tokens.push(TokenRecord {
            model: model.to_string(),
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        });

        match validate::validate_transcript(&response.text, segment.duration(), reference_span) {
            Ok(check) => {
                debug!(
                    "part {} transcript ok: {} ranges, {:.1}s span",
                    segment.part_number, check.range_count, check.span_secs
                );
                let written = std::fs::write(&segment.raw_transcript_path, &response.text)
                    .map_err(PipelineError::from)
                    .and_then(|_| write_adjusted(segment));
                if let Err(e) = written {
                    fail(segment, issues, format!("writing transcript: {}", e));
                    return;
                }
                segment.status = SegmentStatus::Prompting;
                return;
            }
            Err(reason) => {
                warn!(
                    "part {} transcript rejected (attempt {}/{}): {}",
                    segment.part_number,
                    attempt + 1,
                    retries + 1,
                    reason
                );
                let artifact = format!("REJECTED: {}\n\n{}", reason, response.text);
                if let Err(e) = std::fs::write(&segment.failed_transcript_path, artifact) {
                    warn!("part {}: failed-artifact write error: {}", segment.part_number, e);
                }
                if attempt == retries {
                    fail(
                        segment,
                        issues,
                        format!("transcript invalid after {} attempts: {}", retries + 1, reason),
                    );
                    return;
                }
            }
        }
    }
}

fn write_adjusted(segment: &SegmentRecord) -> Result<()> {
    let raw = std::fs::read_to_string(&segment.raw_transcript_path)?;
    let adjusted = rebase::rebase_transcript(&raw, segment.start_sec);
    std::fs::write(&segment.adjusted_transcript_path, adjusted)?;
    Ok(())
}

fn fail(segment: &mut SegmentRecord, issues: &IssueLog, message: String) {
    issues.push(Issue::error(IssueKind::Transcription, &message).with_part(segment.part_number));
    segment.mark_failed(message);
}

fn file_has_content(path: &std::path::Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkFormat;
    use crate::llm::{RemoteFile, TextResponse, TokenUsage};
    use crate::segment::ArtifactLayout;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;

    /// Scripted multimodal model: returns canned responses in order and
    /// counts uploads and deletions.
    struct MockMedia {
        responses: Mutex<Vec<Result<TextResponse>>>,
        uploads: AtomicUsize,
        deletions: AtomicUsize,
    }

    impl MockMedia {
        fn new(responses: Vec<Result<TextResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                uploads: AtomicUsize::new(0),
                deletions: AtomicUsize::new(0),
            }
        }

        fn text(text: &str) -> Result<TextResponse> {
            Ok(TextResponse {
                text: text.to_string(),
                usage: TokenUsage { input_tokens: 100, output_tokens: 50 },
            })
        }
    }

    #[async_trait]
    impl MediaModel for MockMedia {
        async fn upload(
            &self,
            _path: &Path,
            mime_type: &str,
            _cancelled: &std::sync::atomic::AtomicBool,
        ) -> Result<RemoteFile> {
            let n = self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(RemoteFile {
                name: format!("files/mock-{}", n),
                uri: format!("https://mock/files/mock-{}", n),
                mime_type: mime_type.to_string(),
            })
        }

        async fn generate_from_file(
            &self,
            _model: &str,
            _file: &RemoteFile,
            _prompt: &str,
            cancelled: &std::sync::atomic::AtomicBool,
        ) -> Result<TextResponse> {
            let next = self.responses.lock().remove(0);
            match next {
                // A hanging response emulates an in-flight call: it only
                // resolves through cancellation, like the real client.
                Err(PipelineError::Cancelled) => {
                    crate::llm::abort_on_cancel(std::future::pending::<()>(), cancelled).await?;
                    unreachable!("pending future resolved");
                }
                other => other,
            }
        }

        async fn delete_file(&self, _file: &RemoteFile) -> Result<()> {
            self.deletions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn valid_transcript() -> String {
        let mut out = String::new();
        for i in 0..6 {
            out.push_str(&format!("{:02}:{:02} - {:02}:{:02} - line {}\n", 0, i * 15, 0, i * 15 + 14, i));
        }
        out
    }

    fn setup(dir: &Path) -> (SegmentRecord, PipelineConfig) {
        let layout = ArtifactLayout::new(dir);
        layout.create_all().unwrap();
        let mut segment = SegmentRecord::new(1, 0.0, 100.0, &layout, ChunkFormat::Audio, false);
        segment.status = SegmentStatus::Transcribing;
        std::fs::write(&segment.media_path, b"fake mp3").unwrap();
        let config = PipelineConfig {
            video_path: dir.join("v.mkv"),
            target_language: "korean".to_string(),
            transcription_retries: 1,
            max_concurrent: 2,
            ..Default::default()
        };
        (segment, config)
    }

    async fn run(
        segment: SegmentRecord,
        client: Arc<MockMedia>,
        config: &PipelineConfig,
        issues: &IssueLog,
    ) -> SegmentRecord {
        let cancelled = Arc::new(AtomicBool::new(false));
        let done = run_transcription_stage(vec![segment], client, config, issues, &cancelled)
            .await
            .unwrap();
        done.into_iter().next().unwrap()
    }

    #[tokio::test]
    async fn test_valid_transcript_advances_and_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let (segment, config) = setup(dir.path());
        let client = Arc::new(MockMedia::new(vec![MockMedia::text(&valid_transcript())]));
        let issues = IssueLog::new();

        let done = run(segment, client.clone(), &config, &issues).await;

        assert_eq!(done.status, SegmentStatus::Prompting);
        assert!(done.raw_transcript_path.exists());
        let adjusted = std::fs::read_to_string(&done.adjusted_transcript_path).unwrap();
        assert!(adjusted.contains("-->"));
        assert_eq!(done.transcription_tokens.len(), 1);
        assert_eq!(client.uploads.load(Ordering::SeqCst), 1);
        assert_eq!(client.deletions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_then_valid_retries_and_keeps_failed_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let (segment, config) = setup(dir.path());
        let client = Arc::new(MockMedia::new(vec![
            MockMedia::text("too short"),
            MockMedia::text(&valid_transcript()),
        ]));
        let issues = IssueLog::new();

        let done = run(segment, client.clone(), &config, &issues).await;

        assert_eq!(done.status, SegmentStatus::Prompting);
        let failed = std::fs::read_to_string(&done.failed_transcript_path).unwrap();
        assert!(failed.starts_with("REJECTED:"));
        assert!(failed.contains("too short"));
        // One upload and one deletion per attempt.
        assert_eq!(client.uploads.load(Ordering::SeqCst), 2);
        assert_eq!(client.deletions.load(Ordering::SeqCst), 2);
        assert_eq!(done.transcription_tokens.len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fails_segment() {
        let dir = tempfile::tempdir().unwrap();
        let (segment, config) = setup(dir.path());
        let client = Arc::new(MockMedia::new(vec![
            MockMedia::text("bad"),
            MockMedia::text("still bad"),
        ]));
        let issues = IssueLog::new();

        let done = run(segment, client.clone(), &config, &issues).await;

        assert!(done.is_failed());
        assert!(done.error.as_ref().unwrap().contains("after 2 attempts"));
        assert_eq!(client.deletions.load(Ordering::SeqCst), 2);
        assert_eq!(issues.len(), 1);
    }

    #[tokio::test]
    async fn test_api_error_aborts_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let (segment, config) = setup(dir.path());
        let client = Arc::new(MockMedia::new(vec![Err(PipelineError::Api(
            "server exploded".into(),
        ))]));
        let issues = IssueLog::new();

        let done = run(segment, client.clone(), &config, &issues).await;

        assert!(done.is_failed());
        // Only one attempt despite the retry budget; the upload still got
        // cleaned up.
        assert_eq!(client.uploads.load(Ordering::SeqCst), 1);
        assert_eq!(client.deletions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_call_and_still_deletes_upload() {
        let dir = tempfile::tempdir().unwrap();
        let (segment, config) = setup(dir.path());
        // The scripted Cancelled response makes the mock hang until the flag
        // flips, standing in for a stuck in-flight request.
        let client = Arc::new(MockMedia::new(vec![Err(PipelineError::Cancelled)]));
        let issues = IssueLog::new();
        let cancelled = Arc::new(AtomicBool::new(false));

        let flag = cancelled.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(150)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let result =
            run_transcription_stage(vec![segment], client.clone(), &config, &issues, &cancelled)
                .await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        // The in-flight call was dropped, but its upload was still deleted.
        assert_eq!(client.uploads.load(Ordering::SeqCst), 1);
        assert_eq!(client.deletions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_transcript_makes_no_external_calls() {
        let dir = tempfile::tempdir().unwrap();
        let (segment, config) = setup(dir.path());
        std::fs::write(&segment.raw_transcript_path, valid_transcript()).unwrap();
        let client = Arc::new(MockMedia::new(vec![]));
        let issues = IssueLog::new();

        let done = run(segment, client.clone(), &config, &issues).await;

        assert_eq!(done.status, SegmentStatus::Prompting);
        assert!(done.adjusted_transcript_path.exists());
        assert_eq!(client.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reference_span_shortfall_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let (mut segment, config) = setup(dir.path());
        // Reference slice spanning 0..98s; the mock transcript spans 90s
        // which is within margin, so build one that spans far less.
        let layout = ArtifactLayout::new(dir.path());
        segment.reference_path = Some(layout.srt.join("part01.srt"));
        std::fs::write(
            segment.reference_path.as_ref().unwrap(),
            "1\n00:00:00,000 --> 00:00:02,000\na\n\n2\n00:01:36,000 --> 00:01:38,000\nb\n\n",
        )
        .unwrap();
        // Span 80s: clears the 75% chunk coverage floor but falls short of
        // 0.9 * 98s = 88.2s.
        let mut short = String::new();
        for i in 0u32..8 {
            let (a, b) = (i * 10, i * 10 + 10);
            short.push_str(&format!(
                "{:02}:{:02} - {:02}:{:02} - line\n",
                a / 60,
                a % 60,
                b / 60,
                b % 60
            ));
        }
        let client = Arc::new(MockMedia::new(vec![
            MockMedia::text(&short),
            MockMedia::text(&short),
        ]));
        let issues = IssueLog::new();

        let done = run(segment, client, &config, &issues).await;
        assert!(done.is_failed());
        assert!(done.error.as_ref().unwrap().contains("reference span"));
    }
}
