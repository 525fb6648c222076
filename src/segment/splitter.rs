//! Media splitting stage
//!
//! For every planned window: invoke the transcoder to emit the media slice,
//! and write the overlapping subset of the reference subtitle as the
//! segment's SRT slice. Work is bounded by the configured concurrency; a
//! failed slice fails only its own segment.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{ChunkFormat, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::ffmpeg;
use crate::issue::{Issue, IssueKind, IssueLog};
use crate::segment::{SegmentRecord, SegmentStatus};
use crate::srt::{self, SrtEntry};

/// Run the split stage over all segments. Returns the records ordered by
/// part number; segments whose slice failed come back `Failed`.
pub async fn run_split_stage(
    segments: Vec<SegmentRecord>,
    config: &PipelineConfig,
    reference: Option<&[SrtEntry]>,
    issues: &IssueLog,
    cancelled: &Arc<AtomicBool>,
) -> Result<Vec<SegmentRecord>> {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
    let video_path = config.video_path.clone();
    let total = segments.len();

    info!("splitting {} segments from {}", total, video_path.display());

    let mut join_set = JoinSet::new();
    for mut segment in segments {
        let semaphore = semaphore.clone();
        let video_path = video_path.clone();
        let cancelled = cancelled.clone();
        let issues = issues.clone();
        let format = config.chunk_format;
        let force = config.force;
        // The reference slice is computed up front so the worker owns
        // everything it touches.
        let ref_slice: Option<Vec<SrtEntry>> = reference
            .map(|entries| srt::slice_overlapping(entries, segment.start_sec, segment.end_sec));

        join_set.spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            if cancelled.load(Ordering::Relaxed) {
                return segment;
            }

            segment.status = SegmentStatus::Splitting;
            match split_one(&mut segment, &video_path, format, force, ref_slice).await {
                Ok(()) => {
                    segment.status = SegmentStatus::Transcribing;
                }
                Err(e) => {
                    warn!("part {} split failed: {}", segment.part_number, e);
                    issues.push(
                        Issue::error(IssueKind::Split, e.to_string())
                            .with_part(segment.part_number),
                    );
                    segment.mark_failed(e.to_string());
                }
            }
            segment
        });
    }

    let mut done = Vec::with_capacity(total);
    while let Some(result) = join_set.join_next().await {
        let segment =
            result.map_err(|e| PipelineError::Split(format!("split worker panicked: {}", e)))?;
        done.push(segment);
    }
    done.sort_by_key(|s| s.part_number);

    if cancelled.load(Ordering::Relaxed) {
        return Err(PipelineError::Cancelled);
    }

    let failed = done.iter().filter(|s| s.is_failed()).count();
    info!("split stage done: {}/{} segments ok", total - failed, total);
    Ok(done)
}

async fn split_one(
    segment: &mut SegmentRecord,
    video_path: &PathBuf,
    format: ChunkFormat,
    force: bool,
    ref_slice: Option<Vec<SrtEntry>>,
) -> Result<()> {
    if segment.media_path.exists() && !force {
        debug!(
            "part {} media slice exists, skipping transcoder",
            segment.part_number
        );
    } else {
        ffmpeg::slice_media(
            video_path,
            &segment.media_path,
            segment.start_sec,
            segment.duration(),
            format,
        )
        .await?;
    }

    // The SRT slice is rewritten every run: it is derived purely from the
    // reference file and the window, and costs no external call.
    if let (Some(entries), Some(path)) = (ref_slice, &segment.reference_path) {
        std::fs::write(path, srt::serialize(&entries))?;
        debug!(
            "part {} reference slice: {} entries",
            segment.part_number,
            entries.len()
        );
    }

    Ok(())
}
