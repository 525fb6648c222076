//! Segment records and the intermediate artifact layout
//!
//! A [`SegmentRecord`] is the unit of work flowing through the pipeline. The
//! orchestrator owns the record vector; stages receive a record by exclusive
//! handoff, mutate it in place, and hand it back.

pub mod planner;
pub mod splitter;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::ChunkFormat;
use crate::error::Result;

/// Per-segment processing status, ordered by pipeline progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Pending,
    Splitting,
    Transcribing,
    Prompting,
    Translating,
    Parsing,
    Validating,
    Completed,
    Failed,
}

/// Token counts for one LLM attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Model that served the attempt
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One segment of the source media and everything the pipeline knows about it
#[derive(Debug, Clone)]
pub struct SegmentRecord {
    /// 1-based dense part number
    pub part_number: u32,
    /// Absolute window start, seconds
    pub start_sec: f64,
    /// Absolute window end, seconds; always greater than `start_sec`
    pub end_sec: f64,

    /// Media slice (mp3 or mp4)
    pub media_path: PathBuf,
    /// Reference SRT slice; `None` when no reference file was supplied
    pub reference_path: Option<PathBuf>,
    /// Raw transcript as returned by the transcription model
    pub raw_transcript_path: PathBuf,
    /// Rejected transcript kept for post-mortems
    pub failed_transcript_path: PathBuf,
    /// Transcript with timestamps rebased to absolute time
    pub adjusted_transcript_path: PathBuf,
    /// Raw translation response
    pub response_path: PathBuf,
    /// Parsed translation entries as JSON
    pub parsed_path: PathBuf,

    pub status: SegmentStatus,
    /// One record per transcription attempt
    pub transcription_tokens: Vec<TokenRecord>,
    /// One record per translation attempt
    pub translation_tokens: Vec<TokenRecord>,
    /// Last error, set when `status` is `Failed`
    pub error: Option<String>,
}

impl SegmentRecord {
    pub fn new(part_number: u32, start_sec: f64, end_sec: f64, layout: &ArtifactLayout, format: ChunkFormat, has_reference: bool) -> Self {
        let stem = part_stem(part_number);
        Self {
            part_number,
            start_sec,
            end_sec,
            media_path: layout
                .media
                .join(format!("{}.{}", stem, format.extension())),
            reference_path: has_reference.then(|| layout.srt.join(format!("{}.srt", stem))),
            raw_transcript_path: layout
                .raw_transcripts
                .join(format!("{}_raw.txt", stem)),
            failed_transcript_path: layout
                .raw_transcripts
                .join(format!("{}_raw_transcript_FAILED.txt", stem)),
            adjusted_transcript_path: layout
                .transcripts
                .join(format!("{}_adjusted.txt", stem)),
            response_path: layout.responses.join(format!("{}_response.txt", stem)),
            parsed_path: layout.parsed.join(format!("{}_parsed.json", stem)),
            status: SegmentStatus::Pending,
            transcription_tokens: Vec::new(),
            translation_tokens: Vec::new(),
            error: None,
        }
    }

    /// Window length in seconds.
    pub fn duration(&self) -> f64 {
        self.end_sec - self.start_sec
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = SegmentStatus::Failed;
        self.error = Some(error.into());
    }

    pub fn is_failed(&self) -> bool {
        self.status == SegmentStatus::Failed
    }
}

/// Zero-padded artifact stem: `part01`, `part02`, ...
pub fn part_stem(part_number: u32) -> String {
    format!("part{:02}", part_number)
}

/// The intermediate directory layout, derived in exactly one place so no two
/// stages can disagree on where an artifact lives.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    pub media: PathBuf,
    pub srt: PathBuf,
    pub raw_transcripts: PathBuf,
    pub transcripts: PathBuf,
    pub responses: PathBuf,
    pub parsed: PathBuf,
}

impl ArtifactLayout {
    pub fn new(intermediate_dir: &Path) -> Self {
        Self {
            media: intermediate_dir.join("media"),
            srt: intermediate_dir.join("srt"),
            raw_transcripts: intermediate_dir.join("raw_llm_transcripts"),
            transcripts: intermediate_dir.join("transcripts"),
            responses: intermediate_dir.join("responses"),
            parsed: intermediate_dir.join("parsed_data"),
        }
    }

    /// Create every artifact directory.
    pub fn create_all(&self) -> Result<()> {
        for dir in [
            &self.media,
            &self.srt,
            &self.raw_transcripts,
            &self.transcripts,
            &self.responses,
            &self.parsed,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
